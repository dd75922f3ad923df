// ABOUTME: Stack-based OO-CPS evaluator; continuations and dynamic frames share one stack

use crate::analyzer::{analyze, AccessTarget, Analyzed};
use crate::env::{self, Env, Frame, Namespace};
use crate::error::EvlError;
use crate::eval::{
    call_primitive, classify_head, closure_frame, not_a_macro_position, pair_arguments,
    self_evaluating, spread_arguments, test_boolean, AbortFlag, CallKind, Callable, Head,
};
use crate::pairing;
use crate::value::{Body, ClosureData, Outcome, Scope, Value, VariableData};
use std::collections::VecDeque;
use std::rc::Rc;

/// The continuation records of the object-oriented CPS evaluator, minus
/// their `next` links: the machine stack is the chain.
enum Cont {
    TestBranch {
        consequent: Value,
        alternative: Value,
        env: Env,
    },
    Sequence {
        rest: VecDeque<Value>,
        env: Env,
    },
    OperatorValue {
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
    },
    Argument {
        callable: Callable,
        pending: VecDeque<Value>,
        done: Vec<Value>,
        kind: CallKind,
        env: Env,
    },
    StoreValue {
        target: AccessTarget,
        variable: Rc<VariableData>,
        env: Env,
    },
    Expansion {
        env: Env,
    },
    ForEachFunction {
        list: Value,
        env: Env,
    },
    ForEachRun {
        callable: Callable,
    },
}

/// A stack element is a continuation, a dynamic frame visible only to
/// lookups, or the delimiter of a (possibly nested) run.
enum StackElem {
    Cont(Cont),
    DynFrame(Rc<Frame>),
    EndMarker,
}

struct Machine {
    stack: Vec<StackElem>,
    abort: AbortFlag,
}

pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    let mut machine = Machine {
        stack: Vec::new(),
        abort: abort.clone(),
    };
    machine.stack.push(StackElem::EndMarker);
    machine.eval(form.clone(), None)
}

impl Machine {
    fn eval(&mut self, form: Value, env: Env) -> Result<Outcome, EvlError> {
        self.abort.check()?;
        if let Some(v) = self_evaluating(&form) {
            return self.continue_with(Outcome::One(v));
        }
        match &form {
            Value::Variable(v) => {
                let value = env::lookup(&env, Namespace::Value, v)?;
                self.continue_with(Outcome::One(value))
            }
            Value::EmptyList => Err(EvlError::signal("the empty list is not a form")),
            Value::Vector(_) => Err(EvlError::signal("a vector is not a form")),
            Value::Cons(_) => self.eval_compound(&form, env),
            _ => Err(EvlError::cannot_happen("unhandled form kind")),
        }
    }

    fn eval_compound(&mut self, form: &Value, env: Env) -> Result<Outcome, EvlError> {
        match analyze(form)? {
            Analyzed::Quote(object) => self.continue_with(Outcome::One(object)),
            Analyzed::Progn(forms) => self.eval_sequence(forms.into(), env),
            Analyzed::If {
                test,
                consequent,
                alternative,
            } => {
                self.stack.push(StackElem::Cont(Cont::TestBranch {
                    consequent,
                    alternative,
                    env: env.clone(),
                }));
                self.eval(test, env)
            }
            Analyzed::Lambda {
                scope,
                namespace,
                is_macro,
                params,
                rest,
                body,
            } => self.continue_with(Outcome::One(Value::Closure(Rc::new(ClosureData {
                scope,
                namespace,
                is_macro,
                params,
                rest,
                body: Body::Forms(body),
                env,
            })))),
            Analyzed::Ref { target, variable } => {
                let value = match target {
                    AccessTarget::LexicalValue => env::lookup(&env, Namespace::Value, &variable)?,
                    AccessTarget::LexicalFunction => {
                        env::lookup(&env, Namespace::Function, &variable)?
                    }
                    AccessTarget::Dynamic => self.dynamic_lookup(&variable)?,
                };
                self.continue_with(Outcome::One(value))
            }
            Analyzed::Set {
                target,
                variable,
                form,
            } => {
                self.stack.push(StackElem::Cont(Cont::StoreValue {
                    target,
                    variable,
                    env: env.clone(),
                }));
                self.eval(form, env)
            }
            Analyzed::ForEach { function, list } => {
                self.stack.push(StackElem::Cont(Cont::ForEachFunction {
                    list,
                    env: env.clone(),
                }));
                self.eval(function, env)
            }
            Analyzed::CatchErrors(inner) => {
                // Record the stack size on entry and truncate back to it
                // on a catch.
                let saved = self.stack.len();
                match self.run_nested(inner, env) {
                    Ok(_) => self.continue_with(Outcome::One(Value::Void)),
                    Err(EvlError::Aborted) => Err(EvlError::Aborted),
                    Err(e) => {
                        self.stack.truncate(saved);
                        self.continue_with(Outcome::One(Value::string(e.kind_name())))
                    }
                }
            }
            Analyzed::Call { operator, operands } => {
                self.eval_call(operator, operands, CallKind::Call, env)
            }
            Analyzed::Apply { function, forms } => {
                self.eval_call(function, forms, CallKind::Apply, env)
            }
            Analyzed::MultipleValueCall { function, forms } => {
                self.eval_call(function, forms, CallKind::MultipleValueCall, env)
            }
            Analyzed::MultipleValueApply { function, forms } => {
                self.eval_call(function, forms, CallKind::MultipleValueApply, env)
            }
        }
    }

    /// Pops elements until a continuation turns up, skipping dynamic
    /// frames, and resumes it. The end marker delimits this run.
    fn continue_with(&mut self, value: Outcome) -> Result<Outcome, EvlError> {
        loop {
            match self.stack.pop() {
                Some(StackElem::Cont(cont)) => return self.resume(cont, value),
                Some(StackElem::DynFrame(_)) => continue,
                Some(StackElem::EndMarker) => return Ok(value),
                None => return Err(EvlError::cannot_happen("control stack underflow")),
            }
        }
    }

    fn resume(&mut self, cont: Cont, value: Outcome) -> Result<Outcome, EvlError> {
        match cont {
            Cont::TestBranch {
                consequent,
                alternative,
                env,
            } => {
                let chosen = if test_boolean(&value.primary())? {
                    consequent
                } else {
                    alternative
                };
                self.eval(chosen, env)
            }
            Cont::Sequence { rest, env } => self.eval_sequence(rest, env),
            Cont::OperatorValue {
                operands,
                kind,
                env,
            } => self.proceed_call(value.primary(), operands, kind, env),
            Cont::Argument {
                callable,
                mut pending,
                mut done,
                kind,
                env,
            } => {
                let is_last = pending.is_empty();
                match kind {
                    CallKind::MultipleValueCall => done.extend(value.into_values()),
                    CallKind::MultipleValueApply if !is_last => done.extend(value.into_values()),
                    _ => done.push(value.primary()),
                }
                match pending.pop_front() {
                    None => self.invoke_call(callable, kind, done),
                    Some(form) => {
                        self.stack.push(StackElem::Cont(Cont::Argument {
                            callable,
                            pending,
                            done,
                            kind,
                            env: env.clone(),
                        }));
                        self.eval(form, env)
                    }
                }
            }
            Cont::StoreValue {
                target,
                variable,
                env,
            } => {
                let stored = value.primary();
                match target {
                    AccessTarget::LexicalValue => {
                        env::assign(&env, Namespace::Value, &variable, stored.clone())
                    }
                    AccessTarget::LexicalFunction => {
                        env::assign(&env, Namespace::Function, &variable, stored.clone())
                    }
                    AccessTarget::Dynamic => self.dynamic_assign(&variable, stored.clone()),
                }
                self.continue_with(Outcome::One(stored))
            }
            Cont::Expansion { env } => self.eval(value.primary(), env),
            Cont::ForEachFunction { list, env } => {
                let callable = Callable::from_value(value.primary())?;
                if callable.is_macro() {
                    return Err(EvlError::signal("_for-each cannot iterate a macro closure"));
                }
                self.stack
                    .push(StackElem::Cont(Cont::ForEachRun { callable }));
                self.eval(list, env)
            }
            Cont::ForEachRun { callable } => {
                let elements = value
                    .primary()
                    .list_elements()
                    .map_err(|_| EvlError::signal("_for-each requires a proper list"))?;
                for element in elements {
                    self.apply_nested(callable.clone(), vec![element])?;
                }
                self.continue_with(Outcome::One(Value::Void))
            }
        }
    }

    fn eval_sequence(&mut self, mut forms: VecDeque<Value>, env: Env) -> Result<Outcome, EvlError> {
        match forms.pop_front() {
            None => self.continue_with(Outcome::One(Value::Void)),
            Some(first) if forms.is_empty() => self.eval(first, env),
            Some(first) => {
                self.stack.push(StackElem::Cont(Cont::Sequence {
                    rest: forms,
                    env: env.clone(),
                }));
                self.eval(first, env)
            }
        }
    }

    fn eval_call(
        &mut self,
        operator: Value,
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
    ) -> Result<Outcome, EvlError> {
        match classify_head(&operator, &env)? {
            Head::Resolved(value) => self.proceed_call(value, operands, kind, env),
            Head::Form(form) => {
                self.stack.push(StackElem::Cont(Cont::OperatorValue {
                    operands,
                    kind,
                    env: env.clone(),
                }));
                self.eval(form, env)
            }
        }
    }

    fn proceed_call(
        &mut self,
        function: Value,
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
    ) -> Result<Outcome, EvlError> {
        let callable = Callable::from_value(function)?;
        if let Callable::Closure(closure) = &callable {
            if closure.is_macro {
                if kind != CallKind::Call {
                    return Err(not_a_macro_position(kind));
                }
                let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
                self.stack.push(StackElem::Cont(Cont::Expansion { env }));
                let frame = closure_frame(closure, slots, &closure.env);
                let forms: VecDeque<Value> = body_forms(closure)?.into();
                return self.eval_sequence(forms, Some(frame));
            }
        }
        let mut pending: VecDeque<Value> = operands.into();
        match pending.pop_front() {
            None => self.invoke_call(callable, kind, Vec::new()),
            Some(first) => {
                self.stack.push(StackElem::Cont(Cont::Argument {
                    callable,
                    pending,
                    done: Vec::new(),
                    kind,
                    env: env.clone(),
                }));
                self.eval(first, env)
            }
        }
    }

    fn invoke_call(
        &mut self,
        callable: Callable,
        kind: CallKind,
        args: Vec<Value>,
    ) -> Result<Outcome, EvlError> {
        match callable {
            Callable::Primitive(p) => {
                let outcome = call_primitive(&p, &spread_arguments(kind, args)?)?;
                self.continue_with(outcome)
            }
            Callable::Closure(c) => {
                let slots = pair_arguments(&c, kind, args)?;
                self.apply_closure(c, slots)
            }
        }
    }

    fn apply_closure(
        &mut self,
        closure: Rc<ClosureData>,
        slots: Vec<Value>,
    ) -> Result<Outcome, EvlError> {
        let forms: VecDeque<Value> = body_forms(&closure)?.into();
        match closure.scope {
            Scope::Lexical => {
                let frame = closure_frame(&closure, slots, &closure.env);
                self.eval_sequence(forms, Some(frame))
            }
            Scope::Dynamic => {
                // The frame rides on the control stack; popping past it
                // when the body completes is the unwind.
                let frame = Frame::extend(&None, closure.namespace, closure.params.clone(), slots);
                self.stack.push(StackElem::DynFrame(frame));
                self.eval_sequence(forms, closure.env.clone())
            }
        }
    }

    /// A delimited evaluation: pushes an end marker, so the value of the
    /// given form comes back here instead of resuming outer continuations.
    fn run_nested(&mut self, form: Value, env: Env) -> Result<Outcome, EvlError> {
        let saved = self.stack.len();
        self.stack.push(StackElem::EndMarker);
        let result = self.eval(form, env);
        if result.is_err() {
            self.stack.truncate(saved);
        }
        result
    }

    fn apply_nested(&mut self, callable: Callable, args: Vec<Value>) -> Result<Outcome, EvlError> {
        let saved = self.stack.len();
        self.stack.push(StackElem::EndMarker);
        let result = self.invoke_call(callable, CallKind::Call, args);
        if result.is_err() {
            self.stack.truncate(saved);
        }
        result
    }

    fn dynamic_lookup(&self, var: &Rc<VariableData>) -> Result<Value, EvlError> {
        for element in self.stack.iter().rev() {
            if let StackElem::DynFrame(frame) = element {
                if let Some(i) = frame.position(var) {
                    return Ok(frame.slots.borrow()[i].clone());
                }
            }
        }
        env::global_ref(Namespace::Value, var)
    }

    fn dynamic_assign(&self, var: &Rc<VariableData>, value: Value) {
        for element in self.stack.iter().rev() {
            if let StackElem::DynFrame(frame) = element {
                if let Some(i) = frame.position(var) {
                    frame.slots.borrow_mut()[i] = value;
                    return;
                }
            }
        }
        env::global_set(Namespace::Value, var, value);
    }
}

fn body_forms(closure: &ClosureData) -> Result<Vec<Value>, EvlError> {
    match &closure.body {
        Body::Forms(forms) => Ok(forms.clone()),
        Body::Compiled(_) => Err(EvlError::cannot_happen(
            "compiled closure body in the stack-based evaluator",
        )),
    }
}
