// ABOUTME: Trampoline evaluator; bounces and a continuation stack, tail calls stay flat

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

/// What one dispatch step hands back to the driver loop: a finished
/// value, or a request to evaluate another form next.
enum Step {
    Deliver(Outcome),
    Bounce { form: Value, env: Env },
}

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
}

/// Stack elements: continuations, dynamic frames visible only to
/// lookups, and the error-handler markers of `_catch-errors`.
enum StackElem {
    Cont(Cont),
    DynFrame(Rc<Frame>),
    Handler,
}

struct Machine {
    stack: Vec<StackElem>,
    abort: AbortFlag,
}

/// The driver loop alternately dispatches bounces and resumes
/// continuations from the stack. Tail calls do not grow the host stack,
/// and any caught error rewinds to the nearest handler marker as a
/// kind-name string.
pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    let mut machine = Machine {
        stack: Vec::new(),
        abort: abort.clone(),
    };
    let mut step = Step::Bounce {
        form: form.clone(),
        env: None,
    };
    loop {
        machine.abort.check()?;
        step = match step {
            Step::Bounce { form, env } => match machine.dispatch(form, env) {
                Ok(next) => next,
                Err(e) => machine.recover(e)?,
            },
            Step::Deliver(value) => {
                let mut value = value;
                loop {
                    match machine.stack.pop() {
                        None => return Ok(value),
                        Some(StackElem::DynFrame(_)) => continue,
                        Some(StackElem::Handler) => {
                            // The guarded form finished without error.
                            value = Outcome::One(Value::Void);
                            continue;
                        }
                        Some(StackElem::Cont(cont)) => {
                            break match machine.resume(cont, value) {
                                Ok(next) => next,
                                Err(e) => machine.recover(e)?,
                            };
                        }
                    }
                }
            }
        };
    }
}

impl Machine {
    /// Converts an error into a value at the nearest handler marker;
    /// `Aborted` always propagates past handlers.
    fn recover(&mut self, error: EvlError) -> Result<Step, EvlError> {
        if matches!(error, EvlError::Aborted) {
            return Err(error);
        }
        match self
            .stack
            .iter()
            .rposition(|e| matches!(e, StackElem::Handler))
        {
            Some(position) => {
                self.stack.truncate(position);
                Ok(Step::Deliver(Outcome::One(Value::string(error.kind_name()))))
            }
            None => Err(error),
        }
    }

    fn dispatch(&mut self, form: Value, env: Env) -> Result<Step, EvlError> {
        if let Some(v) = self_evaluating(&form) {
            return Ok(Step::Deliver(Outcome::One(v)));
        }
        match &form {
            Value::Variable(v) => Ok(Step::Deliver(Outcome::One(env::lookup(
                &env,
                Namespace::Value,
                v,
            )?))),
            Value::EmptyList => Err(EvlError::signal("the empty list is not a form")),
            Value::Vector(_) => Err(EvlError::signal("a vector is not a form")),
            Value::Cons(_) => self.dispatch_compound(&form, env),
            _ => Err(EvlError::cannot_happen("unhandled form kind")),
        }
    }

    fn dispatch_compound(&mut self, form: &Value, env: Env) -> Result<Step, EvlError> {
        match analyze(form)? {
            Analyzed::Quote(object) => Ok(Step::Deliver(Outcome::One(object))),
            Analyzed::Progn(forms) => Ok(self.sequence_step(forms.into(), env)),
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
                Ok(Step::Bounce { form: test, env })
            }
            Analyzed::Lambda {
                scope,
                namespace,
                is_macro,
                params,
                rest,
                body,
            } => Ok(Step::Deliver(Outcome::One(Value::Closure(Rc::new(
                ClosureData {
                    scope,
                    namespace,
                    is_macro,
                    params,
                    rest,
                    body: Body::Forms(body),
                    env,
                },
            ))))),
            Analyzed::Ref { target, variable } => {
                let value = match target {
                    AccessTarget::LexicalValue => env::lookup(&env, Namespace::Value, &variable)?,
                    AccessTarget::LexicalFunction => {
                        env::lookup(&env, Namespace::Function, &variable)?
                    }
                    AccessTarget::Dynamic => self.dynamic_lookup(&variable)?,
                };
                Ok(Step::Deliver(Outcome::One(value)))
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
                Ok(Step::Bounce { form, env })
            }
            Analyzed::ForEach { .. } => Err(EvlError::signal(
                "_for-each is not implemented by the trampoline evaluator",
            )),
            Analyzed::CatchErrors(inner) => {
                self.stack.push(StackElem::Handler);
                Ok(Step::Bounce { form: inner, env })
            }
            Analyzed::Call { operator, operands } => {
                self.call_step(operator, operands, CallKind::Call, env)
            }
            Analyzed::Apply { function, forms } => {
                self.call_step(function, forms, CallKind::Apply, env)
            }
            Analyzed::MultipleValueCall { function, forms } => {
                self.call_step(function, forms, CallKind::MultipleValueCall, env)
            }
            Analyzed::MultipleValueApply { function, forms } => {
                self.call_step(function, forms, CallKind::MultipleValueApply, env)
            }
        }
    }

    fn resume(&mut self, cont: Cont, value: Outcome) -> Result<Step, EvlError> {
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
                Ok(Step::Bounce { form: chosen, env })
            }
            Cont::Sequence { rest, env } => Ok(self.sequence_step(rest, env)),
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
                        Ok(Step::Bounce { form, env })
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
                Ok(Step::Deliver(Outcome::One(stored)))
            }
            Cont::Expansion { env } => Ok(Step::Bounce {
                form: value.primary(),
                env,
            }),
        }
    }

    /// A sequence bounces its last form without pushing anything, which
    /// is exactly what keeps tail calls flat.
    fn sequence_step(&mut self, mut forms: VecDeque<Value>, env: Env) -> Step {
        match forms.pop_front() {
            None => Step::Deliver(Outcome::One(Value::Void)),
            Some(first) if forms.is_empty() => Step::Bounce { form: first, env },
            Some(first) => {
                self.stack.push(StackElem::Cont(Cont::Sequence {
                    rest: forms,
                    env: env.clone(),
                }));
                Step::Bounce { form: first, env }
            }
        }
    }

    fn call_step(
        &mut self,
        operator: Value,
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
    ) -> Result<Step, EvlError> {
        match classify_head(&operator, &env)? {
            Head::Resolved(value) => self.proceed_call(value, operands, kind, env),
            Head::Form(form) => {
                self.stack.push(StackElem::Cont(Cont::OperatorValue {
                    operands,
                    kind,
                    env: env.clone(),
                }));
                Ok(Step::Bounce { form, env })
            }
        }
    }

    fn proceed_call(
        &mut self,
        function: Value,
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
    ) -> Result<Step, EvlError> {
        let callable = Callable::from_value(function)?;
        if let Callable::Closure(closure) = &callable {
            if closure.is_macro {
                if kind != CallKind::Call {
                    return Err(not_a_macro_position(kind));
                }
                let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
                self.stack.push(StackElem::Cont(Cont::Expansion { env }));
                let frame = closure_frame(closure, slots, &closure.env);
                return self.body_step(closure, Some(frame));
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
                Ok(Step::Bounce { form: first, env })
            }
        }
    }

    fn invoke_call(
        &mut self,
        callable: Callable,
        kind: CallKind,
        args: Vec<Value>,
    ) -> Result<Step, EvlError> {
        match callable {
            Callable::Primitive(p) => Ok(Step::Deliver(call_primitive(
                &p,
                &spread_arguments(kind, args)?,
            )?)),
            Callable::Closure(c) => {
                let slots = pair_arguments(&c, kind, args)?;
                match c.scope {
                    Scope::Lexical => {
                        let frame = closure_frame(&c, slots, &c.env);
                        self.body_step(&c, Some(frame))
                    }
                    Scope::Dynamic => {
                        let frame = Frame::extend(&None, c.namespace, c.params.clone(), slots);
                        self.stack.push(StackElem::DynFrame(frame));
                        let env = c.env.clone();
                        self.body_step(&c, env)
                    }
                }
            }
        }
    }

    fn body_step(&mut self, closure: &ClosureData, env: Env) -> Result<Step, EvlError> {
        match &closure.body {
            Body::Forms(forms) => Ok(self.sequence_step(forms.clone().into(), env)),
            Body::Compiled(_) => Err(EvlError::cannot_happen(
                "compiled closure body in the trampoline evaluator",
            )),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;
    use crate::primitives;
    use crate::reader::Reader;

    fn run(source: &str) -> Result<String, EvlError> {
        intern::reset();
        primitives::register();
        let abort = AbortFlag::new();
        let mut reader = Reader::new(source);
        let mut last = String::new();
        while let Some(form) = reader.read_object()? {
            last = format!("{}", evaluate(&form, &abort)?.primary());
        }
        Ok(last)
    }

    #[test]
    fn test_basic_forms() {
        assert_eq!(run("(_+ 20 22)").unwrap(), "42");
        assert_eq!(run("(if (_<= 1 1) 'le 'gt)").unwrap(), "le");
        assert_eq!(run("(progn (vset! x 1) (vset! x 2) (vref x))").unwrap(), "2");
    }

    #[test]
    fn test_deep_tail_recursion_stays_flat() {
        let source = "(progn \
                        (fset! spin (_vlambda (n) (if (_= n 0) 'done (spin (_- n 1))))) \
                        (spin 200000))";
        assert_eq!(run(source).unwrap(), "done");
    }

    #[test]
    fn test_handler_markers_rewind() {
        assert_eq!(
            run("(_list (_catch-errors (_error \"x\")) (_catch-errors 1) 2)").unwrap(),
            "(\"EvaluatorError\" #v 2)"
        );
        assert!(run("(_error \"uncaught\")").is_err());
    }

    #[test]
    fn test_abort_bypasses_handler_markers() {
        intern::reset();
        primitives::register();
        let abort = AbortFlag::new();
        abort.request();
        let form = Reader::new("(_catch-errors (_+ 1 1))")
            .read_object()
            .unwrap()
            .unwrap();
        assert!(matches!(evaluate(&form, &abort), Err(EvlError::Aborted)));
    }

    #[test]
    fn test_for_each_not_implemented_here() {
        assert!(run("(_for-each (fref _list) (_list 1))").is_err());
    }

    #[test]
    fn test_macro_expansion() {
        assert_eq!(
            run("(progn (fset! k (_mlambda (x) (_list (quote quote) x))) (k abc))").unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_dynamic_scope() {
        let source = "(progn \
                        (fset! deep (_vlambda () (dref d))) \
                        (fset! with-d (_dlambda (d) (deep))) \
                        (with-d 5))";
        assert_eq!(run(source).unwrap(), "5");
    }
}
