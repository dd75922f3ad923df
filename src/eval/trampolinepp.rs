// ABOUTME: Preprocessing trampoline evaluator over compiled form nodes

use crate::env::{self, Env, Frame, Namespace};
use crate::error::EvlError;
use crate::eval::preprocess::{preprocess, Prep};
use crate::eval::{
    call_primitive, pair_arguments, spread_arguments, test_boolean, AbortFlag, CallKind, Callable,
};
use crate::value::{Body, ClosureData, Outcome, Scope, Value, VariableData};
use std::rc::Rc;

/// The trampoline machine of the previous rung, driving compiled nodes
/// instead of raw forms: form dispatch is one match on the node, local
/// references are frame-depth/slot-index reads, and macros are already
/// gone.
enum Step {
    Deliver(Outcome),
    Bounce { prep: Prep, env: Env },
}

enum Cont {
    Branch {
        consequent: Prep,
        alternative: Prep,
        env: Env,
    },
    Sequence {
        body: Rc<Vec<Prep>>,
        index: usize,
        env: Env,
    },
    OperatorValue {
        operands: Rc<Vec<Prep>>,
        kind: CallKind,
        env: Env,
    },
    Argument {
        callable: Callable,
        operands: Rc<Vec<Prep>>,
        index: usize,
        done: Vec<Value>,
        kind: CallKind,
        env: Env,
    },
    StoreLocal {
        depth: usize,
        index: usize,
        env: Env,
    },
    StoreGlobal {
        namespace: Namespace,
        variable: Rc<VariableData>,
    },
    StoreDynamic {
        variable: Rc<VariableData>,
    },
}

enum StackElem {
    Cont(Cont),
    DynFrame(Rc<Frame>),
    Handler,
}

struct Machine {
    stack: Vec<StackElem>,
    abort: AbortFlag,
}

pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    let prep = preprocess(form, &None, abort)?;
    run(prep, None, abort)
}

/// Runs a compiled body sequence; also the reentry point for
/// preprocess-time macro expansion.
pub fn run_body(body: &Rc<Vec<Prep>>, env: Env, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    run(Prep::Sequence(body.clone()), env, abort)
}

fn run(prep: Prep, env: Env, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    let mut machine = Machine {
        stack: Vec::new(),
        abort: abort.clone(),
    };
    let mut step = Step::Bounce { prep, env };
    loop {
        machine.abort.check()?;
        step = match step {
            Step::Bounce { prep, env } => match machine.dispatch(prep, env) {
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

    fn dispatch(&mut self, prep: Prep, env: Env) -> Result<Step, EvlError> {
        match prep {
            Prep::Constant(v) => Ok(Step::Deliver(Outcome::One(v))),
            Prep::Fail(message) => Err(EvlError::signal(message)),
            Prep::LocalRef { depth, index } => Ok(Step::Deliver(Outcome::One(env::local_ref(
                &env, depth, index,
            )?))),
            Prep::GlobalRef {
                namespace,
                variable,
            } => Ok(Step::Deliver(Outcome::One(env::global_ref(
                namespace, &variable,
            )?))),
            Prep::DynamicRef { variable } => {
                Ok(Step::Deliver(Outcome::One(self.dynamic_lookup(&variable)?)))
            }
            Prep::LocalAssign { depth, index, form } => {
                self.stack
                    .push(StackElem::Cont(Cont::StoreLocal {
                        depth,
                        index,
                        env: env.clone(),
                    }));
                Ok(Step::Bounce {
                    prep: (*form).clone(),
                    env,
                })
            }
            Prep::GlobalAssign {
                namespace,
                variable,
                form,
            } => {
                self.stack.push(StackElem::Cont(Cont::StoreGlobal {
                    namespace,
                    variable,
                }));
                Ok(Step::Bounce {
                    prep: (*form).clone(),
                    env,
                })
            }
            Prep::DynamicAssign { variable, form } => {
                self.stack
                    .push(StackElem::Cont(Cont::StoreDynamic { variable }));
                Ok(Step::Bounce {
                    prep: (*form).clone(),
                    env,
                })
            }
            Prep::Sequence(body) => Ok(self.sequence_step(body, 0, env)),
            Prep::Branch {
                test,
                consequent,
                alternative,
            } => {
                self.stack.push(StackElem::Cont(Cont::Branch {
                    consequent: (*consequent).clone(),
                    alternative: (*alternative).clone(),
                    env: env.clone(),
                }));
                Ok(Step::Bounce {
                    prep: (*test).clone(),
                    env,
                })
            }
            Prep::MakeClosure {
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
                    body: Body::Compiled(body),
                    env,
                },
            ))))),
            Prep::CatchErrors(inner) => {
                self.stack.push(StackElem::Handler);
                Ok(Step::Bounce {
                    prep: (*inner).clone(),
                    env,
                })
            }
            Prep::Call {
                operator,
                operands,
                kind,
            } => {
                self.stack.push(StackElem::Cont(Cont::OperatorValue {
                    operands,
                    kind,
                    env: env.clone(),
                }));
                Ok(Step::Bounce {
                    prep: (*operator).clone(),
                    env,
                })
            }
        }
    }

    fn resume(&mut self, cont: Cont, value: Outcome) -> Result<Step, EvlError> {
        match cont {
            Cont::Branch {
                consequent,
                alternative,
                env,
            } => {
                let chosen = if test_boolean(&value.primary())? {
                    consequent
                } else {
                    alternative
                };
                Ok(Step::Bounce { prep: chosen, env })
            }
            Cont::Sequence { body, index, env } => Ok(self.sequence_step(body, index, env)),
            Cont::OperatorValue {
                operands,
                kind,
                env,
            } => {
                let callable = Callable::from_value(value.primary())?;
                if callable.is_macro() {
                    return Err(EvlError::signal(
                        "a macro closure reached a run-time call position",
                    ));
                }
                if operands.is_empty() {
                    return self.invoke_call(callable, kind, Vec::new());
                }
                let first = operands[0].clone();
                self.stack.push(StackElem::Cont(Cont::Argument {
                    callable,
                    operands,
                    index: 1,
                    done: Vec::new(),
                    kind,
                    env: env.clone(),
                }));
                Ok(Step::Bounce { prep: first, env })
            }
            Cont::Argument {
                callable,
                operands,
                index,
                mut done,
                kind,
                env,
            } => {
                let is_last = index == operands.len();
                match kind {
                    CallKind::MultipleValueCall => done.extend(value.into_values()),
                    CallKind::MultipleValueApply if !is_last => done.extend(value.into_values()),
                    _ => done.push(value.primary()),
                }
                if is_last {
                    return self.invoke_call(callable, kind, done);
                }
                let next = operands[index].clone();
                self.stack.push(StackElem::Cont(Cont::Argument {
                    callable,
                    operands,
                    index: index + 1,
                    done,
                    kind,
                    env: env.clone(),
                }));
                Ok(Step::Bounce { prep: next, env })
            }
            Cont::StoreLocal { depth, index, env } => {
                let stored = value.primary();
                env::local_set(&env, depth, index, stored.clone())?;
                Ok(Step::Deliver(Outcome::One(stored)))
            }
            Cont::StoreGlobal {
                namespace,
                variable,
            } => {
                let stored = value.primary();
                env::global_set(namespace, &variable, stored.clone());
                Ok(Step::Deliver(Outcome::One(stored)))
            }
            Cont::StoreDynamic { variable } => {
                let stored = value.primary();
                self.dynamic_assign(&variable, stored.clone());
                Ok(Step::Deliver(Outcome::One(stored)))
            }
        }
    }

    fn sequence_step(&mut self, body: Rc<Vec<Prep>>, index: usize, env: Env) -> Step {
        if index >= body.len() {
            return Step::Deliver(Outcome::One(Value::Void));
        }
        let prep = body[index].clone();
        if index + 1 < body.len() {
            self.stack.push(StackElem::Cont(Cont::Sequence {
                body,
                index: index + 1,
                env: env.clone(),
            }));
        }
        Step::Bounce { prep, env }
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
                let body = match &c.body {
                    Body::Compiled(preps) => preps.clone(),
                    Body::Forms(_) => {
                        return Err(EvlError::cannot_happen(
                            "uncompiled closure body under the preprocessing evaluator",
                        ))
                    }
                };
                match c.scope {
                    Scope::Lexical => {
                        let frame = Frame::extend(&c.env, c.namespace, c.params.clone(), slots);
                        Ok(self.sequence_step(body, 0, Some(frame)))
                    }
                    Scope::Dynamic => {
                        let frame = Frame::extend(&None, c.namespace, c.params.clone(), slots);
                        self.stack.push(StackElem::DynFrame(frame));
                        Ok(self.sequence_step(body, 0, c.env.clone()))
                    }
                }
            }
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

    fn run_source(source: &str) -> Result<String, EvlError> {
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
        assert_eq!(run_source("(_+ 1 2)").unwrap(), "3");
        assert_eq!(run_source("(if (_< 1 2) 'yes 'no)").unwrap(), "yes");
        assert_eq!(
            run_source("(progn (vset! x 1) (vset! x 2) (vref x))").unwrap(),
            "2"
        );
    }

    #[test]
    fn test_lexical_addressing_in_closures() {
        assert_eq!(
            run_source("((_vlambda (x) ((_vlambda (y) (_+ x y)) 2)) 40)").unwrap(),
            "42"
        );
        assert_eq!(
            run_source("(progn (fset! f (_vlambda (a . r) (_cons a r))) (f 1 2 3))").unwrap(),
            "(1 2 3)"
        );
    }

    #[test]
    fn test_captured_slots_stay_shared() {
        let source = "(fset! make (_vlambda (n) (_vlambda () (progn (vset! n (_+ n 1)) n)))) \
                      (fset! tick (make 0)) \
                      (tick) \
                      (tick)";
        assert_eq!(run_source(source).unwrap(), "2");
    }

    #[test]
    fn test_deep_tail_recursion_stays_flat() {
        let source = "(fset! spin (_vlambda (n) (if (_= n 0) 'done (spin (_- n 1))))) \
                      (spin 200000)";
        assert_eq!(run_source(source).unwrap(), "done");
    }

    #[test]
    fn test_global_macro_use_after_definition() {
        let source = "(fset! k (_mlambda (x) (_list (quote quote) x))) \
                      (k abc)";
        assert_eq!(run_source(source).unwrap(), "abc");
    }

    #[test]
    fn test_macro_let() {
        let source = "((_flambda (k) (k abc)) (_mlambda (x) (_list (quote quote) x)))";
        assert_eq!(run_source(source).unwrap(), "abc");
    }

    #[test]
    fn test_catch_errors_and_handlers() {
        assert_eq!(
            run_source("(_list (_catch-errors (_error \"x\")) 1)").unwrap(),
            "(\"EvaluatorError\" 1)"
        );
        assert_eq!(run_source("(_catch-errors ())").unwrap(), "\"EvaluatorError\"");
    }

    #[test]
    fn test_dynamic_scope() {
        let source = "(fset! deep (_vlambda () (dref d))) \
                      (fset! with-d (_dlambda (d) (deep))) \
                      (with-d 3)";
        assert_eq!(run_source(source).unwrap(), "3");
    }

    #[test]
    fn test_for_each_not_implemented_here() {
        assert!(run_source("(_for-each (fref _list) (_list 1))").is_err());
    }
}
