// ABOUTME: Object-oriented CPS evaluator; continuations are tagged records

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

/// The same shape as the closure-passing evaluator, but every
/// continuation is a tagged record with an `invoke` operation, making the
/// set of continuations enumerable.
enum Cont {
    Done,
    TestBranch {
        consequent: Value,
        alternative: Value,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    Sequence {
        rest: VecDeque<Value>,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    OperatorValue {
        operands: Vec<Value>,
        kind: CallKind,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    Argument {
        callable: Callable,
        pending: VecDeque<Value>,
        done: Vec<Value>,
        kind: CallKind,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    StoreValue {
        target: AccessTarget,
        variable: Rc<VariableData>,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    /// Receives a macro expansion and evaluates it in the caller's
    /// environment.
    Expansion {
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    ForEachFunction {
        list: Value,
        env: Env,
        denv: Env,
        next: Box<Cont>,
    },
    ForEachRun {
        callable: Callable,
        denv: Env,
        next: Box<Cont>,
    },
}

pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    eval(form.clone(), None, None, abort, Cont::Done)
}

fn eval(form: Value, env: Env, denv: Env, abort: &AbortFlag, k: Cont) -> Result<Outcome, EvlError> {
    abort.check()?;
    if let Some(v) = self_evaluating(&form) {
        return k.invoke(Outcome::One(v), abort);
    }
    match &form {
        Value::Variable(v) => {
            k.invoke(Outcome::One(env::lookup(&env, Namespace::Value, v)?), abort)
        }
        Value::EmptyList => Err(EvlError::signal("the empty list is not a form")),
        Value::Vector(_) => Err(EvlError::signal("a vector is not a form")),
        Value::Cons(_) => eval_compound(&form, env, denv, abort, k),
        _ => Err(EvlError::cannot_happen("unhandled form kind")),
    }
}

fn eval_compound(
    form: &Value,
    env: Env,
    denv: Env,
    abort: &AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match analyze(form)? {
        Analyzed::Quote(object) => k.invoke(Outcome::One(object), abort),
        Analyzed::Progn(forms) => eval_sequence(forms.into(), env, denv, abort, k),
        Analyzed::If {
            test,
            consequent,
            alternative,
        } => eval(
            test,
            env.clone(),
            denv.clone(),
            abort,
            Cont::TestBranch {
                consequent,
                alternative,
                env,
                denv,
                next: Box::new(k),
            },
        ),
        Analyzed::Lambda {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body,
        } => k.invoke(
            Outcome::One(Value::Closure(Rc::new(ClosureData {
                scope,
                namespace,
                is_macro,
                params,
                rest,
                body: Body::Forms(body),
                env,
            }))),
            abort,
        ),
        Analyzed::Ref { target, variable } => {
            let value = match target {
                AccessTarget::LexicalValue => env::lookup(&env, Namespace::Value, &variable)?,
                AccessTarget::LexicalFunction => {
                    env::lookup(&env, Namespace::Function, &variable)?
                }
                AccessTarget::Dynamic => env::dynamic_lookup(&denv, &variable)?,
            };
            k.invoke(Outcome::One(value), abort)
        }
        Analyzed::Set {
            target,
            variable,
            form,
        } => eval(
            form,
            env.clone(),
            denv.clone(),
            abort,
            Cont::StoreValue {
                target,
                variable,
                env,
                denv,
                next: Box::new(k),
            },
        ),
        Analyzed::ForEach { function, list } => eval(
            function,
            env.clone(),
            denv.clone(),
            abort,
            Cont::ForEachFunction {
                list,
                env,
                denv,
                next: Box::new(k),
            },
        ),
        Analyzed::CatchErrors(inner) => {
            match eval(inner, env, denv, abort, Cont::Done) {
                Ok(_) => k.invoke(Outcome::One(Value::Void), abort),
                Err(EvlError::Aborted) => Err(EvlError::Aborted),
                Err(e) => k.invoke(Outcome::One(Value::string(e.kind_name())), abort),
            }
        }
        Analyzed::Call { operator, operands } => {
            eval_call(operator, operands, CallKind::Call, env, denv, abort, k)
        }
        Analyzed::Apply { function, forms } => {
            eval_call(function, forms, CallKind::Apply, env, denv, abort, k)
        }
        Analyzed::MultipleValueCall { function, forms } => eval_call(
            function,
            forms,
            CallKind::MultipleValueCall,
            env,
            denv,
            abort,
            k,
        ),
        Analyzed::MultipleValueApply { function, forms } => eval_call(
            function,
            forms,
            CallKind::MultipleValueApply,
            env,
            denv,
            abort,
            k,
        ),
    }
}

impl Cont {
    fn invoke(self, value: Outcome, abort: &AbortFlag) -> Result<Outcome, EvlError> {
        match self {
            Cont::Done => Ok(value),
            Cont::TestBranch {
                consequent,
                alternative,
                env,
                denv,
                next,
            } => {
                let chosen = if test_boolean(&value.primary())? {
                    consequent
                } else {
                    alternative
                };
                eval(chosen, env, denv, abort, *next)
            }
            Cont::Sequence {
                rest,
                env,
                denv,
                next,
            } => eval_sequence(rest, env, denv, abort, *next),
            Cont::OperatorValue {
                operands,
                kind,
                env,
                denv,
                next,
            } => proceed_call(value.primary(), operands, kind, env, denv, abort, *next),
            Cont::Argument {
                callable,
                mut pending,
                mut done,
                kind,
                env,
                denv,
                next,
            } => {
                let is_last = pending.is_empty();
                match kind {
                    CallKind::MultipleValueCall => done.extend(value.into_values()),
                    CallKind::MultipleValueApply if !is_last => done.extend(value.into_values()),
                    _ => done.push(value.primary()),
                }
                match pending.pop_front() {
                    None => invoke_call(callable, kind, done, denv, abort, *next),
                    Some(form) => eval(
                        form,
                        env.clone(),
                        denv.clone(),
                        abort,
                        Cont::Argument {
                            callable,
                            pending,
                            done,
                            kind,
                            env,
                            denv,
                            next,
                        },
                    ),
                }
            }
            Cont::StoreValue {
                target,
                variable,
                env,
                denv,
                next,
            } => {
                let stored = value.primary();
                match target {
                    AccessTarget::LexicalValue => {
                        env::assign(&env, Namespace::Value, &variable, stored.clone())
                    }
                    AccessTarget::LexicalFunction => {
                        env::assign(&env, Namespace::Function, &variable, stored.clone())
                    }
                    AccessTarget::Dynamic => env::dynamic_assign(&denv, &variable, stored.clone()),
                }
                next.invoke(Outcome::One(stored), abort)
            }
            Cont::Expansion { env, denv, next } => eval(value.primary(), env, denv, abort, *next),
            Cont::ForEachFunction {
                list,
                env,
                denv,
                next,
            } => {
                let callable = Callable::from_value(value.primary())?;
                if callable.is_macro() {
                    return Err(EvlError::signal("_for-each cannot iterate a macro closure"));
                }
                eval(
                    list,
                    env,
                    denv.clone(),
                    abort,
                    Cont::ForEachRun {
                        callable,
                        denv,
                        next,
                    },
                )
            }
            Cont::ForEachRun {
                callable,
                denv,
                next,
            } => {
                let elements = value
                    .primary()
                    .list_elements()
                    .map_err(|_| EvlError::signal("_for-each requires a proper list"))?;
                for element in elements {
                    invoke_call(
                        callable.clone(),
                        CallKind::Call,
                        vec![element],
                        denv.clone(),
                        abort,
                        Cont::Done,
                    )?;
                }
                next.invoke(Outcome::One(Value::Void), abort)
            }
        }
    }
}

fn eval_sequence(
    mut forms: VecDeque<Value>,
    env: Env,
    denv: Env,
    abort: &AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match forms.pop_front() {
        None => k.invoke(Outcome::One(Value::Void), abort),
        Some(first) if forms.is_empty() => eval(first, env, denv, abort, k),
        Some(first) => eval(
            first,
            env.clone(),
            denv.clone(),
            abort,
            Cont::Sequence {
                rest: forms,
                env,
                denv,
                next: Box::new(k),
            },
        ),
    }
}

fn eval_call(
    operator: Value,
    operands: Vec<Value>,
    kind: CallKind,
    env: Env,
    denv: Env,
    abort: &AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match classify_head(&operator, &env)? {
        Head::Resolved(value) => proceed_call(value, operands, kind, env, denv, abort, k),
        Head::Form(form) => eval(
            form,
            env.clone(),
            denv.clone(),
            abort,
            Cont::OperatorValue {
                operands,
                kind,
                env,
                denv,
                next: Box::new(k),
            },
        ),
    }
}

fn proceed_call(
    function: Value,
    operands: Vec<Value>,
    kind: CallKind,
    env: Env,
    denv: Env,
    abort: &AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    let callable = Callable::from_value(function)?;
    if let Callable::Closure(closure) = &callable {
        if closure.is_macro {
            if kind != CallKind::Call {
                return Err(not_a_macro_position(kind));
            }
            // The macro body runs in its own frame; the expansion flows
            // to an Expansion continuation that evaluates it in the
            // caller's environment.
            let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
            let frame = closure_frame(closure, slots, &closure.env);
            let forms: VecDeque<Value> = body_forms(closure)?.into();
            return eval_sequence(
                forms,
                Some(frame),
                denv.clone(),
                abort,
                Cont::Expansion {
                    env,
                    denv,
                    next: Box::new(k),
                },
            );
        }
    }
    let mut pending: VecDeque<Value> = operands.into();
    match pending.pop_front() {
        None => invoke_call(callable, kind, Vec::new(), denv, abort, k),
        Some(first) => eval(
            first,
            env.clone(),
            denv.clone(),
            abort,
            Cont::Argument {
                callable,
                pending,
                done: Vec::new(),
                kind,
                env,
                denv,
                next: Box::new(k),
            },
        ),
    }
}

fn body_forms(closure: &ClosureData) -> Result<Vec<Value>, EvlError> {
    match &closure.body {
        Body::Forms(forms) => Ok(forms.clone()),
        Body::Compiled(_) => Err(EvlError::cannot_happen(
            "compiled closure body in the object-oriented CPS evaluator",
        )),
    }
}

fn invoke_call(
    callable: Callable,
    kind: CallKind,
    args: Vec<Value>,
    denv: Env,
    abort: &AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match callable {
        Callable::Primitive(p) => k.invoke(call_primitive(&p, &spread_arguments(kind, args)?)?, abort),
        Callable::Closure(c) => {
            let slots = pair_arguments(&c, kind, args)?;
            let forms: VecDeque<Value> = body_forms(&c)?.into();
            match c.scope {
                Scope::Lexical => {
                    let frame = closure_frame(&c, slots, &c.env);
                    eval_sequence(forms, Some(frame), denv, abort, k)
                }
                Scope::Dynamic => {
                    let frame = Frame::extend(&denv, c.namespace, c.params.clone(), slots);
                    eval_sequence(forms, c.env.clone(), Some(frame), abort, k)
                }
            }
        }
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
        assert_eq!(run("(_* 6 7)").unwrap(), "42");
        assert_eq!(run("(if (_= 1 1) 'same 'other)").unwrap(), "same");
        assert_eq!(run("(progn (vset! x 1) (vset! x 2) (vref x))").unwrap(), "2");
    }

    #[test]
    fn test_closures_and_rest() {
        assert_eq!(
            run("(progn (fset! f (_vlambda (a . r) (_cons a r))) (f 1 2 3))").unwrap(),
            "(1 2 3)"
        );
    }

    #[test]
    fn test_macro_expansion() {
        assert_eq!(
            run("(progn (fset! k (_mlambda (x) (_list (quote quote) x))) (k abc))").unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_for_each_is_implemented() {
        let source = "(progn \
                        (vset! acc 0) \
                        (_for-each (_vlambda (x) (vset! acc (_+ x (vref acc)))) \
                                   (_list 1 2 3 4)) \
                        (vref acc))";
        assert_eq!(run(source).unwrap(), "10");
    }

    #[test]
    fn test_catch_errors() {
        assert_eq!(run("(_catch-errors (_error \"x\"))").unwrap(), "\"EvaluatorError\"");
        assert_eq!(run("(_catch-errors 1)").unwrap(), "#v");
    }

    #[test]
    fn test_multiple_values() {
        assert_eq!(run("(multiple-value-call _list (_values) 1)").unwrap(), "(1)");
    }
}
