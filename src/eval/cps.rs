// ABOUTME: Closure-passing CPS evaluator; continuations are host closures

use crate::analyzer::{analyze, AccessTarget, Analyzed};
use crate::env::{self, Env, Frame, Namespace};
use crate::error::EvlError;
use crate::eval::{
    call_primitive, classify_head, closure_frame, not_a_macro_position, pair_arguments,
    self_evaluating, spread_arguments, test_boolean, AbortFlag, CallKind, Callable, Head,
};
use crate::pairing;
use crate::value::{Body, ClosureData, Outcome, Scope, Value};
use std::collections::VecDeque;
use std::rc::Rc;

/// Each evaluation step takes a continuation closure; results flow
/// through closure calls. The host stack still grows, but the shape of
/// the continuations becomes explicit.
type Cont = Box<dyn FnOnce(Outcome) -> Result<Outcome, EvlError>>;
type ArgsCont = Box<dyn FnOnce(Vec<Value>) -> Result<Outcome, EvlError>>;

pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    eval(form.clone(), None, None, abort.clone(), Box::new(Ok))
}

fn eval(form: Value, env: Env, denv: Env, abort: AbortFlag, k: Cont) -> Result<Outcome, EvlError> {
    abort.check()?;
    if let Some(v) = self_evaluating(&form) {
        return k(Outcome::One(v));
    }
    match &form {
        Value::Variable(v) => k(Outcome::One(env::lookup(&env, Namespace::Value, v)?)),
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
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match analyze(form)? {
        Analyzed::Quote(object) => k(Outcome::One(object)),
        Analyzed::Progn(forms) => eval_sequence(forms.into(), env, denv, abort, k),
        Analyzed::If {
            test,
            consequent,
            alternative,
        } => {
            let branch_env = env.clone();
            let branch_denv = denv.clone();
            let branch_abort = abort.clone();
            eval(
                test,
                env,
                denv,
                abort,
                Box::new(move |outcome| {
                    let chosen = if test_boolean(&outcome.primary())? {
                        consequent
                    } else {
                        alternative
                    };
                    eval(chosen, branch_env, branch_denv, branch_abort, k)
                }),
            )
        }
        Analyzed::Lambda {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body,
        } => k(Outcome::One(Value::Closure(Rc::new(ClosureData {
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
                AccessTarget::Dynamic => env::dynamic_lookup(&denv, &variable)?,
            };
            k(Outcome::One(value))
        }
        Analyzed::Set {
            target,
            variable,
            form,
        } => {
            let set_env = env.clone();
            let set_denv = denv.clone();
            eval(
                form,
                env,
                denv,
                abort,
                Box::new(move |outcome| {
                    let value = outcome.primary();
                    match target {
                        AccessTarget::LexicalValue => {
                            env::assign(&set_env, Namespace::Value, &variable, value.clone())
                        }
                        AccessTarget::LexicalFunction => {
                            env::assign(&set_env, Namespace::Function, &variable, value.clone())
                        }
                        AccessTarget::Dynamic => {
                            env::dynamic_assign(&set_denv, &variable, value.clone())
                        }
                    }
                    k(Outcome::One(value))
                }),
            )
        }
        Analyzed::ForEach { function, list } => {
            let loop_env = env.clone();
            let loop_denv = denv.clone();
            let loop_abort = abort.clone();
            eval(
                function,
                env,
                denv,
                abort,
                Box::new(move |fv| {
                    let callable = Callable::from_value(fv.primary())?;
                    if callable.is_macro() {
                        return Err(EvlError::signal(
                            "_for-each cannot iterate a macro closure",
                        ));
                    }
                    let body_denv = loop_denv.clone();
                    let body_abort = loop_abort.clone();
                    eval(
                        list,
                        loop_env,
                        loop_denv,
                        loop_abort,
                        Box::new(move |lv| {
                            let elements = lv.primary().list_elements().map_err(|_| {
                                EvlError::signal("_for-each requires a proper list")
                            })?;
                            for element in elements {
                                invoke(
                                    callable.clone(),
                                    CallKind::Call,
                                    vec![element],
                                    body_denv.clone(),
                                    body_abort.clone(),
                                    Box::new(Ok),
                                )?;
                            }
                            k(Outcome::One(Value::Void))
                        }),
                    )
                }),
            )
        }
        Analyzed::CatchErrors(inner) => {
            // The try-form runs delimited under an identity continuation,
            // so a failure inside it unwinds only this far.
            match eval(inner, env, denv, abort, Box::new(Ok)) {
                Ok(_) => k(Outcome::One(Value::Void)),
                Err(EvlError::Aborted) => Err(EvlError::Aborted),
                Err(e) => k(Outcome::One(Value::string(e.kind_name()))),
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

fn eval_sequence(
    mut forms: VecDeque<Value>,
    env: Env,
    denv: Env,
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match forms.pop_front() {
        None => k(Outcome::One(Value::Void)),
        Some(first) if forms.is_empty() => eval(first, env, denv, abort, k),
        Some(first) => {
            let rest_env = env.clone();
            let rest_denv = denv.clone();
            let rest_abort = abort.clone();
            eval(
                first,
                env,
                denv,
                abort,
                Box::new(move |_| eval_sequence(forms, rest_env, rest_denv, rest_abort, k)),
            )
        }
    }
}

fn eval_call(
    operator: Value,
    operands: Vec<Value>,
    kind: CallKind,
    env: Env,
    denv: Env,
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match classify_head(&operator, &env)? {
        Head::Resolved(value) => proceed_call(value, operands, kind, env, denv, abort, k),
        Head::Form(form) => {
            let call_env = env.clone();
            let call_denv = denv.clone();
            let call_abort = abort.clone();
            eval(
                form,
                env,
                denv,
                abort,
                Box::new(move |outcome| {
                    proceed_call(
                        outcome.primary(),
                        operands,
                        kind,
                        call_env,
                        call_denv,
                        call_abort,
                        k,
                    )
                }),
            )
        }
    }
}

fn proceed_call(
    function: Value,
    operands: Vec<Value>,
    kind: CallKind,
    env: Env,
    denv: Env,
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    let callable = Callable::from_value(function)?;
    if let Callable::Closure(closure) = &callable {
        if closure.is_macro {
            if kind != CallKind::Call {
                return Err(not_a_macro_position(kind));
            }
            let expansion = expand_macro(closure, operands, denv.clone(), abort.clone())?;
            return eval(expansion, env, denv, abort, k);
        }
    }
    let invoke_denv = denv.clone();
    let invoke_abort = abort.clone();
    eval_arguments(
        operands.into(),
        Vec::new(),
        kind,
        env,
        denv,
        abort,
        Box::new(move |args| invoke(callable, kind, args, invoke_denv, invoke_abort, k)),
    )
}

fn eval_arguments(
    mut pending: VecDeque<Value>,
    mut done: Vec<Value>,
    kind: CallKind,
    env: Env,
    denv: Env,
    abort: AbortFlag,
    k: ArgsCont,
) -> Result<Outcome, EvlError> {
    match pending.pop_front() {
        None => k(done),
        Some(form) => {
            let is_last = pending.is_empty();
            let rest_env = env.clone();
            let rest_denv = denv.clone();
            let rest_abort = abort.clone();
            eval(
                form,
                env,
                denv,
                abort,
                Box::new(move |outcome| {
                    match kind {
                        CallKind::MultipleValueCall => done.extend(outcome.into_values()),
                        CallKind::MultipleValueApply if !is_last => {
                            done.extend(outcome.into_values())
                        }
                        _ => done.push(outcome.primary()),
                    }
                    eval_arguments(pending, done, kind, rest_env, rest_denv, rest_abort, k)
                }),
            )
        }
    }
}

fn invoke(
    callable: Callable,
    kind: CallKind,
    args: Vec<Value>,
    denv: Env,
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    match callable {
        Callable::Primitive(p) => k(call_primitive(&p, &spread_arguments(kind, args)?)?),
        Callable::Closure(c) => {
            let slots = pair_arguments(&c, kind, args)?;
            apply_closure(c, slots, denv, abort, k)
        }
    }
}

fn apply_closure(
    closure: Rc<ClosureData>,
    slots: Vec<Value>,
    denv: Env,
    abort: AbortFlag,
    k: Cont,
) -> Result<Outcome, EvlError> {
    let forms: VecDeque<Value> = match &closure.body {
        Body::Forms(forms) => forms.clone().into(),
        Body::Compiled(_) => {
            return Err(EvlError::cannot_happen(
                "compiled closure body in the CPS evaluator",
            ))
        }
    };
    match closure.scope {
        Scope::Lexical => {
            let frame = closure_frame(&closure, slots, &closure.env);
            eval_sequence(forms, Some(frame), denv, abort, k)
        }
        Scope::Dynamic => {
            let frame = Frame::extend(&denv, closure.namespace, closure.params.clone(), slots);
            eval_sequence(forms, closure.env.clone(), Some(frame), abort, k)
        }
    }
}

fn expand_macro(
    closure: &Rc<ClosureData>,
    operands: Vec<Value>,
    denv: Env,
    abort: AbortFlag,
) -> Result<Value, EvlError> {
    let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
    let frame = closure_frame(closure, slots, &closure.env);
    let forms: VecDeque<Value> = match &closure.body {
        Body::Forms(forms) => forms.clone().into(),
        Body::Compiled(_) => {
            return Err(EvlError::cannot_happen(
                "compiled closure body in the CPS evaluator",
            ))
        }
    };
    Ok(eval_sequence(forms, Some(frame), denv, abort, Box::new(Ok))?.primary())
}
