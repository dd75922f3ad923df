// ABOUTME: Plain recursive evaluator, the first rung of the teaching ladder

use crate::analyzer::{analyze, AccessTarget, Analyzed};
use crate::env::{self, Env, Frame, Namespace};
use crate::error::EvlError;
use crate::eval::{
    call_primitive, classify_head, closure_frame, not_a_macro_position, pair_arguments,
    self_evaluating, spread_arguments, test_boolean, AbortFlag, CallKind, Callable, Head,
};
use crate::pairing;
use crate::value::{Body, ClosureData, Outcome, Scope, Value};
use std::rc::Rc;

/// Direct host-recursive interpretation. No tail-call optimization; the
/// dynamic environment rides along as an extra argument.
pub fn evaluate(form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    eval(form, &None, &None, abort)
}

fn eval(form: &Value, env: &Env, denv: &Env, abort: &AbortFlag) -> Result<Outcome, EvlError> {
    abort.check()?;
    if let Some(v) = self_evaluating(form) {
        return Ok(Outcome::One(v));
    }
    match form {
        Value::Variable(v) => env::lookup(env, Namespace::Value, v).map(Outcome::One),
        Value::EmptyList => Err(EvlError::signal("the empty list is not a form")),
        Value::Vector(_) => Err(EvlError::signal("a vector is not a form")),
        Value::Cons(_) => eval_compound(form, env, denv, abort),
        _ => Err(EvlError::cannot_happen("unhandled form kind")),
    }
}

fn eval_compound(
    form: &Value,
    env: &Env,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Outcome, EvlError> {
    match analyze(form)? {
        Analyzed::Quote(object) => Ok(Outcome::One(object)),
        Analyzed::Progn(forms) => eval_sequence(&forms, env, denv, abort),
        Analyzed::If {
            test,
            consequent,
            alternative,
        } => {
            let chosen = if test_boolean(&eval(&test, env, denv, abort)?.primary())? {
                consequent
            } else {
                alternative
            };
            eval(&chosen, env, denv, abort)
        }
        Analyzed::Lambda {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body,
        } => Ok(Outcome::One(Value::Closure(Rc::new(ClosureData {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body: Body::Forms(body),
            env: env.clone(),
        })))),
        Analyzed::Ref { target, variable } => {
            let value = match target {
                AccessTarget::LexicalValue => env::lookup(env, Namespace::Value, &variable)?,
                AccessTarget::LexicalFunction => env::lookup(env, Namespace::Function, &variable)?,
                AccessTarget::Dynamic => env::dynamic_lookup(denv, &variable)?,
            };
            Ok(Outcome::One(value))
        }
        Analyzed::Set {
            target,
            variable,
            form,
        } => {
            let value = eval(&form, env, denv, abort)?.primary();
            match target {
                AccessTarget::LexicalValue => env::assign(env, Namespace::Value, &variable, value.clone()),
                AccessTarget::LexicalFunction => {
                    env::assign(env, Namespace::Function, &variable, value.clone())
                }
                AccessTarget::Dynamic => env::dynamic_assign(denv, &variable, value.clone()),
            }
            Ok(Outcome::One(value))
        }
        Analyzed::ForEach { .. } => Err(EvlError::signal(
            "_for-each is not implemented by the plain recursive evaluator",
        )),
        Analyzed::CatchErrors(form) => match eval(&form, env, denv, abort) {
            Ok(_) => Ok(Outcome::One(Value::Void)),
            Err(EvlError::Aborted) => Err(EvlError::Aborted),
            Err(e) => Ok(Outcome::One(Value::string(e.kind_name()))),
        },
        Analyzed::Call { operator, operands } => {
            let callable = resolve_operator(&operator, env, denv, abort)?;
            if let Callable::Closure(closure) = &callable {
                if closure.is_macro {
                    let expansion = expand_macro(closure, operands, denv, abort)?;
                    return eval(&expansion, env, denv, abort);
                }
            }
            let mut args = Vec::with_capacity(operands.len());
            for operand in &operands {
                args.push(eval(operand, env, denv, abort)?.primary());
            }
            invoke(&callable, CallKind::Call, args, denv, abort)
        }
        Analyzed::Apply { function, forms } => {
            let callable = resolve_function(&function, CallKind::Apply, env, denv, abort)?;
            let mut args = Vec::with_capacity(forms.len());
            for form in &forms {
                args.push(eval(form, env, denv, abort)?.primary());
            }
            invoke(&callable, CallKind::Apply, args, denv, abort)
        }
        Analyzed::MultipleValueCall { function, forms } => {
            let callable =
                resolve_function(&function, CallKind::MultipleValueCall, env, denv, abort)?;
            let mut args = Vec::new();
            for form in &forms {
                args.extend(eval(form, env, denv, abort)?.into_values());
            }
            invoke(&callable, CallKind::MultipleValueCall, args, denv, abort)
        }
        Analyzed::MultipleValueApply { function, forms } => {
            let callable =
                resolve_function(&function, CallKind::MultipleValueApply, env, denv, abort)?;
            let mut args = Vec::new();
            let last = forms.len() - 1;
            for (i, form) in forms.iter().enumerate() {
                let outcome = eval(form, env, denv, abort)?;
                if i == last {
                    args.push(outcome.primary());
                } else {
                    args.extend(outcome.into_values());
                }
            }
            invoke(&callable, CallKind::MultipleValueApply, args, denv, abort)
        }
    }
}

fn eval_sequence(
    forms: &[Value],
    env: &Env,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Outcome, EvlError> {
    let mut result = Outcome::One(Value::Void);
    for form in forms {
        result = eval(form, env, denv, abort)?;
    }
    Ok(result)
}

fn resolve_operator(
    operator: &Value,
    env: &Env,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Callable, EvlError> {
    let value = match classify_head(operator, env)? {
        Head::Resolved(v) => v,
        Head::Form(f) => eval(&f, env, denv, abort)?.primary(),
    };
    Callable::from_value(value)
}

fn resolve_function(
    function: &Value,
    kind: CallKind,
    env: &Env,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Callable, EvlError> {
    let callable = resolve_operator(function, env, denv, abort)?;
    if callable.is_macro() {
        return Err(not_a_macro_position(kind));
    }
    Ok(callable)
}

fn invoke(
    callable: &Callable,
    kind: CallKind,
    args: Vec<Value>,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Outcome, EvlError> {
    match callable {
        Callable::Primitive(p) => call_primitive(p, &spread_arguments(kind, args)?),
        Callable::Closure(c) => {
            let slots = pair_arguments(c, kind, args)?;
            apply_closure(c, slots, denv, abort)
        }
    }
}

fn apply_closure(
    closure: &Rc<ClosureData>,
    slots: Vec<Value>,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Outcome, EvlError> {
    match closure.scope {
        Scope::Lexical => {
            let frame = closure_frame(closure, slots, &closure.env);
            eval_body(closure, &Some(frame), denv, abort)
        }
        Scope::Dynamic => {
            // The parameter frame extends the dynamic chain only for the
            // duration of this call's body.
            let frame = Frame::extend(denv, closure.namespace, closure.params.clone(), slots);
            eval_body(closure, &closure.env, &Some(frame), abort)
        }
    }
}

fn eval_body(
    closure: &ClosureData,
    env: &Env,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Outcome, EvlError> {
    match &closure.body {
        Body::Forms(forms) => eval_sequence(forms, env, denv, abort),
        Body::Compiled(_) => Err(EvlError::cannot_happen(
            "compiled closure body in the plain recursive evaluator",
        )),
    }
}

/// Macro closures receive the operand forms unevaluated; the body yields
/// an expansion for the caller to evaluate.
fn expand_macro(
    closure: &Rc<ClosureData>,
    operands: Vec<Value>,
    denv: &Env,
    abort: &AbortFlag,
) -> Result<Value, EvlError> {
    let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
    let frame = closure_frame(closure, slots, &closure.env);
    Ok(eval_body(closure, &Some(frame), denv, abort)?.primary())
}
