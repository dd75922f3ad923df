// ABOUTME: Preprocessing layer turning forms into executable node trees with lexical addresses

use crate::analyzer::{analyze, AccessTarget, Analyzed};
use crate::env::{Env, Frame, Namespace};
use crate::error::EvlError;
use crate::eval::{not_a_macro_position, self_evaluating, AbortFlag, CallKind};
use crate::pairing;
use crate::value::{Body, ClosureData, Scope, Value, VariableData};
use std::rc::Rc;

/// An immediately-executable form node. Each variant carries only the
/// data its own eval step needs; lexical references are rewritten to
/// frame-depth/slot-index pairs, dynamic accesses stay symbolic.
#[derive(Clone)]
pub enum Prep {
    Constant(Value),
    /// A form that always signals; keeps preprocess-time failures
    /// catchable at run time like everywhere else.
    Fail(String),
    LocalRef {
        depth: usize,
        index: usize,
    },
    GlobalRef {
        namespace: Namespace,
        variable: Rc<VariableData>,
    },
    DynamicRef {
        variable: Rc<VariableData>,
    },
    LocalAssign {
        depth: usize,
        index: usize,
        form: Rc<Prep>,
    },
    GlobalAssign {
        namespace: Namespace,
        variable: Rc<VariableData>,
        form: Rc<Prep>,
    },
    DynamicAssign {
        variable: Rc<VariableData>,
        form: Rc<Prep>,
    },
    Sequence(Rc<Vec<Prep>>),
    Branch {
        test: Rc<Prep>,
        consequent: Rc<Prep>,
        alternative: Rc<Prep>,
    },
    MakeClosure {
        scope: Scope,
        namespace: Namespace,
        is_macro: bool,
        params: Vec<Rc<VariableData>>,
        rest: bool,
        body: Rc<Vec<Prep>>,
    },
    CatchErrors(Rc<Prep>),
    Call {
        operator: Rc<Prep>,
        operands: Rc<Vec<Prep>>,
        kind: CallKind,
    },
}

/// The compile-time mirror of the runtime frame chain. Macro-let frames
/// additionally carry the macro closures visible during expansion.
pub struct CompileFrame {
    namespace: Namespace,
    variables: Vec<Rc<VariableData>>,
    macros: Vec<Option<Rc<ClosureData>>>,
    parent: CompileEnv,
}

pub type CompileEnv = Option<Rc<CompileFrame>>;

fn extend(
    parent: &CompileEnv,
    namespace: Namespace,
    variables: Vec<Rc<VariableData>>,
    macros: Vec<Option<Rc<ClosureData>>>,
) -> CompileEnv {
    Some(Rc::new(CompileFrame {
        namespace,
        variables,
        macros,
        parent: parent.clone(),
    }))
}

fn plain_frame(
    parent: &CompileEnv,
    namespace: Namespace,
    variables: &[Rc<VariableData>],
) -> CompileEnv {
    extend(
        parent,
        namespace,
        variables.to_vec(),
        vec![None; variables.len()],
    )
}

/// Depth counts every frame passed, matching the runtime chain walk.
fn lexical_address(
    cenv: &CompileEnv,
    namespace: Namespace,
    var: &Rc<VariableData>,
) -> Option<(usize, usize)> {
    let mut depth = 0;
    let mut frame = cenv.clone();
    while let Some(f) = frame {
        if f.namespace == namespace {
            if let Some(i) = f.variables.iter().position(|v| Rc::ptr_eq(v, var)) {
                return Some((depth, i));
            }
        }
        depth += 1;
        frame = f.parent.clone();
    }
    None
}

/// The macro closure bound to a function-namespace variable on the
/// compile-time chain, if the innermost binding is one.
fn macro_binding(cenv: &CompileEnv, var: &Rc<VariableData>) -> Option<Rc<ClosureData>> {
    let mut frame = cenv.clone();
    while let Some(f) = frame {
        if f.namespace == Namespace::Function {
            if let Some(i) = f.variables.iter().position(|v| Rc::ptr_eq(v, var)) {
                return f.macros[i].clone();
            }
        }
        frame = f.parent.clone();
    }
    None
}

fn lexically_bound(cenv: &CompileEnv, namespace: Namespace, var: &Rc<VariableData>) -> bool {
    lexical_address(cenv, namespace, var).is_some()
}

pub fn preprocess(form: &Value, cenv: &CompileEnv, abort: &AbortFlag) -> Result<Prep, EvlError> {
    if let Some(v) = self_evaluating(form) {
        return Ok(Prep::Constant(v));
    }
    match form {
        Value::Variable(v) => Ok(reference(cenv, AccessTarget::LexicalValue, v)),
        Value::EmptyList => Ok(Prep::Fail("the empty list is not a form".into())),
        Value::Vector(_) => Ok(Prep::Fail("a vector is not a form".into())),
        Value::Cons(_) => preprocess_compound(form, cenv, abort),
        _ => Err(EvlError::cannot_happen("unhandled form kind")),
    }
}

fn reference(cenv: &CompileEnv, target: AccessTarget, var: &Rc<VariableData>) -> Prep {
    match target {
        AccessTarget::Dynamic => Prep::DynamicRef {
            variable: var.clone(),
        },
        _ => match lexical_address(cenv, target.namespace(), var) {
            Some((depth, index)) => Prep::LocalRef { depth, index },
            None => Prep::GlobalRef {
                namespace: target.namespace(),
                variable: var.clone(),
            },
        },
    }
}

fn preprocess_compound(
    form: &Value,
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Prep, EvlError> {
    match analyze(form)? {
        Analyzed::Quote(object) => Ok(Prep::Constant(object)),
        Analyzed::Progn(forms) => {
            if forms.is_empty() {
                return Ok(Prep::Constant(Value::Void));
            }
            Ok(Prep::Sequence(Rc::new(preprocess_all(&forms, cenv, abort)?)))
        }
        Analyzed::If {
            test,
            consequent,
            alternative,
        } => Ok(Prep::Branch {
            test: Rc::new(preprocess(&test, cenv, abort)?),
            consequent: Rc::new(preprocess(&consequent, cenv, abort)?),
            alternative: Rc::new(preprocess(&alternative, cenv, abort)?),
        }),
        Analyzed::Lambda {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body,
        } => preprocess_lambda(scope, namespace, is_macro, params, rest, &body, cenv, abort),
        Analyzed::Ref { target, variable } => Ok(reference(cenv, target, &variable)),
        Analyzed::Set {
            target,
            variable,
            form,
        } => {
            let value = Rc::new(preprocess(&form, cenv, abort)?);
            Ok(match target {
                AccessTarget::Dynamic => Prep::DynamicAssign {
                    variable,
                    form: value,
                },
                _ => match lexical_address(cenv, target.namespace(), &variable) {
                    Some((depth, index)) => Prep::LocalAssign {
                        depth,
                        index,
                        form: value,
                    },
                    None => Prep::GlobalAssign {
                        namespace: target.namespace(),
                        variable,
                        form: value,
                    },
                },
            })
        }
        Analyzed::ForEach { .. } => Ok(Prep::Fail(
            "_for-each is not implemented by the preprocessing trampoline evaluator".into(),
        )),
        Analyzed::CatchErrors(inner) => Ok(Prep::CatchErrors(Rc::new(preprocess(
            &inner, cenv, abort,
        )?))),
        Analyzed::Call { operator, operands } => {
            preprocess_call(&operator, &operands, cenv, abort)
        }
        Analyzed::Apply { function, forms } => {
            preprocess_call_kind(CallKind::Apply, &function, &forms, cenv, abort)
        }
        Analyzed::MultipleValueCall { function, forms } => {
            preprocess_call_kind(CallKind::MultipleValueCall, &function, &forms, cenv, abort)
        }
        Analyzed::MultipleValueApply { function, forms } => {
            preprocess_call_kind(CallKind::MultipleValueApply, &function, &forms, cenv, abort)
        }
    }
}

fn preprocess_all(
    forms: &[Value],
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Vec<Prep>, EvlError> {
    forms
        .iter()
        .map(|f| preprocess(f, cenv, abort))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn preprocess_lambda(
    scope: Scope,
    namespace: Namespace,
    is_macro: bool,
    params: Vec<Rc<VariableData>>,
    rest: bool,
    body: &[Value],
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Prep, EvlError> {
    // Dynamically bound parameters stay out of the lexical chain; the
    // body reaches them through dref.
    let body_cenv = match scope {
        Scope::Lexical => plain_frame(cenv, namespace, &params),
        Scope::Dynamic => cenv.clone(),
    };
    let body = preprocess_all(body, &body_cenv, abort)?;
    Ok(Prep::MakeClosure {
        scope,
        namespace,
        is_macro,
        params,
        rest,
        body: Rc::new(body),
    })
}

/// A lambda form analyzed without touching the compile environment, used
/// for macro-let recognition.
fn as_lambda_form(form: &Value) -> Option<Analyzed> {
    if !matches!(form, Value::Cons(_)) {
        return None;
    }
    match analyze(form) {
        Ok(lambda @ Analyzed::Lambda { .. }) => Some(lambda),
        _ => None,
    }
}

fn preprocess_call(
    operator: &Value,
    operands: &[Value],
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Prep, EvlError> {
    // Macro-let: a call whose head is a _flambda whose operands are all
    // _mlambdas binds scope-local macros, expanded right here.
    if let Some(prep) = preprocess_macro_let(operator, operands, cenv, abort)? {
        return Ok(prep);
    }

    if let Value::Variable(v) = operator {
        if lexically_bound(cenv, Namespace::Function, v) {
            if let Some(macro_closure) = macro_binding(cenv, v) {
                let expansion = expand_macro(&macro_closure, operands.to_vec(), abort)?;
                return preprocess(&expansion, cenv, abort);
            }
        } else if let Some(Value::Closure(c)) = v.function_cell.borrow().clone() {
            // A function-namespace variable currently bound to a macro
            // closure expands at preprocess time too.
            if c.is_macro {
                let expansion = expand_macro(&c, operands.to_vec(), abort)?;
                return preprocess(&expansion, cenv, abort);
            }
        }
    }

    let operator_prep = match operator {
        Value::Variable(v) => reference(cenv, AccessTarget::LexicalFunction, v),
        other => preprocess(other, cenv, abort)?,
    };
    Ok(Prep::Call {
        operator: Rc::new(operator_prep),
        operands: Rc::new(preprocess_all(operands, cenv, abort)?),
        kind: CallKind::Call,
    })
}

fn preprocess_call_kind(
    kind: CallKind,
    function: &Value,
    forms: &[Value],
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Prep, EvlError> {
    let operator_prep = match function {
        Value::Variable(v) => {
            let shadowed = lexically_bound(cenv, Namespace::Function, v);
            let is_macro = if shadowed {
                macro_binding(cenv, v).is_some()
            } else {
                matches!(&*v.function_cell.borrow(), Some(Value::Closure(c)) if c.is_macro)
            };
            if is_macro {
                return Ok(Prep::Fail(format!("{}", not_a_macro_position(kind))));
            }
            reference(cenv, AccessTarget::LexicalFunction, v)
        }
        other => preprocess(other, cenv, abort)?,
    };
    Ok(Prep::Call {
        operator: Rc::new(operator_prep),
        operands: Rc::new(preprocess_all(forms, cenv, abort)?),
        kind,
    })
}

fn preprocess_macro_let(
    operator: &Value,
    operands: &[Value],
    cenv: &CompileEnv,
    abort: &AbortFlag,
) -> Result<Option<Prep>, EvlError> {
    let Some(Analyzed::Lambda {
        scope: Scope::Lexical,
        namespace: Namespace::Function,
        is_macro: false,
        params,
        rest: false,
        body,
    }) = as_lambda_form(operator)
    else {
        return Ok(None);
    };
    if params.len() != operands.len() || operands.is_empty() {
        return Ok(None);
    }

    let mut macro_closures = Vec::with_capacity(operands.len());
    for operand in operands {
        let Some(Analyzed::Lambda {
            scope: Scope::Lexical,
            namespace: Namespace::Value,
            is_macro: true,
            ..
        }) = as_lambda_form(operand)
        else {
            return Ok(None);
        };
        // The macro-valued operand preprocesses in a null environment.
        let prep = preprocess(operand, &None, abort)?;
        macro_closures.push(instantiate_closure(&prep)?);
    }

    let body_cenv = extend(
        cenv,
        Namespace::Function,
        params.clone(),
        macro_closures.iter().map(|c| Some(c.clone())).collect(),
    );
    let body = preprocess_all(&body, &body_cenv, abort)?;
    let operator_prep = Prep::MakeClosure {
        scope: Scope::Lexical,
        namespace: Namespace::Function,
        is_macro: false,
        params,
        rest: false,
        body: Rc::new(body),
    };
    let operand_preps: Vec<Prep> = macro_closures
        .into_iter()
        .map(|c| Prep::Constant(Value::Closure(c)))
        .collect();
    Ok(Some(Prep::Call {
        operator: Rc::new(operator_prep),
        operands: Rc::new(operand_preps),
        kind: CallKind::Call,
    }))
}

fn instantiate_closure(prep: &Prep) -> Result<Rc<ClosureData>, EvlError> {
    match prep {
        Prep::MakeClosure {
            scope,
            namespace,
            is_macro,
            params,
            rest,
            body,
        } => Ok(Rc::new(ClosureData {
            scope: *scope,
            namespace: *namespace,
            is_macro: *is_macro,
            params: params.clone(),
            rest: *rest,
            body: Body::Compiled(body.clone()),
            env: None,
        })),
        _ => Err(EvlError::cannot_happen(
            "macro operand did not preprocess to a closure",
        )),
    }
}

/// Runs a compiled macro body over the unevaluated operand forms and
/// returns the expansion.
fn expand_macro(
    closure: &Rc<ClosureData>,
    operands: Vec<Value>,
    abort: &AbortFlag,
) -> Result<Value, EvlError> {
    let slots = pairing::pair_call(&closure.params, closure.rest, operands)?;
    let frame = Frame::extend(
        &closure.env,
        closure.namespace,
        closure.params.clone(),
        slots,
    );
    let body = match &closure.body {
        Body::Compiled(preps) => preps.clone(),
        Body::Forms(_) => {
            return Err(EvlError::cannot_happen(
                "uncompiled macro body under the preprocessing evaluator",
            ))
        }
    };
    let env: Env = Some(frame);
    Ok(super::trampolinepp::run_body(&body, env, abort)?.primary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;
    use crate::primitives;
    use crate::reader::Reader;

    fn prep(source: &str) -> Result<Prep, EvlError> {
        intern::reset();
        primitives::register();
        let form = Reader::new(source).read_object().unwrap().unwrap();
        preprocess(&form, &None, &AbortFlag::new())
    }

    #[test]
    fn test_constants_and_quote() {
        assert!(matches!(prep("42").unwrap(), Prep::Constant(_)));
        assert!(matches!(prep("(quote (a b))").unwrap(), Prep::Constant(_)));
    }

    #[test]
    fn test_globals_stay_symbolic() {
        assert!(matches!(
            prep("x").unwrap(),
            Prep::GlobalRef {
                namespace: Namespace::Value,
                ..
            }
        ));
        assert!(matches!(
            prep("(fref f)").unwrap(),
            Prep::GlobalRef {
                namespace: Namespace::Function,
                ..
            }
        ));
        assert!(matches!(prep("(dref d)").unwrap(), Prep::DynamicRef { .. }));
    }

    #[test]
    fn test_parameters_get_lexical_addresses() {
        let lambda = prep("(_vlambda (a b) b)").unwrap();
        let Prep::MakeClosure { body, .. } = lambda else {
            panic!("expected a closure node");
        };
        assert!(matches!(body[0], Prep::LocalRef { depth: 0, index: 1 }));
    }

    #[test]
    fn test_nested_lambdas_count_depth() {
        let lambda = prep("(_vlambda (a) (_vlambda (b) a))").unwrap();
        let Prep::MakeClosure { body, .. } = lambda else {
            panic!("expected a closure node");
        };
        let Prep::MakeClosure { body: inner, .. } = &body[0] else {
            panic!("expected an inner closure node");
        };
        assert!(matches!(inner[0], Prep::LocalRef { depth: 1, index: 0 }));
    }

    #[test]
    fn test_dynamic_parameters_stay_symbolic() {
        let lambda = prep("(_dlambda (d) (dref d))").unwrap();
        let Prep::MakeClosure { body, .. } = lambda else {
            panic!("expected a closure node");
        };
        assert!(matches!(body[0], Prep::DynamicRef { .. }));
    }

    #[test]
    fn test_macro_let_expands_at_preprocess_time() {
        let source = "((_flambda (k) (k abc)) (_mlambda (x) (_list (quote quote) x)))";
        let call = prep(source).unwrap();
        let Prep::Call { operator, operands, .. } = call else {
            panic!("expected a call node");
        };
        assert!(matches!(&*operator, Prep::MakeClosure { .. }));
        assert!(matches!(&operands[0], Prep::Constant(Value::Closure(c)) if c.is_macro));
    }

    #[test]
    fn test_global_macro_expands_at_preprocess_time() {
        intern::reset();
        primitives::register();
        let abort = AbortFlag::new();
        let define = Reader::new("(fset! k (_mlambda (x) (_list (quote quote) x)))")
            .read_object()
            .unwrap()
            .unwrap();
        crate::eval::trampolinepp::evaluate(&define, &abort).unwrap();
        let usage = Reader::new("(k abc)").read_object().unwrap().unwrap();
        let prep = preprocess(&usage, &None, &abort).unwrap();
        // (quote abc) collapses to a constant
        assert!(matches!(prep, Prep::Constant(Value::Variable(_))));
    }
}
