// ABOUTME: Syntactic validation and destructuring of special-operator forms

use crate::env::Namespace;
use crate::error::EvlError;
use crate::value::{Scope, Value, VariableData};
use std::rc::Rc;

/// Which binding chain a reference or assignment form addresses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessTarget {
    LexicalValue,
    LexicalFunction,
    Dynamic,
}

impl AccessTarget {
    pub fn namespace(&self) -> Namespace {
        match self {
            AccessTarget::LexicalValue | AccessTarget::Dynamic => Namespace::Value,
            AccessTarget::LexicalFunction => Namespace::Function,
        }
    }
}

/// The destructured parts of a form, one variant per special operator,
/// plus `Call` for everything else.
pub enum Analyzed {
    Quote(Value),
    Progn(Vec<Value>),
    If {
        test: Value,
        consequent: Value,
        alternative: Value,
    },
    Lambda {
        scope: Scope,
        namespace: Namespace,
        is_macro: bool,
        params: Vec<Rc<VariableData>>,
        rest: bool,
        body: Vec<Value>,
    },
    Ref {
        target: AccessTarget,
        variable: Rc<VariableData>,
    },
    Set {
        target: AccessTarget,
        variable: Rc<VariableData>,
        form: Value,
    },
    ForEach {
        function: Value,
        list: Value,
    },
    CatchErrors(Value),
    Apply {
        function: Value,
        forms: Vec<Value>,
    },
    MultipleValueCall {
        function: Value,
        forms: Vec<Value>,
    },
    MultipleValueApply {
        function: Value,
        forms: Vec<Value>,
    },
    Call {
        operator: Value,
        operands: Vec<Value>,
    },
}

fn shape_error(operator: &str, expected: &str) -> EvlError {
    EvlError::FormAnalyzer(format!("{}: expected {}", operator, expected))
}

/// Validates the shape of a compound form and returns its parts. The
/// form must be a cons.
pub fn analyze(form: &Value) -> Result<Analyzed, EvlError> {
    let elements = form
        .list_elements()
        .map_err(|_| EvlError::FormAnalyzer("a form must be a proper list".into()))?;
    let head = elements[0].clone();
    let rest = elements[1..].to_vec();

    let name = match &head {
        Value::Variable(v) => v.name.clone(),
        _ => {
            return Ok(Analyzed::Call {
                operator: head,
                operands: rest,
            })
        }
    };

    match name.as_str() {
        "quote" => {
            if rest.len() != 1 {
                return Err(shape_error("quote", "exactly one form"));
            }
            Ok(Analyzed::Quote(rest.into_iter().next().unwrap()))
        }
        "progn" => Ok(Analyzed::Progn(rest)),
        "if" => {
            if rest.len() != 3 {
                return Err(shape_error("if", "a test, a consequent and an alternative"));
            }
            let mut it = rest.into_iter();
            Ok(Analyzed::If {
                test: it.next().unwrap(),
                consequent: it.next().unwrap(),
                alternative: it.next().unwrap(),
            })
        }
        "_vlambda" => analyze_lambda("_vlambda", Scope::Lexical, Namespace::Value, false, rest),
        "_mlambda" => analyze_lambda("_mlambda", Scope::Lexical, Namespace::Value, true, rest),
        "_flambda" => analyze_lambda("_flambda", Scope::Lexical, Namespace::Function, false, rest),
        "_dlambda" => analyze_lambda("_dlambda", Scope::Dynamic, Namespace::Value, false, rest),
        "vref" => analyze_ref("vref", AccessTarget::LexicalValue, rest),
        "fref" => analyze_ref("fref", AccessTarget::LexicalFunction, rest),
        "dref" => analyze_ref("dref", AccessTarget::Dynamic, rest),
        "vset!" => analyze_set("vset!", AccessTarget::LexicalValue, rest),
        "fset!" => analyze_set("fset!", AccessTarget::LexicalFunction, rest),
        "dset!" => analyze_set("dset!", AccessTarget::Dynamic, rest),
        "_for-each" => {
            if rest.len() != 2 {
                return Err(shape_error("_for-each", "a function form and a list form"));
            }
            let mut it = rest.into_iter();
            Ok(Analyzed::ForEach {
                function: it.next().unwrap(),
                list: it.next().unwrap(),
            })
        }
        "_catch-errors" => {
            if rest.len() != 1 {
                return Err(shape_error("_catch-errors", "exactly one form"));
            }
            Ok(Analyzed::CatchErrors(rest.into_iter().next().unwrap()))
        }
        "apply" => {
            if rest.len() < 2 {
                return Err(shape_error("apply", "a function form and a trailing list form"));
            }
            let mut it = rest.into_iter();
            let function = it.next().unwrap();
            Ok(Analyzed::Apply {
                function,
                forms: it.collect(),
            })
        }
        "multiple-value-call" => {
            if rest.is_empty() {
                return Err(shape_error("multiple-value-call", "a function form"));
            }
            let mut it = rest.into_iter();
            let function = it.next().unwrap();
            Ok(Analyzed::MultipleValueCall {
                function,
                forms: it.collect(),
            })
        }
        "multiple-value-apply" => {
            if rest.len() < 2 {
                return Err(shape_error(
                    "multiple-value-apply",
                    "a function form and a trailing list form",
                ));
            }
            let mut it = rest.into_iter();
            let function = it.next().unwrap();
            Ok(Analyzed::MultipleValueApply {
                function,
                forms: it.collect(),
            })
        }
        _ => Ok(Analyzed::Call {
            operator: head,
            operands: rest,
        }),
    }
}

fn analyze_ref(operator: &str, target: AccessTarget, rest: Vec<Value>) -> Result<Analyzed, EvlError> {
    if rest.len() != 1 {
        return Err(shape_error(operator, "exactly one variable"));
    }
    match rest.into_iter().next().unwrap() {
        Value::Variable(v) => Ok(Analyzed::Ref {
            target,
            variable: v,
        }),
        _ => Err(shape_error(operator, "a variable")),
    }
}

fn analyze_set(operator: &str, target: AccessTarget, rest: Vec<Value>) -> Result<Analyzed, EvlError> {
    if rest.len() != 2 {
        return Err(shape_error(operator, "a variable and a form"));
    }
    let mut it = rest.into_iter();
    let variable = match it.next().unwrap() {
        Value::Variable(v) => v,
        _ => return Err(shape_error(operator, "a variable")),
    };
    Ok(Analyzed::Set {
        target,
        variable,
        form: it.next().unwrap(),
    })
}

fn analyze_lambda(
    operator: &str,
    scope: Scope,
    namespace: Namespace,
    is_macro: bool,
    rest: Vec<Value>,
) -> Result<Analyzed, EvlError> {
    if rest.is_empty() {
        return Err(shape_error(operator, "a parameter list"));
    }
    let mut it = rest.into_iter();
    let (params, has_rest) = analyze_parameters(operator, &it.next().unwrap())?;
    Ok(Analyzed::Lambda {
        scope,
        namespace,
        is_macro,
        params,
        rest: has_rest,
        body: it.collect(),
    })
}

/// A parameter list is a proper list of distinct variables, a dotted list
/// whose trailing variable becomes the rest parameter, or a bare variable
/// taking all arguments as one list.
pub fn analyze_parameters(
    operator: &str,
    form: &Value,
) -> Result<(Vec<Rc<VariableData>>, bool), EvlError> {
    let mut params: Vec<Rc<VariableData>> = Vec::new();
    let mut rest = false;
    let mut cursor = form.clone();
    loop {
        match cursor {
            Value::EmptyList => break,
            Value::Variable(v) => {
                params.push(v);
                rest = true;
                break;
            }
            Value::Cons(cell) => {
                match &*cell.car.borrow() {
                    Value::Variable(v) => params.push(v.clone()),
                    other => {
                        return Err(shape_error(
                            operator,
                            &format!("a variable parameter, got {}", other.type_name()),
                        ))
                    }
                }
                let next = cell.cdr.borrow().clone();
                cursor = next;
            }
            _ => return Err(shape_error(operator, "a parameter list")),
        }
    }
    for (i, a) in params.iter().enumerate() {
        for b in &params[i + 1..] {
            if Rc::ptr_eq(a, b) {
                return Err(EvlError::FormAnalyzer(format!(
                    "{}: duplicate parameter {}",
                    operator, a.name
                )));
            }
        }
    }
    Ok((params, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn form(source: &str) -> Value {
        Reader::new(source).read_object().unwrap().unwrap()
    }

    #[test]
    fn test_if_is_strictly_ternary() {
        assert!(analyze(&form("(if #t 1 2)")).is_ok());
        assert!(matches!(
            analyze(&form("(if #t 1)")),
            Err(EvlError::FormAnalyzer(_))
        ));
        assert!(matches!(
            analyze(&form("(if #t 1 2 3)")),
            Err(EvlError::FormAnalyzer(_))
        ));
    }

    #[test]
    fn test_quote_shape() {
        assert!(matches!(analyze(&form("(quote x)")), Ok(Analyzed::Quote(_))));
        assert!(analyze(&form("(quote)")).is_err());
        assert!(analyze(&form("(quote a b)")).is_err());
    }

    #[test]
    fn test_lambda_parameter_shapes() {
        match analyze(&form("(_vlambda (a b) a)")).unwrap() {
            Analyzed::Lambda { params, rest, .. } => {
                assert_eq!(params.len(), 2);
                assert!(!rest);
            }
            _ => panic!("expected a lambda"),
        }
        match analyze(&form("(_vlambda (a . r) a)")).unwrap() {
            Analyzed::Lambda { params, rest, .. } => {
                assert_eq!(params.len(), 2);
                assert!(rest);
            }
            _ => panic!("expected a lambda"),
        }
        match analyze(&form("(_vlambda args args)")).unwrap() {
            Analyzed::Lambda { params, rest, .. } => {
                assert_eq!(params.len(), 1);
                assert!(rest);
            }
            _ => panic!("expected a lambda"),
        }
    }

    #[test]
    fn test_duplicate_parameters_rejected() {
        crate::intern::reset();
        assert!(matches!(
            analyze(&form("(_vlambda (a a) a)")),
            Err(EvlError::FormAnalyzer(_))
        ));
    }

    #[test]
    fn test_lambda_variants_set_flags() {
        match analyze(&form("(_mlambda (x) x)")).unwrap() {
            Analyzed::Lambda {
                scope,
                namespace,
                is_macro,
                ..
            } => {
                assert_eq!(scope, Scope::Lexical);
                assert_eq!(namespace, Namespace::Value);
                assert!(is_macro);
            }
            _ => panic!("expected a lambda"),
        }
        match analyze(&form("(_dlambda (x) x)")).unwrap() {
            Analyzed::Lambda { scope, .. } => assert_eq!(scope, Scope::Dynamic),
            _ => panic!("expected a lambda"),
        }
        match analyze(&form("(_flambda (x) x)")).unwrap() {
            Analyzed::Lambda { namespace, .. } => assert_eq!(namespace, Namespace::Function),
            _ => panic!("expected a lambda"),
        }
    }

    #[test]
    fn test_ref_and_set_shapes() {
        assert!(matches!(
            analyze(&form("(vref x)")),
            Ok(Analyzed::Ref {
                target: AccessTarget::LexicalValue,
                ..
            })
        ));
        assert!(matches!(
            analyze(&form("(dset! x 1)")),
            Ok(Analyzed::Set {
                target: AccessTarget::Dynamic,
                ..
            })
        ));
        assert!(analyze(&form("(vref 42)")).is_err());
        assert!(analyze(&form("(fset! f)")).is_err());
    }

    #[test]
    fn test_improper_call_form_rejected() {
        assert!(matches!(
            analyze(&form("(f . x)")),
            Err(EvlError::FormAnalyzer(_))
        ));
    }

    #[test]
    fn test_unknown_head_is_a_call() {
        match analyze(&form("(f 1 2)")).unwrap() {
            Analyzed::Call { operands, .. } => assert_eq!(operands.len(), 2),
            _ => panic!("expected a call"),
        }
    }

    #[test]
    fn test_apply_needs_a_trailing_form() {
        assert!(analyze(&form("(apply f)")).is_err());
        assert!(matches!(
            analyze(&form("(apply f (quote (1 2)))")),
            Ok(Analyzed::Apply { .. })
        ));
    }
}
