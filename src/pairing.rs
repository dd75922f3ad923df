// ABOUTME: Argument to parameter pairing under the four call modes

use crate::error::{EvaluatorError, EvlError};
use crate::value::{Value, VariableData};
use std::rc::Rc;

fn expected_arity(params: &[Rc<VariableData>], rest: bool) -> String {
    if rest {
        format!("at least {}", params.len() - 1)
    } else {
        format!("{}", params.len())
    }
}

fn too_few(params: &[Rc<VariableData>], rest: bool, got: usize) -> EvlError {
    EvlError::Evaluator(EvaluatorError::TooFewArguments {
        expected: expected_arity(params, rest),
        got,
    })
}

fn too_many(params: &[Rc<VariableData>], rest: bool, got: usize) -> EvlError {
    EvlError::Evaluator(EvaluatorError::TooManyArguments {
        expected: expected_arity(params, rest),
        got,
    })
}

fn malformed() -> EvlError {
    EvlError::Evaluator(EvaluatorError::MalformedSpreadableSequenceOfObjects)
}

/// Pairs already-collected call arguments with the parameter list. When
/// `rest` is set the trailing parameter receives a fresh proper list of
/// the remaining arguments.
pub fn pair_call(
    params: &[Rc<VariableData>],
    rest: bool,
    mut args: Vec<Value>,
) -> Result<Vec<Value>, EvlError> {
    if !rest {
        if args.len() < params.len() {
            return Err(too_few(params, rest, args.len()));
        }
        if args.len() > params.len() {
            return Err(too_many(params, rest, args.len()));
        }
        return Ok(args);
    }
    let fixed = params.len() - 1;
    if args.len() < fixed {
        return Err(too_few(params, rest, args.len()));
    }
    let tail = Value::list(args.split_off(fixed));
    args.push(tail);
    Ok(args)
}

/// Pairs apply-style arguments: the leading arguments followed by a
/// spreadable tail, which must be a proper list. With a rest parameter
/// the tail may be adopted by reference past the boundary, sharing
/// structure with the caller's list.
pub fn pair_apply(
    params: &[Rc<VariableData>],
    rest: bool,
    mut leading: Vec<Value>,
    tail: Value,
) -> Result<Vec<Value>, EvlError> {
    if !tail.is_proper_list() {
        return Err(malformed());
    }
    if !rest {
        let spread = tail.list_elements().map_err(|_| malformed())?;
        leading.extend(spread);
        return pair_call(params, rest, leading);
    }
    let fixed = params.len() - 1;
    if leading.len() >= fixed {
        // Everything past the boundary goes to the rest parameter; the
        // tail list itself is shared, not copied.
        let mut remainder = tail;
        for element in leading.split_off(fixed).into_iter().rev() {
            remainder = Value::cons(element, remainder);
        }
        leading.push(remainder);
        return Ok(leading);
    }
    let mut cursor = tail;
    while leading.len() < fixed {
        match cursor {
            Value::Cons(cell) => {
                leading.push(cell.car.borrow().clone());
                let next = cell.cdr.borrow().clone();
                cursor = next;
            }
            Value::EmptyList => return Err(too_few(params, rest, leading.len())),
            _ => return Err(malformed()),
        }
    }
    leading.push(cursor);
    Ok(leading)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern;

    fn params(names: &[&str]) -> Vec<Rc<VariableData>> {
        names.iter().map(|n| intern::variable(n)).collect()
    }

    fn numbers(ns: &[f64]) -> Vec<Value> {
        ns.iter().map(|n| Value::Number(*n)).collect()
    }

    #[test]
    fn test_exact_call_pairing() {
        let ps = params(&["a", "b"]);
        let slots = pair_call(&ps, false, numbers(&[1.0, 2.0])).unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn test_call_arity_errors() {
        let ps = params(&["a", "b"]);
        assert!(matches!(
            pair_call(&ps, false, numbers(&[1.0])),
            Err(EvlError::Evaluator(EvaluatorError::TooFewArguments { .. }))
        ));
        assert!(matches!(
            pair_call(&ps, false, numbers(&[1.0, 2.0, 3.0])),
            Err(EvlError::Evaluator(EvaluatorError::TooManyArguments { .. }))
        ));
    }

    #[test]
    fn test_rest_collects_fresh_list() {
        let ps = params(&["a", "r"]);
        let slots = pair_call(&ps, true, numbers(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(format!("{}", slots[1]), "(2 3)");

        let empty = pair_call(&ps, true, numbers(&[1.0])).unwrap();
        assert_eq!(format!("{}", empty[1]), "()");
    }

    #[test]
    fn test_apply_spreads_tail() {
        let ps = params(&["a", "b", "c"]);
        let tail = Value::list(numbers(&[2.0, 3.0]));
        let slots = pair_apply(&ps, false, numbers(&[1.0]), tail).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(format!("{}", slots[2]), "3");
    }

    #[test]
    fn test_apply_rejects_improper_tail() {
        let ps = params(&["a"]);
        let dotted = Value::cons(Value::Number(1.0), Value::Number(2.0));
        assert!(matches!(
            pair_apply(&ps, false, vec![], dotted),
            Err(EvlError::Evaluator(
                EvaluatorError::MalformedSpreadableSequenceOfObjects
            ))
        ));
        assert!(matches!(
            pair_apply(&ps, false, vec![], Value::Number(9.0)),
            Err(EvlError::Evaluator(
                EvaluatorError::MalformedSpreadableSequenceOfObjects
            ))
        ));
    }

    #[test]
    fn test_apply_rest_adopts_tail_by_reference() {
        let ps = params(&["a", "r"]);
        let tail = Value::list(numbers(&[2.0, 3.0]));
        let slots = pair_apply(&ps, true, numbers(&[1.0]), tail.clone()).unwrap();
        assert!(Value::eq(&slots[1], &tail));
    }

    #[test]
    fn test_apply_rest_draws_fixed_from_tail() {
        let ps = params(&["a", "b", "r"]);
        let tail = Value::list(numbers(&[1.0, 2.0, 3.0]));
        let slots = pair_apply(&ps, true, vec![], tail).unwrap();
        assert_eq!(format!("{}", slots[0]), "1");
        assert_eq!(format!("{}", slots[1]), "2");
        assert_eq!(format!("{}", slots[2]), "(3)");
    }

    #[test]
    fn test_apply_too_few_across_boundary() {
        let ps = params(&["a", "b", "r"]);
        let tail = Value::list(numbers(&[1.0]));
        assert!(matches!(
            pair_apply(&ps, true, vec![], tail),
            Err(EvlError::Evaluator(EvaluatorError::TooFewArguments { .. }))
        ));
    }
}
