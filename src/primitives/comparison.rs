//! Comparison primitives: `_=`, `_<`, `_>`, `_<=`, `_>=`, `_eq?`, `_eql?`
//!
//! The numeric comparisons chain over all arguments; `_eq?` and `_eql?`
//! take exactly two.

use super::define_primitive;
use crate::error::EvlError;
use crate::value::{Outcome, Value};

fn chain(
    name: &str,
    args: &[Value],
    keep: fn(f64, f64) -> bool,
) -> Result<Outcome, EvlError> {
    let mut previous = match &args[0] {
        Value::Number(n) => *n,
        other => {
            return Err(EvlError::signal(format!(
                "{}: a {} is not a number",
                name,
                other.type_name()
            )))
        }
    };
    for arg in &args[1..] {
        let current = match arg {
            Value::Number(n) => *n,
            other => {
                return Err(EvlError::signal(format!(
                    "{}: a {} is not a number",
                    name,
                    other.type_name()
                )))
            }
        };
        if !keep(previous, current) {
            return Ok(Outcome::One(Value::Boolean(false)));
        }
        previous = current;
    }
    Ok(Outcome::One(Value::Boolean(true)))
}

pub fn primitive_num_eq(args: &[Value]) -> Result<Outcome, EvlError> {
    chain("_=", args, |a, b| a == b)
}

pub fn primitive_lt(args: &[Value]) -> Result<Outcome, EvlError> {
    chain("_<", args, |a, b| a < b)
}

pub fn primitive_gt(args: &[Value]) -> Result<Outcome, EvlError> {
    chain("_>", args, |a, b| a > b)
}

pub fn primitive_le(args: &[Value]) -> Result<Outcome, EvlError> {
    chain("_<=", args, |a, b| a <= b)
}

pub fn primitive_ge(args: &[Value]) -> Result<Outcome, EvlError> {
    chain("_>=", args, |a, b| a >= b)
}

pub fn primitive_eq(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(Value::eq(&args[0], &args[1]))))
}

pub fn primitive_eql(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(Value::eql(&args[0], &args[1]))))
}

pub fn register() {
    define_primitive("_=", 2, None, primitive_num_eq);
    define_primitive("_<", 2, None, primitive_lt);
    define_primitive("_>", 2, None, primitive_gt);
    define_primitive("_<=", 2, None, primitive_le);
    define_primitive("_>=", 2, None, primitive_ge);
    define_primitive("_eq?", 2, Some(2), primitive_eq);
    define_primitive("_eql?", 2, Some(2), primitive_eql);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn truth(outcome: Outcome) -> bool {
        matches!(outcome.primary(), Value::Boolean(true))
    }

    #[test]
    fn test_chained_comparisons() {
        assert!(truth(primitive_lt(&[n(1.0), n(2.0), n(3.0)]).unwrap()));
        assert!(!truth(primitive_lt(&[n(1.0), n(3.0), n(2.0)]).unwrap()));
        assert!(truth(primitive_ge(&[n(3.0), n(3.0), n(1.0)]).unwrap()));
    }

    #[test]
    fn test_eq_and_eql_on_strings() {
        let a = Value::string("s");
        let b = Value::string("s");
        assert!(!truth(primitive_eq(&[a.clone(), b.clone()]).unwrap()));
        assert!(truth(primitive_eql(&[a, b]).unwrap()));
    }

    #[test]
    fn test_eq_on_interned_variables() {
        crate::intern::reset();
        let a = Value::Variable(crate::intern::variable("v"));
        let b = Value::Variable(crate::intern::variable("v"));
        assert!(truth(primitive_eq(&[a, b]).unwrap()));
    }
}
