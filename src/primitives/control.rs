//! Control primitives: `_error` raises a condition, `_values` returns
//! zero or more values at once.

use super::define_primitive;
use crate::error::EvlError;
use crate::value::{Outcome, Value};

pub fn primitive_error(args: &[Value]) -> Result<Outcome, EvlError> {
    let message = match &args[0] {
        Value::Str(s) => s.clone(),
        other => format!("{}", other),
    };
    Err(EvlError::signal(message))
}

pub fn primitive_values(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::Many(args.to_vec()))
}

pub fn register() {
    define_primitive("_error", 1, Some(1), primitive_error);
    define_primitive("_values", 0, None, primitive_values);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_raises() {
        let result = primitive_error(&[Value::string("boom")]);
        match result {
            Err(e) => {
                assert_eq!(e.kind_name(), "EvaluatorError");
                assert!(format!("{}", e).contains("boom"));
            }
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_values_projects_to_first_or_void() {
        let many = primitive_values(&[Value::Number(1.0), Value::Number(2.0)]).unwrap();
        assert_eq!(format!("{}", many.primary()), "1");
        assert_eq!(many.values().len(), 2);

        let none = primitive_values(&[]).unwrap();
        assert!(matches!(none.primary(), Value::Void));
        assert!(none.values().is_empty());
    }
}
