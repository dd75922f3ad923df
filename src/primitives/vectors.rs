//! Vector primitives: `_vector`, `_make-vector`, `_vector-ref`,
//! `_vector-set!`, `_vector-length`, `_vector?`

use super::define_primitive;
use crate::error::EvlError;
use crate::value::{Outcome, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn vector_cells<'a>(
    name: &str,
    arg: &'a Value,
) -> Result<&'a Rc<RefCell<Vec<Value>>>, EvlError> {
    match arg {
        Value::Vector(cells) => Ok(cells),
        other => Err(EvlError::signal(format!(
            "{}: a {} is not a vector",
            name,
            other.type_name()
        ))),
    }
}

fn index(name: &str, arg: &Value, length: usize) -> Result<usize, EvlError> {
    let n = match arg {
        Value::Number(n) => *n,
        other => {
            return Err(EvlError::signal(format!(
                "{}: a {} is not an index",
                name,
                other.type_name()
            )))
        }
    };
    if n.fract() != 0.0 || n < 0.0 || (n as usize) >= length {
        return Err(EvlError::signal(format!(
            "{}: index {} is out of range for length {}",
            name, n, length
        )));
    }
    Ok(n as usize)
}

pub fn primitive_vector(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Vector(Rc::new(RefCell::new(
        args.to_vec(),
    )))))
}

pub fn primitive_make_vector(args: &[Value]) -> Result<Outcome, EvlError> {
    let length = match &args[0] {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => *n as usize,
        other => {
            return Err(EvlError::signal(format!(
                "_make-vector: {} is not a non-negative length",
                other
            )))
        }
    };
    let fill = args.get(1).cloned().unwrap_or(Value::Void);
    Ok(Outcome::One(Value::Vector(Rc::new(RefCell::new(vec![
        fill;
        length
    ])))))
}

pub fn primitive_vector_ref(args: &[Value]) -> Result<Outcome, EvlError> {
    let cells = vector_cells("_vector-ref", &args[0])?;
    let i = index("_vector-ref", &args[1], cells.borrow().len())?;
    let value = cells.borrow()[i].clone();
    Ok(Outcome::One(value))
}

pub fn primitive_vector_set(args: &[Value]) -> Result<Outcome, EvlError> {
    let cells = vector_cells("_vector-set!", &args[0])?;
    let i = index("_vector-set!", &args[1], cells.borrow().len())?;
    cells.borrow_mut()[i] = args[2].clone();
    Ok(Outcome::One(args[2].clone()))
}

pub fn primitive_vector_length(args: &[Value]) -> Result<Outcome, EvlError> {
    let cells = vector_cells("_vector-length", &args[0])?;
    let length = cells.borrow().len();
    Ok(Outcome::One(Value::Number(length as f64)))
}

pub fn primitive_vector_p(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(matches!(
        args[0],
        Value::Vector(_)
    ))))
}

pub fn register() {
    define_primitive("_vector", 0, None, primitive_vector);
    define_primitive("_make-vector", 1, Some(2), primitive_make_vector);
    define_primitive("_vector-ref", 2, Some(2), primitive_vector_ref);
    define_primitive("_vector-set!", 3, Some(3), primitive_vector_set);
    define_primitive("_vector-length", 1, Some(1), primitive_vector_length);
    define_primitive("_vector?", 1, Some(1), primitive_vector_p);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_construction_and_access() {
        let v = primitive_vector(&[Value::Number(1.0), Value::Number(2.0)])
            .unwrap()
            .primary();
        assert_eq!(format!("{}", v), "#(1 2)");
        assert_eq!(
            format!(
                "{}",
                primitive_vector_ref(&[v.clone(), Value::Number(1.0)])
                    .unwrap()
                    .primary()
            ),
            "2"
        );
        primitive_vector_set(&[v.clone(), Value::Number(0.0), Value::Number(9.0)]).unwrap();
        assert_eq!(format!("{}", v), "#(9 2)");
    }

    #[test]
    fn test_make_vector_fills() {
        let v = primitive_make_vector(&[Value::Number(3.0), Value::Number(7.0)])
            .unwrap()
            .primary();
        assert_eq!(format!("{}", v), "#(7 7 7)");
        let empty = primitive_make_vector(&[Value::Number(0.0)]).unwrap().primary();
        assert_eq!(format!("{}", empty), "#()");
    }

    #[test]
    fn test_index_errors() {
        let v = primitive_vector(&[Value::Number(1.0)]).unwrap().primary();
        assert!(primitive_vector_ref(&[v.clone(), Value::Number(1.0)]).is_err());
        assert!(primitive_vector_ref(&[v.clone(), Value::Number(-1.0)]).is_err());
        assert!(primitive_vector_ref(&[v, Value::Number(0.5)]).is_err());
    }
}
