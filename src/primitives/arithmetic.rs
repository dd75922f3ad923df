//! Arithmetic primitives: `_+`, `_-`, `_*`, `_/`
//!
//! - `_+`: sum of all arguments (identity 0)
//! - `_-`: subtract subsequent arguments from the first, negate a single one
//! - `_*`: product of all arguments (identity 1)
//! - `_/`: divide the first argument by the rest, reciprocal of a single one

use super::define_primitive;
use crate::error::EvlError;
use crate::value::{Outcome, Value};

fn number(name: &str, arg: &Value) -> Result<f64, EvlError> {
    match arg {
        Value::Number(n) => Ok(*n),
        other => Err(EvlError::signal(format!(
            "{}: a {} is not a number",
            name,
            other.type_name()
        ))),
    }
}

pub fn primitive_add(args: &[Value]) -> Result<Outcome, EvlError> {
    let mut sum = 0.0;
    for arg in args {
        sum += number("_+", arg)?;
    }
    Ok(Outcome::One(Value::Number(sum)))
}

pub fn primitive_sub(args: &[Value]) -> Result<Outcome, EvlError> {
    let first = number("_-", &args[0])?;
    if args.len() == 1 {
        return Ok(Outcome::One(Value::Number(-first)));
    }
    let mut result = first;
    for arg in &args[1..] {
        result -= number("_-", arg)?;
    }
    Ok(Outcome::One(Value::Number(result)))
}

pub fn primitive_mul(args: &[Value]) -> Result<Outcome, EvlError> {
    let mut product = 1.0;
    for arg in args {
        product *= number("_*", arg)?;
    }
    Ok(Outcome::One(Value::Number(product)))
}

pub fn primitive_div(args: &[Value]) -> Result<Outcome, EvlError> {
    let first = number("_/", &args[0])?;
    if args.len() == 1 {
        if first == 0.0 {
            return Err(EvlError::signal("_/: division by zero"));
        }
        return Ok(Outcome::One(Value::Number(1.0 / first)));
    }
    let mut result = first;
    for arg in &args[1..] {
        let divisor = number("_/", arg)?;
        if divisor == 0.0 {
            return Err(EvlError::signal("_/: division by zero"));
        }
        result /= divisor;
    }
    Ok(Outcome::One(Value::Number(result)))
}

pub fn register() {
    define_primitive("_+", 0, None, primitive_add);
    define_primitive("_-", 1, None, primitive_sub);
    define_primitive("_*", 0, None, primitive_mul);
    define_primitive("_/", 1, None, primitive_div);
}
