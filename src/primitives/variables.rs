//! Variable primitives: reflection over interned variables and their two
//! global binding cells.

use super::define_primitive;
use crate::env::Namespace;
use crate::error::EvlError;
use crate::intern;
use crate::value::{Outcome, Value, VariableData};
use std::rc::Rc;

fn variable<'a>(name: &str, arg: &'a Value) -> Result<&'a Rc<VariableData>, EvlError> {
    match arg {
        Value::Variable(v) => Ok(v),
        other => Err(EvlError::signal(format!(
            "{}: a {} is not a variable",
            name,
            other.type_name()
        ))),
    }
}

pub fn primitive_variable_p(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(matches!(
        args[0],
        Value::Variable(_)
    ))))
}

pub fn primitive_variable_name(args: &[Value]) -> Result<Outcome, EvlError> {
    let v = variable("_variable-name", &args[0])?;
    Ok(Outcome::One(Value::string(v.name.clone())))
}

pub fn primitive_intern(args: &[Value]) -> Result<Outcome, EvlError> {
    match &args[0] {
        Value::Str(s) => Ok(Outcome::One(Value::Variable(intern::variable(s)))),
        other => Err(EvlError::signal(format!(
            "_intern: a {} is not a string",
            other.type_name()
        ))),
    }
}

pub fn primitive_variable_value(args: &[Value]) -> Result<Outcome, EvlError> {
    let v = variable("_variable-value", &args[0])?;
    let value = v
        .value_cell
        .borrow()
        .clone()
        .ok_or_else(|| EvlError::unbound(Namespace::Value, &v.name))?;
    Ok(Outcome::One(value))
}

pub fn primitive_set_variable_value(args: &[Value]) -> Result<Outcome, EvlError> {
    let v = variable("_set-variable-value!", &args[0])?;
    *v.value_cell.borrow_mut() = Some(args[1].clone());
    Ok(Outcome::One(args[1].clone()))
}

pub fn primitive_variable_function(args: &[Value]) -> Result<Outcome, EvlError> {
    let v = variable("_variable-function", &args[0])?;
    let value = v
        .function_cell
        .borrow()
        .clone()
        .ok_or_else(|| EvlError::unbound(Namespace::Function, &v.name))?;
    Ok(Outcome::One(value))
}

pub fn primitive_set_variable_function(args: &[Value]) -> Result<Outcome, EvlError> {
    let v = variable("_set-variable-function!", &args[0])?;
    *v.function_cell.borrow_mut() = Some(args[1].clone());
    Ok(Outcome::One(args[1].clone()))
}

pub fn register() {
    define_primitive("_variable?", 1, Some(1), primitive_variable_p);
    define_primitive("_variable-name", 1, Some(1), primitive_variable_name);
    define_primitive("_intern", 1, Some(1), primitive_intern);
    define_primitive("_variable-value", 1, Some(1), primitive_variable_value);
    define_primitive("_set-variable-value!", 2, Some(2), primitive_set_variable_value);
    define_primitive("_variable-function", 1, Some(1), primitive_variable_function);
    define_primitive(
        "_set-variable-function!",
        2,
        Some(2),
        primitive_set_variable_function,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_returns_the_same_variable() {
        intern::reset();
        let a = primitive_intern(&[Value::string("v")]).unwrap().primary();
        let b = primitive_intern(&[Value::string("v")]).unwrap().primary();
        assert!(Value::eq(&a, &b));
    }

    #[test]
    fn test_cell_access() {
        intern::reset();
        let v = Value::Variable(intern::variable("cell-test"));
        assert!(primitive_variable_value(&[v.clone()]).is_err());
        primitive_set_variable_value(&[v.clone(), Value::Number(4.0)]).unwrap();
        assert_eq!(
            format!("{}", primitive_variable_value(&[v.clone()]).unwrap().primary()),
            "4"
        );
        assert!(primitive_variable_function(&[v.clone()]).is_err());
        primitive_set_variable_function(&[v.clone(), Value::Number(5.0)]).unwrap();
        assert_eq!(
            format!("{}", primitive_variable_function(&[v]).unwrap().primary()),
            "5"
        );
    }

    #[test]
    fn test_variable_name() {
        intern::reset();
        let v = Value::Variable(intern::variable("named"));
        assert_eq!(
            format!("{}", primitive_variable_name(&[v]).unwrap().primary()),
            "\"named\""
        );
    }
}
