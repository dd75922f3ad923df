//! List primitives: `_cons`, `_car`, `_cdr`, `_set-car!`, `_set-cdr!`,
//! `_list`, `_cons?`, `_null?`, `_list?`

use super::define_primitive;
use crate::error::EvlError;
use crate::value::{ConsCell, Outcome, Value};
use std::rc::Rc;

fn cons_cell<'a>(name: &str, arg: &'a Value) -> Result<&'a Rc<ConsCell>, EvlError> {
    match arg {
        Value::Cons(cell) => Ok(cell),
        other => Err(EvlError::signal(format!(
            "{}: a {} is not a cons",
            name,
            other.type_name()
        ))),
    }
}

pub fn primitive_cons(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::cons(args[0].clone(), args[1].clone())))
}

pub fn primitive_car(args: &[Value]) -> Result<Outcome, EvlError> {
    let cell = cons_cell("_car", &args[0])?;
    Ok(Outcome::One(cell.car.borrow().clone()))
}

pub fn primitive_cdr(args: &[Value]) -> Result<Outcome, EvlError> {
    let cell = cons_cell("_cdr", &args[0])?;
    Ok(Outcome::One(cell.cdr.borrow().clone()))
}

pub fn primitive_set_car(args: &[Value]) -> Result<Outcome, EvlError> {
    let cell = cons_cell("_set-car!", &args[0])?;
    *cell.car.borrow_mut() = args[1].clone();
    Ok(Outcome::One(args[1].clone()))
}

pub fn primitive_set_cdr(args: &[Value]) -> Result<Outcome, EvlError> {
    let cell = cons_cell("_set-cdr!", &args[0])?;
    *cell.cdr.borrow_mut() = args[1].clone();
    Ok(Outcome::One(args[1].clone()))
}

pub fn primitive_list(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::list(args.to_vec())))
}

pub fn primitive_cons_p(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(matches!(args[0], Value::Cons(_)))))
}

pub fn primitive_null_p(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(matches!(
        args[0],
        Value::EmptyList
    ))))
}

pub fn primitive_list_p(args: &[Value]) -> Result<Outcome, EvlError> {
    Ok(Outcome::One(Value::Boolean(args[0].is_proper_list())))
}

pub fn register() {
    define_primitive("_cons", 2, Some(2), primitive_cons);
    define_primitive("_car", 1, Some(1), primitive_car);
    define_primitive("_cdr", 1, Some(1), primitive_cdr);
    define_primitive("_set-car!", 2, Some(2), primitive_set_car);
    define_primitive("_set-cdr!", 2, Some(2), primitive_set_cdr);
    define_primitive("_list", 0, None, primitive_list);
    define_primitive("_cons?", 1, Some(1), primitive_cons_p);
    define_primitive("_null?", 1, Some(1), primitive_null_p);
    define_primitive("_list?", 1, Some(1), primitive_list_p);
}
