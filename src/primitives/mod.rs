//! # Primitive Functions
//!
//! The host-implemented functions of the object language, organized by
//! category:
//!
//! - **[arithmetic]**: `_+`, `_-`, `_*`, `_/`
//! - **[comparison]**: `_=`, `_<`, `_>`, `_<=`, `_>=`, `_eq?`, `_eql?`
//! - **[lists]**: `_cons`, `_car`, `_cdr`, `_set-car!`, `_set-cdr!`, `_list`, `_cons?`, `_null?`, `_list?`
//! - **[vectors]**: `_vector`, `_make-vector`, `_vector-ref`, `_vector-set!`, `_vector-length`, `_vector?`
//! - **[variables]**: `_variable?`, `_variable-name`, `_intern`, `_variable-value`,
//!   `_set-variable-value!`, `_variable-function`, `_set-variable-function!`
//! - **[control]**: `_error`, `_values`
//!
//! Each category registers its functions into the function cells of the
//! correspondingly named global variables; user code aliases them with
//! forms like `(fset! + (fref _+))`.

use crate::intern;
use crate::value::{PrimitiveData, PrimitiveFn, Value};
use std::rc::Rc;

pub mod arithmetic;
pub mod comparison;
pub mod control;
pub mod lists;
pub mod variables;
pub mod vectors;

/// Installs one primitive into the function cell of its variable.
pub(crate) fn define_primitive(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    call: PrimitiveFn,
) {
    let primitive = Value::Primitive(Rc::new(PrimitiveData {
        name,
        min_args,
        max_args,
        call,
    }));
    *intern::variable(name).function_cell.borrow_mut() = Some(primitive);
}

/// Registers every primitive category. Run after each intern reset.
pub fn register() {
    arithmetic::register();
    comparison::register();
    lists::register();
    vectors::register();
    variables::register();
    control::register();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_installs_function_bindings() {
        intern::reset();
        register();
        assert!(intern::variable("_+").function_cell.borrow().is_some());
        assert!(intern::variable("_cons").function_cell.borrow().is_some());
        assert!(intern::variable("_values").function_cell.borrow().is_some());
        assert!(intern::variable("_+").value_cell.borrow().is_none());
    }
}
