// ABOUTME: Process-wide intern tables for keywords and variables, and the *features* list

use crate::value::{KeywordData, Value, VariableData};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const FEATURES: &str = "*features*";

// The core is single-threaded; the tables live on the evaluator thread and
// are torn down by INITIALIZE.
thread_local! {
    static VARIABLES: RefCell<HashMap<String, Rc<VariableData>>> =
        RefCell::new(HashMap::new());
    static KEYWORDS: RefCell<HashMap<String, Rc<KeywordData>>> =
        RefCell::new(HashMap::new());
}

/// Interns a variable: two calls with the same spelling return the same
/// allocation, and with it the same pair of global binding cells.
pub fn variable(name: &str) -> Rc<VariableData> {
    VARIABLES.with(|table| {
        let mut table = table.borrow_mut();
        if let Some(existing) = table.get(name) {
            return existing.clone();
        }
        let fresh = Rc::new(VariableData {
            name: name.to_string(),
            value_cell: RefCell::new(None),
            function_cell: RefCell::new(None),
        });
        table.insert(name.to_string(), fresh.clone());
        fresh
    })
}

pub fn keyword(name: &str) -> Rc<KeywordData> {
    KEYWORDS.with(|table| {
        let mut table = table.borrow_mut();
        if let Some(existing) = table.get(name) {
            return existing.clone();
        }
        let fresh = Rc::new(KeywordData {
            name: name.to_string(),
        });
        table.insert(name.to_string(), fresh.clone());
        fresh
    })
}

/// Tears down all interned data. Every previously interned symbol and
/// every global binding is dropped.
pub fn reset() {
    VARIABLES.with(|table| table.borrow_mut().clear());
    KEYWORDS.with(|table| table.borrow_mut().clear());
}

/// Installs a fresh `*features*` list holding the named feature.
pub fn install_features(feature: &str) {
    let list = Value::list(vec![Value::Variable(variable(feature))]);
    *variable(FEATURES).value_cell.borrow_mut() = Some(list);
}

pub fn features() -> Value {
    variable(FEATURES)
        .value_cell
        .borrow()
        .clone()
        .unwrap_or(Value::EmptyList)
}

/// Whether the given variable appears (by identity) in `*features*`.
pub fn feature_present(var: &Rc<VariableData>) -> bool {
    let mut cursor = features();
    loop {
        match cursor {
            Value::Cons(cell) => {
                if let Value::Variable(v) = &*cell.car.borrow() {
                    if Rc::ptr_eq(v, var) {
                        return true;
                    }
                }
                let next = cell.cdr.borrow().clone();
                cursor = next;
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variables_are_interned() {
        reset();
        let a = variable("shared-spelling");
        let b = variable("shared-spelling");
        assert!(Rc::ptr_eq(&a, &b));
        let c = variable("other");
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_keywords_are_interned() {
        reset();
        let a = keyword("k");
        let b = keyword("k");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_reset_drops_bindings() {
        reset();
        let v = variable("transient");
        *v.value_cell.borrow_mut() = Some(Value::Number(1.0));
        reset();
        let again = variable("transient");
        assert!(!Rc::ptr_eq(&v, &again));
        assert!(again.value_cell.borrow().is_none());
    }

    #[test]
    fn test_features_membership() {
        reset();
        install_features("trampolinepp");
        assert!(feature_present(&variable("trampolinepp")));
        assert!(!feature_present(&variable("plainrec")));
    }
}
