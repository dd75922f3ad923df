// ABOUTME: Value types representing EVL data structures and forms

use crate::env::{Frame, Namespace};
use crate::error::EvlError;
use crate::eval::preprocess::Prep;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Interned keyword payload. Two keywords with the same name are the
/// same allocation.
pub struct KeywordData {
    pub name: String,
}

/// Interned variable payload. The two cells are the sole storage for
/// global state: one per namespace.
pub struct VariableData {
    pub name: String,
    pub value_cell: RefCell<Option<Value>>,
    pub function_cell: RefCell<Option<Value>>,
}

impl VariableData {
    pub fn cell(&self, namespace: Namespace) -> &RefCell<Option<Value>> {
        match namespace {
            Namespace::Value => &self.value_cell,
            Namespace::Function => &self.function_cell,
        }
    }
}

/// A mutable pair. Proper lists end in `Value::EmptyList`.
pub struct ConsCell {
    pub car: RefCell<Value>,
    pub cdr: RefCell<Value>,
}

/// Whether a closure's parameters bind on the lexical chain or on the
/// dynamic chain for the duration of the call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Scope {
    Lexical,
    Dynamic,
}

/// A closure body is ordinary forms, except under the preprocessing
/// evaluator where it is an already-compiled node tree.
pub enum Body {
    Forms(Vec<Value>),
    Compiled(Rc<Vec<Prep>>),
}

pub struct ClosureData {
    pub scope: Scope,
    pub namespace: Namespace,
    pub is_macro: bool,
    pub params: Vec<Rc<VariableData>>,
    pub rest: bool,
    pub body: Body,
    pub env: Option<Rc<Frame>>,
}

pub type PrimitiveFn = fn(&[Value]) -> Result<Outcome, EvlError>;

pub struct PrimitiveData {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub call: PrimitiveFn,
}

#[derive(Clone)]
pub enum Value {
    Void,
    Boolean(bool),
    Number(f64),
    Character(char),
    Str(String),
    Keyword(Rc<KeywordData>),
    Variable(Rc<VariableData>),
    EmptyList,
    Cons(Rc<ConsCell>),
    Vector(Rc<RefCell<Vec<Value>>>),
    Closure(Rc<ClosureData>),
    Primitive(Rc<PrimitiveData>),
}

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Rc::new(ConsCell {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    /// Builds a fresh proper list from the given elements.
    pub fn list(elements: Vec<Value>) -> Value {
        let mut result = Value::EmptyList;
        for element in elements.into_iter().rev() {
            result = Value::cons(element, result);
        }
        result
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Character(_) => "character",
            Value::Str(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Variable(_) => "variable",
            Value::EmptyList => "empty-list",
            Value::Cons(_) => "cons",
            Value::Vector(_) => "vector",
            Value::Closure(_) => "closure",
            Value::Primitive(_) => "primitive-function",
        }
    }

    /// Reference equality. Immediates compare by content, heap values by
    /// identity.
    pub fn eq(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Void, Value::Void) => true,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Character(x), Value::Character(y)) => x == y,
            (Value::EmptyList, Value::EmptyList) => true,
            (Value::Keyword(x), Value::Keyword(y)) => Rc::ptr_eq(x, y),
            (Value::Variable(x), Value::Variable(y)) => Rc::ptr_eq(x, y),
            (Value::Cons(x), Value::Cons(y)) => Rc::ptr_eq(x, y),
            (Value::Vector(x), Value::Vector(y)) => Rc::ptr_eq(x, y),
            (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
            (Value::Primitive(x), Value::Primitive(y)) => Rc::ptr_eq(x, y),
            (Value::Str(x), Value::Str(y)) => std::ptr::eq(x, y),
            _ => false,
        }
    }

    /// Structural equality: identity, except numbers, characters and
    /// strings compare by content.
    pub fn eql(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Str(x), Value::Str(y)) => x == y,
            _ => Value::eq(a, b),
        }
    }

    /// Collects a proper list into a vector; `Err` on a dotted tail.
    pub fn list_elements(&self) -> Result<Vec<Value>, ()> {
        let mut elements = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Value::EmptyList => return Ok(elements),
                Value::Cons(cell) => {
                    elements.push(cell.car.borrow().clone());
                    let next = cell.cdr.borrow().clone();
                    cursor = next;
                }
                _ => return Err(()),
            }
        }
    }

    pub fn is_proper_list(&self) -> bool {
        let mut cursor = self.clone();
        loop {
            match cursor {
                Value::EmptyList => return true,
                Value::Cons(cell) => {
                    let next = cell.cdr.borrow().clone();
                    cursor = next;
                }
                _ => return false,
            }
        }
    }
}

/// What one evaluation step produces: a single value on the common path,
/// or the contents of a `_values` call. Never itself a first-class value.
#[derive(Clone)]
pub enum Outcome {
    One(Value),
    Many(Vec<Value>),
}

impl Outcome {
    /// The value seen by single-value contexts: the first value, or void
    /// when there are none.
    pub fn primary(&self) -> Value {
        match self {
            Outcome::One(v) => v.clone(),
            Outcome::Many(vs) => vs.first().cloned().unwrap_or(Value::Void),
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Outcome::One(v) => vec![v],
            Outcome::Many(vs) => vs,
        }
    }

    pub fn values(&self) -> Vec<Value> {
        self.clone().into_values()
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '"' => write!(f, "\\\"")?,
            '\t' => write!(f, "\\t")?,
            '\n' => write!(f, "\\n")?,
            '\u{0B}' => write!(f, "\\v")?,
            '\u{0C}' => write!(f, "\\f")?,
            '\r' => write!(f, "\\r")?,
            c if (c as u32) < 0x20 => write!(f, "\\U{{{:X}}}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "#v"),
            Value::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::Number(n) => {
                // Whole numbers print without a decimal point
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Character(c) => match c {
                '"' | '\\' => write!(f, "#\"\\{}\"", c),
                c if (*c as u32) < 0x20 => write!(f, "#\"\\U{{{:X}}}\"", *c as u32),
                c => write!(f, "#\"{}\"", c),
            },
            Value::Str(s) => write_string_literal(f, s),
            Value::Keyword(k) => write!(f, ":{}", k.name),
            Value::Variable(v) => write!(f, "{}", v.name),
            Value::EmptyList => write!(f, "()"),
            Value::Cons(cell) => {
                write!(f, "({}", cell.car.borrow())?;
                let mut cursor = cell.cdr.borrow().clone();
                loop {
                    match cursor {
                        Value::EmptyList => break,
                        Value::Cons(next) => {
                            write!(f, " {}", next.car.borrow())?;
                            let tail = next.cdr.borrow().clone();
                            cursor = tail;
                        }
                        tail => {
                            write!(f, " . {}", tail)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "#(")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
            Value::Closure(c) => {
                if c.is_macro {
                    write!(f, "#<macro>")
                } else {
                    write!(f, "#<closure>")
                }
            }
            Value::Primitive(p) => write!(f, "#<primitive {}>", p.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_display() {
        assert_eq!(format!("{}", Value::Number(42.0)), "42");
        assert_eq!(format!("{}", Value::Number(-2.5)), "-2.5");
        assert_eq!(format!("{}", Value::Number(0.0)), "0");
    }

    #[test]
    fn test_boolean_and_void_display() {
        assert_eq!(format!("{}", Value::Boolean(true)), "#t");
        assert_eq!(format!("{}", Value::Boolean(false)), "#f");
        assert_eq!(format!("{}", Value::Void), "#v");
    }

    #[test]
    fn test_list_display() {
        let simple = Value::list(vec![
            Value::Number(1.0),
            Value::Number(2.0),
            Value::Number(3.0),
        ]);
        assert_eq!(format!("{}", simple), "(1 2 3)");

        let nested = Value::list(vec![
            Value::Number(1.0),
            Value::list(vec![Value::Number(2.0), Value::Number(3.0)]),
        ]);
        assert_eq!(format!("{}", nested), "(1 (2 3))");

        assert_eq!(format!("{}", Value::EmptyList), "()");
    }

    #[test]
    fn test_dotted_display() {
        let pair = Value::cons(Value::Number(1.0), Value::Number(2.0));
        assert_eq!(format!("{}", pair), "(1 . 2)");
    }

    #[test]
    fn test_string_display_escapes() {
        assert_eq!(format!("{}", Value::string("hi")), "\"hi\"");
        assert_eq!(format!("{}", Value::string("a\nb")), "\"a\\nb\"");
        assert_eq!(format!("{}", Value::string("q\"q")), "\"q\\\"q\"");
    }

    #[test]
    fn test_vector_display() {
        let v = Value::Vector(Rc::new(RefCell::new(vec![
            Value::Number(1.0),
            Value::Boolean(false),
        ])));
        assert_eq!(format!("{}", v), "#(1 #f)");
    }

    #[test]
    fn test_eql_compares_strings_by_content() {
        assert!(Value::eql(&Value::string("x"), &Value::string("x")));
        assert!(!Value::eq(&Value::string("x"), &Value::string("x")));
    }

    #[test]
    fn test_list_elements_rejects_dotted() {
        let pair = Value::cons(Value::Number(1.0), Value::Number(2.0));
        assert!(pair.list_elements().is_err());
        let proper = Value::list(vec![Value::Number(1.0)]);
        assert_eq!(proper.list_elements().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_primary() {
        assert!(matches!(
            Outcome::Many(vec![]).primary(),
            Value::Void
        ));
        let many = Outcome::Many(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert!(matches!(many.primary(), Value::Number(n) if n == 1.0));
    }
}
