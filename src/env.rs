// ABOUTME: Environment frames and namespace-aware binding lookup

use crate::error::EvlError;
use crate::value::{Value, VariableData};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A variable carries one binding cell per namespace.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Namespace {
    Value,
    Function,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Value => write!(f, "value"),
            Namespace::Function => write!(f, "function"),
        }
    }
}

/// One link of a binding chain: a namespace, parallel variable and slot
/// vectors, and the enclosing frame. The null chain delegates to the
/// variable's global cell.
pub struct Frame {
    pub namespace: Namespace,
    pub variables: Vec<Rc<VariableData>>,
    pub slots: RefCell<Vec<Value>>,
    pub parent: Option<Rc<Frame>>,
}

pub type Env = Option<Rc<Frame>>;

impl Frame {
    pub fn extend(
        parent: &Env,
        namespace: Namespace,
        variables: Vec<Rc<VariableData>>,
        values: Vec<Value>,
    ) -> Rc<Frame> {
        Rc::new(Frame {
            namespace,
            variables,
            slots: RefCell::new(values),
            parent: parent.clone(),
        })
    }

    pub fn position(&self, var: &Rc<VariableData>) -> Option<usize> {
        self.variables.iter().position(|v| Rc::ptr_eq(v, var))
    }
}

fn global_cell(namespace: Namespace, var: &Rc<VariableData>) -> &RefCell<Option<Value>> {
    var.cell(namespace)
}

/// Reads the variable's global cell; unbound cells signal.
pub fn global_ref(namespace: Namespace, var: &Rc<VariableData>) -> Result<Value, EvlError> {
    global_cell(namespace, var)
        .borrow()
        .clone()
        .ok_or_else(|| EvlError::unbound(namespace, &var.name))
}

pub fn global_set(namespace: Namespace, var: &Rc<VariableData>, value: Value) {
    *global_cell(namespace, var).borrow_mut() = Some(value);
}

/// Scans the lexical chain innermost-first, then the global cell.
pub fn lookup(env: &Env, namespace: Namespace, var: &Rc<VariableData>) -> Result<Value, EvlError> {
    let mut frame = env.clone();
    while let Some(f) = frame {
        if f.namespace == namespace {
            if let Some(i) = f.position(var) {
                return Ok(f.slots.borrow()[i].clone());
            }
        }
        frame = f.parent.clone();
    }
    global_ref(namespace, var)
}

/// Updates the innermost matching binding, else the global cell.
pub fn assign(env: &Env, namespace: Namespace, var: &Rc<VariableData>, value: Value) {
    let mut frame = env.clone();
    while let Some(f) = frame {
        if f.namespace == namespace {
            if let Some(i) = f.position(var) {
                f.slots.borrow_mut()[i] = value;
                return;
            }
        }
        frame = f.parent.clone();
    }
    global_set(namespace, var, value);
}

/// Dynamic chains have the same shape; the evaluators that keep dynamic
/// frames as a linked chain resolve through these. Falls through to the
/// global value cell on a miss.
pub fn dynamic_lookup(denv: &Env, var: &Rc<VariableData>) -> Result<Value, EvlError> {
    let mut frame = denv.clone();
    while let Some(f) = frame {
        if let Some(i) = f.position(var) {
            return Ok(f.slots.borrow()[i].clone());
        }
        frame = f.parent.clone();
    }
    global_ref(Namespace::Value, var)
}

pub fn dynamic_assign(denv: &Env, var: &Rc<VariableData>, value: Value) {
    let mut frame = denv.clone();
    while let Some(f) = frame {
        if let Some(i) = f.position(var) {
            f.slots.borrow_mut()[i] = value;
            return;
        }
        frame = f.parent.clone();
    }
    global_set(Namespace::Value, var, value);
}

/// Reads the slot at a preprocessed lexical address.
pub fn local_ref(env: &Env, depth: usize, index: usize) -> Result<Value, EvlError> {
    let frame = frame_at(env, depth)?;
    let value = frame.slots.borrow()[index].clone();
    Ok(value)
}

pub fn local_set(env: &Env, depth: usize, index: usize, value: Value) -> Result<(), EvlError> {
    let frame = frame_at(env, depth)?;
    frame.slots.borrow_mut()[index] = value;
    Ok(())
}

fn frame_at(env: &Env, depth: usize) -> Result<Rc<Frame>, EvlError> {
    let mut frame = env.clone();
    for _ in 0..depth {
        frame = match frame {
            Some(f) => f.parent.clone(),
            None => None,
        };
    }
    frame.ok_or_else(|| EvlError::cannot_happen("lexical address escapes the frame chain"))
}
