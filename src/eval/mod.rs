// ABOUTME: Evaluator strategy selection, abort flag and shared application helpers

pub mod cps;
pub mod oocps;
pub mod plainrec;
pub mod preprocess;
pub mod sboocps;
pub mod trampoline;
pub mod trampolinepp;

use crate::env::{Env, Frame, Namespace};
use crate::error::{EvaluatorError, EvlError};
use crate::value::{ClosureData, Outcome, PrimitiveData, Value};
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// The six control-representation strategies. All realize the same
/// object-language semantics; one is selected per session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Strategy {
    PlainRecursive,
    Cps,
    OoCps,
    StackOoCps,
    Trampoline,
    TrampolinePp,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::PlainRecursive,
        Strategy::Cps,
        Strategy::OoCps,
        Strategy::StackOoCps,
        Strategy::Trampoline,
        Strategy::TrampolinePp,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Strategy::PlainRecursive => "plainrec",
            Strategy::Cps => "cps",
            Strategy::OoCps => "oocps",
            Strategy::StackOoCps => "sboocps",
            Strategy::Trampoline => "trampoline",
            Strategy::TrampolinePp => "trampolinepp",
        }
    }

    pub fn from_id(id: &str) -> Option<Strategy> {
        Strategy::ALL.into_iter().find(|s| s.id() == id)
    }

    /// Evaluates one form under this strategy.
    pub fn evaluate(&self, form: &Value, abort: &AbortFlag) -> Result<Outcome, EvlError> {
        match self {
            Strategy::PlainRecursive => plainrec::evaluate(form, abort),
            Strategy::Cps => cps::evaluate(form, abort),
            Strategy::OoCps => oocps::evaluate(form, abort),
            Strategy::StackOoCps => sboocps::evaluate(form, abort),
            Strategy::Trampoline => trampoline::evaluate(form, abort),
            Strategy::TrampolinePp => trampolinepp::evaluate(form, abort),
        }
    }
}

/// One shared byte the host may set at any time to request cancellation.
/// Evaluators poll it at every driver iteration; a set flag raises
/// `Aborted`, which bypasses `_catch-errors` handlers.
#[derive(Clone)]
pub struct AbortFlag(Arc<AtomicU8>);

impl Default for AbortFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortFlag {
    pub fn new() -> AbortFlag {
        AbortFlag(Arc::new(AtomicU8::new(0)))
    }

    pub fn from_buffer(buffer: Arc<AtomicU8>) -> AbortFlag {
        AbortFlag(buffer)
    }

    pub fn buffer(&self) -> Arc<AtomicU8> {
        self.0.clone()
    }

    pub fn request(&self) {
        self.0.store(1, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    pub fn check(&self) -> Result<(), EvlError> {
        if self.0.load(Ordering::Relaxed) != 0 {
            Err(EvlError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// How a call form collects and hands over its arguments.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallKind {
    Call,
    Apply,
    MultipleValueCall,
    MultipleValueApply,
}

/// A resolved operator.
#[derive(Clone)]
pub enum Callable {
    Closure(Rc<ClosureData>),
    Primitive(Rc<PrimitiveData>),
}

impl Callable {
    pub fn from_value(value: Value) -> Result<Callable, EvlError> {
        match value {
            Value::Closure(c) => Ok(Callable::Closure(c)),
            Value::Primitive(p) => Ok(Callable::Primitive(p)),
            other => Err(EvlError::signal(format!(
                "a {} is not a function",
                other.type_name()
            ))),
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(&self, Callable::Closure(c) if c.is_macro)
    }
}

/// The operator position of a call: a variable resolves through the
/// function namespace immediately, anything else is a form to evaluate.
pub enum Head {
    Resolved(Value),
    Form(Value),
}

pub fn classify_head(operator: &Value, env: &Env) -> Result<Head, EvlError> {
    match operator {
        Value::Variable(v) => Ok(Head::Resolved(crate::env::lookup(
            env,
            Namespace::Function,
            v,
        )?)),
        other => Ok(Head::Form(other.clone())),
    }
}

pub fn self_evaluating(value: &Value) -> Option<Value> {
    match value {
        Value::Void
        | Value::Boolean(_)
        | Value::Number(_)
        | Value::Character(_)
        | Value::Str(_)
        | Value::Keyword(_)
        | Value::Closure(_)
        | Value::Primitive(_) => Some(value.clone()),
        _ => None,
    }
}

/// The `if` test must be a boolean; anything else fails.
pub fn test_boolean(value: &Value) -> Result<bool, EvlError> {
    match value {
        Value::Boolean(b) => Ok(*b),
        _ => Err(EvlError::signal(
            "test-form does not evaluate to a boolean",
        )),
    }
}

fn primitive_arity(p: &PrimitiveData) -> String {
    match (p.min_args, p.max_args) {
        (min, Some(max)) if min == max => format!("{}", min),
        (min, Some(max)) => format!("{}-{}", min, max),
        (min, None) => format!("at least {}", min),
    }
}

/// Checks arity and invokes a primitive function.
pub fn call_primitive(p: &PrimitiveData, args: &[Value]) -> Result<Outcome, EvlError> {
    if args.len() < p.min_args {
        return Err(EvlError::Evaluator(EvaluatorError::TooFewArguments {
            expected: primitive_arity(p),
            got: args.len(),
        }));
    }
    if let Some(max) = p.max_args {
        if args.len() > max {
            return Err(EvlError::Evaluator(EvaluatorError::TooManyArguments {
                expected: primitive_arity(p),
                got: args.len(),
            }));
        }
    }
    (p.call)(args)
}

/// Builds the call frame binding a closure's parameters in its namespace.
/// For lexical closures the frame extends the captured chain; for dynamic
/// ones the caller decides where the frame lives.
pub fn closure_frame(closure: &ClosureData, slots: Vec<Value>, parent: &Env) -> Rc<Frame> {
    Frame::extend(parent, closure.namespace, closure.params.clone(), slots)
}

/// Pairs arguments for a call according to the collection mode. `Apply`
/// and `MultipleValueApply` treat the final argument as the spreadable
/// tail.
pub fn pair_arguments(
    closure: &ClosureData,
    kind: CallKind,
    mut args: Vec<Value>,
) -> Result<Vec<Value>, EvlError> {
    match kind {
        CallKind::Call | CallKind::MultipleValueCall => {
            crate::pairing::pair_call(&closure.params, closure.rest, args)
        }
        CallKind::Apply | CallKind::MultipleValueApply => {
            let tail = args.pop().ok_or_else(|| {
                EvlError::cannot_happen("apply without a spreadable tail")
            })?;
            crate::pairing::pair_apply(&closure.params, closure.rest, args, tail)
        }
    }
}

/// Spreads apply-style arguments into a flat vector for a primitive.
pub fn spread_arguments(kind: CallKind, mut args: Vec<Value>) -> Result<Vec<Value>, EvlError> {
    match kind {
        CallKind::Call | CallKind::MultipleValueCall => Ok(args),
        CallKind::Apply | CallKind::MultipleValueApply => {
            let tail = args.pop().ok_or_else(|| {
                EvlError::cannot_happen("apply without a spreadable tail")
            })?;
            let spread = tail.list_elements().map_err(|_| {
                EvlError::Evaluator(EvaluatorError::MalformedSpreadableSequenceOfObjects)
            })?;
            args.extend(spread);
            Ok(args)
        }
    }
}

pub fn not_a_macro_position(kind: CallKind) -> EvlError {
    let operator = match kind {
        CallKind::Call => "call",
        CallKind::Apply => "apply",
        CallKind::MultipleValueCall => "multiple-value-call",
        CallKind::MultipleValueApply => "multiple-value-apply",
    };
    EvlError::signal(format!("a macro closure cannot be the target of {}", operator))
}
