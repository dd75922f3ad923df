// ABOUTME: Error types for the tokenizer, reader, analyzer, evaluators and converter

use crate::env::Namespace;
use thiserror::Error;

/// Sub-labels for reader failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderErrorKind {
    #[error("unexpected dot")]
    UnexpectedDot,
    #[error("unexpected closing parenthesis")]
    UnexpectedClosingParenthesis,
    #[error("unexpected XML end tag")]
    UnexpectedXmlEndTag,
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
}

/// Sub-labels for evaluator failures.
#[derive(Error, Debug, Clone)]
pub enum EvaluatorError {
    #[error("unbound variable {name} in the {namespace} namespace")]
    UnboundVariable { namespace: Namespace, name: String },

    #[error("too few arguments: expected {expected}, got {got}")]
    TooFewArguments { expected: String, got: usize },

    #[error("too many arguments: expected {expected}, got {got}")]
    TooManyArguments { expected: String, got: usize },

    #[error("malformed spreadable sequence of objects")]
    MalformedSpreadableSequenceOfObjects,

    /// Everything the evaluator signals by message, including conditions
    /// raised by the `_error` primitive.
    #[error("{0}")]
    Signal(String),
}

/// The one error type carried through the core. Errors are identified by
/// their kind name in the response envelope, never by type identity.
#[derive(Error, Debug, Clone)]
pub enum EvlError {
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// A token cut short by the end of input. Distinguished from hard
    /// tokenizer errors so that evaluate-first-form can answer "no form
    /// yet" for partial input instead of failing.
    #[error("truncated token: {0}")]
    Truncated(String),

    #[error("reader error: {0}")]
    Reader(ReaderErrorKind),

    #[error("EVL to XML converter error: {0}")]
    Converter(String),

    #[error("form analyzer error: {0}")]
    FormAnalyzer(String),

    #[error("evaluator error: {0}")]
    Evaluator(#[from] EvaluatorError),

    #[error("cannot happen: {0}")]
    CannotHappen(String),

    #[error("evaluation aborted")]
    Aborted,
}

impl EvlError {
    /// The kind name reported through the response envelope and returned
    /// as a string by `_catch-errors`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EvlError::Tokenizer(_) => "TokenizerError",
            EvlError::Truncated(_) => "TruncatedToken",
            EvlError::Reader(_) => "ReaderError",
            EvlError::Converter(_) => "EVLToXMLConverterError",
            EvlError::FormAnalyzer(_) => "FormAnalyzerError",
            EvlError::Evaluator(_) => "EvaluatorError",
            EvlError::CannotHappen(_) => "CannotHappen",
            EvlError::Aborted => "Aborted",
        }
    }

    pub fn signal(message: impl Into<String>) -> Self {
        EvlError::Evaluator(EvaluatorError::Signal(message.into()))
    }

    pub fn unbound(namespace: Namespace, name: &str) -> Self {
        EvlError::Evaluator(EvaluatorError::UnboundVariable {
            namespace,
            name: name.to_string(),
        })
    }

    pub fn cannot_happen(message: impl Into<String>) -> Self {
        EvlError::CannotHappen(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(EvlError::Tokenizer("x".into()).kind_name(), "TokenizerError");
        assert_eq!(EvlError::Truncated("x".into()).kind_name(), "TruncatedToken");
        assert_eq!(
            EvlError::Reader(ReaderErrorKind::UnexpectedDot).kind_name(),
            "ReaderError"
        );
        assert_eq!(EvlError::signal("boom").kind_name(), "EvaluatorError");
        assert_eq!(EvlError::Aborted.kind_name(), "Aborted");
    }

    #[test]
    fn test_unbound_message_names_namespace() {
        let err = EvlError::unbound(Namespace::Function, "frobnicate");
        let text = format!("{}", err);
        assert!(text.contains("frobnicate"));
        assert!(text.contains("function"));
    }
}
