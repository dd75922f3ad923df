// ABOUTME: Reader assembling EVL objects from the token stream

use crate::error::{EvlError, ReaderErrorKind};
use crate::intern;
use crate::lexer::Lexer;
use crate::token::TokenKind;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// Called with each complete EVL object read directly inside an XML
/// element, so scripted content inside documentation still runs.
pub type ObjectCallback<'a> = &'a mut dyn FnMut(Value) -> Result<(), EvlError>;

/// What the element loop produced besides an object.
enum Item {
    Object(Value),
    ClosingParenthesis,
    Dot,
    XmlEnd(String),
    End,
}

pub struct Reader {
    lexer: Lexer,
}

impl Reader {
    pub fn new(source: &str) -> Reader {
        Reader {
            lexer: Lexer::new(source),
        }
    }

    /// Reads the next top-level object, or `None` at end of input.
    pub fn read(&mut self, callback: ObjectCallback<'_>) -> Result<Option<Value>, EvlError> {
        match self.next_item(callback)? {
            Item::Object(v) => Ok(Some(v)),
            Item::End => Ok(None),
            Item::ClosingParenthesis => {
                Err(EvlError::Reader(ReaderErrorKind::UnexpectedClosingParenthesis))
            }
            Item::Dot => Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot)),
            Item::XmlEnd(_) => Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag)),
        }
    }

    /// Convenience entry for contexts without scripted XML content.
    pub fn read_object(&mut self) -> Result<Option<Value>, EvlError> {
        self.read(&mut |_| Ok(()))
    }

    fn next_item(&mut self, callback: ObjectCallback<'_>) -> Result<Item, EvlError> {
        loop {
            let token = self.lexer.next_token()?;
            match token.kind {
                TokenKind::EndOfInput => return Ok(Item::End),
                TokenKind::ClosingParenthesis => return Ok(Item::ClosingParenthesis),
                TokenKind::Dot => return Ok(Item::Dot),
                TokenKind::XmlEndTag(name) => return Ok(Item::XmlEnd(name)),
                TokenKind::XmlStartTag(name) => {
                    self.skip_xml_element(&name, &mut *callback)?;
                }
                TokenKind::XmlEmptyTag(_) | TokenKind::XmlCommentTag | TokenKind::XmlText => {}
                TokenKind::HashPlus => {
                    if let Some(v) = self.read_conditional(true, &mut *callback)? {
                        return Ok(Item::Object(v));
                    }
                }
                TokenKind::HashMinus => {
                    if let Some(v) = self.read_conditional(false, &mut *callback)? {
                        return Ok(Item::Object(v));
                    }
                }
                kind => return Ok(Item::Object(self.object_from(kind, &mut *callback)?)),
            }
        }
    }

    fn require_object(&mut self, callback: ObjectCallback<'_>) -> Result<Value, EvlError> {
        match self.next_item(callback)? {
            Item::Object(v) => Ok(v),
            Item::End => Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput)),
            Item::ClosingParenthesis => {
                Err(EvlError::Reader(ReaderErrorKind::UnexpectedClosingParenthesis))
            }
            Item::Dot => Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot)),
            Item::XmlEnd(_) => Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag)),
        }
    }

    fn object_from(&mut self, kind: TokenKind, callback: ObjectCallback<'_>) -> Result<Value, EvlError> {
        match kind {
            TokenKind::Void => Ok(Value::Void),
            TokenKind::Boolean(b) => Ok(Value::Boolean(b)),
            TokenKind::Number(n) => Ok(Value::Number(n)),
            TokenKind::Character(c) => Ok(Value::Character(c)),
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Keyword(name) => Ok(Value::Keyword(intern::keyword(&name))),
            TokenKind::VariableName(name) => Ok(Value::Variable(intern::variable(&name))),
            TokenKind::Quote => self.abbreviation("quote", callback),
            TokenKind::Quasiquote => self.abbreviation("quasiquote", callback),
            TokenKind::Unquote => self.abbreviation("unquote", callback),
            TokenKind::UnquoteSplicing => self.abbreviation("unquote-splicing", callback),
            TokenKind::OpeningParenthesis => self.read_list(callback),
            TokenKind::HashOpeningParenthesis => self.read_vector(callback),
            other => Err(EvlError::cannot_happen(format!(
                "token {:?} escaped the reader dispatch",
                other
            ))),
        }
    }

    fn abbreviation(&mut self, head: &str, callback: ObjectCallback<'_>) -> Result<Value, EvlError> {
        let object = self.require_object(callback)?;
        Ok(Value::list(vec![
            Value::Variable(intern::variable(head)),
            object,
        ]))
    }

    fn read_list(&mut self, callback: ObjectCallback<'_>) -> Result<Value, EvlError> {
        let mut elements = Vec::new();
        loop {
            match self.next_item(&mut *callback)? {
                Item::Object(v) => elements.push(v),
                Item::ClosingParenthesis => return Ok(Value::list(elements)),
                Item::Dot => {
                    if elements.is_empty() {
                        return Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot));
                    }
                    let tail = self.require_object(&mut *callback)?;
                    return match self.next_item(&mut *callback)? {
                        Item::ClosingParenthesis => {
                            let mut result = tail;
                            for element in elements.into_iter().rev() {
                                result = Value::cons(element, result);
                            }
                            Ok(result)
                        }
                        Item::End => {
                            Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput))
                        }
                        Item::XmlEnd(_) => {
                            Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag))
                        }
                        _ => Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot)),
                    };
                }
                Item::End => return Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput)),
                Item::XmlEnd(_) => {
                    return Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag))
                }
            }
        }
    }

    /// Vectors read like lists except dotting is forbidden.
    fn read_vector(&mut self, callback: ObjectCallback<'_>) -> Result<Value, EvlError> {
        let mut elements = Vec::new();
        loop {
            match self.next_item(&mut *callback)? {
                Item::Object(v) => elements.push(v),
                Item::ClosingParenthesis => {
                    return Ok(Value::Vector(Rc::new(RefCell::new(elements))))
                }
                Item::Dot => return Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot)),
                Item::End => return Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput)),
                Item::XmlEnd(_) => {
                    return Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag))
                }
            }
        }
    }

    /// An XML element is a block comment. Complete objects read directly
    /// inside it still go to the callback.
    fn skip_xml_element(&mut self, name: &str, callback: ObjectCallback<'_>) -> Result<(), EvlError> {
        loop {
            match self.next_item(&mut *callback)? {
                Item::Object(v) => callback(v)?,
                Item::XmlEnd(end) => {
                    return if end == name {
                        Ok(())
                    } else {
                        Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag))
                    };
                }
                Item::End => return Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput)),
                Item::ClosingParenthesis => {
                    return Err(EvlError::Reader(ReaderErrorKind::UnexpectedClosingParenthesis))
                }
                Item::Dot => return Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot)),
            }
        }
    }

    /// `#+expr obj` / `#-expr obj`: both the feature expression and the
    /// guarded object are always consumed; the object is kept only when
    /// the feature test matches the polarity.
    fn read_conditional(
        &mut self,
        positive: bool,
        callback: ObjectCallback<'_>,
    ) -> Result<Option<Value>, EvlError> {
        let expression = self.require_object(&mut *callback)?;
        let object = self.require_object(&mut *callback)?;
        if evaluate_feature_expression(&expression)? == positive {
            Ok(Some(object))
        } else {
            Ok(None)
        }
    }
}

/// A feature expression is a symbol, or `not`/`and`/`or` over feature
/// expressions, tested against the `*features*` list.
fn evaluate_feature_expression(expression: &Value) -> Result<bool, EvlError> {
    match expression {
        Value::Variable(v) => Ok(intern::feature_present(v)),
        Value::Cons(_) => {
            let elements = expression.list_elements().map_err(|_| {
                EvlError::FormAnalyzer("malformed feature expression".into())
            })?;
            let operator = match elements.first() {
                Some(Value::Variable(v)) => v.name.clone(),
                _ => return Err(EvlError::FormAnalyzer("malformed feature expression".into())),
            };
            let operands = &elements[1..];
            match operator.as_str() {
                "not" => {
                    if operands.len() != 1 {
                        return Err(EvlError::FormAnalyzer(
                            "not expects one feature expression".into(),
                        ));
                    }
                    Ok(!evaluate_feature_expression(&operands[0])?)
                }
                "and" => {
                    for operand in operands {
                        if !evaluate_feature_expression(operand)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                "or" => {
                    for operand in operands {
                        if evaluate_feature_expression(operand)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                _ => Err(EvlError::FormAnalyzer("malformed feature expression".into())),
            }
        }
        _ => Err(EvlError::FormAnalyzer("malformed feature expression".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(source: &str) -> Result<Vec<Value>, EvlError> {
        let mut reader = Reader::new(source);
        let mut out = Vec::new();
        while let Some(v) = reader.read_object()? {
            out.push(v);
        }
        Ok(out)
    }

    fn printed(source: &str) -> Vec<String> {
        read_all(source)
            .unwrap()
            .iter()
            .map(|v| format!("{}", v))
            .collect()
    }

    #[test]
    fn test_read_atoms() {
        assert_eq!(printed("42 #t #v \"s\" :k x"), vec![
            "42", "#t", "#v", "\"s\"", ":k", "x"
        ]);
    }

    #[test]
    fn test_read_lists_and_vectors() {
        assert_eq!(printed("(1 (2 3) 4)"), vec!["(1 (2 3) 4)"]);
        assert_eq!(printed("#(1 2)"), vec!["#(1 2)"]);
        assert_eq!(printed("()"), vec!["()"]);
    }

    #[test]
    fn test_read_dotted_list() {
        assert_eq!(printed("(1 . 2)"), vec!["(1 . 2)"]);
        assert_eq!(printed("(1 2 . 3)"), vec!["(1 2 . 3)"]);
    }

    #[test]
    fn test_dot_misuse_is_an_error() {
        assert!(matches!(
            read_all("(. 1)"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot))
        ));
        assert!(matches!(
            read_all("(1 . 2 3)"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot))
        ));
        assert!(matches!(
            read_all("#(1 . 2)"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedDot))
        ));
    }

    #[test]
    fn test_abbreviations_expand() {
        assert_eq!(printed("'x"), vec!["(quote x)"]);
        assert_eq!(printed("`(a ,b ,@c)"), vec![
            "(quasiquote (a (unquote b) (unquote-splicing c)))"
        ]);
    }

    #[test]
    fn test_interning_across_reads() {
        crate::intern::reset();
        let a = read_all("shared").unwrap().remove(0);
        let b = read_all("shared").unwrap().remove(0);
        assert!(Value::eq(&a, &b));
    }

    #[test]
    fn test_unclosed_list_reports_end_of_input() {
        assert!(matches!(
            read_all("( 1 2"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedEndOfInput))
        ));
    }

    #[test]
    fn test_stray_closing_paren() {
        assert!(matches!(
            read_all(") x"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedClosingParenthesis))
        ));
    }

    #[test]
    fn test_xml_element_reads_as_comment() {
        assert_eq!(printed("<para>prose here</para> 42"), vec!["42"]);
        assert_eq!(printed("<br/> 1"), vec!["1"]);
        assert_eq!(printed("<!-- note --> 1"), vec!["1"]);
    }

    #[test]
    fn test_stray_xml_end_tag() {
        assert!(matches!(
            read_all("</para>"),
            Err(EvlError::Reader(ReaderErrorKind::UnexpectedXmlEndTag))
        ));
    }

    #[test]
    fn test_embedded_objects_reach_the_callback() {
        let mut reader = Reader::new("<chapter>(one) (two)</chapter> after");
        let mut seen = Vec::new();
        let mut callback = |v: Value| {
            seen.push(format!("{}", v));
            Ok(())
        };
        let top = reader.read(&mut callback).unwrap().unwrap();
        assert_eq!(format!("{}", top), "after");
        assert_eq!(seen, vec!["(one)", "(two)"]);
    }

    #[test]
    fn test_read_time_conditional_consumes_both() {
        crate::intern::reset();
        crate::intern::install_features("trampoline");
        assert_eq!(printed("#+trampoline yes 1"), vec!["yes", "1"]);
        assert_eq!(printed("#-trampoline no 1"), vec!["1"]);
        assert_eq!(printed("#+missing no 1"), vec!["1"]);
        assert_eq!(printed("#+(or missing trampoline) yes 1"), vec!["yes", "1"]);
        assert_eq!(printed("#+(and trampoline missing) no 1"), vec!["1"]);
        assert_eq!(printed("#+(not missing) yes 1"), vec!["yes", "1"]);
    }

    #[test]
    fn test_conditional_inside_list() {
        crate::intern::reset();
        crate::intern::install_features("cps");
        assert_eq!(printed("(a #+cps b #-cps c d)"), vec!["(a b d)"]);
    }
}
