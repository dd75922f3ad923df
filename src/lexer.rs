// ABOUTME: Position-based scanner for the mixed S-expression / XML source dialect

use crate::error::EvlError;
use crate::token::{Token, TokenKind};
use std::collections::VecDeque;

const SYNTAX_CHARS: &str = "()\"'`,<";

/// Structural elements whose direct content is EVL code. Inside any other
/// element the content is character data.
const STRUCTURAL_ELEMENTS: [&str; 2] = ["chapter", "section"];

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    /// Code units of a hash string still waiting to come out as
    /// consecutive character tokens.
    pending: VecDeque<char>,
    /// Names of the XML elements currently open.
    elements: Vec<String>,
    /// Converter mode: a hash string is one character token regardless of
    /// its length.
    single_character_strings: bool,
}

impl Lexer {
    pub fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            pending: VecDeque::new(),
            elements: Vec::new(),
            single_character_strings: false,
        }
    }

    /// The scanning mode used by the EVL to XML converter.
    pub fn converter(source: &str) -> Lexer {
        Lexer {
            single_character_strings: true,
            ..Lexer::new(source)
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn raw_since(&self, start: usize) -> String {
        self.chars[start..self.pos].iter().collect()
    }

    fn in_pure_xml(&self) -> bool {
        match self.elements.last() {
            Some(name) => !STRUCTURAL_ELEMENTS.contains(&name.as_str()),
            None => false,
        }
    }

    /// Rejects the characters the source surface excludes: C0/C1 controls
    /// other than HT, LF, VT, FF, CR, NEL, and the Unicode non-characters.
    fn check_character(&self, c: char) -> Result<(), EvlError> {
        let code = c as u32;
        let allowed_control = matches!(c, '\t' | '\n' | '\u{0B}' | '\u{0C}' | '\r' | '\u{85}');
        if (code < 0x20 || (0x7F..=0x9F).contains(&code)) && !allowed_control {
            return Err(EvlError::Tokenizer(format!(
                "invalid control character U+{:04X}",
                code
            )));
        }
        if (0xFDD0..=0xFDEF).contains(&code) || (code & 0xFFFE) == 0xFFFE {
            return Err(EvlError::Tokenizer(format!(
                "Unicode non-character U+{:04X}",
                code
            )));
        }
        Ok(())
    }

    pub fn next_token(&mut self) -> Result<Token, EvlError> {
        if let Some(c) = self.pending.pop_front() {
            return Ok(Token {
                kind: TokenKind::Character(c),
                whitespace: String::new(),
                text: String::new(),
            });
        }

        if self.in_pure_xml() {
            if let Some(token) = self.scan_xml_text()? {
                return Ok(token);
            }
        }

        let mut whitespace = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                whitespace.push(c);
                self.pos += 1;
            } else {
                self.check_character(c)?;
                break;
            }
        }

        let start = self.pos;
        let c = match self.advance() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::EndOfInput,
                    whitespace,
                    text: String::new(),
                })
            }
        };

        let kind = match c {
            '\'' => TokenKind::Quote,
            '`' => TokenKind::Quasiquote,
            ',' => {
                if self.peek() == Some('@') {
                    self.pos += 1;
                    TokenKind::UnquoteSplicing
                } else {
                    TokenKind::Unquote
                }
            }
            '(' => TokenKind::OpeningParenthesis,
            ')' => TokenKind::ClosingParenthesis,
            '"' => TokenKind::Str(self.scan_string_body()?),
            '#' => self.scan_hash_construct()?,
            '<' => match self.scan_xml_markup()? {
                Some(kind) => kind,
                None => self.scan_proto_token(c)?,
            },
            c => self.scan_proto_token(c)?,
        };

        Ok(Token {
            kind,
            whitespace,
            text: self.raw_since(start),
        })
    }

    /// Character data inside a pure-XML element, up to the next tag.
    fn scan_xml_text(&mut self) -> Result<Option<Token>, EvlError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '<' {
                break;
            }
            self.check_character(c)?;
            text.push(c);
            self.pos += 1;
        }
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Token {
            kind: TokenKind::XmlText,
            whitespace: String::new(),
            text,
        }))
    }

    fn scan_string_body(&mut self) -> Result<String, EvlError> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(EvlError::Truncated("unterminated string".into())),
                Some('"') => return Ok(value),
                Some('\\') => value.push(self.scan_string_escape()?),
                Some(c) => {
                    self.check_character(c)?;
                    value.push(c);
                }
            }
        }
    }

    fn scan_string_escape(&mut self) -> Result<char, EvlError> {
        match self.advance() {
            None => Err(EvlError::Truncated("truncated escape sequence".into())),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('t') => Ok('\t'),
            Some('n') => Ok('\n'),
            Some('v') => Ok('\u{0B}'),
            Some('f') => Ok('\u{0C}'),
            Some('r') => Ok('\r'),
            Some('U') => self.scan_unicode_escape(),
            Some(c) => Err(EvlError::Tokenizer(format!(
                "unknown escape character {:?}",
                c
            ))),
        }
    }

    fn scan_unicode_escape(&mut self) -> Result<char, EvlError> {
        match self.advance() {
            None => return Err(EvlError::Truncated("truncated escape sequence".into())),
            Some('{') => {}
            Some(c) => {
                return Err(EvlError::Tokenizer(format!(
                    "expected {{ after \\U, got {:?}",
                    c
                )))
            }
        }
        let mut hex = String::new();
        loop {
            match self.advance() {
                None => return Err(EvlError::Truncated("truncated escape sequence".into())),
                Some('}') => break,
                Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                Some(c) => {
                    return Err(EvlError::Tokenizer(format!(
                        "invalid hex digit {:?} in escape",
                        c
                    )))
                }
            }
        }
        if hex.is_empty() || hex.len() > 6 {
            return Err(EvlError::Tokenizer("malformed \\U escape".into()));
        }
        let code = u32::from_str_radix(&hex, 16)
            .map_err(|_| EvlError::Tokenizer("malformed \\U escape".into()))?;
        char::from_u32(code)
            .ok_or_else(|| EvlError::Tokenizer(format!("invalid code point U+{:04X}", code)))
    }

    fn at_token_boundary(&self) -> bool {
        match self.peek() {
            None => true,
            Some(c) => c.is_whitespace() || SYNTAX_CHARS.contains(c),
        }
    }

    fn scan_hash_construct(&mut self) -> Result<TokenKind, EvlError> {
        match self.peek() {
            None => Err(EvlError::Truncated("truncated hash construct".into())),
            Some('(') => {
                self.pos += 1;
                Ok(TokenKind::HashOpeningParenthesis)
            }
            Some('+') => {
                self.pos += 1;
                Ok(TokenKind::HashPlus)
            }
            Some('-') => {
                self.pos += 1;
                Ok(TokenKind::HashMinus)
            }
            Some('v') => {
                self.pos += 1;
                self.require_boundary("#v")?;
                Ok(TokenKind::Void)
            }
            Some('t') => {
                self.pos += 1;
                self.require_boundary("#t")?;
                Ok(TokenKind::Boolean(true))
            }
            Some('f') => {
                self.pos += 1;
                self.require_boundary("#f")?;
                Ok(TokenKind::Boolean(false))
            }
            Some(c) if c == '"' || c.is_ascii_digit() => self.scan_hash_string(),
            Some(c) => Err(EvlError::Tokenizer(format!(
                "malformed hash construct #{}",
                c
            ))),
        }
    }

    fn require_boundary(&self, construct: &str) -> Result<(), EvlError> {
        if self.at_token_boundary() {
            Ok(())
        } else {
            Err(EvlError::Tokenizer(format!(
                "malformed hash construct starting with {}",
                construct
            )))
        }
    }

    /// `#"abc"` yields the character `a` and queues `b`, `c` to come out
    /// as the next tokens. `#N"abc"` selects the Nth code unit instead and
    /// queues nothing. In converter mode any hash string is one token.
    fn scan_hash_string(&mut self) -> Result<TokenKind, EvlError> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        match self.advance() {
            Some('"') => {}
            Some(c) => {
                return Err(EvlError::Tokenizer(format!(
                    "malformed hash construct #{}{}",
                    digits, c
                )))
            }
            None => return Err(EvlError::Truncated("truncated hash construct".into())),
        }
        let body = self.scan_string_body()?;
        let units: Vec<char> = body.chars().collect();
        if units.is_empty() {
            return Err(EvlError::Tokenizer("empty character construct".into()));
        }
        if self.single_character_strings {
            return Ok(TokenKind::Character(units[0]));
        }
        if digits.is_empty() {
            for unit in &units[1..] {
                self.pending.push_back(*unit);
            }
            return Ok(TokenKind::Character(units[0]));
        }
        let index: usize = digits
            .parse()
            .map_err(|_| EvlError::Tokenizer("malformed character index".into()))?;
        units
            .get(index)
            .copied()
            .map(TokenKind::Character)
            .ok_or_else(|| {
                EvlError::Tokenizer(format!(
                    "character index {} out of range for {} code units",
                    index,
                    units.len()
                ))
            })
    }

    /// Attempts to read `<…>` as a well-formed tag. `None` means the run
    /// does not look like markup at all and the `<` opens a proto-token;
    /// a run that starts like markup but is not well-formed is an error.
    /// Called with the cursor just past the `<`.
    fn scan_xml_markup(&mut self) -> Result<Option<TokenKind>, EvlError> {
        match self.peek() {
            Some('!') => {
                if self.peek_at(1) == Some('-') && self.peek_at(2) == Some('-') {
                    self.pos += 3;
                    self.scan_xml_comment().map(Some)
                } else {
                    Err(EvlError::Tokenizer("malformed XML markup".into()))
                }
            }
            Some('/') => {
                self.pos += 1;
                let name = self.scan_xml_name()?;
                self.skip_xml_space();
                match self.advance() {
                    Some('>') => {
                        self.elements.pop();
                        Ok(Some(TokenKind::XmlEndTag(name)))
                    }
                    Some(_) => Err(EvlError::Tokenizer("malformed XML end tag".into())),
                    None => Err(EvlError::Truncated("unterminated XML tag".into())),
                }
            }
            Some(c) if c.is_ascii_alphabetic() => self.scan_xml_start_or_empty().map(Some),
            _ => Ok(None),
        }
    }

    fn scan_xml_comment(&mut self) -> Result<TokenKind, EvlError> {
        loop {
            match self.peek() {
                None => return Err(EvlError::Truncated("unterminated XML comment".into())),
                Some('-') if self.peek_at(1) == Some('-') && self.peek_at(2) == Some('>') => {
                    self.pos += 3;
                    return Ok(TokenKind::XmlCommentTag);
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn scan_xml_name(&mut self) -> Result<String, EvlError> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() => {
                name.push(c);
                self.pos += 1;
            }
            Some(_) => return Err(EvlError::Tokenizer("malformed XML name".into())),
            None => return Err(EvlError::Truncated("unterminated XML tag".into())),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.') {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn skip_xml_space(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn scan_xml_start_or_empty(&mut self) -> Result<TokenKind, EvlError> {
        let name = self.scan_xml_name()?;
        loop {
            self.skip_xml_space();
            match self.peek() {
                None => return Err(EvlError::Truncated("unterminated XML tag".into())),
                Some('>') => {
                    self.pos += 1;
                    self.elements.push(name.clone());
                    return Ok(TokenKind::XmlStartTag(name));
                }
                Some('/') => {
                    self.pos += 1;
                    match self.advance() {
                        Some('>') => return Ok(TokenKind::XmlEmptyTag(name)),
                        Some(_) => return Err(EvlError::Tokenizer("malformed XML tag".into())),
                        None => return Err(EvlError::Truncated("unterminated XML tag".into())),
                    }
                }
                Some(c) if c.is_ascii_alphabetic() => self.scan_xml_attribute()?,
                Some(_) => return Err(EvlError::Tokenizer("malformed XML tag".into())),
            }
        }
    }

    fn scan_xml_attribute(&mut self) -> Result<(), EvlError> {
        self.scan_xml_name()?;
        self.skip_xml_space();
        match self.advance() {
            Some('=') => {}
            Some(_) => return Err(EvlError::Tokenizer("malformed XML attribute".into())),
            None => return Err(EvlError::Truncated("unterminated XML tag".into())),
        }
        self.skip_xml_space();
        let quote = match self.advance() {
            Some(c @ ('"' | '\'')) => c,
            Some(_) => return Err(EvlError::Tokenizer("malformed XML attribute value".into())),
            None => return Err(EvlError::Truncated("unterminated XML tag".into())),
        };
        loop {
            match self.advance() {
                None => return Err(EvlError::Truncated("unterminated XML tag".into())),
                Some(c) if c == quote => return Ok(()),
                Some(c) => self.check_character(c)?,
            }
        }
    }

    /// Reads a proto-token up to whitespace or a syntax character, then
    /// classifies it as dot, number, keyword or variable name. A `<` in
    /// the middle of a proto-token ends it only when a well-formed tag
    /// follows; names like `_<` scan whole. The first character is
    /// already consumed.
    fn scan_proto_token(&mut self, first: char) -> Result<TokenKind, EvlError> {
        let mut value = String::new();
        let mut push = |lexer: &mut Lexer, c: char| -> Result<(), EvlError> {
            lexer.check_character(c)?;
            value.push(c);
            Ok(())
        };
        if first == '\\' {
            let c = self.scan_proto_escape()?;
            push(self, c)?;
        } else {
            push(self, first)?;
        }
        loop {
            match self.peek() {
                None => break,
                Some('<') => {
                    if self.tag_ahead() {
                        break;
                    }
                    self.pos += 1;
                    push(self, '<')?;
                }
                Some(c) if c.is_whitespace() || "()\"'`,".contains(c) => break,
                Some('\\') => {
                    self.pos += 1;
                    let c = self.scan_proto_escape()?;
                    push(self, c)?;
                }
                Some(c) => {
                    self.pos += 1;
                    push(self, c)?;
                }
            }
        }
        Ok(classify_proto_token(value)?)
    }

    /// Whether a well-formed XML tag begins at the cursor (which sits on
    /// a `<`). The trial consumes nothing and leaves the open-element
    /// stack untouched.
    fn tag_ahead(&mut self) -> bool {
        let saved_pos = self.pos;
        let saved_elements = self.elements.clone();
        self.pos += 1;
        let well_formed = matches!(self.scan_xml_markup(), Ok(Some(_)));
        self.pos = saved_pos;
        self.elements = saved_elements;
        well_formed
    }

    fn scan_proto_escape(&mut self) -> Result<char, EvlError> {
        match self.advance() {
            None => Err(EvlError::Truncated("truncated escape sequence".into())),
            Some('\\') => Ok('\\'),
            Some('<') => Ok('<'),
            Some('U') => self.scan_unicode_escape(),
            Some(c) => Err(EvlError::Tokenizer(format!(
                "unknown escape character {:?} in name",
                c
            ))),
        }
    }
}

fn looks_numeric(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('+') | Some('-') | Some('.') => matches!(chars.next(), Some(c) if c.is_ascii_digit()),
        _ => false,
    }
}

fn classify_proto_token(value: String) -> Result<TokenKind, EvlError> {
    if value == "." {
        return Ok(TokenKind::Dot);
    }
    if looks_numeric(&value) {
        return value
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| EvlError::Tokenizer(format!("malformed proto-token {}", value)));
    }
    if let Some(name) = value.strip_prefix(':') {
        if name.is_empty() {
            return Err(EvlError::Tokenizer("malformed keyword :".into()));
        }
        return Ok(TokenKind::Keyword(name.to_string()));
    }
    Ok(TokenKind::VariableName(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token.is_end() {
                return out;
            }
            out.push(token.kind);
        }
    }

    #[test]
    fn test_scan_atoms() {
        assert_eq!(
            kinds("42 -3.5 #t #f #v :key name"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(-3.5),
                TokenKind::Boolean(true),
                TokenKind::Boolean(false),
                TokenKind::Void,
                TokenKind::Keyword("key".into()),
                TokenKind::VariableName("name".into()),
            ]
        );
    }

    #[test]
    fn test_scan_parens_and_abbreviations() {
        assert_eq!(
            kinds("'(a) `b ,c ,@d #("),
            vec![
                TokenKind::Quote,
                TokenKind::OpeningParenthesis,
                TokenKind::VariableName("a".into()),
                TokenKind::ClosingParenthesis,
                TokenKind::Quasiquote,
                TokenKind::VariableName("b".into()),
                TokenKind::Unquote,
                TokenKind::VariableName("c".into()),
                TokenKind::UnquoteSplicing,
                TokenKind::VariableName("d".into()),
                TokenKind::HashOpeningParenthesis,
            ]
        );
    }

    #[test]
    fn test_whitespace_is_preserved() {
        let mut lexer = Lexer::new("  \n\t42");
        let token = lexer.next_token().unwrap();
        assert_eq!(token.whitespace, "  \n\t");
        assert_eq!(token.text, "42");
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\"c\\d\U{41}""#),
            vec![TokenKind::Str("a\nb\"c\\dA".into())]
        );
    }

    #[test]
    fn test_unterminated_string_is_truncated() {
        let mut lexer = Lexer::new("\"abc");
        assert!(matches!(lexer.next_token(), Err(EvlError::Truncated(_))));
    }

    #[test]
    fn test_hash_string_queues_remaining_units() {
        assert_eq!(
            kinds("#\"abc\""),
            vec![
                TokenKind::Character('a'),
                TokenKind::Character('b'),
                TokenKind::Character('c'),
            ]
        );
    }

    #[test]
    fn test_indexed_hash_string_selects_one_unit() {
        assert_eq!(kinds("#1\"abc\""), vec![TokenKind::Character('b')]);
    }

    #[test]
    fn test_converter_mode_single_character() {
        let mut lexer = Lexer::converter("#\"abc\" x");
        assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Character('a'));
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::VariableName("x".into())
        );
    }

    #[test]
    fn test_dot_and_dotted_names() {
        assert_eq!(
            kinds("( a . b )"),
            vec![
                TokenKind::OpeningParenthesis,
                TokenKind::VariableName("a".into()),
                TokenKind::Dot,
                TokenKind::VariableName("b".into()),
                TokenKind::ClosingParenthesis,
            ]
        );
    }

    #[test]
    fn test_comparison_names_scan_as_variables() {
        assert_eq!(
            kinds("< <= _<"),
            vec![
                TokenKind::VariableName("<".into()),
                TokenKind::VariableName("<=".into()),
                TokenKind::VariableName("_<".into()),
            ]
        );
    }

    #[test]
    fn test_xml_tags() {
        assert_eq!(
            kinds("<chapter><para id=\"p1\"/></chapter>"),
            vec![
                TokenKind::XmlStartTag("chapter".into()),
                TokenKind::XmlEmptyTag("para".into()),
                TokenKind::XmlEndTag("chapter".into()),
            ]
        );
    }

    #[test]
    fn test_xml_comment_tag() {
        assert_eq!(kinds("<!-- note -->"), vec![TokenKind::XmlCommentTag]);
    }

    #[test]
    fn test_pure_xml_text_keeps_whitespace() {
        let mut lexer = Lexer::new("<chapter><para>hello  world</para></chapter>");
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::XmlStartTag("chapter".into())
        );
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::XmlStartTag("para".into())
        );
        let text = lexer.next_token().unwrap();
        assert_eq!(text.kind, TokenKind::XmlText);
        assert_eq!(text.text, "hello  world");
        assert_eq!(
            lexer.next_token().unwrap().kind,
            TokenKind::XmlEndTag("para".into())
        );
    }

    #[test]
    fn test_evl_code_inside_chapter_scans_normally() {
        assert_eq!(
            kinds("<chapter>(foo)</chapter>"),
            vec![
                TokenKind::XmlStartTag("chapter".into()),
                TokenKind::OpeningParenthesis,
                TokenKind::VariableName("foo".into()),
                TokenKind::ClosingParenthesis,
                TokenKind::XmlEndTag("chapter".into()),
            ]
        );
    }

    #[test]
    fn test_unterminated_tag_is_truncated() {
        let mut lexer = Lexer::new("<para ");
        assert!(matches!(lexer.next_token(), Err(EvlError::Truncated(_))));
    }

    #[test]
    fn test_malformed_markup_is_an_error() {
        let mut lexer = Lexer::new("<!bad>");
        assert!(matches!(lexer.next_token(), Err(EvlError::Tokenizer(_))));
    }

    #[test]
    fn test_proto_token_escapes() {
        assert_eq!(
            kinds("a\\<b"),
            vec![TokenKind::VariableName("a<b".into())]
        );
    }

    #[test]
    fn test_angle_bracket_joins_a_name_unless_a_tag_follows() {
        assert_eq!(kinds("a<b"), vec![TokenKind::VariableName("a<b".into())]);
        assert_eq!(
            kinds("foo<br/>"),
            vec![
                TokenKind::VariableName("foo".into()),
                TokenKind::XmlEmptyTag("br".into()),
            ]
        );
    }

    #[test]
    fn test_control_characters_are_rejected() {
        let mut lexer = Lexer::new("a\u{01}b");
        assert!(matches!(lexer.next_token(), Err(EvlError::Tokenizer(_))));
    }

    #[test]
    fn test_lone_hash_is_truncated() {
        let mut lexer = Lexer::new("#");
        assert!(matches!(lexer.next_token(), Err(EvlError::Truncated(_))));
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let mut lexer = Lexer::new("1.2.3");
        assert!(matches!(lexer.next_token(), Err(EvlError::Tokenizer(_))));
    }
}
