// ABOUTME: EVL to XML converter producing the mixed rendering of a source text

use crate::error::EvlError;
use crate::eval::AbortFlag;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Where the current point sits: at top level, inside an XML element, or
/// inside a parenthesized EVL form.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Context {
    Xml,
    Evl,
}

struct Converter {
    lexer: Lexer,
    contexts: Vec<Context>,
    out: String,
    /// A `<toplevelcode><blockcode>` pair is currently open.
    block_open: bool,
}

/// One unit of output: either EVL code (XML-escaped) or markup
/// (emitted verbatim).
struct Piece {
    token: Token,
    /// A folded `<comment>…</comment>` element, carried whole.
    folded: Option<String>,
}

const BLOCK_OPEN: &str = "<toplevelcode><blockcode>";
const BLOCK_CLOSE: &str = "</blockcode></toplevelcode>";

/// Re-scans the source and produces the mixed EVL/XML rendering. EVL
/// lexemes are XML-escaped, XML lexemes pass through verbatim.
pub fn convert(source: &str, abort: &AbortFlag) -> Result<String, EvlError> {
    let mut converter = Converter {
        lexer: Lexer::converter(source),
        contexts: Vec::new(),
        out: String::new(),
        block_open: false,
    };
    converter.run(abort)?;
    Ok(converter.out)
}

fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The count of spaces after the first newline of the whitespace run,
/// used as the indentation of an embedded comment block.
fn indentation_of(whitespace: &str) -> usize {
    match whitespace.find('\n') {
        Some(i) => whitespace[i + 1..]
            .chars()
            .take_while(|c| *c == ' ')
            .count(),
        None => 0,
    }
}

impl Converter {
    fn current(&self) -> Option<Context> {
        self.contexts.last().copied()
    }

    fn run(&mut self, abort: &AbortFlag) -> Result<(), EvlError> {
        loop {
            abort.check()?;
            let token = self.lexer.next_token()?;
            if token.is_end() {
                if self.block_open {
                    self.out.push_str(BLOCK_CLOSE);
                    self.block_open = false;
                }
                self.out.push_str(&token.whitespace);
                return Ok(());
            }
            let piece = self.fold_comment(token)?;
            match self.current() {
                None => self.emit_top_level(piece)?,
                Some(Context::Xml) => self.emit_in_xml(piece)?,
                Some(Context::Evl) => self.emit_in_evl(piece)?,
            }
        }
    }

    /// `<comment>…</comment>` collapses into one end-of-line comment
    /// token whose body passes through.
    fn fold_comment(&mut self, token: Token) -> Result<Piece, EvlError> {
        if !matches!(&token.kind, TokenKind::XmlStartTag(name) if name == "comment") {
            return Ok(Piece {
                token,
                folded: None,
            });
        }
        let mut folded = token.text.clone();
        let mut depth = 1usize;
        loop {
            let inner = self.lexer.next_token()?;
            match &inner.kind {
                TokenKind::EndOfInput => {
                    return Err(EvlError::Converter("unterminated comment element".into()))
                }
                TokenKind::XmlStartTag(name) if name == "comment" => depth += 1,
                TokenKind::XmlEndTag(name) if name == "comment" => depth -= 1,
                _ => {}
            }
            folded.push_str(&inner.whitespace);
            folded.push_str(&inner.text);
            if depth == 0 {
                return Ok(Piece {
                    token,
                    folded: Some(folded),
                });
            }
        }
    }

    /// Code text for a piece: the folded comment body passes through,
    /// ordinary EVL lexemes are escaped.
    fn code_text(piece: &Piece) -> String {
        match &piece.folded {
            Some(folded) => folded.clone(),
            None => xml_escape(&piece.token.text),
        }
    }

    fn is_markup(piece: &Piece) -> bool {
        piece.folded.is_none() && piece.token.is_xml()
    }

    fn track_parens(&mut self, kind: &TokenKind) {
        match kind {
            TokenKind::OpeningParenthesis | TokenKind::HashOpeningParenthesis => {
                self.contexts.push(Context::Evl)
            }
            TokenKind::ClosingParenthesis => {
                if self.current() == Some(Context::Evl) {
                    self.contexts.pop();
                }
            }
            _ => {}
        }
    }

    fn track_markup(&mut self, kind: &TokenKind) {
        match kind {
            TokenKind::XmlStartTag(_) => self.contexts.push(Context::Xml),
            TokenKind::XmlEndTag(_) => {
                if self.current() == Some(Context::Xml) {
                    self.contexts.pop();
                }
            }
            _ => {}
        }
    }

    fn emit_top_level(&mut self, piece: Piece) -> Result<(), EvlError> {
        self.out.push_str(&piece.token.whitespace);
        if Self::is_markup(&piece) {
            self.out.push_str(&piece.token.text);
            self.track_markup(&piece.token.kind);
        } else {
            let text = Self::code_text(&piece);
            self.out.push_str(&text);
            self.track_parens(&piece.token.kind);
        }
        Ok(())
    }

    fn emit_in_xml(&mut self, piece: Piece) -> Result<(), EvlError> {
        if Self::is_markup(&piece) {
            if self.block_open {
                self.out.push_str(BLOCK_CLOSE);
                self.block_open = false;
            }
            self.out.push_str(&piece.token.whitespace);
            self.out.push_str(&piece.token.text);
            self.track_markup(&piece.token.kind);
            return Ok(());
        }
        if !self.block_open {
            self.out.push_str(&piece.token.whitespace);
            self.out.push_str(BLOCK_OPEN);
            self.block_open = true;
        } else if piece.token.whitespace.matches('\n').count() >= 2 {
            // A blank line between top-level code tokens starts a new
            // block.
            self.out.push_str(BLOCK_CLOSE);
            self.out.push_str(&piece.token.whitespace);
            self.out.push_str(BLOCK_OPEN);
        } else {
            self.out.push_str(&piece.token.whitespace);
        }
        let text = Self::code_text(&piece);
        self.out.push_str(&text);
        self.track_parens(&piece.token.kind);
        Ok(())
    }

    fn emit_in_evl(&mut self, piece: Piece) -> Result<(), EvlError> {
        if !Self::is_markup(&piece) {
            self.out.push_str(&piece.token.whitespace);
            let text = Self::code_text(&piece);
            self.out.push_str(&text);
            self.track_parens(&piece.token.kind);
            return Ok(());
        }
        // An XML element embedded in a form renders as an indented block
        // comment.
        match piece.token.kind.clone() {
            TokenKind::XmlEmptyTag(_) | TokenKind::XmlCommentTag => {
                let indentation = indentation_of(&piece.token.whitespace);
                self.out.push_str(&piece.token.whitespace);
                self.out.push_str(&format!(
                    "<indentation style=\"margin-left: {} ch\"><blockcomment>",
                    indentation
                ));
                self.out.push_str(&piece.token.text);
                self.out.push_str("</blockcomment></indentation>");
                Ok(())
            }
            TokenKind::XmlStartTag(_) => {
                let indentation = indentation_of(&piece.token.whitespace);
                self.out.push_str(&piece.token.whitespace);
                self.out.push_str(&format!(
                    "<indentation style=\"margin-left: {} ch\"><blockcomment>",
                    indentation
                ));
                self.out.push_str(&piece.token.text);
                let mut depth = 1usize;
                while depth > 0 {
                    let inner = self.lexer.next_token()?;
                    match &inner.kind {
                        TokenKind::EndOfInput => {
                            return Err(EvlError::Converter(
                                "unterminated XML element inside a form".into(),
                            ))
                        }
                        TokenKind::XmlStartTag(_) => depth += 1,
                        TokenKind::XmlEndTag(_) => depth -= 1,
                        _ => {}
                    }
                    self.out.push_str(&inner.whitespace);
                    self.out.push_str(&inner.text);
                }
                self.out.push_str("</blockcomment></indentation>");
                Ok(())
            }
            TokenKind::XmlText => {
                self.out.push_str(&piece.token.whitespace);
                self.out.push_str(&piece.token.text);
                Ok(())
            }
            _ => Err(EvlError::Converter(
                "unexpected XML end tag inside a form".into(),
            )),
        }
    }
}
