//! Tokenizer for the KiCad S-expression text format.
//!
//! # Token Rules
//!
//! - Space, tab, CR and LF separate tokens
//! - `(` and `)` are structural
//! - `"…"` is a quoted token; `\` escapes the next character
//! - Anything else up to whitespace or a parenthesis is a bare token

use super::Span;
use crate::kicad::error::{KicadError, KicadResult};

/// Kind of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// A `"`-delimited token.
    Quoted,
    /// Any other run of non-whitespace, non-parenthesis characters.
    Bare,
}

/// A token with its location in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token kind.
    pub kind: TokenKind,
    /// Byte span of the whole token, quotes included.
    pub span: Span,
    /// Raw token text. For quoted tokens this excludes the quotes but keeps
    /// escape sequences; see [`unescape`].
    pub text: &'a str,
}

/// Iterator over the tokens of a document, starting at any byte offset.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer positioned at the start of `src`.
    #[must_use]
    pub const fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Creates a lexer positioned at byte offset `pos`.
    #[must_use]
    pub const fn at(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    /// Current byte offset.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    fn quoted(&mut self, start: usize) -> KicadResult<Token<'a>> {
        let bytes = self.src.as_bytes();
        let mut i = start + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => {
                    self.pos = i + 1;
                    return Ok(Token {
                        kind: TokenKind::Quoted,
                        span: Span::new(start, i + 1),
                        text: &self.src[start + 1..i],
                    });
                }
                _ => i += 1,
            }
        }
        self.pos = bytes.len();
        Err(KicadError::malformed(start, "unterminated quoted string"))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = KicadResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && is_whitespace(bytes[self.pos]) {
            self.pos += 1;
        }
        let start = self.pos;
        let first = *bytes.get(start)?;

        let token = match first {
            b'(' | b')' => {
                self.pos += 1;
                let kind = if first == b'(' {
                    TokenKind::LParen
                } else {
                    TokenKind::RParen
                };
                Token {
                    kind,
                    span: Span::new(start, start + 1),
                    text: &self.src[start..=start],
                }
            }
            b'"' => return Some(self.quoted(start)),
            _ => {
                let mut end = start;
                while end < bytes.len() && !is_delimiter(bytes[end]) {
                    end += 1;
                }
                self.pos = end;
                Token {
                    kind: TokenKind::Bare,
                    span: Span::new(start, end),
                    text: &self.src[start..end],
                }
            }
        };
        Some(Ok(token))
    }
}

/// Returns true for the four whitespace bytes the format recognises.
#[must_use]
pub const fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

const fn is_delimiter(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b'(' | b')' | b'"')
}

/// Resolves `\"` and `\\` escapes. Other escape sequences are kept verbatim
/// so that serialising the result reproduces the original bytes.
#[must_use]
pub fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(next @ ('"' | '\\')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Writes `value` as a quoted token, escaping `"` and `\`.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
