//! Balanced-block location on raw document text.
//!
//! These functions work on byte offsets in the original text and never build
//! a tree, so they can start anywhere in a document and cost one linear walk.

use serde::Serialize;

use super::lexer::{Lexer, TokenKind};
use crate::kicad::error::{KicadError, KicadResult};

/// Half-open byte range `[start, end)` in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Span {
    /// First byte of the range.
    pub start: usize,
    /// One past the last byte of the range.
    pub end: usize,
}

impl Span {
    /// Creates a span.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// True when the span covers no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `other` lies entirely inside this span.
    #[must_use]
    pub const fn contains(&self, other: Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// The covered text.
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Returns the index of the `)` matching the `(` at `start`.
///
/// Parentheses inside quoted strings are ignored, and `\` inside a string
/// skips the following byte. Returns `None` if `start` does not hold `(` or
/// the text ends before the block closes.
#[must_use]
pub fn find_block_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(start) != Some(&b'(') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Span of the block opening at `start`, closing parenthesis included.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the block is not balanced.
pub fn block_span(text: &str, start: usize) -> KicadResult<Span> {
    find_block_end(text, start)
        .map(|end| Span::new(start, end + 1))
        .ok_or_else(|| KicadError::malformed(start, "unbalanced block"))
}

/// Head tag of the list opening at `start`, if it has a bare one.
#[must_use]
pub fn list_head(text: &str, start: usize) -> Option<&str> {
    let mut lexer = Lexer::at(text, start);
    match lexer.next()? {
        Ok(t) if t.kind == TokenKind::LParen => {}
        _ => return None,
    }
    match lexer.next()? {
        Ok(t) if t.kind == TokenKind::Bare => Some(t.text),
        _ => None,
    }
}

/// Spans of the direct child lists of the block at `span`, in order.
#[must_use]
pub fn child_blocks(text: &str, span: Span) -> Vec<Span> {
    let mut out = Vec::new();
    let inner_end = span.end.saturating_sub(1);
    let mut lexer = Lexer::at(text, span.start + 1);
    while let Some(Ok(token)) = lexer.next() {
        if token.span.start >= inner_end {
            break;
        }
        match token.kind {
            TokenKind::LParen => match find_block_end(text, token.span.start) {
                Some(end) => {
                    out.push(Span::new(token.span.start, end + 1));
                    lexer = Lexer::at(text, end + 1);
                }
                None => break,
            },
            TokenKind::RParen => break,
            TokenKind::Quoted | TokenKind::Bare => {}
        }
    }
    out
}

/// Structural state at an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    /// The offset lies inside a quoted string.
    pub in_string: bool,
    /// Number of lists open before the offset.
    pub depth: usize,
}

/// Incremental scanner answering "inside a string?" and "how deep?" for a
/// sequence of ascending offsets in one pass over the text.
///
/// Querying an offset lower than the previous one restarts from the top.
#[derive(Debug, Clone)]
pub struct StructuralCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    last: usize,
    depth: usize,
    in_string: bool,
}

impl<'a> StructuralCursor<'a> {
    /// Creates a cursor at the start of `text`.
    #[must_use]
    pub const fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
            last: 0,
            depth: 0,
            in_string: false,
        }
    }

    /// Advances to `offset` and reports the state there.
    pub fn state_at(&mut self, offset: usize) -> CursorState {
        if offset < self.last {
            self.pos = 0;
            self.depth = 0;
            self.in_string = false;
        }
        self.last = offset;

        let limit = offset.min(self.bytes.len());
        while self.pos < limit {
            let b = self.bytes[self.pos];
            if self.in_string {
                match b {
                    b'\\' => self.pos += 1,
                    b'"' => self.in_string = false,
                    _ => {}
                }
            } else {
                match b {
                    b'"' => self.in_string = true,
                    b'(' => self.depth += 1,
                    b')' => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
            }
            self.pos += 1;
        }

        CursorState {
            in_string: self.in_string,
            depth: self.depth,
        }
    }
}
