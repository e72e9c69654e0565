//! S-expression tree, parser and serialiser.
//!
//! Parsing produces an immutable [`Node`] tree used for every read-only view.
//! Mutations never go through the tree: they use [`locate`] and [`find`] to
//! get byte spans in the original text and splice there.

pub mod find;
pub mod lexer;
pub mod locate;
mod parser;

use std::fmt;

use serde::Serialize;

pub use lexer::{quote, unescape};
pub use locate::{block_span, child_blocks, find_block_end, list_head, Span, StructuralCursor};
pub use parser::{parse, parse_block};

/// A parsed S-expression node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Node {
    /// A parenthesised list.
    List(Vec<Node>),
    /// A bare word such as a tag, `yes`, `passive`.
    Symbol(String),
    /// A token that was quoted in the source.
    Str(String),
    /// A bare integer literal.
    Int(i64),
    /// A bare floating-point literal.
    Float(f64),
}

impl Node {
    /// Returns the list items, or an empty slice for atoms.
    #[must_use]
    pub fn items(&self) -> &[Self] {
        match self {
            Self::List(items) => items,
            _ => &[],
        }
    }

    /// Returns the head tag of a list whose first item is a bare word.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self.items().first() {
            Some(Self::Symbol(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Returns true if this is a list whose head is `tag`.
    #[must_use]
    pub fn is(&self, tag: &str) -> bool {
        self.head() == Some(tag)
    }

    /// Items after the head.
    #[must_use]
    pub fn args(&self) -> &[Self] {
        self.items().get(1..).unwrap_or(&[])
    }

    /// The `index`-th item after the head.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Self> {
        self.args().get(index)
    }

    /// First direct child list with the given head.
    #[must_use]
    pub fn child(&self, tag: &str) -> Option<&Self> {
        self.items().iter().find(|n| n.is(tag))
    }

    /// All direct child lists with the given head, in document order.
    pub fn children<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.items().iter().filter(move |n| n.is(tag))
    }

    /// String content of a `Str` or `Symbol` atom.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of an `Int` or `Float` atom.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer value of an `Int` atom.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Any atom rendered as text. Numbers use their canonical form.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::List(_) => None,
            Self::Str(s) | Self::Symbol(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The `index`-th argument as a string.
    #[must_use]
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(Self::as_str)
    }

    /// The `index`-th argument as a number.
    #[must_use]
    pub fn arg_f64(&self, index: usize) -> Option<f64> {
        self.arg(index).and_then(Self::as_f64)
    }

    /// The `index`-th argument as text, numbers included.
    #[must_use]
    pub fn arg_text(&self, index: usize) -> Option<String> {
        self.arg(index).and_then(Self::as_text)
    }

    /// First argument of the child `(tag value …)`.
    #[must_use]
    pub fn child_str(&self, tag: &str) -> Option<&str> {
        self.child(tag).and_then(|c| c.arg_str(0))
    }

    /// First argument of the child `(tag value …)` as a number.
    #[must_use]
    pub fn child_f64(&self, tag: &str) -> Option<f64> {
        self.child(tag).and_then(|c| c.arg_f64(0))
    }

    /// Reads a `(tag yes|no)` flag.
    #[must_use]
    pub fn child_flag(&self, tag: &str) -> Option<bool> {
        match self.child_str(tag)? {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        }
    }

    /// Looks up `(property "name" "value" …)` among direct children.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.children("property")
            .find(|p| p.arg_str(0) == Some(name))
            .and_then(|p| p.arg_str(1))
    }

    /// All `(property "name" "value")` pairs among direct children.
    #[must_use]
    pub fn properties(&self) -> Vec<(&str, &str)> {
        self.children("property")
            .filter_map(|p| Some((p.arg_str(0)?, p.arg_str(1)?)))
            .collect()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Self::Symbol(s) => f.write_str(s),
            Self::Str(s) => f.write_str(&quote(s)),
            Self::Int(i) => write!(f, "{i}"),
            // Debug keeps a fraction or exponent, so the token re-parses as a float.
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

/// Serialises a root node returned by [`parse`]: one top-level form per line.
#[must_use]
pub fn to_text(root: &Node) -> String {
    let mut out = String::new();
    for item in root.items() {
        out.push_str(&item.to_string());
        out.push('\n');
    }
    out
}
