//! Iterative parser turning tokens into a [`Node`] tree.
//!
//! Nesting is tracked on an explicit stack so deeply nested files cannot
//! overflow the call stack.

use std::sync::OnceLock;

use regex::Regex;

use super::lexer::{unescape, Lexer, TokenKind};
use super::Node;
use crate::kicad::error::{KicadError, KicadResult};

fn numeric_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?$")
            .unwrap_or_else(|e| unreachable!("numeric literal pattern is valid: {e}"))
    })
}

/// Classifies a bare token as an integer, a float or a symbol.
fn classify(token: &str) -> Node {
    if !numeric_regex().is_match(token) {
        return Node::Symbol(token.to_string());
    }
    let is_integer = !token.contains(['.', 'e', 'E']);
    if is_integer {
        if let Ok(value) = token.parse::<i64>() {
            return Node::Int(value);
        }
    }
    // out-of-range exponents would print as `inf` and come back as symbols
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Node::Float(value),
        _ => Node::Symbol(token.to_string()),
    }
}

/// Parses a whole document. The returned root is a list of every top-level form.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] for an unterminated string, an
/// unexpected `)` or an unclosed `(`, with the byte offset of the problem.
pub fn parse(text: &str) -> KicadResult<Node> {
    let mut top: Vec<Node> = Vec::new();
    let mut stack: Vec<(usize, Vec<Node>)> = Vec::new();

    for token in Lexer::new(text) {
        let token = token?;
        let node = match token.kind {
            TokenKind::LParen => {
                stack.push((token.span.start, Vec::new()));
                continue;
            }
            TokenKind::RParen => {
                let (_, items) = stack
                    .pop()
                    .ok_or_else(|| KicadError::malformed(token.span.start, "unexpected ')'"))?;
                Node::List(items)
            }
            TokenKind::Quoted => Node::Str(unescape(token.text)),
            TokenKind::Bare => classify(token.text),
        };
        match stack.last_mut() {
            Some((_, items)) => items.push(node),
            None => top.push(node),
        }
    }

    if let Some((offset, _)) = stack.first() {
        return Err(KicadError::malformed(*offset, "unclosed '('"));
    }
    Ok(Node::List(top))
}

/// Parses text holding a single form, typically a block slice.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the text is malformed or holds
/// no form at all.
pub fn parse_block(text: &str) -> KicadResult<Node> {
    match parse(text)? {
        Node::List(mut forms) if !forms.is_empty() => Ok(forms.swap_remove(0)),
        _ => Err(KicadError::malformed(0, "no form found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_lists() {
        let root = parse("(kicad_sch (version 20231120) (generator \"eeschema\"))").unwrap();
        let sch = &root.items()[0];
        assert_eq!(sch.head(), Some("kicad_sch"));
        assert_eq!(sch.child("version").unwrap().arg(0), Some(&Node::Int(20_231_120)));
        assert_eq!(sch.child_str("generator"), Some("eeschema"));
    }

    #[test]
    fn classifies_numbers_strictly() {
        assert_eq!(classify("12"), Node::Int(12));
        assert_eq!(classify("-3"), Node::Int(-3));
        assert_eq!(classify("+4"), Node::Int(4));
        assert_eq!(classify("1.27"), Node::Float(1.27));
        assert_eq!(classify(".5"), Node::Float(0.5));
        assert_eq!(classify("1e3"), Node::Float(1000.0));
        assert_eq!(classify("inf"), Node::Symbol("inf".into()));
        assert_eq!(classify("nan"), Node::Symbol("nan".into()));
        assert_eq!(classify("1.27mm"), Node::Symbol("1.27mm".into()));
        assert_eq!(classify("F.Cu"), Node::Symbol("F.Cu".into()));
        assert_eq!(classify("-"), Node::Symbol("-".into()));
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        assert!(matches!(classify("99999999999999999999"), Node::Float(_)));
    }

    #[test]
    fn overflowing_exponent_stays_a_symbol() {
        assert_eq!(classify("1e400"), Node::Symbol("1e400".into()));
        assert_eq!(classify("-1e400"), Node::Symbol("-1e400".into()));
        assert_eq!(classify("1e-400"), Node::Float(0.0));
    }

    #[test]
    fn quoted_numbers_stay_strings() {
        let node = parse_block("(number \"1\")").unwrap();
        assert_eq!(node.arg(0), Some(&Node::Str("1".into())));
    }

    #[test]
    fn unexpected_close_reports_offset() {
        let err = parse("(a) )").unwrap_err();
        assert!(matches!(err, KicadError::MalformedDocument { offset: 4, .. }));
    }

    #[test]
    fn unclosed_open_reports_outermost_offset() {
        let err = parse("  (a (b)").unwrap_err();
        assert!(matches!(err, KicadError::MalformedDocument { offset: 2, .. }));
    }

    #[test]
    fn empty_text_parses_to_empty_root() {
        assert_eq!(parse("  \n").unwrap(), Node::List(Vec::new()));
        assert!(parse_block("").is_err());
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 2_000;
        let text = format!("{}{}", "(a ".repeat(depth), ")".repeat(depth));
        assert!(parse(&text).is_ok());
    }
}
