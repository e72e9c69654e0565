//! Tagged-block finder.
//!
//! Locating a block is two-phase: a regex proposes every `(<tag>` anchor,
//! then a [`StructuralCursor`] discards anchors that sit inside quoted strings
//! and [`find_block_end`] computes the span. Finders that match on content
//! parse only the candidate block.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use super::lexer::{unescape, Lexer, TokenKind};
use super::locate::{find_block_end, Span, StructuralCursor};
use super::parser::parse_block;
use super::Node;
use crate::kicad::geometry::Point;

fn anchor_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\(\s*([^\s()"]+)"#)
            .unwrap_or_else(|e| unreachable!("anchor pattern is valid: {e}"))
    })
}

/// A located block with its nesting depth (1 = direct child of the root).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Byte span of the block.
    pub span: Span,
    /// Number of lists enclosing the block.
    pub depth: usize,
}

/// Every structural block headed by `tag`, at any depth, in document order.
#[must_use]
pub fn find_blocks_with_depth(text: &str, tag: &str) -> Vec<Located> {
    let mut cursor = StructuralCursor::new(text);
    let mut found = Vec::new();
    for caps in anchor_regex().captures_iter(text) {
        let (Some(whole), Some(head)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if head.as_str() != tag {
            continue;
        }
        let state = cursor.state_at(whole.start());
        if state.in_string {
            continue;
        }
        if let Some(end) = find_block_end(text, whole.start()) {
            found.push(Located {
                span: Span::new(whole.start(), end + 1),
                depth: state.depth,
            });
        }
    }
    found
}

/// Spans of every structural block headed by `tag`, in document order.
#[must_use]
pub fn find_blocks(text: &str, tag: &str) -> Vec<Span> {
    find_blocks_with_depth(text, tag)
        .into_iter()
        .map(|l| l.span)
        .collect()
}

/// Spans of blocks headed by `tag` at exactly `depth`.
#[must_use]
pub fn find_blocks_at_depth(text: &str, tag: &str, depth: usize) -> Vec<Span> {
    find_blocks_with_depth(text, tag)
        .into_iter()
        .filter(|l| l.depth == depth)
        .map(|l| l.span)
        .collect()
}

/// Atom argument `index` (0 = first after the head) of the block at `span`:
/// its token span (quotes included) and unescaped value.
///
/// Returns `None` if a nested list or the closing parenthesis comes first.
#[must_use]
pub fn arg_token(text: &str, span: Span, index: usize) -> Option<(Span, String)> {
    let mut lexer = Lexer::at(text, span.start);
    lexer.next()?.ok()?;
    lexer.next()?.ok()?;
    for _ in 0..index {
        let skipped = lexer.next()?.ok()?;
        if !matches!(skipped.kind, TokenKind::Quoted | TokenKind::Bare) {
            return None;
        }
    }
    let token = lexer.next()?.ok()?;
    match token.kind {
        TokenKind::Quoted => Some((token.span, unescape(token.text))),
        TokenKind::Bare => Some((token.span, token.text.to_string())),
        TokenKind::LParen | TokenKind::RParen => None,
    }
}

/// First argument after the head of the block at `span`.
#[must_use]
pub fn value_token(text: &str, span: Span) -> Option<(Span, String)> {
    arg_token(text, span, 0)
}

/// First argument after the head of the block at `span`, unescaped.
#[must_use]
pub fn block_value(text: &str, span: Span) -> Option<String> {
    value_token(text, span).map(|(_, value)| value)
}

/// First block headed by `tag` whose first argument equals `value`.
#[must_use]
pub fn find_by_tag_value(text: &str, tag: &str, value: &str) -> Option<Span> {
    find_blocks(text, tag)
        .into_iter()
        .find(|span| block_value(text, *span).as_deref() == Some(value))
}

/// Span of the schematic's `lib_symbols` section.
#[must_use]
pub fn lib_symbols_span(text: &str) -> Option<Span> {
    find_blocks(text, "lib_symbols").into_iter().next()
}

fn parse_span(text: &str, span: Span) -> Option<Node> {
    parse_block(span.slice(text)).ok()
}

/// Placed schematic symbol whose `Reference` property equals `reference`.
///
/// Library definitions inside `lib_symbols` are never matched. For a
/// multi-unit part this is the first unit in document order.
#[must_use]
pub fn find_symbol_by_reference(text: &str, reference: &str) -> Option<Span> {
    let found = find_symbols_by_reference(text, reference).into_iter().next();
    debug!(reference, ?found, "Symbol lookup by reference");
    found
}

/// Every placed symbol (one per unit) whose `Reference` equals `reference`,
/// in document order.
#[must_use]
pub fn find_symbols_by_reference(text: &str, reference: &str) -> Vec<Span> {
    let cache = lib_symbols_span(text);
    find_blocks(text, "symbol")
        .into_iter()
        .filter(|span| {
            if cache.is_some_and(|c| c.contains(*span)) {
                return false;
            }
            // cheap textual filter before parsing the block
            if !span.slice(text).contains(reference) {
                return false;
            }
            parse_span(text, *span).is_some_and(|node| node.property("Reference") == Some(reference))
        })
        .collect()
}

/// Board footprint whose reference equals `reference`.
///
/// Both `(property "Reference" …)` (KiCad 8+) and `(fp_text reference …)`
/// (earlier versions) are recognised.
#[must_use]
pub fn find_footprint_by_reference(text: &str, reference: &str) -> Option<Span> {
    find_blocks(text, "footprint").into_iter().find(|span| {
        if !span.slice(text).contains(reference) {
            return false;
        }
        parse_span(text, *span).is_some_and(|node| footprint_reference(&node) == Some(reference))
    })
}

/// Reference designator of a parsed footprint node.
#[must_use]
pub fn footprint_reference(node: &Node) -> Option<&str> {
    node.property("Reference").or_else(|| {
        node.children("fp_text")
            .find(|t| t.arg_str(0) == Some("reference"))
            .and_then(|t| t.arg_str(1))
    })
}

/// Endpoints of a parsed `(wire (pts (xy …) (xy …)))` node.
#[must_use]
pub fn wire_endpoints(node: &Node) -> Option<(Point, Point)> {
    let mut points = node.child("pts")?.children("xy").filter_map(Point::from_node);
    Some((points.next()?, points.next()?))
}

/// Wire whose endpoints match `start` and `end` within epsilon, in either
/// orientation.
#[must_use]
pub fn find_wire_by_endpoints(text: &str, start: Point, end: Point) -> Option<Span> {
    find_blocks(text, "wire").into_iter().find(|span| {
        parse_span(text, *span)
            .and_then(|node| wire_endpoints(&node))
            .is_some_and(|(a, b)| {
                (a.approx_eq(start) && b.approx_eq(end)) || (a.approx_eq(end) && b.approx_eq(start))
            })
    })
}

/// Block headed by `tag` (e.g. `no_connect`, `junction`) whose `(at …)`
/// matches `at` within epsilon.
#[must_use]
pub fn find_marker_by_position(text: &str, tag: &str, at: Point) -> Option<Span> {
    find_blocks(text, tag).into_iter().find(|span| {
        parse_span(text, *span)
            .and_then(|node| node.child("at").and_then(Point::from_node))
            .is_some_and(|p| p.approx_eq(at))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCH: &str = r#"(kicad_sch
  (lib_symbols
    (symbol "Device:R"
      (property "Reference" "R1")
      (symbol "R_0_1" (rectangle))
    )
  )
  (label "(symbol" (at 0 0 0))
  (symbol (lib_id "Device:R") (at 100 52.54 0)
    (property "Reference" "R1" (at 0 0 0))
    (property "Value" "10k")
  )
  (symbol (lib_id "Device:R") (at 100 36.19 0)
    (property "Reference" "R12")
  )
  (wire (pts (xy 100 48.73) (xy 100 40)) (uuid "w1"))
  (no_connect (at 50.8 25.4) (uuid "nc1"))
)
"#;

    #[test]
    fn anchors_inside_strings_are_ignored() {
        let blocks = find_blocks(SCH, "symbol");
        // two in lib_symbols, two placed; the label text is skipped
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|s| s.slice(SCH).starts_with("(symbol")));
    }

    #[test]
    fn depth_filter() {
        assert_eq!(find_blocks_at_depth(SCH, "symbol", 1).len(), 2);
        assert_eq!(find_blocks_at_depth(SCH, "symbol", 2).len(), 1);
        assert_eq!(find_blocks_at_depth(SCH, "symbol", 3).len(), 1);
    }

    #[test]
    fn tag_value_matches_quoted_and_bare() {
        let span = find_by_tag_value(SCH, "symbol", "Device:R").unwrap();
        assert!(span.slice(SCH).contains("R_0_1"));
        let text = "(root (net 3 GND) (net 4 \"VCC\"))";
        assert!(find_by_tag_value(text, "net", "3").is_some());
        assert!(find_by_tag_value(text, "net", "GND").is_none());
        assert!(find_by_tag_value(text, "net", "5").is_none());
    }

    #[test]
    fn later_arguments() {
        let text = r#"(property "Value" "10\"k" (at 0 0 0))"#;
        let span = Span::new(0, text.len());
        let (token, value) = arg_token(text, span, 1).unwrap();
        assert_eq!(value, "10\"k");
        assert_eq!(token.slice(text), r#""10\"k""#);
        assert!(arg_token(text, span, 2).is_none());
    }

    #[test]
    fn symbol_by_reference_skips_cache_and_prefixes() {
        let span = find_symbol_by_reference(SCH, "R1").unwrap();
        assert!(span.slice(SCH).contains("52.54"));
        let span = find_symbol_by_reference(SCH, "R12").unwrap();
        assert!(span.slice(SCH).contains("36.19"));
        assert!(find_symbol_by_reference(SCH, "R2").is_none());
    }

    #[test]
    fn wire_matches_either_orientation() {
        let a = Point::new(100.0, 48.73);
        let b = Point::new(100.0, 40.0);
        assert!(find_wire_by_endpoints(SCH, a, b).is_some());
        assert!(find_wire_by_endpoints(SCH, b, Point::new(100.004, 48.73)).is_some());
        assert!(find_wire_by_endpoints(SCH, a, Point::new(100.0, 41.0)).is_none());
    }

    #[test]
    fn marker_by_position() {
        assert!(find_marker_by_position(SCH, "no_connect", Point::new(50.8, 25.4)).is_some());
        assert!(find_marker_by_position(SCH, "no_connect", Point::new(50.8, 27.94)).is_none());
        assert!(find_marker_by_position(SCH, "junction", Point::new(50.8, 25.4)).is_none());
    }

    #[test]
    fn footprint_reference_both_forms() {
        let text = r#"(kicad_pcb
  (footprint "R_0603" (property "Reference" "R1" (at 0 0)))
  (footprint "C_0603" (fp_text reference "C1" (at 0 0)))
)"#;
        assert!(find_footprint_by_reference(text, "R1").unwrap().slice(text).contains("R_0603"));
        assert!(find_footprint_by_reference(text, "C1").unwrap().slice(text).contains("C_0603"));
        assert!(find_footprint_by_reference(text, "U1").is_none());
    }

    #[test]
    fn lib_symbols_section() {
        let span = lib_symbols_span(SCH).unwrap();
        assert!(span.slice(SCH).starts_with("(lib_symbols"));
        assert!(lib_symbols_span("(kicad_sch)").is_none());
    }
}
