//! Byte-exact text splicing primitives.
//!
//! Every mutation in this crate is `old text → new text`: a span is located,
//! new text is spliced in or the span is cut out, and all other bytes are
//! copied unchanged. Nothing here touches the filesystem.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use uuid::Uuid;

use super::error::{KicadError, KicadResult};
use super::sexpr::{block_span, child_blocks, list_head, Span, StructuralCursor};

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Span of the document's root form.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the text has no balanced root.
pub fn root_span(text: &str) -> KicadResult<Span> {
    let start = text
        .find('(')
        .ok_or_else(|| KicadError::malformed(0, "no root form"))?;
    block_span(text, start)
}

/// Inserts `block` before the closing parenthesis of the root form.
///
/// `block` should carry its own indentation. It is placed on its own line and
/// the root's closing parenthesis keeps its position on the following line.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the root form is unbalanced.
pub fn insert_before_end(text: &str, block: &str) -> KicadResult<String> {
    let root = root_span(text)?;
    let close = root.end - 1;
    let line_start = text[..close].trim_end_matches(is_blank).len();
    let (at, insertion) = if text[..line_start].ends_with('\n') {
        (line_start, format!("{block}\n"))
    } else {
        (close, format!("\n{block}\n"))
    };
    debug!(offset = at, bytes = insertion.len(), "Inserting block before root end");
    Ok(insert_at(text, at, &insertion))
}

/// Inserts `insertion` at byte `offset`.
#[must_use]
pub fn insert_at(text: &str, offset: usize, insertion: &str) -> String {
    let mut out = String::with_capacity(text.len() + insertion.len());
    out.push_str(&text[..offset]);
    out.push_str(insertion);
    out.push_str(&text[offset..]);
    out
}

/// Replaces the bytes of `span` with `replacement`.
#[must_use]
pub fn replace_span(text: &str, span: Span, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len() - span.len() + replacement.len());
    out.push_str(&text[..span.start]);
    out.push_str(replacement);
    out.push_str(&text[span.end..]);
    out
}

/// Applies several non-overlapping replacements at once.
#[must_use]
pub fn apply_edits(text: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = text.to_string();
    for (span, replacement) in edits {
        out.replace_range(span.start..span.end, &replacement);
    }
    out
}

/// Appends `child` as the last item of the list at `span`.
///
/// When the list's closing parenthesis sits on its own line, the child gets a
/// new line indented two spaces past it; otherwise it is added inline.
#[must_use]
pub fn append_child(text: &str, span: Span, child: &str) -> String {
    let close = span.end - 1;
    let before = &text[span.start..close];
    let trimmed = before.trim_end_matches(is_blank);
    if trimmed.ends_with('\n') {
        let close_indent = &before[trimmed.len()..];
        insert_at(
            text,
            span.start + trimmed.len(),
            &format!("{close_indent}  {child}\n"),
        )
    } else {
        insert_at(text, close, &format!(" {child}"))
    }
}

/// Removes the block at `span`.
///
/// A block alone on its line takes its indentation and line break with it.
/// The whitespace left at the seam is collapsed to at most one blank line, so
/// repeated removals never accumulate empty lines.
#[must_use]
pub fn remove_block(text: &str, span: Span) -> String {
    let line_start = text[..span.start].rfind('\n').map_or(0, |i| i + 1);
    let alone_before = text[line_start..span.start].chars().all(is_blank);
    let after = &text[span.end..];
    let trailing_blanks = after.len() - after.trim_start_matches(is_blank).len();
    let rest = &after[trailing_blanks..];
    let newline_len = if rest.starts_with("\r\n") {
        2
    } else {
        usize::from(rest.starts_with('\n'))
    };
    let alone_after = newline_len > 0 || rest.is_empty();

    let (cut_start, cut_end) = if alone_before && alone_after {
        (line_start, span.end + trailing_blanks + newline_len)
    } else if after.starts_with(' ') {
        (span.start, span.end + 1)
    } else if text[..span.start].ends_with(' ') {
        (span.start - 1, span.end)
    } else {
        (span.start, span.end)
    };

    let head = &text[..cut_start];
    let tail = &text[cut_end..];
    let head_core = head.trim_end_matches(is_space);
    let tail_core = tail.trim_start_matches(is_space);
    let run = format!("{}{}", &head[head_core.len()..], &tail[..tail.len() - tail_core.len()]);

    debug!(start = span.start, end = span.end, "Removing block");
    if run.matches('\n').count() <= 2 {
        return format!("{head}{tail}");
    }
    let eol = if run.contains("\r\n") { "\r\n" } else { "\n" };
    let indent = run.rsplit('\n').next().unwrap_or("");
    format!("{head_core}{eol}{eol}{indent}{tail_core}")
}

fn at_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\s*at\s+([-+0-9.eE]+)\s+([-+0-9.eE]+)")
            .unwrap_or_else(|e| unreachable!("at pattern is valid: {e}"))
    })
}

/// Shifts every structural `(at x y …)` inside `block` by `(dx, dy)`.
#[must_use]
pub fn shift_positions(block: &str, dx: f64, dy: f64) -> String {
    let mut cursor = StructuralCursor::new(block);
    let mut edits = Vec::new();
    for caps in at_regex().captures_iter(block) {
        let (Some(whole), Some(x), Some(y)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if cursor.state_at(whole.start()).in_string {
            continue;
        }
        let (Ok(xv), Ok(yv)) = (x.as_str().parse::<f64>(), y.as_str().parse::<f64>()) else {
            continue;
        };
        edits.push((Span::new(x.start(), x.end()), format_coord(xv + dx)));
        edits.push((Span::new(y.start(), y.end()), format_coord(yv + dy)));
    }
    apply_edits(block, edits)
}

/// Generates a fresh random UUID in KiCad's textual form.
#[must_use]
pub fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Gives `block` a fresh `(uuid …)`, replacing its own direct-child uuid or
/// adding one when missing. Nested uuids are left alone.
#[must_use]
pub fn refresh_uuid(block: &str) -> String {
    let Some(start) = block.find('(') else {
        return block.to_string();
    };
    let Ok(span) = block_span(block, start) else {
        return block.to_string();
    };
    let fresh = format!("(uuid \"{}\")", new_uuid());
    let existing = child_blocks(block, span)
        .into_iter()
        .find(|child| list_head(block, child.start) == Some("uuid"));
    match existing {
        Some(child) => replace_span(block, child, &fresh),
        None => append_child(block, span, &fresh),
    }
}

/// Returns one more than the largest integer captured by group 1 of
/// `pattern` in `text`, or 1 when nothing matches.
#[must_use]
pub fn next_number(text: &str, pattern: &Regex) -> u32 {
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
        .max()
        .map_or(1, |n| n.saturating_add(1))
}

/// Formats a coordinate compactly: at most four decimals, no trailing zeros,
/// never `-0`.
#[must_use]
pub fn format_coord(value: f64) -> String {
    let rounded = (value * 10_000.0).round() / 10_000.0;
    let text = format!("{rounded:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Prefixes every non-empty line of `block` with `indent`.
#[must_use]
pub fn indent_lines(block: &str, indent: &str) -> String {
    block
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
