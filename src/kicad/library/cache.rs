//! Schematic `lib_symbols` cache maintenance.
//!
//! A schematic embeds a copy of every library symbol it places, keyed by the
//! qualified id (`Device:R`). Two libraries can both define `R`, so the copy
//! is renamed on the way in: the top-level symbol becomes `Library:R` and its
//! unit sub-symbols `R_0_1`, `R_1_1` become `Library:R_0_1`, `Library:R_1_1`.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use super::symbol::MAX_EXTENDS_DEPTH;
use super::{line_indent, reindent, LibrarySet};
use crate::kicad::edit::{append_child, apply_edits, insert_at, insert_before_end};
use crate::kicad::error::KicadResult;
use crate::kicad::ident::LibId;
use crate::kicad::sexpr::find::{
    find_blocks_at_depth, find_blocks_with_depth, lib_symbols_span, value_token,
};
use crate::kicad::sexpr::{parse_block, quote, Span};

/// Indentation of a symbol definition inside `lib_symbols`.
const CACHE_INDENT: &str = "    ";

/// What [`ensure_cached`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheStatus {
    /// The cache already held the symbol; the text is unchanged.
    AlreadyCached,
    /// The symbol was copied from `source`.
    Injected {
        /// Library file the definition came from.
        source: PathBuf,
    },
    /// No candidate library defines the symbol; the text is unchanged.
    Unresolved,
}

/// Result of [`ensure_cached`]: the (possibly) updated text and what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Document text after the operation.
    pub text: String,
    /// What was done.
    pub status: CacheStatus,
}

/// Span of the cached definition of `lib_id`, if any.
#[must_use]
pub fn cached_symbol_span(document: &str, lib_id: &str) -> Option<Span> {
    let cache = lib_symbols_span(document)?;
    find_blocks_with_depth(document, "symbol")
        .into_iter()
        .filter(|l| cache.contains(l.span))
        .map(|l| l.span)
        .find(|span| value_token(document, *span).is_some_and(|(_, v)| v == lib_id))
}

/// Makes sure the schematic's `lib_symbols` section holds `lib_id`.
///
/// Candidate libraries are searched in order (see [`LibrarySet::candidates`]).
/// The section is created when missing. A derived symbol brings its parent
/// along. A symbol no library defines is reported as
/// [`CacheStatus::Unresolved`] and logged, not raised.
///
/// # Errors
///
/// Returns an error if `lib_id` is not a qualified id or the document is
/// malformed.
pub fn ensure_cached(
    document: &str,
    lib_id: &str,
    libraries: &LibrarySet,
) -> KicadResult<CacheOutcome> {
    ensure_cached_at_depth(document, lib_id, libraries, 0)
}

fn ensure_cached_at_depth(
    document: &str,
    lib_id: &str,
    libraries: &LibrarySet,
    depth: usize,
) -> KicadResult<CacheOutcome> {
    let id = LibId::parse(lib_id)?;
    if cached_symbol_span(document, lib_id).is_some() {
        debug!(lib_id, "Symbol already cached");
        return Ok(CacheOutcome {
            text: document.to_string(),
            status: CacheStatus::AlreadyCached,
        });
    }

    let Some(found) = libraries.find_symbol_block(lib_id)? else {
        warn!(lib_id, "Library symbol not found, schematic cache left unchanged");
        return Ok(CacheOutcome {
            text: document.to_string(),
            status: CacheStatus::Unresolved,
        });
    };

    let mut text = document.to_string();
    let parent = parse_block(&found.block)
        .ok()
        .and_then(|node| node.child_str("extends").map(str::to_string));
    if let Some(parent) = parent {
        if depth < MAX_EXTENDS_DEPTH {
            // the parent must come from the same file as the child
            let mut origin = LibrarySet::default();
            origin.push(id.library.clone(), found.library.path.clone());
            let parent_id = format!("{}:{parent}", id.library);
            text = ensure_cached_at_depth(&text, &parent_id, &origin, depth + 1)?.text;
        } else {
            warn!(lib_id, "extends chain too deep, parent not cached");
        }
    }

    let renamed = qualify_symbol_names(&found.block, &id);
    let block = reindent(&renamed, &found.indent, CACHE_INDENT);
    let text = insert_into_cache(&text, &block)?;
    debug!(lib_id, source = %found.library.path.display(), "Injected library symbol into cache");

    Ok(CacheOutcome {
        text,
        status: CacheStatus::Injected {
            source: found.library.path,
        },
    })
}

/// Renames the top-level symbol to `Library:Name` and every nested
/// sub-symbol `Name_…` to `Library:Name_…`.
#[must_use]
pub fn qualify_symbol_names(block: &str, id: &LibId) -> String {
    let unit_prefix = format!("{}_", id.name);
    let edits = find_blocks_with_depth(block, "symbol")
        .into_iter()
        .filter_map(|located| {
            let (token, value) = value_token(block, located.span)?;
            let top = located.span.start == 0;
            if (top && value == id.name) || (!top && value.starts_with(&unit_prefix)) {
                Some((token, quote(&format!("{}:{value}", id.library))))
            } else {
                None
            }
        })
        .collect();
    apply_edits(block, edits)
}

fn insert_into_cache(text: &str, block: &str) -> KicadResult<String> {
    if let Some(span) = lib_symbols_span(text) {
        return Ok(append_child(text, span, block));
    }

    let section = format!("  (lib_symbols\n{CACHE_INDENT}{block}\n  )");
    let first_symbol = find_blocks_at_depth(text, "symbol", 1).into_iter().next();
    match first_symbol {
        Some(first) => {
            let indent = line_indent(text, first.start);
            let line_start = first.start - indent.len();
            if text[..line_start].ends_with('\n') || line_start == 0 {
                Ok(insert_at(text, line_start, &format!("{section}\n\n")))
            } else {
                Ok(insert_at(text, first.start, &format!("{} ", section.trim_start())))
            }
        }
        None => insert_before_end(text, &section),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const DEVICE: &str = r#"(kicad_symbol_lib
  (version 20231120)
  (symbol "R"
    (property "Reference" "R")
    (symbol "R_0_1"
      (rectangle (start -1.016 -2.54) (end 1.016 2.54))
    )
    (symbol "R_1_1"
      (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
      (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2"))
    )
  )
  (symbol "R_US" (extends "R")
    (property "Reference" "R")
  )
)
"#;

    const SCH_WITH_CACHE: &str = "(kicad_sch\n  (version 20231120)\n  (lib_symbols\n  )\n)\n";

    fn library(dir: &Path) -> LibrarySet {
        let path = dir.join("Device.kicad_sym");
        fs::write(&path, DEVICE).unwrap();
        LibrarySet::new([path])
    }

    #[test]
    fn injects_into_existing_section() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let out = ensure_cached(SCH_WITH_CACHE, "Device:R", &libs).unwrap();
        assert!(matches!(out.status, CacheStatus::Injected { .. }));
        assert!(out.text.contains("  (lib_symbols\n    (symbol \"Device:R\"\n"));
        assert!(out.text.contains("(symbol \"Device:R_0_1\""));
        assert!(out.text.contains("(symbol \"Device:R_1_1\""));
        assert!(cached_symbol_span(&out.text, "Device:R").is_some());
        assert!(crate::kicad::sexpr::parse(&out.text).is_ok());
    }

    #[test]
    fn second_call_is_already_cached() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let first = ensure_cached(SCH_WITH_CACHE, "Device:R", &libs).unwrap();
        let second = ensure_cached(&first.text, "Device:R", &libs).unwrap();
        assert_eq!(second.status, CacheStatus::AlreadyCached);
        assert_eq!(second.text, first.text);
    }

    #[test]
    fn creates_missing_section_before_first_symbol() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let sch = "(kicad_sch\n  (version 20231120)\n  (symbol (lib_id \"Device:R\") (at 0 0 0))\n)\n";
        let out = ensure_cached(sch, "Device:R", &libs).unwrap();
        let cache = out.text.find("(lib_symbols").unwrap();
        let placed = out.text.find("(symbol (lib_id").unwrap();
        assert!(cache < placed);
        assert!(crate::kicad::sexpr::parse(&out.text).is_ok());
    }

    #[test]
    fn creates_missing_section_before_root_end() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let out = ensure_cached("(kicad_sch\n  (version 1)\n)\n", "Device:R", &libs).unwrap();
        assert!(out.text.starts_with("(kicad_sch\n  (version 1)\n  (lib_symbols\n    (symbol \"Device:R\""));
        assert!(out.text.ends_with("  )\n)\n"));
    }

    #[test]
    fn unresolved_leaves_text_unchanged() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let out = ensure_cached(SCH_WITH_CACHE, "Device:Missing", &libs).unwrap();
        assert_eq!(out.status, CacheStatus::Unresolved);
        assert_eq!(out.text, SCH_WITH_CACHE);
    }

    #[test]
    fn derived_symbol_brings_parent() {
        let dir = TempDir::new().unwrap();
        let libs = library(dir.path());
        let out = ensure_cached(SCH_WITH_CACHE, "Device:R_US", &libs).unwrap();
        assert!(cached_symbol_span(&out.text, "Device:R").is_some());
        assert!(cached_symbol_span(&out.text, "Device:R_US").is_some());
        // the parent comes first
        assert!(out.text.find("\"Device:R\"").unwrap() < out.text.find("\"Device:R_US\"").unwrap());
    }

    #[test]
    fn qualify_leaves_unrelated_names() {
        let id = LibId::parse("Custom:R").unwrap();
        let block = r#"(symbol "R" (symbol "R_1_1") (symbol "RX_1_1"))"#;
        assert_eq!(
            qualify_symbol_names(block, &id),
            r#"(symbol "Custom:R" (symbol "Custom:R_1_1") (symbol "RX_1_1"))"#
        );
    }

    #[test]
    fn invalid_lib_id_is_an_error() {
        let libs = LibrarySet::default();
        assert!(ensure_cached(SCH_WITH_CACHE, "R", &libs).is_err());
    }
}
