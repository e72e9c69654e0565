//! Copying symbols and footprints between libraries.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{line_indent, reindent, top_level_symbol, MAX_EXTENDS_DEPTH};
use crate::kicad::document::{modify_document, read_document, write_document};
use crate::kicad::edit::insert_before_end;
use crate::kicad::error::{KicadError, KicadResult};
use crate::kicad::sexpr::parse_block;

/// Text of a new, empty symbol library.
#[must_use]
pub fn new_symbol_library() -> String {
    format!(
        "(kicad_symbol_lib\n  (version 20231120)\n  (generator \"{}\")\n  (generator_version \"{}\")\n)\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

/// Creates an empty `.kicad_sym` file.
///
/// # Errors
///
/// Returns [`KicadError::AlreadyExists`] if the file exists, or a write error.
pub fn create_symbol_library(path: &Path) -> KicadResult<()> {
    if path.exists() {
        return Err(KicadError::already_exists(
            "symbol library",
            path.display().to_string(),
        ));
    }
    write_document(path, &new_symbol_library())
}

/// Copies the top-level symbol `name` from `source` library text into
/// `target` library text.
///
/// A derived symbol brings its `extends` chain along, parents first, unless
/// the target already defines them.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if `source` lacks the symbol or one of
/// its parents and [`KicadError::AlreadyExists`] if `target` already has it.
pub fn import_symbol(source: &str, name: &str, target: &str) -> KicadResult<String> {
    if top_level_symbol(target, name).is_some() {
        return Err(KicadError::already_exists("symbol", name));
    }
    import_with_parents(source, name, target, 0)
}

fn import_with_parents(source: &str, name: &str, target: &str, depth: usize) -> KicadResult<String> {
    let span = top_level_symbol(source, name).ok_or_else(|| KicadError::not_found("symbol", name))?;
    let mut out = target.to_string();
    let parent = parse_block(span.slice(source))?
        .child_str("extends")
        .map(str::to_string);
    if let Some(parent) = parent {
        if depth >= MAX_EXTENDS_DEPTH {
            return Err(KicadError::invalid_parameter(
                "extends",
                format!("chain from {name} is deeper than {MAX_EXTENDS_DEPTH}"),
            ));
        }
        if top_level_symbol(&out, &parent).is_none() {
            debug!(symbol = name, parent = %parent, "Importing parent symbol");
            out = import_with_parents(source, &parent, &out, depth + 1)?;
        }
    }
    let block = reindent(span.slice(source), line_indent(source, span.start), "  ");
    insert_before_end(&out, &format!("  {block}"))
}

/// File form of [`import_symbol`]: the target is rewritten only on success.
///
/// # Errors
///
/// Returns the errors of [`import_symbol`] plus any I/O error.
pub fn import_symbol_file(source: &Path, name: &str, target: &Path) -> KicadResult<()> {
    let source_text = read_document(source)?;
    modify_document(target, |text| import_symbol(&source_text, name, text))?;
    info!(symbol = name, target = %target.display(), "Imported symbol");
    Ok(())
}

/// Copies `<name>.kicad_mod` from one `.pretty` directory to another.
///
/// Returns the path of the new file.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if the source file or the target directory
/// is missing and [`KicadError::AlreadyExists`] if the target file exists.
pub fn import_footprint(source_dir: &Path, name: &str, target_dir: &Path) -> KicadResult<PathBuf> {
    let file_name = format!("{name}.kicad_mod");
    let source = source_dir.join(&file_name);
    if !source.is_file() {
        return Err(KicadError::not_found("footprint", source.display().to_string()));
    }
    if !target_dir.is_dir() {
        return Err(KicadError::not_found(
            "footprint library",
            target_dir.display().to_string(),
        ));
    }
    let target = target_dir.join(&file_name);
    if target.exists() {
        return Err(KicadError::already_exists("footprint file", file_name));
    }
    fs::copy(&source, &target).map_err(|e| KicadError::file_write(&target, e))?;
    info!(footprint = name, target = %target.display(), "Imported footprint");
    Ok(target)
}
