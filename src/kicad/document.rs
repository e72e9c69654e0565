//! Whole-file document I/O.
//!
//! A mutation reads the entire file, computes the entire new text, and writes
//! it back in one go. If computing the new text fails, nothing is written.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use super::error::{KicadError, KicadResult};

/// Reads a document as UTF-8 text.
///
/// # Errors
///
/// Returns [`KicadError::FileRead`] if the file cannot be read.
pub fn read_document(path: impl AsRef<Path>) -> KicadResult<String> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| KicadError::file_read(path, e))?;
    debug!(path = %path.display(), bytes = text.len(), "Read document");
    Ok(text)
}

/// Overwrites a document with `text`.
///
/// # Errors
///
/// Returns [`KicadError::FileWrite`] if the file cannot be written.
pub fn write_document(path: impl AsRef<Path>, text: &str) -> KicadResult<()> {
    let path = path.as_ref();
    fs::write(path, text).map_err(|e| KicadError::file_write(path, e))?;
    info!(path = %path.display(), bytes = text.len(), "Wrote document");
    Ok(())
}

/// Reads `path`, applies `edit`, and writes the result back only on success.
///
/// # Errors
///
/// Returns the read error, the error produced by `edit`, or the write error.
/// The file is untouched unless `edit` succeeds.
pub fn modify_document<F>(path: impl AsRef<Path>, edit: F) -> KicadResult<()>
where
    F: FnOnce(&str) -> KicadResult<String>,
{
    let path = path.as_ref();
    let text = read_document(path)?;
    let updated = edit(&text)?;
    if updated == text {
        debug!(path = %path.display(), "Edit produced no change");
        return Ok(());
    }
    write_document(path, &updated)
}
