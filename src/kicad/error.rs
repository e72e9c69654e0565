//! Error types for KiCad file operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for KiCad operations.
pub type KicadResult<T> = Result<T, KicadError>;

/// Errors that can occur during KiCad file operations.
///
/// Every variant carries the identifier, position or offset that failed so a
/// caller can build an actionable message without re-deriving context.
#[derive(Debug, Error)]
pub enum KicadError {
    /// Failed to open or read the file.
    #[error("Failed to read file: {path}")]
    FileRead {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to write the file.
    #[error("Failed to write file: {path}")]
    FileWrite {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Unbalanced delimiters, an unterminated string, or a missing root form.
    #[error("Malformed document at offset {offset}: {message}")]
    MalformedDocument {
        /// Byte offset where the problem was detected.
        offset: usize,
        /// Description of what's wrong.
        message: String,
    },

    /// A search for a named or positioned block found nothing.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// What was searched for (e.g. "symbol", "wire").
        kind: String,
        /// The identifier or position that was searched for.
        key: String,
    },

    /// An insert would create a duplicate.
    #[error("{kind} already exists: {key}")]
    AlreadyExists {
        /// What would be duplicated (e.g. "symbol", "footprint file").
        kind: String,
        /// The duplicated identifier.
        key: String,
    },

    /// A reference designator or qualified library id is malformed.
    #[error("Invalid identifier '{value}': {message}")]
    InvalidIdentifier {
        /// The rejected identifier.
        value: String,
        /// Description of what's wrong.
        message: String,
    },

    /// Invalid parameter value.
    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Description of what's wrong.
        message: String,
    },
}

impl KicadError {
    /// Creates a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a malformed document error.
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            offset,
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Creates an invalid identifier error.
    pub fn invalid_identifier(value: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            value: value.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns true for [`KicadError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for [`KicadError::AlreadyExists`].
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
