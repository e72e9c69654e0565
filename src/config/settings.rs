//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::kicad::library::LibrarySet;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// `.kicad_sym` files or glob patterns, searched in order.
    #[serde(default)]
    pub symbol_libraries: Vec<String>,

    /// `.pretty` directories or glob patterns, searched in order.
    #[serde(default)]
    pub footprint_libraries: Vec<String>,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lists = [
            ("symbol", &self.symbol_libraries),
            ("footprint", &self.footprint_libraries),
        ];
        for (kind, patterns) in lists {
            for pattern in patterns {
                if pattern.trim().is_empty() {
                    return Err(ConfigError::ValidationError {
                        message: format!("empty {kind} library pattern"),
                    });
                }
                if let Err(e) = glob::Pattern::new(pattern) {
                    return Err(ConfigError::ValidationError {
                        message: format!("invalid {kind} library pattern '{pattern}': {e}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Expands `symbol_libraries` into a [`LibrarySet`], keeping pattern
    /// order. Nicknames are the file stems.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is invalid or a match cannot be read.
    pub fn library_set(&self) -> Result<LibrarySet, ConfigError> {
        Ok(LibrarySet::new(expand_all(&self.symbol_libraries)?))
    }

    /// Expands `footprint_libraries` into `.pretty` directories, keeping
    /// pattern order.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern is invalid or a match cannot be read.
    pub fn footprint_dirs(&self) -> Result<Vec<PathBuf>, ConfigError> {
        expand_all(&self.footprint_libraries)
    }
}

fn expand_all(patterns: &[String]) -> Result<Vec<PathBuf>, ConfigError> {
    let mut paths = Vec::new();
    for pattern in patterns {
        for path in expand(pattern)? {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    Ok(paths)
}

/// A plain path passes through untouched even when it does not exist yet; a
/// pattern yields its matches in lexical order.
fn expand(pattern: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let pattern = match (pattern.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => pattern.to_string(),
    };
    if !pattern.contains(['*', '?', '[']) {
        return Ok(vec![PathBuf::from(pattern)]);
    }

    let matches = glob::glob(&pattern).map_err(|e| ConfigError::ValidationError {
        message: format!("invalid library pattern '{pattern}': {e}"),
    })?;
    let mut paths = Vec::new();
    for entry in matches {
        let path = entry.map_err(|source| ConfigError::PatternError {
            pattern: pattern.clone(),
            source,
        })?;
        paths.push(path);
    }
    debug!(pattern = %pattern, matches = paths.len(), "Expanded library pattern");
    Ok(paths)
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
