//! Reference designators and qualified library identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use super::error::{KicadError, KicadResult};

fn reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)(\d+)([A-Za-z]?)$")
            .unwrap_or_else(|e| unreachable!("reference pattern is valid: {e}"))
    })
}

/// A validated reference designator such as `R1`, `U3A` or `#PWR01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct Reference(String);

impl Reference {
    /// Validates `value` as a component or power reference.
    ///
    /// Component references are letters, digits and an optional unit letter.
    /// Power and flag references start with `#` followed by the same shape.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::InvalidIdentifier`] if the text has another shape.
    pub fn parse(value: &str) -> KicadResult<Self> {
        let body = value.strip_prefix('#').unwrap_or(value);
        if reference_regex().is_match(body) {
            Ok(Self(value.to_string()))
        } else {
            Err(KicadError::invalid_identifier(
                value,
                "expected letters followed by digits and an optional unit letter (e.g. R1, U3A)",
            ))
        }
    }

    /// The designator text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `#`-prefixed power and flag references.
    #[must_use]
    pub fn is_power(&self) -> bool {
        self.0.starts_with('#')
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Reference> for String {
    fn from(r: Reference) -> Self {
        r.0
    }
}

impl AsRef<str> for Reference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_designators(&self.0, &other.0)
    }
}

/// Splits text into alternating non-digit and digit runs.
fn natural_chunks(s: &str) -> Vec<(bool, &str)> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut digits: Option<bool> = None;
    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        if digits.is_some_and(|d| d != is_digit) {
            chunks.push((digits.unwrap_or(false), &s[start..i]));
            start = i;
        }
        digits = Some(is_digit);
    }
    if start < s.len() {
        chunks.push((digits.unwrap_or(false), &s[start..]));
    }
    chunks
}

/// Designator-aware ordering: digit runs compare numerically, so `R2 < R10`
/// and `U3A < U3B`. Works on any text, such as pin numbers.
#[must_use]
pub fn compare_designators(a: &str, b: &str) -> Ordering {
    let left = natural_chunks(a);
    let right = natural_chunks(b);
    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            ((true, ld), (true, rd)) => {
                let lt = ld.trim_start_matches('0');
                let rt = rd.trim_start_matches('0');
                lt.len().cmp(&rt.len()).then_with(|| lt.cmp(rt)).then_with(|| ld.len().cmp(&rd.len()))
            }
            ((_, ls), (_, rs)) => ls.cmp(rs),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

/// A qualified library identifier `Library:Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LibId {
    /// Library nickname.
    pub library: String,
    /// Item name inside the library.
    pub name: String,
}

impl LibId {
    /// Parses `Library:Name`.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::InvalidIdentifier`] when either part is empty or
    /// the separator is missing.
    pub fn parse(value: &str) -> KicadResult<Self> {
        match value.split_once(':') {
            Some((library, name)) if !library.is_empty() && !name.is_empty() => Ok(Self {
                library: library.to_string(),
                name: name.to_string(),
            }),
            _ => Err(KicadError::invalid_identifier(
                value,
                "expected a qualified id of the form Library:Name",
            )),
        }
    }
}

impl fmt::Display for LibId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.library, self.name)
    }
}
