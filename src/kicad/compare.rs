//! Schematic/board reconciliation keyed by reference designator.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use super::board::{Board, Footprint};
use super::error::KicadResult;
use super::ident::compare_designators;
use super::schematic::{Schematic, SchematicSymbol};

/// A part present on one side only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OneSided {
    /// Reference designator.
    pub reference: String,
    /// Value on the side that has it.
    pub value: String,
    /// Footprint on the side that has it (may be empty).
    pub footprint: String,
}

/// A field that differs between the two sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMismatch {
    /// Reference designator.
    pub reference: String,
    /// Schematic value of the field.
    pub schematic: String,
    /// Board value of the field.
    pub board: String,
}

/// Counts for a [`Comparison`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComparisonSummary {
    /// Compared schematic parts.
    pub schematic_parts: usize,
    /// Compared board footprints.
    pub board_parts: usize,
    /// References on both sides with agreeing fields.
    pub matched: usize,
    /// Schematic parts with no footprint on the board.
    pub missing_from_board: usize,
    /// Board footprints with no schematic part.
    pub missing_from_schematic: usize,
    /// Footprint disagreements.
    pub footprint_mismatches: usize,
    /// Value disagreements.
    pub value_mismatches: usize,
}

/// Result of [`compare`]. Every list is in designator order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Comparison {
    /// Counts.
    pub summary: ComparisonSummary,
    /// References on both sides whose footprint and value agree.
    pub matched: Vec<String>,
    /// Schematic parts absent from the board.
    pub missing_from_board: Vec<OneSided>,
    /// Board footprints absent from the schematic.
    pub missing_from_schematic: Vec<OneSided>,
    /// Footprint disagreements.
    pub footprint_mismatches: Vec<FieldMismatch>,
    /// Value disagreements.
    pub value_mismatches: Vec<FieldMismatch>,
}

impl Comparison {
    /// True when both sides agree completely.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.missing_from_board.is_empty()
            && self.missing_from_schematic.is_empty()
            && self.footprint_mismatches.is_empty()
            && self.value_mismatches.is_empty()
    }
}

#[derive(PartialEq, Eq)]
struct ByDesignator(String);

impl Ord for ByDesignator {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        compare_designators(&self.0, &other.0)
    }
}

impl PartialOrd for ByDesignator {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

fn board_side(symbol: &SchematicSymbol) -> bool {
    !symbol.is_power && !symbol.reference.is_empty() && !symbol.reference.starts_with('#') && symbol.on_board
}

/// A field disagrees only when both sides set it.
fn differs(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && a != b
}

/// Classifies every reference as matched, one-sided or mismatched.
///
/// Power symbols, `#` references and `on_board no` parts are not expected on
/// the board. Units of one multi-unit part count once.
#[must_use]
pub fn compare(schematic: &Schematic, board: &Board) -> Comparison {
    let mut sides: BTreeMap<ByDesignator, (Option<&SchematicSymbol>, Option<&Footprint>)> =
        BTreeMap::new();
    for symbol in schematic.symbols.iter().filter(|s| board_side(s)) {
        let entry = sides.entry(ByDesignator(symbol.reference.clone())).or_default();
        entry.0.get_or_insert(symbol);
    }
    for footprint in board.footprints.iter().filter(|f| !f.reference.is_empty()) {
        let entry = sides.entry(ByDesignator(footprint.reference.clone())).or_default();
        entry.1.get_or_insert(footprint);
    }

    let mut result = Comparison::default();
    for (ByDesignator(reference), side) in sides {
        match side {
            (Some(sym), None) => result.missing_from_board.push(OneSided {
                reference,
                value: sym.value.clone(),
                footprint: sym.footprint.clone(),
            }),
            (None, Some(fp)) => result.missing_from_schematic.push(OneSided {
                reference,
                value: fp.value.clone(),
                footprint: fp.lib_id.clone(),
            }),
            (Some(sym), Some(fp)) => {
                let mut agrees = true;
                if differs(&sym.footprint, &fp.lib_id) {
                    agrees = false;
                    result.footprint_mismatches.push(FieldMismatch {
                        reference: reference.clone(),
                        schematic: sym.footprint.clone(),
                        board: fp.lib_id.clone(),
                    });
                }
                if differs(&sym.value, &fp.value) {
                    agrees = false;
                    result.value_mismatches.push(FieldMismatch {
                        reference: reference.clone(),
                        schematic: sym.value.clone(),
                        board: fp.value.clone(),
                    });
                }
                if agrees {
                    result.matched.push(reference);
                }
            }
            (None, None) => {}
        }
    }

    result.summary = ComparisonSummary {
        schematic_parts: result.matched.len()
            + result.missing_from_board.len()
            + mismatched_count(&result),
        board_parts: result.matched.len()
            + result.missing_from_schematic.len()
            + mismatched_count(&result),
        matched: result.matched.len(),
        missing_from_board: result.missing_from_board.len(),
        missing_from_schematic: result.missing_from_schematic.len(),
        footprint_mismatches: result.footprint_mismatches.len(),
        value_mismatches: result.value_mismatches.len(),
    };
    debug!(summary = ?result.summary, "Compared schematic and board");
    result
}

/// References on both sides that disagree in at least one field.
fn mismatched_count(result: &Comparison) -> usize {
    let mut refs: Vec<&str> = result
        .footprint_mismatches
        .iter()
        .chain(&result.value_mismatches)
        .map(|m| m.reference.as_str())
        .collect();
    refs.sort_unstable();
    refs.dedup();
    refs.len()
}

/// Reads both files and compares them.
///
/// # Errors
///
/// Returns an error if either file cannot be read or parsed.
pub fn compare_files(schematic: &Path, board: &Path) -> KicadResult<Comparison> {
    Ok(compare(&Schematic::open(schematic)?, &Board::open(board)?))
}
