//! Electrical sanity checks over a schematic.
//!
//! Findings are data, not errors: a schematic with problems still validates
//! successfully and returns a report listing them.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::connectivity::{resolve_nets, Netlist};
use super::Schematic;
use crate::kicad::geometry::Point;
use crate::kicad::ident::compare_designators;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Likely intentional but worth a look.
    Warning,
    /// Breaks annotation, netlisting or the board link.
    Error,
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// The same reference on more than one instance of the same unit.
    DuplicateReference,
    /// A pin with nothing attached and no no-connect marker.
    FloatingPin,
    /// One connected group carrying two or more explicit names.
    AmbiguousNet,
    /// A power symbol whose net reaches no component pin.
    UnconnectedPower,
}

/// One validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    /// What was found.
    pub kind: FindingKind,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Affected reference designator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Affected pin number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    /// Affected net name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
    /// Document positions involved.
    pub positions: Vec<Point>,
}

/// Result of [`validate`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    /// Findings, errors first.
    pub findings: Vec<Finding>,
    /// Number of error findings.
    pub error_count: usize,
    /// Number of warning findings.
    pub warning_count: usize,
    /// Names of the checks that ran.
    pub checks_performed: Vec<&'static str>,
}

impl ValidationReport {
    /// True when no error was found. Warnings do not fail validation.
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.error_count == 0
    }

    /// Findings of one kind.
    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    fn push(&mut self, finding: Finding) {
        match finding.severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
        }
        self.findings.push(finding);
    }
}

/// Runs every check against the schematic.
#[must_use]
pub fn validate(sch: &Schematic) -> ValidationReport {
    let netlist = resolve_nets(sch);
    let mut report = ValidationReport::default();

    report.checks_performed.push("duplicate_references");
    check_duplicate_references(sch, &mut report);
    report.checks_performed.push("floating_pins");
    check_floating_pins(sch, &netlist, &mut report);
    report.checks_performed.push("ambiguous_nets");
    check_ambiguous_nets(&netlist, &mut report);
    report.checks_performed.push("unconnected_power");
    check_unconnected_power(&netlist, &mut report);

    report.findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    debug!(
        errors = report.error_count,
        warnings = report.warning_count,
        "Validated schematic"
    );
    report
}

fn check_duplicate_references(sch: &Schematic, report: &mut ValidationReport) {
    let mut seen: BTreeMap<(&str, u32), Vec<Point>> = BTreeMap::new();
    for symbol in &sch.symbols {
        // unannotated references ("R?") are expected to repeat
        if symbol.reference.is_empty() || symbol.reference.ends_with('?') {
            continue;
        }
        seen.entry((symbol.reference.as_str(), symbol.unit))
            .or_default()
            .push(symbol.placement.position);
    }
    let mut duplicates: Vec<_> = seen.into_iter().filter(|(_, at)| at.len() > 1).collect();
    duplicates.sort_by(|a, b| compare_designators(a.0 .0, b.0 .0).then(a.0 .1.cmp(&b.0 .1)));
    for ((reference, unit), positions) in duplicates {
        report.push(Finding {
            kind: FindingKind::DuplicateReference,
            severity: Severity::Error,
            message: format!(
                "Reference {reference} (unit {unit}) is used {} times",
                positions.len()
            ),
            reference: Some(reference.to_string()),
            pin: None,
            net: None,
            positions,
        });
    }
}

fn check_floating_pins(sch: &Schematic, netlist: &Netlist, report: &mut ValidationReport) {
    for net in netlist.nets.iter().filter(|n| n.item_count == 1) {
        for pin in &net.pins {
            if sch.no_connects.iter().any(|nc| nc.position.approx_eq(pin.position)) {
                continue;
            }
            report.push(Finding {
                kind: FindingKind::FloatingPin,
                severity: Severity::Warning,
                message: format!(
                    "Pin {}.{} at {} is not connected",
                    pin.reference, pin.pin, pin.position
                ),
                reference: Some(pin.reference.clone()),
                pin: Some(pin.pin.clone()),
                net: Some(net.name.clone()),
                positions: vec![pin.position],
            });
        }
    }
}

fn check_ambiguous_nets(netlist: &Netlist, report: &mut ValidationReport) {
    for net in netlist.nets.iter().filter(|n| n.is_ambiguous()) {
        report.push(Finding {
            kind: FindingKind::AmbiguousNet,
            severity: Severity::Warning,
            message: format!(
                "Net {} is also named {}",
                net.name,
                net.aliases.join(", ")
            ),
            reference: None,
            pin: None,
            net: Some(net.name.clone()),
            positions: net.pins.iter().map(|p| p.position).collect(),
        });
    }
}

fn check_unconnected_power(netlist: &Netlist, report: &mut ValidationReport) {
    for power in &netlist.isolated_power {
        report.push(Finding {
            kind: FindingKind::UnconnectedPower,
            severity: Severity::Warning,
            message: format!(
                "Power symbol {} ({}) at {} reaches no component pin",
                power.reference, power.value, power.position
            ),
            reference: Some(power.reference.clone()),
            pin: None,
            net: Some(power.value.clone()),
            positions: vec![power.position],
        });
    }
}
