//! Net resolution from schematic geometry.
//!
//! Every electrical item contributes one or more points: pin tips, wire
//! endpoints, label anchors, junctions and power-symbol pins. Points that
//! coincide within [`COORD_EPSILON`] belong to the same node, and a wire joins
//! its two endpoints. Connected groups that contain at least one component pin
//! become nets. Groups carrying the same explicit name (label text or power
//! value) are one net even when they are drawn apart.
//!
//! Wires only join at endpoints. A wire passing over a pin without ending on
//! it does not connect, which matches how KiCad draws T-junctions.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::debug;

use super::Schematic;
use crate::kicad::error::{KicadError, KicadResult};
use crate::kicad::geometry::{Point, COORD_EPSILON};
use crate::kicad::ident::compare_designators;

/// Power symbol value that marks a driven net without naming it.
const POWER_FLAG_VALUE: &str = "PWR_FLAG";

/// Where a net's name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// A local, global or hierarchical label.
    Label,
    /// A power symbol's value.
    Power,
    /// Generated from the lowest pin in the net.
    Synthesized,
}

/// A component pin on a net.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetPin {
    /// Reference designator.
    pub reference: String,
    /// Pin number.
    pub pin: String,
    /// Document-space position.
    pub position: Point,
}

/// A resolved net.
#[derive(Debug, Clone, Serialize)]
pub struct Net {
    /// Net name.
    pub name: String,
    /// Origin of the name.
    pub source: NameSource,
    /// Component pins, ordered by reference then pin number.
    pub pins: Vec<NetPin>,
    /// Number of electrical items (pins, wires, labels, junctions, power
    /// symbols) in the net.
    pub item_count: usize,
    /// Other explicit names attached to the same net.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl Net {
    /// True if the net carries more than one distinct explicit name.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        !self.aliases.is_empty()
    }
}

/// A power symbol whose net reaches no component pin.
#[derive(Debug, Clone, Serialize)]
pub struct IsolatedPower {
    /// Reference designator (`#PWR…`, `#FLG…`).
    pub reference: String,
    /// Power net name.
    pub value: String,
    /// Symbol position.
    pub position: Point,
}

/// Every net of a schematic, plus power symbols that connect to nothing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Netlist {
    /// Nets sorted by name.
    pub nets: Vec<Net>,
    /// Power symbols outside every net.
    pub isolated_power: Vec<IsolatedPower>,
}

impl Netlist {
    /// Net with the given name or alias.
    #[must_use]
    pub fn net(&self, name: &str) -> Option<&Net> {
        self.nets
            .iter()
            .find(|n| n.name == name)
            .or_else(|| self.nets.iter().find(|n| n.aliases.iter().any(|a| a == name)))
    }

    /// Net containing pin `pin` of `reference`.
    #[must_use]
    pub fn net_of_pin(&self, reference: &str, pin: &str) -> Option<&Net> {
        self.nets
            .iter()
            .find(|n| n.pins.iter().any(|p| p.reference == reference && p.pin == pin))
    }
}

#[derive(Debug)]
enum ItemKind {
    Pin { reference: String, pin: String },
    Label(String),
    Power { reference: String, value: Option<String> },
    Junction,
    Wire,
}

#[derive(Debug)]
struct Item {
    kind: ItemKind,
    points: Vec<Point>,
}

impl Item {
    fn explicit_name(&self) -> Option<(&str, NameSource)> {
        match &self.kind {
            ItemKind::Label(text) => Some((text, NameSource::Label)),
            ItemKind::Power {
                value: Some(value), ..
            } => Some((value, NameSource::Power)),
            _ => None,
        }
    }
}

/// Union-find with path halving.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = rb.min(ra);
        }
    }
}

/// Connection points snapped to canonical nodes.
///
/// A point joins the earliest node within epsilon of it, or starts a new node.
/// Points never chain through each other, so two points farther apart than
/// epsilon only share a node when a wire links them.
///
/// Cells are larger than the tolerance, so a point's candidates within
/// epsilon are always in the surrounding 3×3 cells.
#[derive(Debug, Default)]
struct PointIndex {
    cells: HashMap<(i64, i64), Vec<usize>>,
    /// Node position and the item that created it.
    nodes: Vec<(Point, usize)>,
}

const CELL_SIZE: f64 = COORD_EPSILON * 100.0;

#[allow(clippy::cast_possible_truncation)]
fn cell_of(p: Point) -> (i64, i64) {
    ((p.x / CELL_SIZE).floor() as i64, (p.y / CELL_SIZE).floor() as i64)
}

impl PointIndex {
    /// Snaps `p` to a node. Returns the item owning an existing node, or
    /// `None` after creating a new node owned by `item`.
    fn snap(&mut self, p: Point, item: usize) -> Option<usize> {
        let (cx, cy) = cell_of(p);
        let existing = (-1..=1)
            .flat_map(|dx| (-1..=1).map(move |dy| (cx + dx, cy + dy)))
            .filter_map(|cell| self.cells.get(&cell))
            .flatten()
            .copied()
            .filter(|&node| self.nodes[node].0.approx_eq(p))
            .min();
        if let Some(node) = existing {
            return Some(self.nodes[node].1);
        }
        self.cells.entry(cell_of(p)).or_default().push(self.nodes.len());
        self.nodes.push((p, item));
        None
    }
}

fn collect_items(sch: &Schematic) -> Vec<Item> {
    let mut items = Vec::new();
    for symbol in &sch.symbols {
        let pins = sch.placed_pins(symbol);
        if symbol.is_power {
            let value = (!symbol.value.is_empty() && symbol.value != POWER_FLAG_VALUE)
                .then(|| symbol.value.clone());
            let points = if pins.is_empty() {
                vec![symbol.placement.position]
            } else {
                pins.iter().map(|p| p.position).collect()
            };
            items.push(Item {
                kind: ItemKind::Power {
                    reference: symbol.reference.clone(),
                    value,
                },
                points,
            });
            continue;
        }
        for pin in pins {
            items.push(Item {
                kind: ItemKind::Pin {
                    reference: pin.reference,
                    pin: pin.number,
                },
                points: vec![pin.position],
            });
        }
    }
    for wire in &sch.wires {
        items.push(Item {
            kind: ItemKind::Wire,
            points: vec![wire.start, wire.end],
        });
    }
    for label in &sch.labels {
        items.push(Item {
            kind: ItemKind::Label(label.text.clone()),
            points: vec![label.position],
        });
    }
    for junction in &sch.junctions {
        items.push(Item {
            kind: ItemKind::Junction,
            points: vec![junction.position],
        });
    }
    items
}

fn connect(items: &[Item]) -> DisjointSet {
    let mut sets = DisjointSet::new(items.len());
    let mut index = PointIndex::default();
    for (i, item) in items.iter().enumerate() {
        for &p in &item.points {
            if let Some(owner) = index.snap(p, i) {
                sets.union(i, owner);
            }
        }
    }

    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        if let Some((name, _)) = item.explicit_name() {
            match by_name.get(name) {
                Some(&first) => sets.union(first, i),
                None => {
                    by_name.insert(name, i);
                }
            }
        }
    }
    sets
}

fn build_net(items: &[Item], members: &[usize]) -> Option<Net> {
    let mut pins: Vec<NetPin> = members
        .iter()
        .filter_map(|&i| match &items[i].kind {
            ItemKind::Pin { reference, pin } => Some(NetPin {
                reference: reference.clone(),
                pin: pin.clone(),
                position: items[i].points[0],
            }),
            _ => None,
        })
        .collect();
    if pins.is_empty() {
        return None;
    }
    pins.sort_by(|a, b| {
        compare_designators(&a.reference, &b.reference).then_with(|| compare_designators(&a.pin, &b.pin))
    });

    let mut labels = BTreeSet::new();
    let mut powers = BTreeSet::new();
    for &i in members {
        match items[i].explicit_name() {
            Some((name, NameSource::Label)) => {
                labels.insert(name);
            }
            Some((name, _)) => {
                powers.insert(name);
            }
            None => {}
        }
    }

    let (name, source) = if let Some(label) = labels.first() {
        ((*label).to_string(), NameSource::Label)
    } else if let Some(power) = powers.first() {
        ((*power).to_string(), NameSource::Power)
    } else {
        (
            format!("Net-({}-{})", pins[0].reference, pins[0].pin),
            NameSource::Synthesized,
        )
    };
    let aliases = labels
        .union(&powers)
        .filter(|n| **n != name.as_str())
        .map(|n| (*n).to_string())
        .collect();

    Some(Net {
        name,
        source,
        pins,
        item_count: members.len(),
        aliases,
    })
}

/// Resolves every net in the schematic.
///
/// The result is deterministic: nets are sorted by name and pins by
/// designator order, independent of document order.
#[must_use]
pub fn resolve_nets(sch: &Schematic) -> Netlist {
    let items = collect_items(sch);
    let mut sets = connect(&items);

    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..items.len() {
        groups.entry(sets.find(i)).or_default().push(i);
    }

    let mut netlist = Netlist::default();
    for members in groups.values() {
        if let Some(net) = build_net(&items, members) {
            netlist.nets.push(net);
            continue;
        }
        for &i in members {
            if let ItemKind::Power { reference, value } = &items[i].kind {
                netlist.isolated_power.push(IsolatedPower {
                    reference: reference.clone(),
                    value: value.clone().unwrap_or_else(|| POWER_FLAG_VALUE.to_string()),
                    position: items[i].points[0],
                });
            }
        }
    }
    netlist.nets.sort_by(|a, b| a.name.cmp(&b.name));
    netlist
        .isolated_power
        .sort_by(|a, b| compare_designators(&a.reference, &b.reference));
    debug!(
        items = items.len(),
        nets = netlist.nets.len(),
        isolated_power = netlist.isolated_power.len(),
        "Resolved connectivity"
    );
    netlist
}

/// Net containing pin `pin` of `reference`.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if the symbol or pin does not exist.
pub fn pin_net(sch: &Schematic, reference: &str, pin: &str) -> KicadResult<Net> {
    resolve_nets(sch)
        .net_of_pin(reference, pin)
        .cloned()
        .ok_or_else(|| KicadError::not_found("pin", format!("{reference}.{pin}")))
}

/// Component pins on the net named (or aliased) `name`.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if no net has that name.
pub fn net_pins(sch: &Schematic, name: &str) -> KicadResult<Vec<NetPin>> {
    resolve_nets(sch)
        .net(name)
        .map(|n| n.pins.clone())
        .ok_or_else(|| KicadError::not_found("net", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = r#"  (lib_symbols
    (symbol "Device:R"
      (symbol "Device:R_1_1"
        (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
        (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2"))
      )
    )
    (symbol "power:GND" (power)
      (symbol "power:GND_0_1"
        (pin power_in line (at 0 0 270) (length 0) (name "GND") (number "1"))
      )
    )
  )
"#;

    fn schematic(body: &str) -> Schematic {
        Schematic::from_text(&format!("(kicad_sch\n{LIB}{body})\n")).unwrap()
    }

    fn resistor(reference: &str, x: f64, y: f64) -> String {
        format!(
            "  (symbol (lib_id \"Device:R\") (at {x} {y} 0) (unit 1)\n    (property \"Reference\" \"{reference}\")\n    (property \"Value\" \"10k\")\n  )\n"
        )
    }

    #[test]
    fn wire_and_label_make_one_named_net() {
        let body = format!(
            "{}{}  (wire (pts (xy 100 48.73) (xy 100 40)))\n  (label \"VCC\" (at 100 44.45 0))\n  (label \"VCC\" (at 100 40 0))\n",
            resistor("R1", 100.0, 52.54),
            resistor("R2", 100.0, 36.19)
        );
        let sch = schematic(&body);
        let nets = resolve_nets(&sch);
        let vcc = nets.net("VCC").unwrap();
        assert_eq!(vcc.source, NameSource::Label);
        let pins: Vec<(&str, &str)> = vcc.pins.iter().map(|p| (p.reference.as_str(), p.pin.as_str())).collect();
        assert_eq!(pins, vec![("R1", "1"), ("R2", "2")]);
        assert!(!vcc.is_ambiguous());
    }

    #[test]
    fn unconnected_pins_get_synthesized_names() {
        let sch = schematic(&format!("{}{}", resistor("R10", 0.0, 0.0), resistor("R2", 50.0, 0.0)));
        let nets = resolve_nets(&sch);
        assert_eq!(nets.nets.len(), 4);
        let net = pin_net(&sch, "R10", "1").unwrap();
        assert_eq!(net.name, "Net-(R10-1)");
        assert_eq!(net.source, NameSource::Synthesized);
        assert_eq!(net.item_count, 1);
    }

    #[test]
    fn synthesized_name_uses_designator_order() {
        // R2 pin 1 at (50, -3.81), R10 pin 2 at (50, -3.81) after placement
        let body = format!(
            "{}{}  (wire (pts (xy 50 -3.81) (xy 50 -3.81)))\n",
            resistor("R10", 50.0, -7.62),
            resistor("R2", 50.0, 0.0)
        );
        let sch = schematic(&body);
        let net = pin_net(&sch, "R10", "2").unwrap();
        assert_eq!(net.name, "Net-(R2-1)");
        assert_eq!(net.pins.len(), 2);
    }

    #[test]
    fn same_label_joins_separate_groups() {
        let body = format!(
            "{}{}  (label \"SDA\" (at 0 -3.81 0))\n  (global_label \"SDA\" (shape input) (at 80 -3.81 0))\n",
            resistor("R1", 0.0, 0.0),
            resistor("R2", 80.0, 0.0)
        );
        let sch = schematic(&body);
        let pins = net_pins(&sch, "SDA").unwrap();
        assert_eq!(pins.len(), 2);
    }

    #[test]
    fn power_symbols_name_nets_and_conflicts_are_aliases() {
        let body = format!(
            "{}  (symbol (lib_id \"power:GND\") (at 0 3.81 0) (unit 1)\n    (property \"Reference\" \"#PWR01\")\n    (property \"Value\" \"GND\")\n  )\n  (label \"AGND\" (at 0 3.81 0))\n",
            resistor("R1", 0.0, 0.0)
        );
        let sch = schematic(&body);
        let net = pin_net(&sch, "R1", "2").unwrap();
        assert_eq!(net.name, "AGND");
        assert_eq!(net.aliases, vec!["GND".to_string()]);
        assert!(net.is_ambiguous());
        assert_eq!(net_pins(&sch, "GND").unwrap().len(), 1);
    }

    #[test]
    fn power_without_pins_is_isolated() {
        let body = "  (symbol (lib_id \"power:GND\") (at 30 30 0) (unit 1)\n    (property \"Reference\" \"#PWR02\")\n    (property \"Value\" \"GND\")\n  )\n";
        let nets = resolve_nets(&schematic(body));
        assert!(nets.nets.is_empty());
        assert_eq!(nets.isolated_power.len(), 1);
        assert_eq!(nets.isolated_power[0].value, "GND");
    }

    #[test]
    fn wires_do_not_connect_mid_span() {
        // wire passes through R1 pin 1 at (0, -3.81) without ending there
        let body = format!("{}  (wire (pts (xy -10 -3.81) (xy 10 -3.81)))\n", resistor("R1", 0.0, 0.0));
        let net = pin_net(&schematic(&body), "R1", "1").unwrap();
        assert_eq!(net.item_count, 1);
    }

    #[test]
    fn lookups_report_not_found() {
        let sch = schematic(&resistor("R1", 0.0, 0.0));
        assert!(pin_net(&sch, "R1", "3").unwrap_err().is_not_found());
        assert!(pin_net(&sch, "R9", "1").unwrap_err().is_not_found());
        assert!(net_pins(&sch, "VCC").unwrap_err().is_not_found());
    }

    #[test]
    fn epsilon_tolerates_rounding() {
        let body = format!("{}  (label \"X\" (at 0.004 -3.806 0))\n", resistor("R1", 0.0, 0.0));
        assert_eq!(net_pins(&schematic(&body), "X").unwrap().len(), 1);
    }

    #[test]
    fn near_points_do_not_chain() {
        // pins 0.016 apart with a junction between them, each pin within epsilon of it
        let body = format!(
            "{}{}  (junction (at 0.008 -3.81) (diameter 0))\n",
            resistor("R1", 0.0, 0.0),
            resistor("R2", 0.016, 0.0)
        );
        let sch = schematic(&body);
        let r1 = pin_net(&sch, "R1", "1").unwrap();
        assert_eq!(r1.pins.len(), 1);
        assert_eq!(r1.item_count, 2);
        let r2 = pin_net(&sch, "R2", "1").unwrap();
        assert_eq!(r2.name, "Net-(R2-1)");
        assert_eq!(r2.item_count, 1);
    }

    #[test]
    fn resolution_is_deterministic() {
        let a = format!("{}{}", resistor("R1", 0.0, 0.0), resistor("R2", 0.0, 7.62));
        let b = format!("{}{}", resistor("R2", 0.0, 7.62), resistor("R1", 0.0, 0.0));
        let names = |s: &str| -> Vec<String> {
            resolve_nets(&schematic(s)).nets.into_iter().map(|n| n.name).collect()
        };
        assert_eq!(names(&a), names(&b));
    }
}
