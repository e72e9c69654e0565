//! Schematic (`.kicad_sch`) views, edits and analysis.
//!
//! [`Schematic`] is a read-only typed view built from a parsed document. Edits
//! live in [`edit`] and work on raw text. Connectivity, validation and the
//! sheet tree are derived from a fresh view on every call.

pub mod connectivity;
pub mod edit;
pub mod hierarchy;
pub mod validate;

pub use connectivity::{net_pins, pin_net, resolve_nets, NameSource, Net, NetPin, Netlist};
pub use hierarchy::{sheet_hierarchy, SheetNode};
pub use validate::{validate, Finding, FindingKind, Severity, ValidationReport};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use super::document::read_document;
use super::error::{KicadError, KicadResult};
use super::geometry::{Placement, Point};
use super::ident::compare_designators;
use super::library::{resolve_symbol, LibSymbol, LibrarySet};
use super::sexpr::find::wire_endpoints;
use super::sexpr::{parse, Node};

/// A placed symbol instance.
#[derive(Debug, Clone, Serialize)]
pub struct SchematicSymbol {
    /// Qualified library id.
    pub lib_id: String,
    /// Reference designator.
    pub reference: String,
    /// `Value` property.
    pub value: String,
    /// `Footprint` property (may be empty).
    pub footprint: String,
    /// Every property in document order.
    pub properties: IndexMap<String, String>,
    /// Position, rotation and mirror.
    pub placement: Placement,
    /// Unit number (1-based).
    pub unit: u32,
    /// Included in the bill of materials.
    pub in_bom: bool,
    /// Expected to have a board footprint.
    pub on_board: bool,
    /// Marked do-not-populate.
    pub dnp: bool,
    /// Instance uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Power or flag symbol.
    pub is_power: bool,
}

/// Kind of a net label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// `(label …)`, local to the sheet.
    Local,
    /// `(global_label …)`.
    Global,
    /// `(hierarchical_label …)`, connects to the parent sheet pin.
    Hierarchical,
}

impl LabelKind {
    /// The S-expression tag for this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Local => "label",
            Self::Global => "global_label",
            Self::Hierarchical => "hierarchical_label",
        }
    }

    /// Kind for a tag, if it is a label tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "label" => Some(Self::Local),
            "global_label" => Some(Self::Global),
            "hierarchical_label" => Some(Self::Hierarchical),
            _ => None,
        }
    }
}

/// A net label.
#[derive(Debug, Clone, Serialize)]
pub struct Label {
    /// Label kind.
    pub kind: LabelKind,
    /// Net name.
    pub text: String,
    /// Anchor point.
    pub position: Point,
    /// Text angle.
    pub angle: f64,
}

/// A wire segment.
#[derive(Debug, Clone, Serialize)]
pub struct Wire {
    /// First endpoint.
    pub start: Point,
    /// Second endpoint.
    pub end: Point,
    /// Wire uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// A positioned marker: `no_connect` or `junction`.
#[derive(Debug, Clone, Serialize)]
pub struct Marker {
    /// Marker position.
    pub position: Point,
    /// Marker uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// A pin on a hierarchical sheet box.
#[derive(Debug, Clone, Serialize)]
pub struct SheetPin {
    /// Pin name (matches a hierarchical label in the child sheet).
    pub name: String,
    /// `input`, `output`, `bidirectional`, `tri_state` or `passive`.
    pub direction: String,
    /// Pin position.
    pub position: Point,
}

/// A hierarchical sheet reference.
#[derive(Debug, Clone, Serialize)]
pub struct Sheet {
    /// Sheet name.
    pub name: String,
    /// Child schematic file, relative to this schematic.
    pub file: String,
    /// Top-left corner.
    pub position: Point,
    /// Width and height.
    pub size: (f64, f64),
    /// Sheet uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Sheet pins.
    pub pins: Vec<SheetPin>,
}

/// A library pin placed in document space.
#[derive(Debug, Clone, Serialize)]
pub struct PlacedPin {
    /// Owning reference designator.
    pub reference: String,
    /// Pin number.
    pub number: String,
    /// Pin name.
    pub name: String,
    /// Electrical type.
    pub electrical_type: String,
    /// Document-space connection point.
    pub position: Point,
    /// Instance unit.
    pub unit: u32,
}

/// Typed view of a schematic document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schematic {
    /// File the view was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// File format version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Root uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Title block title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Placed symbols in document order.
    pub symbols: Vec<SchematicSymbol>,
    /// Wires.
    pub wires: Vec<Wire>,
    /// Labels of every kind.
    pub labels: Vec<Label>,
    /// No-connect markers.
    pub no_connects: Vec<Marker>,
    /// Junctions.
    pub junctions: Vec<Marker>,
    /// Hierarchical sheets.
    pub sheets: Vec<Sheet>,
    /// Cached library definitions keyed by qualified id.
    #[serde(skip)]
    pub lib_symbols: IndexMap<String, LibSymbol>,
}

fn uuid_of(node: &Node) -> Option<String> {
    node.child("uuid").and_then(|u| u.arg_text(0))
}

fn marker(node: &Node) -> Option<Marker> {
    Some(Marker {
        position: node.child("at").and_then(Point::from_node)?,
        uuid: uuid_of(node),
    })
}

fn unit_of(node: &Node) -> u32 {
    node.child("unit")
        .and_then(|u| u.arg(0))
        .and_then(Node::as_i64)
        .and_then(|u| u32::try_from(u).ok())
        .unwrap_or(1)
}

fn sheet(node: &Node) -> Option<Sheet> {
    let name = node
        .property("Sheetname")
        .or_else(|| node.property("Sheet name"))
        .unwrap_or_default();
    let file = node
        .property("Sheetfile")
        .or_else(|| node.property("Sheet file"))?;
    let size = node
        .child("size")
        .and_then(|s| Some((s.arg_f64(0)?, s.arg_f64(1)?)))
        .unwrap_or((0.0, 0.0));
    let pins = node
        .children("pin")
        .filter_map(|p| {
            Some(SheetPin {
                name: p.arg_str(0)?.to_string(),
                direction: p.arg_str(1).unwrap_or("passive").to_string(),
                position: p.child("at").and_then(Point::from_node)?,
            })
        })
        .collect();
    Some(Sheet {
        name: name.to_string(),
        file: file.to_string(),
        position: node.child("at").and_then(Point::from_node).unwrap_or_default(),
        size,
        uuid: uuid_of(node),
        pins,
    })
}

impl Schematic {
    /// Reads and parses a schematic file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a schematic.
    pub fn open(path: impl AsRef<Path>) -> KicadResult<Self> {
        let path = path.as_ref();
        let mut sch = Self::from_text(&read_document(path)?)?;
        sch.path = Some(path.to_path_buf());
        Ok(sch)
    }

    /// Parses schematic text.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::MalformedDocument`] if the text does not parse or
    /// has no `kicad_sch` root.
    pub fn from_text(text: &str) -> KicadResult<Self> {
        let root = parse(text)?;
        let sch = root
            .items()
            .iter()
            .find(|n| n.is("kicad_sch"))
            .ok_or_else(|| KicadError::malformed(0, "missing kicad_sch root"))?;
        Ok(Self::from_node(sch))
    }

    /// Builds the view from a `(kicad_sch …)` node.
    #[must_use]
    pub fn from_node(root: &Node) -> Self {
        let lib_symbols: IndexMap<String, LibSymbol> = root
            .child("lib_symbols")
            .map(|cache| {
                cache
                    .children("symbol")
                    .filter_map(LibSymbol::from_node)
                    .map(|s| (s.name.clone(), s))
                    .collect()
            })
            .unwrap_or_default();

        let mut sch = Self {
            version: root.child("version").and_then(|v| v.arg(0)).and_then(Node::as_i64),
            uuid: uuid_of(root),
            title: root
                .child("title_block")
                .and_then(|t| t.child_str("title"))
                .map(str::to_string),
            lib_symbols,
            ..Self::default()
        };

        for node in root.items() {
            match node.head() {
                Some("symbol") => {
                    if let Some(sym) = sch.placed_symbol(node) {
                        sch.symbols.push(sym);
                    }
                }
                Some("wire") => {
                    if let Some((start, end)) = wire_endpoints(node) {
                        sch.wires.push(Wire {
                            start,
                            end,
                            uuid: uuid_of(node),
                        });
                    }
                }
                Some("no_connect") => sch.no_connects.extend(marker(node)),
                Some("junction") => sch.junctions.extend(marker(node)),
                Some("sheet") => sch.sheets.extend(sheet(node)),
                Some(tag) => {
                    if let Some(kind) = LabelKind::from_tag(tag) {
                        if let Some(label) = label(node, kind) {
                            sch.labels.push(label);
                        }
                    }
                }
                None => {}
            }
        }
        debug!(
            symbols = sch.symbols.len(),
            wires = sch.wires.len(),
            labels = sch.labels.len(),
            "Parsed schematic"
        );
        sch
    }

    fn placed_symbol(&self, node: &Node) -> Option<SchematicSymbol> {
        let lib_id = node.child_str("lib_id")?.to_string();
        let reference = node.property("Reference").unwrap_or_default().to_string();
        let cached_power = self.lib_symbols.get(&lib_id).is_some_and(|s| s.is_power);
        Some(SchematicSymbol {
            is_power: cached_power || lib_id.starts_with("power:") || reference.starts_with('#'),
            value: node.property("Value").unwrap_or_default().to_string(),
            footprint: node.property("Footprint").unwrap_or_default().to_string(),
            properties: node
                .properties()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            placement: Placement::from_node(node).unwrap_or_default(),
            unit: unit_of(node),
            in_bom: node.child_flag("in_bom").unwrap_or(true),
            on_board: node.child_flag("on_board").unwrap_or(true),
            dnp: node.child_flag("dnp").unwrap_or(false),
            uuid: uuid_of(node),
            lib_id,
            reference,
        })
    }

    /// First instance with the given reference.
    #[must_use]
    pub fn symbol(&self, reference: &str) -> Option<&SchematicSymbol> {
        self.symbols.iter().find(|s| s.reference == reference)
    }

    /// Definition for `lib_id` from the cache, `extends` chain folded in.
    #[must_use]
    pub fn definition(&self, lib_id: &str) -> Option<LibSymbol> {
        resolve_symbol(&self.lib_symbols, lib_id)
    }

    /// Loads definitions missing from the cache out of `libraries`, so that
    /// pins of uncached symbols still take part in connectivity.
    pub fn fill_missing_definitions(&mut self, libraries: &LibrarySet) {
        let missing: Vec<String> = self
            .symbols
            .iter()
            .map(|s| s.lib_id.clone())
            .filter(|id| !self.lib_symbols.contains_key(id))
            .collect();
        for lib_id in missing {
            if self.lib_symbols.contains_key(&lib_id) {
                continue;
            }
            match libraries.find_symbol(&lib_id) {
                Ok(Some(mut sym)) => {
                    debug!(lib_id = %lib_id, "Loaded uncached definition from library");
                    sym.name.clone_from(&lib_id);
                    self.lib_symbols.insert(lib_id, sym);
                }
                Ok(None) => debug!(lib_id = %lib_id, "No library defines symbol"),
                Err(e) => debug!(lib_id = %lib_id, error = %e, "Skipping unqualified lib id"),
            }
        }
        let powers: Vec<bool> = self
            .symbols
            .iter()
            .map(|s| s.is_power || self.lib_symbols.get(&s.lib_id).is_some_and(|d| d.is_power))
            .collect();
        for (sym, is_power) in self.symbols.iter_mut().zip(powers) {
            sym.is_power = is_power;
        }
    }

    /// Document-space pins of one instance, filtered to its unit.
    ///
    /// Returns an empty list when the definition is unknown.
    #[must_use]
    pub fn placed_pins(&self, symbol: &SchematicSymbol) -> Vec<PlacedPin> {
        let Some(def) = self.definition(&symbol.lib_id) else {
            debug!(lib_id = %symbol.lib_id, "No definition for placed symbol");
            return Vec::new();
        };
        let mut pins: Vec<PlacedPin> = def
            .pins_for_unit(symbol.unit)
            .map(|p| PlacedPin {
                reference: symbol.reference.clone(),
                number: p.number.clone(),
                name: p.name.clone(),
                electrical_type: p.electrical_type.clone(),
                position: symbol.placement.transform(p.position),
                unit: symbol.unit,
            })
            .collect();
        pins.sort_by(|a, b| compare_designators(&a.number, &b.number));
        pins
    }

    /// Document-space pins of every unit placed under `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::NotFound`] if no instance has that reference or
    /// its library definition is unknown.
    pub fn pin_positions(&self, reference: &str) -> KicadResult<Vec<PlacedPin>> {
        let instances: Vec<&SchematicSymbol> =
            self.symbols.iter().filter(|s| s.reference == reference).collect();
        let first = instances
            .first()
            .ok_or_else(|| KicadError::not_found("symbol", reference))?;
        if self.definition(&first.lib_id).is_none() {
            return Err(KicadError::not_found("library symbol", first.lib_id.clone()));
        }
        Ok(instances.into_iter().flat_map(|s| self.placed_pins(s)).collect())
    }
}

fn label(node: &Node, kind: LabelKind) -> Option<Label> {
    let at = node.child("at")?;
    Some(Label {
        kind,
        text: node.arg_str(0)?.to_string(),
        position: Point::from_node(at)?,
        angle: at.arg_f64(2).unwrap_or(0.0),
    })
}
