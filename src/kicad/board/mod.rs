//! Board (`.kicad_pcb`) view and edits.
//!
//! Footprint pads are stored relative to their footprint; [`Board`] reports
//! them in board coordinates by rotating with the footprint angle and adding
//! the footprint position.

pub mod edit;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use super::document::read_document;
use super::error::{KicadError, KicadResult};
use super::geometry::Point;
use super::sexpr::find::footprint_reference;
use super::sexpr::{parse, Node};

/// A board layer from the `(layers …)` table.
#[derive(Debug, Clone, Serialize)]
pub struct Layer {
    /// Layer ordinal.
    pub ordinal: i64,
    /// Canonical name, e.g. `F.Cu`.
    pub name: String,
    /// `signal`, `power`, `user`, …
    pub kind: String,
}

/// A top-level `(net N "name")` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardNet {
    /// Net number.
    pub id: i64,
    /// Net name (empty for net 0).
    pub name: String,
}

/// A footprint pad in board coordinates.
#[derive(Debug, Clone, Serialize)]
pub struct Pad {
    /// Pad number (may be empty for mechanical pads).
    pub number: String,
    /// `smd`, `thru_hole`, `np_thru_hole` or `connect`.
    pub kind: String,
    /// `rect`, `roundrect`, `circle`, …
    pub shape: String,
    /// Board position.
    pub position: Point,
    /// Width and height.
    pub size: (f64, f64),
    /// Assigned net name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
}

/// A placed footprint.
#[derive(Debug, Clone, Serialize)]
pub struct Footprint {
    /// Library id, e.g. `Resistor_SMD:R_0603_1608Metric`.
    pub lib_id: String,
    /// Reference designator.
    pub reference: String,
    /// Value text.
    pub value: String,
    /// Board position.
    pub position: Point,
    /// Rotation in degrees.
    pub rotation: f64,
    /// Placement layer.
    pub layer: String,
    /// Footprint uuid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Pads.
    pub pads: Vec<Pad>,
}

impl Footprint {
    /// Pad with the given number.
    #[must_use]
    pub fn pad(&self, number: &str) -> Option<&Pad> {
        self.pads.iter().find(|p| p.number == number)
    }
}

/// A copper track segment.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Start point.
    pub start: Point,
    /// End point.
    pub end: Point,
    /// Track width.
    pub width: f64,
    /// Copper layer.
    pub layer: String,
    /// Net number.
    pub net: i64,
}

/// A via.
#[derive(Debug, Clone, Serialize)]
pub struct Via {
    /// Position.
    pub position: Point,
    /// Pad diameter.
    pub size: f64,
    /// Drill diameter.
    pub drill: f64,
    /// Layers the via spans.
    pub layers: Vec<String>,
    /// Net number.
    pub net: i64,
}

/// One `(setup …)` entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SetupValue {
    /// A single numeric argument, e.g. `(pad_to_mask_clearance 0.05)`.
    Number(f64),
    /// A single word or string, e.g. `(allow_soldermask_bridges_in_footprints no)`.
    Text(String),
    /// Several numeric arguments, e.g. `(grid_origin 10 20)`.
    Numbers(Vec<f64>),
}

impl SetupValue {
    /// The value if it is a single number.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    fn from_args(args: &[Node]) -> Option<Self> {
        match args {
            [single] => match single.as_f64() {
                Some(v) => Some(Self::Number(v)),
                None => single.as_text().map(Self::Text),
            },
            [_, _, ..] => args
                .iter()
                .map(Node::as_f64)
                .collect::<Option<Vec<_>>>()
                .map(Self::Numbers),
            [] => None,
        }
    }
}

/// Typed view of a board document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Board {
    /// File the view was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// File format version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    /// Title block title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Title block revision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Paper size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper: Option<String>,
    /// Layer table.
    pub layers: Vec<Layer>,
    /// Net table.
    pub nets: Vec<BoardNet>,
    /// Footprints in document order.
    pub footprints: Vec<Footprint>,
    /// Track segments.
    pub segments: Vec<Segment>,
    /// Vias.
    pub vias: Vec<Via>,
    /// Board setup values by tag, in file order. Plot parameters, the layer
    /// stackup and other nested entries are not included.
    pub design_rules: IndexMap<String, SetupValue>,
}

fn net_name(node: &Node) -> Option<String> {
    // (net 3 "GND") before KiCad 9, (net "GND") after
    match node.arg(0)? {
        Node::Int(_) => node.arg_text(1),
        other => other.as_text(),
    }
}

fn net_id(node: &Node) -> i64 {
    node.child("net")
        .and_then(|n| n.arg(0))
        .and_then(Node::as_i64)
        .unwrap_or(0)
}

fn pad(node: &Node, origin: Point, rotation: f64) -> Option<Pad> {
    let local = node.child("at").and_then(Point::from_node)?;
    let position = local.rotated(rotation);
    Some(Pad {
        number: node.arg_text(0).unwrap_or_default(),
        kind: node.arg_str(1).unwrap_or_default().to_string(),
        shape: node.arg_str(2).unwrap_or_default().to_string(),
        position: position.offset(origin.x, origin.y),
        size: node
            .child("size")
            .and_then(|s| Some((s.arg_f64(0)?, s.arg_f64(1)?)))
            .unwrap_or((0.0, 0.0)),
        net: node.child("net").and_then(net_name),
    })
}

fn footprint(node: &Node) -> Option<Footprint> {
    let at = node.child("at");
    let position = at.and_then(Point::from_node).unwrap_or_default();
    let rotation = at.and_then(|a| a.arg_f64(2)).unwrap_or(0.0);
    let value = node.property("Value").map(str::to_string).or_else(|| {
        node.children("fp_text")
            .find(|t| t.arg_str(0) == Some("value"))
            .and_then(|t| t.arg_text(1))
    });
    Some(Footprint {
        lib_id: node.arg_text(0)?,
        reference: footprint_reference(node).unwrap_or_default().to_string(),
        value: value.unwrap_or_default(),
        position,
        rotation,
        layer: node.child_str("layer").unwrap_or_default().to_string(),
        uuid: node
            .child("uuid")
            .or_else(|| node.child("tstamp"))
            .and_then(|u| u.arg_text(0)),
        pads: node
            .children("pad")
            .filter_map(|p| pad(p, position, rotation))
            .collect(),
    })
}

fn design_rules(setup: &Node) -> IndexMap<String, SetupValue> {
    setup
        .args()
        .iter()
        .filter(|entry| !entry.is("pcbplotparams"))
        .filter_map(|entry| {
            let tag = entry.head()?;
            let value = SetupValue::from_args(entry.args())?;
            Some((tag.to_string(), value))
        })
        .collect()
}

impl Board {
    /// Reads and parses a board file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a board.
    pub fn open(path: impl AsRef<Path>) -> KicadResult<Self> {
        let path = path.as_ref();
        let mut board = Self::from_text(&read_document(path)?)?;
        board.path = Some(path.to_path_buf());
        Ok(board)
    }

    /// Parses board text.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::MalformedDocument`] if the text does not parse or
    /// has no `kicad_pcb` root.
    pub fn from_text(text: &str) -> KicadResult<Self> {
        let root = parse(text)?;
        let pcb = root
            .items()
            .iter()
            .find(|n| n.is("kicad_pcb"))
            .ok_or_else(|| KicadError::malformed(0, "missing kicad_pcb root"))?;
        Ok(Self::from_node(pcb))
    }

    /// Builds the view from a `(kicad_pcb …)` node.
    #[must_use]
    pub fn from_node(root: &Node) -> Self {
        let title_block = root.child("title_block");
        let mut board = Self {
            version: root.child("version").and_then(|v| v.arg(0)).and_then(Node::as_i64),
            title: title_block.and_then(|t| t.child_str("title")).map(str::to_string),
            revision: title_block.and_then(|t| t.child_str("rev")).map(str::to_string),
            paper: root.child_str("paper").map(str::to_string),
            ..Self::default()
        };

        for node in root.items() {
            match node.head() {
                Some("layers") => {
                    board.layers = node
                        .args()
                        .iter()
                        .filter_map(|l| {
                            Some(Layer {
                                ordinal: l.items().first().and_then(Node::as_i64)?,
                                name: l.arg_text(0)?,
                                kind: l.arg_str(1).unwrap_or_default().to_string(),
                            })
                        })
                        .collect();
                }
                Some("net") => {
                    if let Some(id) = node.arg(0).and_then(Node::as_i64) {
                        board.nets.push(BoardNet {
                            id,
                            name: node.arg_text(1).unwrap_or_default(),
                        });
                    }
                }
                Some("setup") => board.design_rules = design_rules(node),
                Some("footprint" | "module") => board.footprints.extend(footprint(node)),
                Some("segment") => {
                    let start = node.child("start").and_then(Point::from_node);
                    let end = node.child("end").and_then(Point::from_node);
                    if let (Some(start), Some(end)) = (start, end) {
                        board.segments.push(Segment {
                            start,
                            end,
                            width: node.child_f64("width").unwrap_or(0.0),
                            layer: node.child_str("layer").unwrap_or_default().to_string(),
                            net: net_id(node),
                        });
                    }
                }
                Some("via") => {
                    if let Some(position) = node.child("at").and_then(Point::from_node) {
                        board.vias.push(Via {
                            position,
                            size: node.child_f64("size").unwrap_or(0.0),
                            drill: node.child_f64("drill").unwrap_or(0.0),
                            layers: node
                                .child("layers")
                                .map(|l| l.args().iter().filter_map(Node::as_text).collect())
                                .unwrap_or_default(),
                            net: net_id(node),
                        });
                    }
                }
                _ => {}
            }
        }
        debug!(
            footprints = board.footprints.len(),
            nets = board.nets.len(),
            segments = board.segments.len(),
            "Parsed board"
        );
        board
    }

    /// Footprint with the given reference.
    #[must_use]
    pub fn footprint(&self, reference: &str) -> Option<&Footprint> {
        self.footprints.iter().find(|f| f.reference == reference)
    }

    /// Name of net `id`.
    #[must_use]
    pub fn net_name(&self, id: i64) -> Option<&str> {
        self.nets.iter().find(|n| n.id == id).map(|n| n.name.as_str())
    }

    /// Setup value `tag`, if present.
    #[must_use]
    pub fn design_rule(&self, tag: &str) -> Option<&SetupValue> {
        self.design_rules.get(tag)
    }
}
