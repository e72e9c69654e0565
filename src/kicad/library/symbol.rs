//! Symbol definitions as stored in `.kicad_sym` files and schematic caches.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

use crate::kicad::geometry::Point;
use crate::kicad::sexpr::Node;

/// Maximum `extends` chain length followed when resolving derived symbols.
pub const MAX_EXTENDS_DEPTH: usize = 5;

/// A pin in a symbol definition, in library-local coordinates (Y up).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibPin {
    /// Pin number (text; may be alphanumeric such as `A1`).
    pub number: String,
    /// Pin name (`~` when unnamed).
    pub name: String,
    /// Electrical type: `input`, `output`, `passive`, `power_in`, …
    pub electrical_type: String,
    /// Graphic shape: `line`, `inverted`, `clock`, …
    pub shape: String,
    /// Connection point.
    pub position: Point,
    /// Pin orientation in degrees.
    pub angle: f64,
    /// Pin length.
    pub length: f64,
    /// Unit this pin belongs to (0 = common to all units).
    pub unit: u32,
    /// Body style (0 = common, 1 = normal, 2 = De Morgan alternate).
    pub body_style: u32,
    /// Hidden pins still connect (e.g. implicit power pins).
    pub hidden: bool,
}

impl LibPin {
    fn from_node(node: &Node, unit: u32, body_style: u32) -> Option<Self> {
        let at = node.child("at")?;
        let hidden = node.args().iter().any(|a| a.as_str() == Some("hide"))
            || node.child_flag("hide") == Some(true);
        Some(Self {
            number: node.child("number").and_then(|n| n.arg_text(0)).unwrap_or_default(),
            name: node.child("name").and_then(|n| n.arg_text(0)).unwrap_or_default(),
            electrical_type: node.arg_str(0).unwrap_or("unspecified").to_string(),
            shape: node.arg_str(1).unwrap_or("line").to_string(),
            position: Point::from_node(at)?,
            angle: at.arg_f64(2).unwrap_or(0.0),
            length: node.child_f64("length").unwrap_or(0.0),
            unit,
            body_style,
            hidden,
        })
    }
}

/// A symbol definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibSymbol {
    /// Symbol name (`R` in a library, `Device:R` in a schematic cache).
    pub name: String,
    /// Parent symbol this one derives from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Properties in document order.
    pub properties: IndexMap<String, String>,
    /// Pins from the symbol and all of its unit sub-symbols.
    pub pins: Vec<LibPin>,
    /// Marked with `(power)`.
    pub is_power: bool,
    /// Number of units (highest unit number seen, at least 1).
    pub unit_count: u32,
}

/// Splits a sub-symbol name `<name>_<unit>_<style>` into unit and body style.
#[must_use]
pub fn sub_symbol_unit(name: &str) -> Option<(u32, u32)> {
    let mut parts = name.rsplitn(3, '_');
    let style = parts.next()?.parse().ok()?;
    let unit = parts.next()?.parse().ok()?;
    parts.next()?;
    Some((unit, style))
}

impl LibSymbol {
    /// Builds a definition from a top-level `(symbol "name" …)` node.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        if !node.is("symbol") {
            return None;
        }
        let name = node.arg_str(0)?.to_string();
        let mut pins: Vec<LibPin> = node
            .children("pin")
            .filter_map(|p| LibPin::from_node(p, 0, 0))
            .collect();
        for sub in node.children("symbol") {
            let sub_name = sub.arg_str(0).unwrap_or_default();
            let (unit, style) = sub_symbol_unit(sub_name).unwrap_or((0, 0));
            pins.extend(sub.children("pin").filter_map(|p| LibPin::from_node(p, unit, style)));
        }
        let unit_count = pins.iter().map(|p| p.unit).max().unwrap_or(0).max(1);

        Some(Self {
            extends: node.child_str("extends").map(str::to_string),
            properties: node
                .properties()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            is_power: node.child("power").is_some(),
            name,
            pins,
            unit_count,
        })
    }

    /// Property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// `ki_description` property.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.property("ki_description").or_else(|| self.property("Description"))
    }

    /// `ki_keywords` property.
    #[must_use]
    pub fn keywords(&self) -> Option<&str> {
        self.property("ki_keywords")
    }

    /// Footprint filter patterns from `ki_fp_filters`.
    #[must_use]
    pub fn footprint_filters(&self) -> Vec<&str> {
        self.property("ki_fp_filters")
            .map(|f| f.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Pins that belong to `unit` in the normal body style.
    ///
    /// Unit 0 pins are common to every unit; body style 0 is common to both
    /// styles.
    pub fn pins_for_unit(&self, unit: u32) -> impl Iterator<Item = &LibPin> {
        self.pins
            .iter()
            .filter(move |p| (p.unit == 0 || p.unit == unit) && p.body_style <= 1)
    }
}

/// Looks up `name` in `symbols` and folds in its `extends` ancestry.
///
/// A derived symbol inherits its parent's pins and any property it does not
/// set itself. Parents are looked up under the same library prefix as the
/// child first, then by their plain name. The chain stops after
/// [`MAX_EXTENDS_DEPTH`] levels or at a missing parent.
#[must_use]
pub fn resolve_symbol(symbols: &IndexMap<String, LibSymbol>, name: &str) -> Option<LibSymbol> {
    let mut resolved = symbols.get(name)?.clone();
    let prefix = name.split_once(':').map(|(lib, _)| lib);
    let mut next = resolved.extends.clone();
    let mut depth = 0;

    while let Some(parent_name) = next {
        if depth == MAX_EXTENDS_DEPTH {
            warn!(symbol = name, "extends chain too deep, stopping");
            break;
        }
        let qualified = prefix.map(|p| format!("{p}:{parent_name}"));
        let parent = qualified
            .as_deref()
            .and_then(|q| symbols.get(q))
            .or_else(|| symbols.get(&parent_name));
        let Some(parent) = parent else {
            warn!(symbol = name, parent = %parent_name, "Parent symbol not found");
            break;
        };
        if resolved.pins.is_empty() {
            resolved.pins.clone_from(&parent.pins);
            resolved.unit_count = parent.unit_count;
        }
        for (key, value) in &parent.properties {
            resolved
                .properties
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        resolved.is_power |= parent.is_power;
        next = parent.extends.clone();
        depth += 1;
    }
    Some(resolved)
}
