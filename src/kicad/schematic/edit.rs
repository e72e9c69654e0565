//! Schematic mutations.
//!
//! Every function takes the current document text and returns the new text;
//! nothing here touches the filesystem. Use
//! [`modify_document`](crate::kicad::document::modify_document) to apply one
//! to a file, which writes only when the edit succeeds.
//!
//! New top-level items go just before `(sheet_instances …)` when the document
//! has one, so they land after existing items of the same kind.

use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, info};

use super::{LabelKind, Schematic};
use crate::kicad::edit::{
    append_child, apply_edits, format_coord, insert_at, insert_before_end, new_uuid, next_number,
    refresh_uuid, remove_block, replace_span, shift_positions,
};
use crate::kicad::error::{KicadError, KicadResult};
use crate::kicad::geometry::{Mirror, Placement, Point, Rotation};
use crate::kicad::ident::{LibId, Reference};
use crate::kicad::library::cache::{ensure_cached, CacheStatus};
use crate::kicad::library::{line_indent, LibrarySet};
use crate::kicad::sexpr::find::{
    arg_token, find_blocks, find_blocks_at_depth, find_marker_by_position,
    find_symbol_by_reference, find_symbols_by_reference, find_wire_by_endpoints, value_token,
};
use crate::kicad::sexpr::{child_blocks, list_head, parse_block, quote, Span};

/// File format version written into new schematics.
pub const SCHEMATIC_VERSION: u32 = 20_231_120;

const FONT: &str = "(effects (font (size 1.27 1.27)))";
const FONT_HIDDEN: &str = "(effects (font (size 1.27 1.27)) hide)";

fn power_reference_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"#PWR(\d+)").unwrap_or_else(|e| unreachable!("power reference pattern is valid: {e}"))
    })
}

/// Text of a new, empty schematic.
#[must_use]
pub fn create_schematic(title: Option<&str>, revision: Option<&str>) -> String {
    let mut out = format!(
        "(kicad_sch\n  (version {SCHEMATIC_VERSION})\n  (generator {})\n  (generator_version {})\n  (uuid {})\n  (paper \"A4\")\n",
        quote(env!("CARGO_PKG_NAME")),
        quote(env!("CARGO_PKG_VERSION")),
        quote(&new_uuid()),
    );
    if title.is_some() || revision.is_some() {
        out.push_str("  (title_block\n");
        if let Some(title) = title {
            out.push_str(&format!("    (title {})\n", quote(title)));
        }
        if let Some(revision) = revision {
            out.push_str(&format!("    (rev {})\n", quote(revision)));
        }
        out.push_str("  )\n");
    }
    out.push_str("  (lib_symbols\n  )\n  (sheet_instances\n    (path \"/\" (page \"1\"))\n  )\n)\n");
    out
}

/// Parameters for [`add_component`].
#[derive(Debug, Clone)]
pub struct NewComponent {
    /// Qualified library id, e.g. `Device:R`.
    pub lib_id: String,
    /// Reference designator.
    pub reference: String,
    /// `Value` property.
    pub value: String,
    /// `Footprint` property.
    pub footprint: String,
    /// Position, rotation and mirror.
    pub placement: Placement,
    /// Unit to place (1-based).
    pub unit: u32,
    /// Extra properties, written hidden.
    pub properties: IndexMap<String, String>,
}

impl NewComponent {
    /// A unit-1 component at `position` with no rotation or footprint.
    #[must_use]
    pub fn new(
        lib_id: impl Into<String>,
        reference: impl Into<String>,
        value: impl Into<String>,
        position: Point,
    ) -> Self {
        Self {
            lib_id: lib_id.into(),
            reference: reference.into(),
            value: value.into(),
            footprint: String::new(),
            placement: Placement {
                position,
                ..Placement::default()
            },
            unit: 1,
            properties: IndexMap::new(),
        }
    }

    /// Sets the footprint.
    #[must_use]
    pub fn with_footprint(mut self, footprint: impl Into<String>) -> Self {
        self.footprint = footprint.into();
        self
    }

    /// Sets rotation and mirror.
    #[must_use]
    pub fn oriented(mut self, rotation: Rotation, mirror: Mirror) -> Self {
        self.placement.rotation = rotation;
        self.placement.mirror = mirror;
        self
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: u32) -> Self {
        self.unit = unit;
        self
    }

    /// Adds a hidden property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Result of placing a symbol.
#[derive(Debug, Clone)]
pub struct Placed {
    /// Document text after the edit.
    pub text: String,
    /// Reference of the new instance.
    pub reference: String,
    /// Uuid of the new instance.
    pub uuid: String,
    /// What happened to the library cache.
    pub cache: CacheStatus,
}

fn property_line(name: &str, value: &str, at: Point, hidden: bool) -> String {
    format!(
        "    (property {} {} (at {} {} 0)\n      {}\n    )\n",
        quote(name),
        quote(value),
        format_coord(at.x),
        format_coord(at.y),
        if hidden { FONT_HIDDEN } else { FONT }
    )
}

fn symbol_block(
    component: &NewComponent,
    hide_reference: bool,
    pins: &[String],
    sheet_uuid: &str,
    uuid: &str,
) -> String {
    let at = component.placement.position;
    let mut block = format!(
        "(symbol (lib_id {}) (at {} {} {})",
        quote(&component.lib_id),
        format_coord(at.x),
        format_coord(at.y),
        format_coord(component.placement.rotation.degrees())
    );
    if let Some(axis) = component.placement.mirror.token() {
        block.push_str(&format!(" (mirror {axis})"));
    }
    block.push_str(&format!(
        " (unit {})\n    (in_bom yes) (on_board yes) (dnp no)\n    (uuid {})\n",
        component.unit,
        quote(uuid)
    ));
    block.push_str(&property_line(
        "Reference",
        &component.reference,
        at.offset(0.0, -2.0),
        hide_reference,
    ));
    block.push_str(&property_line("Value", &component.value, at.offset(0.0, 2.0), false));
    block.push_str(&property_line("Footprint", &component.footprint, at.offset(0.0, 4.0), true));
    let mut y = 6.0;
    for (name, value) in &component.properties {
        block.push_str(&property_line(name, value, at.offset(0.0, y), true));
        y += 2.0;
    }
    for pin in pins {
        block.push_str(&format!("    (pin {} (uuid {}))\n", quote(pin), quote(&new_uuid())));
    }
    block.push_str(&format!(
        "    (instances\n      (project \"\"\n        (path {}\n          (reference {}) (unit {})\n        )\n      )\n    )\n  )",
        quote(&format!("/{sheet_uuid}")),
        quote(&component.reference),
        component.unit
    ));
    block
}

/// Inserts a top-level item before `sheet_instances`/`symbol_instances`, or
/// before the root's closing parenthesis when neither exists.
///
/// `block` is written at two-space indentation; its continuation lines must
/// already carry their own.
fn insert_item(text: &str, block: &str) -> KicadResult<String> {
    let anchor = ["sheet_instances", "symbol_instances"]
        .iter()
        .filter_map(|tag| find_blocks_at_depth(text, tag, 1).into_iter().next())
        .min_by_key(|span| span.start);
    let Some(anchor) = anchor else {
        return insert_before_end(text, &format!("  {block}"));
    };
    let indent = line_indent(text, anchor.start);
    let line_start = anchor.start - indent.len();
    if line_start == 0 || text[..line_start].ends_with('\n') {
        Ok(insert_at(text, line_start, &format!("  {block}\n")))
    } else {
        Ok(insert_at(text, anchor.start, &format!("{block} ")))
    }
}

fn place(
    text: &str,
    component: &NewComponent,
    hide_reference: bool,
    libraries: &LibrarySet,
) -> KicadResult<Placed> {
    let existing = Schematic::from_text(text)?;
    if existing
        .symbols
        .iter()
        .any(|s| s.reference == component.reference && s.unit == component.unit)
    {
        return Err(KicadError::already_exists("symbol", component.reference.clone()));
    }

    let cached = ensure_cached(text, &component.lib_id, libraries)?;
    let view = Schematic::from_text(&cached.text)?;
    let mut pins: Vec<String> = Vec::new();
    if let Some(def) = view.definition(&component.lib_id) {
        for pin in def.pins_for_unit(component.unit) {
            if !pins.contains(&pin.number) {
                pins.push(pin.number.clone());
            }
        }
    }

    let uuid = new_uuid();
    let sheet_uuid = view.uuid.clone().unwrap_or_default();
    let block = symbol_block(component, hide_reference, &pins, &sheet_uuid, &uuid);
    let text = insert_item(&cached.text, &block)?;
    info!(reference = %component.reference, lib_id = %component.lib_id, "Placed symbol");
    Ok(Placed {
        text,
        reference: component.reference.clone(),
        uuid,
        cache: cached.status,
    })
}

/// Places a component and makes sure its definition is cached.
///
/// # Errors
///
/// Returns [`KicadError::InvalidIdentifier`] for a malformed reference or lib
/// id, [`KicadError::AlreadyExists`] if the reference is already placed for
/// the same unit, and [`KicadError::MalformedDocument`] for unparseable text.
pub fn add_component(
    text: &str,
    component: &NewComponent,
    libraries: &LibrarySet,
) -> KicadResult<Placed> {
    Reference::parse(&component.reference)?;
    LibId::parse(&component.lib_id)?;
    if component.unit == 0 {
        return Err(KicadError::invalid_parameter("unit", "units are numbered from 1"));
    }
    place(text, component, false, libraries)
}

/// Places `power:<name>` at `position` under the next free `#PWRnnn`.
///
/// # Errors
///
/// Returns an error if `name` is empty or the document is malformed.
pub fn add_power_symbol(
    text: &str,
    name: &str,
    position: Point,
    libraries: &LibrarySet,
) -> KicadResult<Placed> {
    if name.trim().is_empty() {
        return Err(KicadError::invalid_parameter("name", "power symbol name is empty"));
    }
    let reference = format!("#PWR{:03}", next_number(text, power_reference_regex()));
    let component = NewComponent::new(format!("power:{name}"), reference, name, position);
    place(text, &component, true, libraries)
}

/// Adds a wire between two points.
///
/// # Errors
///
/// Returns [`KicadError::AlreadyExists`] if an identical wire exists.
pub fn add_wire(text: &str, start: Point, end: Point) -> KicadResult<String> {
    if find_wire_by_endpoints(text, start, end).is_some() {
        return Err(KicadError::already_exists("wire", format!("{start} to {end}")));
    }
    let block = format!(
        "(wire (pts (xy {} {}) (xy {} {}))\n    (stroke (width 0) (type default))\n    (uuid {})\n  )",
        format_coord(start.x),
        format_coord(start.y),
        format_coord(end.x),
        format_coord(end.y),
        quote(&new_uuid())
    );
    debug!(%start, %end, "Adding wire");
    insert_item(text, &block)
}

/// Adds a label of `kind` named `name`.
///
/// # Errors
///
/// Returns [`KicadError::InvalidParameter`] for an empty name.
pub fn add_label(
    text: &str,
    kind: LabelKind,
    name: &str,
    position: Point,
    angle: f64,
) -> KicadResult<String> {
    if name.is_empty() {
        return Err(KicadError::invalid_parameter("name", "label text is empty"));
    }
    let shape = match kind {
        LabelKind::Local => "",
        LabelKind::Global | LabelKind::Hierarchical => " (shape passive)",
    };
    let block = format!(
        "({} {}{shape} (at {} {} {})\n    {FONT}\n    (uuid {})\n  )",
        kind.tag(),
        quote(name),
        format_coord(position.x),
        format_coord(position.y),
        format_coord(angle),
        quote(&new_uuid())
    );
    insert_item(text, &block)
}

fn add_marker(text: &str, tag: &str, position: Point, extra: &str) -> KicadResult<String> {
    if find_marker_by_position(text, tag, position).is_some() {
        return Err(KicadError::already_exists(tag, position.to_string()));
    }
    let block = format!(
        "({tag} (at {} {}){extra} (uuid {}))",
        format_coord(position.x),
        format_coord(position.y),
        quote(&new_uuid())
    );
    insert_item(text, &block)
}

/// Marks a pin as intentionally unconnected.
///
/// # Errors
///
/// Returns [`KicadError::AlreadyExists`] if a marker is already there.
pub fn add_no_connect(text: &str, position: Point) -> KicadResult<String> {
    add_marker(text, "no_connect", position, "")
}

/// Adds a junction dot.
///
/// # Errors
///
/// Returns [`KicadError::AlreadyExists`] if a junction is already there.
pub fn add_junction(text: &str, position: Point) -> KicadResult<String> {
    add_marker(text, "junction", position, " (diameter 0) (color 0 0 0 0)")
}

fn symbol_span(text: &str, reference: &str) -> KicadResult<Span> {
    find_symbol_by_reference(text, reference).ok_or_else(|| KicadError::not_found("symbol", reference))
}

/// Moves a component so its anchor lands on `to`.
///
/// Every position inside the instance (property anchors included) shifts by
/// the same delta. With `rotation`, the instance angle is replaced. The
/// instance gets a fresh uuid.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if no instance has that reference.
pub fn move_component(
    text: &str,
    reference: &str,
    to: Point,
    rotation: Option<Rotation>,
) -> KicadResult<String> {
    let span = symbol_span(text, reference)?;
    let block = span.slice(text);
    let node = parse_block(block)?;
    let from = Placement::from_node(&node)
        .ok_or_else(|| KicadError::malformed(span.start, "symbol has no position"))?;

    let mut moved = shift_positions(block, to.x - from.position.x, to.y - from.position.y);
    if let Some(rotation) = rotation {
        let own_at = child_blocks(&moved, Span::new(0, moved.len()))
            .into_iter()
            .find(|child| list_head(&moved, child.start) == Some("at"));
        if let Some(at) = own_at {
            let replacement = format!(
                "(at {} {} {})",
                format_coord(to.x),
                format_coord(to.y),
                format_coord(rotation.degrees())
            );
            moved = replace_span(&moved, at, &replacement);
        }
    }
    let moved = refresh_uuid(&moved);
    info!(reference, from = %from.position, %to, "Moved symbol");
    Ok(replace_span(text, span, &moved))
}

/// Sets property `name` of the instance `reference` to `value`.
///
/// Every unit of a multi-unit part is updated. An existing property keeps its
/// position and effects; only the value token changes. A missing property is
/// appended hidden at the instance anchor. Renaming via `Reference` also
/// rewrites the instance path entries.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] for an unknown reference, and
/// [`KicadError::InvalidIdentifier`] or [`KicadError::AlreadyExists`] when the
/// new `Reference` is malformed or taken.
pub fn update_property(text: &str, reference: &str, name: &str, value: &str) -> KicadResult<String> {
    let units = find_symbols_by_reference(text, reference);
    if units.is_empty() {
        return Err(KicadError::not_found("symbol", reference));
    }
    let renaming = name == "Reference" && value != reference;
    if renaming {
        Reference::parse(value)?;
        if find_symbol_by_reference(text, value).is_some() {
            return Err(KicadError::already_exists("symbol", value));
        }
    }

    // last unit first, so earlier spans stay valid
    let mut out = text.to_string();
    for span in units.into_iter().rev() {
        out = update_instance_property(&out, span, name, value, renaming)?;
    }
    debug!(reference, property = name, "Updated property");
    Ok(out)
}

fn update_instance_property(
    text: &str,
    span: Span,
    name: &str,
    value: &str,
    renaming: bool,
) -> KicadResult<String> {
    let existing = child_blocks(text, span).into_iter().find(|child| {
        list_head(text, child.start) == Some("property")
            && value_token(text, *child).is_some_and(|(_, n)| n == name)
    });
    let Some(property) = existing else {
        let node = parse_block(span.slice(text))?;
        let at = Placement::from_node(&node).map(|p| p.position).unwrap_or_default();
        let child = format!(
            "(property {} {} (at {} {} 0) {FONT_HIDDEN})",
            quote(name),
            quote(value),
            format_coord(at.x),
            format_coord(at.y)
        );
        return Ok(append_child(text, span, &child));
    };

    let (token, _) = arg_token(text, property, 1)
        .ok_or_else(|| KicadError::malformed(property.start, "property has no value"))?;
    let mut edits = vec![(token, quote(value))];
    if renaming {
        for entry in find_blocks(span.slice(text), "reference") {
            let entry = Span::new(span.start + entry.start, span.start + entry.end);
            if let Some((token, _)) = value_token(text, entry) {
                edits.push((token, quote(value)));
            }
        }
    }
    Ok(apply_edits(text, edits))
}

/// Removes every instance (all units) with the given reference.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if no instance has that reference.
pub fn remove_component(text: &str, reference: &str) -> KicadResult<String> {
    let mut out = remove_block(text, symbol_span(text, reference)?);
    while let Some(span) = find_symbol_by_reference(&out, reference) {
        out = remove_block(&out, span);
    }
    info!(reference, "Removed symbol");
    Ok(out)
}

/// Removes the wire between `start` and `end` (either orientation).
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if no such wire exists.
pub fn remove_wire(text: &str, start: Point, end: Point) -> KicadResult<String> {
    let span = find_wire_by_endpoints(text, start, end)
        .ok_or_else(|| KicadError::not_found("wire", format!("{start} to {end}")))?;
    Ok(remove_block(text, span))
}

fn remove_marker(text: &str, tag: &str, position: Point) -> KicadResult<String> {
    let span = find_marker_by_position(text, tag, position)
        .ok_or_else(|| KicadError::not_found(tag, position.to_string()))?;
    Ok(remove_block(text, span))
}

/// Removes the no-connect marker at `position`.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if there is none.
pub fn remove_no_connect(text: &str, position: Point) -> KicadResult<String> {
    remove_marker(text, "no_connect", position)
}

/// Removes the junction at `position`.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if there is none.
pub fn remove_junction(text: &str, position: Point) -> KicadResult<String> {
    remove_marker(text, "junction", position)
}
