//! Board mutations: footprint placement and movement, tracks, vias and pad
//! net assignment. All functions map document text to document text.

use tracing::{debug, info};

use crate::kicad::edit::{
    append_child, apply_edits, format_coord, insert_at, insert_before_end, new_uuid, refresh_uuid,
    remove_block, replace_span, root_span,
};
use crate::kicad::error::{KicadError, KicadResult};
use crate::kicad::geometry::Point;
use crate::kicad::ident::{LibId, Reference};
use crate::kicad::library::{line_indent, reindent};
use crate::kicad::sexpr::find::{
    arg_token, find_blocks_at_depth, find_blocks_with_depth, find_footprint_by_reference,
    value_token,
};
use crate::kicad::sexpr::{block_span, child_blocks, list_head, parse_block, quote, Node, Span};

const FP_FONT: &str = "(effects (font (size 1 1) (thickness 0.15)))";

/// Footprint-level items that placement always writes itself.
const REPLACED_ON_PLACE: &[&str] = &[
    "at",
    "uuid",
    "tstamp",
    "layer",
    "version",
    "generator",
    "generator_version",
];

/// Indentation unit of the board: a tab for KiCad 8+, two spaces before.
fn indent_unit(text: &str) -> String {
    let Ok(root) = root_span(text) else {
        return "  ".to_string();
    };
    child_blocks(text, root)
        .first()
        .map(|first| line_indent(text, first.start))
        .filter(|indent| !indent.is_empty())
        .map_or_else(|| "  ".to_string(), str::to_string)
}

/// Parameters for [`place_footprint`].
#[derive(Debug, Clone)]
pub struct NewFootprint {
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
    /// `.kicad_mod` text whose pads and graphics are copied in.
    pub source: Option<String>,
}

impl NewFootprint {
    /// A footprint on `F.Cu` with no rotation and no copied body.
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
            position,
            rotation: 0.0,
            layer: "F.Cu".to_string(),
            source: None,
        }
    }

    /// Sets the rotation.
    #[must_use]
    pub fn rotated(mut self, degrees: f64) -> Self {
        self.rotation = degrees;
        self
    }

    /// Copies pads and graphics from a `.kicad_mod` file's text.
    #[must_use]
    pub fn with_source(mut self, kicad_mod: impl Into<String>) -> Self {
        self.source = Some(kicad_mod.into());
        self
    }
}

fn at_clause(x: f64, y: f64, rotation: f64) -> String {
    if rotation.abs() < f64::EPSILON {
        format!("(at {} {})", format_coord(x), format_coord(y))
    } else {
        format!(
            "(at {} {} {})",
            format_coord(x),
            format_coord(y),
            format_coord(rotation)
        )
    }
}

/// Children of a `.kicad_mod` root worth copying, re-indented to `indent`.
fn footprint_body(source: &str, indent: &str) -> KicadResult<Vec<String>> {
    let start = source
        .find('(')
        .ok_or_else(|| KicadError::malformed(0, "empty footprint file"))?;
    let root = block_span(source, start)?;
    if !matches!(list_head(source, root.start), Some("footprint" | "module")) {
        return Err(KicadError::malformed(root.start, "not a footprint file"));
    }
    let mut body = Vec::new();
    for child in child_blocks(source, root) {
        let head = list_head(source, child.start).unwrap_or_default();
        if REPLACED_ON_PLACE.contains(&head) {
            continue;
        }
        let field = match head {
            "property" => value_token(source, child).map(|(_, v)| v),
            "fp_text" => value_token(source, child).map(|(_, v)| v.to_ascii_lowercase()),
            _ => None,
        };
        if matches!(
            field.as_deref(),
            Some("Reference" | "Value" | "reference" | "value")
        ) {
            continue;
        }
        let slice = child.slice(source);
        body.push(reindent(slice, line_indent(source, child.start), indent));
    }
    Ok(body)
}

/// Places a footprint.
///
/// # Errors
///
/// Returns [`KicadError::InvalidIdentifier`] for a malformed reference or lib
/// id, [`KicadError::AlreadyExists`] if the reference is already on the board,
/// and [`KicadError::MalformedDocument`] for an unreadable source footprint.
pub fn place_footprint(text: &str, footprint: &NewFootprint) -> KicadResult<String> {
    Reference::parse(&footprint.reference)?;
    LibId::parse(&footprint.lib_id)?;
    if find_footprint_by_reference(text, &footprint.reference).is_some() {
        return Err(KicadError::already_exists(
            "footprint",
            footprint.reference.clone(),
        ));
    }

    let unit = indent_unit(text);
    let inner = unit.repeat(2);
    let p = footprint.position;
    let rot = footprint.rotation;
    let mut block = format!(
        "(footprint {} (layer {})\n{inner}(uuid {})\n{inner}{}\n",
        quote(&footprint.lib_id),
        quote(&footprint.layer),
        quote(&new_uuid()),
        at_clause(p.x, p.y, rot)
    );
    for (name, value, dy, layer) in [
        ("Reference", &footprint.reference, -1.5, "F.SilkS"),
        ("Value", &footprint.value, 1.5, "F.Fab"),
    ] {
        block.push_str(&format!(
            "{inner}(property {} {} {} (layer {})\n{inner}{unit}{FP_FONT}\n{inner})\n",
            quote(name),
            quote(value),
            at_clause(0.0, dy, rot),
            quote(layer)
        ));
    }
    if let Some(source) = &footprint.source {
        for child in footprint_body(source, &inner)? {
            block.push_str(&format!("{inner}{child}\n"));
        }
    }
    block.push_str(&format!("{unit})"));

    info!(reference = %footprint.reference, lib_id = %footprint.lib_id, "Placed footprint");
    insert_before_end(text, &format!("{unit}{block}"))
}

fn footprint_span(text: &str, reference: &str) -> KicadResult<Span> {
    find_footprint_by_reference(text, reference)
        .ok_or_else(|| KicadError::not_found("footprint", reference))
}

/// Moves a footprint to `to`, optionally changing its rotation.
///
/// Pads and texts keep their footprint-relative positions. Their absolute
/// angles turn with the footprint. The footprint gets a fresh uuid.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if no footprint has that reference.
pub fn move_footprint(
    text: &str,
    reference: &str,
    to: Point,
    rotation: Option<f64>,
) -> KicadResult<String> {
    let span = footprint_span(text, reference)?;
    let block = span.slice(text);
    let whole = Span::new(0, block.len());
    let own_at = child_blocks(block, whole)
        .into_iter()
        .find(|c| list_head(block, c.start) == Some("at"));
    let old_rotation = own_at
        .and_then(|at| arg_token(block, at, 2))
        .and_then(|(_, v)| v.parse::<f64>().ok())
        .unwrap_or(0.0);
    let new_rotation = rotation.unwrap_or(old_rotation);
    let turn = new_rotation - old_rotation;

    let mut edits = Vec::new();
    if turn.abs() > f64::EPSILON {
        for nested in find_blocks_with_depth(block, "at")
            .into_iter()
            .filter(|l| l.depth > 1)
        {
            let at = nested.span;
            let third = arg_token(block, at, 2);
            match third.as_ref().map(|(token, value)| (*token, value.parse::<f64>())) {
                Some((token, Ok(angle))) => {
                    edits.push((token, format_coord((angle + turn).rem_euclid(360.0))));
                }
                // a flag such as `unlocked` follows the angle slot
                Some((token, Err(_))) => {
                    let before = Span::new(token.start, token.start);
                    edits.push((before, format!("{} ", format_coord(turn.rem_euclid(360.0)))));
                }
                None => {
                    let close = Span::new(at.end - 1, at.end - 1);
                    edits.push((close, format!(" {}", format_coord(turn.rem_euclid(360.0)))));
                }
            }
        }
    }
    let new_at = at_clause(to.x, to.y, new_rotation);
    match own_at {
        Some(at) => edits.push((at, new_at)),
        None => {
            let after_name = value_token(block, whole)
                .map_or(block.len() - 1, |(token, _)| token.end);
            edits.push((Span::new(after_name, after_name), format!(" {new_at}")));
        }
    }
    let moved = refresh_uuid(&apply_edits(block, edits));
    info!(reference, %to, rotation = new_rotation, "Moved footprint");
    Ok(replace_span(text, span, &moved))
}

/// Top-level net declarations: span, number and name.
fn net_table(text: &str) -> Vec<(Span, i64, String)> {
    find_blocks_at_depth(text, "net", 1)
        .into_iter()
        .filter_map(|span| {
            let node = parse_block(span.slice(text)).ok()?;
            let id = node.arg(0).and_then(Node::as_i64)?;
            Some((span, id, node.arg_text(1).unwrap_or_default()))
        })
        .collect()
}

/// Number of the net called `name`, declaring it when missing.
///
/// The empty name is net 0. A new net gets one more than the highest number
/// in use and is declared after the last existing declaration.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the root form is unbalanced.
pub fn ensure_net(text: &str, name: &str) -> KicadResult<(String, i64)> {
    if name.is_empty() {
        return Ok((text.to_string(), 0));
    }
    let table = net_table(text);
    if let Some((_, id, _)) = table.iter().find(|(_, _, n)| n == name) {
        return Ok((text.to_string(), *id));
    }
    let id = table.iter().map(|(_, id, _)| *id).max().unwrap_or(0) + 1;
    let declaration = format!("(net {id} {})", quote(name));
    debug!(net = name, id, "Declaring net");

    if let Some((last, _, _)) = table.last() {
        let indent = line_indent(text, last.start);
        return Ok((insert_at(text, last.end, &format!("\n{indent}{declaration}")), id));
    }
    let unit = indent_unit(text);
    let first_footprint = find_blocks_at_depth(text, "footprint", 1).into_iter().next();
    let out = match first_footprint {
        Some(fp) => {
            let line_start = fp.start - line_indent(text, fp.start).len();
            insert_at(text, line_start, &format!("{unit}{declaration}\n"))
        }
        None => insert_before_end(text, &format!("{unit}{declaration}"))?,
    };
    Ok((out, id))
}

/// Adds a track segment on `layer`, on net `net` (empty for none).
///
/// # Errors
///
/// Returns [`KicadError::InvalidParameter`] for a non-positive width.
pub fn add_track(
    text: &str,
    start: Point,
    end: Point,
    width: f64,
    layer: &str,
    net: &str,
) -> KicadResult<String> {
    if width <= 0.0 {
        return Err(KicadError::invalid_parameter("width", "must be positive"));
    }
    let (text, id) = ensure_net(text, net)?;
    let block = format!(
        "{}(segment (start {} {}) (end {} {}) (width {}) (layer {}) (net {id}) (uuid {}))",
        indent_unit(&text),
        format_coord(start.x),
        format_coord(start.y),
        format_coord(end.x),
        format_coord(end.y),
        format_coord(width),
        quote(layer),
        quote(&new_uuid())
    );
    insert_before_end(&text, &block)
}

/// Adds a through via.
///
/// # Errors
///
/// Returns [`KicadError::InvalidParameter`] unless `size > drill > 0`.
pub fn add_via(text: &str, at: Point, size: f64, drill: f64, net: &str) -> KicadResult<String> {
    if drill <= 0.0 || size <= drill {
        return Err(KicadError::invalid_parameter(
            "size",
            format!("via size {size} must exceed drill {drill} > 0"),
        ));
    }
    let (text, id) = ensure_net(text, net)?;
    let block = format!(
        "{}(via (at {} {}) (size {}) (drill {}) (layers \"F.Cu\" \"B.Cu\") (net {id}) (uuid {}))",
        indent_unit(&text),
        format_coord(at.x),
        format_coord(at.y),
        format_coord(size),
        format_coord(drill),
        quote(&new_uuid())
    );
    insert_before_end(&text, &block)
}

fn pad_span(text: &str, footprint: Span, pad: &str) -> Option<Span> {
    child_blocks(text, footprint).into_iter().find(|child| {
        list_head(text, child.start) == Some("pad")
            && value_token(text, *child).is_some_and(|(_, v)| v == pad)
    })
}

/// Puts pad `pad` of footprint `reference` on net `net`, declaring the net if
/// needed. An empty name disconnects the pad.
///
/// # Errors
///
/// Returns [`KicadError::NotFound`] if the footprint or pad does not exist.
pub fn assign_net(text: &str, reference: &str, pad: &str, net: &str) -> KicadResult<String> {
    let footprint = footprint_span(text, reference)?;
    if pad_span(text, footprint, pad).is_none() {
        return Err(KicadError::not_found("pad", format!("{reference}.{pad}")));
    }

    let (text, id) = ensure_net(text, net)?;
    // declaring a net may have shifted the footprint
    let footprint = footprint_span(&text, reference)?;
    let pad_at = pad_span(&text, footprint, pad)
        .ok_or_else(|| KicadError::not_found("pad", format!("{reference}.{pad}")))?;
    let existing = child_blocks(&text, pad_at)
        .into_iter()
        .find(|c| list_head(&text, c.start) == Some("net"));

    let out = match (existing, net.is_empty()) {
        (Some(clause), true) => remove_block(&text, clause),
        (None, true) => text,
        (Some(clause), false) => replace_span(&text, clause, &format!("(net {id} {})", quote(net))),
        (None, false) => append_child(&text, pad_at, &format!("(net {id} {})", quote(net))),
    };
    info!(reference, pad, net, "Assigned pad net");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kicad::board::tests::PCB;
    use crate::kicad::board::Board;

    const KICAD_MOD: &str = r#"(footprint "R_0603_1608Metric"
  (version 20240108)
  (layer "F.Cu")
  (property "Reference" "REF**" (at 0 -1.43 0))
  (property "Value" "R_0603_1608Metric" (at 0 1.43 0))
  (fp_line (start -0.8 0.4) (end 0.8 0.4) (layer "F.Fab") (width 0.1))
  (pad "1" smd roundrect (at -0.825 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "2" smd roundrect (at 0.825 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
)
"#;

    #[test]
    fn place_with_copied_pads() {
        let fp = NewFootprint::new("Resistor_SMD:R_0603_1608Metric", "R2", "1k", Point::new(120.0, 60.0))
            .with_source(KICAD_MOD);
        let out = place_footprint(PCB, &fp).unwrap();
        let board = Board::from_text(&out).unwrap();
        let r2 = board.footprint("R2").unwrap();
        assert_eq!(r2.value, "1k");
        assert_eq!(r2.pads.len(), 2);
        assert!(r2.pad("2").unwrap().position.approx_eq(Point::new(120.825, 60.0)));
        assert!(!out.contains("REF**"));
        // tab-indented board stays tab-indented
        assert!(out.contains("\n\t(footprint \"Resistor_SMD:R_0603_1608Metric\" (layer \"F.Cu\")\n\t\t(uuid"));
    }

    #[test]
    fn place_duplicate_reference() {
        let fp = NewFootprint::new("Resistor_SMD:R_0603_1608Metric", "R1", "", Point::default());
        assert!(place_footprint(PCB, &fp).unwrap_err().is_already_exists());
    }

    #[test]
    fn place_rejects_non_footprint_source() {
        let fp = NewFootprint::new("Lib:X", "U1", "", Point::default()).with_source("(kicad_symbol_lib)");
        assert!(place_footprint(PCB, &fp).is_err());
    }

    #[test]
    fn move_keeps_pads_relative() {
        let out = move_footprint(PCB, "R1", Point::new(50.0, 40.0), None).unwrap();
        let board = Board::from_text(&out).unwrap();
        let r1 = board.footprint("R1").unwrap();
        assert!(r1.position.approx_eq(Point::new(50.0, 40.0)));
        assert!((r1.rotation - 90.0).abs() < f64::EPSILON);
        assert!(r1.pad("1").unwrap().position.approx_eq(Point::new(50.0, 40.825)));
        assert_ne!(r1.uuid.as_deref(), Some("fp-r1"));
    }

    #[test]
    fn rotating_turns_nested_angles() {
        let out = move_footprint(PCB, "R1", Point::new(100.0, 50.0), Some(0.0)).unwrap();
        assert!(out.contains("(pad \"1\" smd roundrect (at -0.825 0 0)"));
        let out = move_footprint(PCB, "C1", Point::new(110.0, 50.0), Some(180.0)).unwrap();
        assert!(out.contains("(fp_text reference \"C1\" (at 0 -1.43 180))"));
        assert!(out.contains("(at 110 50 180)"));
        assert!(move_footprint(PCB, "U9", Point::default(), None).unwrap_err().is_not_found());
    }

    #[test]
    fn rotating_keeps_unlocked_flags() {
        let pcb = "(kicad_pcb\n  (net 0 \"\")\n  (footprint \"Lib:R\" (layer \"F.Cu\") (at 10 10)\n    (fp_text reference \"R7\" (at 0 -1.5 unlocked) (layer \"F.SilkS\"))\n    (fp_text value \"1k\" (at 0 1.5 90 unlocked) (layer \"F.Fab\"))\n  )\n)\n";
        let out = move_footprint(pcb, "R7", Point::new(10.0, 10.0), Some(90.0)).unwrap();
        assert!(out.contains("(fp_text reference \"R7\" (at 0 -1.5 90 unlocked)"));
        assert!(out.contains("(fp_text value \"1k\" (at 0 1.5 180 unlocked)"));
        assert!(Board::from_text(&out).unwrap().footprint("R7").is_some());
    }

    #[test]
    fn net_resolution_allocates_ids() {
        let (same, id) = ensure_net(PCB, "GND").unwrap();
        assert_eq!(id, 1);
        assert_eq!(same, PCB);
        let (out, id) = ensure_net(PCB, "SDA").unwrap();
        assert_eq!(id, 3);
        assert!(out.contains("\t(net 2 \"VCC\")\n\t(net 3 \"SDA\")\n"));
        assert_eq!(ensure_net(PCB, "").unwrap().1, 0);
    }

    #[test]
    fn net_declared_before_first_footprint_when_table_empty() {
        let pcb = "(kicad_pcb\n  (version 1)\n  (footprint \"L:F\" (layer \"F.Cu\"))\n)\n";
        let (out, id) = ensure_net(pcb, "GND").unwrap();
        assert_eq!(id, 1);
        assert!(out.contains("  (net 1 \"GND\")\n  (footprint"));
    }

    #[test]
    fn tracks_and_vias() {
        let out = add_track(PCB, Point::new(0.0, 0.0), Point::new(5.0, 0.0), 0.25, "F.Cu", "VCC").unwrap();
        let out = add_via(&out, Point::new(5.0, 0.0), 0.8, 0.4, "NEW").unwrap();
        let board = Board::from_text(&out).unwrap();
        assert_eq!(board.segments.len(), 2);
        assert_eq!(board.segments[1].net, 2);
        assert_eq!(board.vias.len(), 2);
        assert_eq!(board.vias[1].net, 3);
        assert_eq!(board.net_name(3), Some("NEW"));
        assert!(add_track(PCB, Point::default(), Point::default(), 0.0, "F.Cu", "").is_err());
        assert!(add_via(PCB, Point::default(), 0.4, 0.4, "").is_err());
    }

    #[test]
    fn assign_replaces_appends_and_clears() {
        let out = assign_net(PCB, "R1", "1", "GND").unwrap();
        let board = Board::from_text(&out).unwrap();
        assert_eq!(board.footprint("R1").unwrap().pad("1").unwrap().net.as_deref(), Some("GND"));

        let out = assign_net(PCB, "C1", "1", "SCL").unwrap();
        let board = Board::from_text(&out).unwrap();
        assert_eq!(board.footprint("C1").unwrap().pads[0].net.as_deref(), Some("SCL"));
        assert_eq!(board.net_name(3), Some("SCL"));

        let out = assign_net(PCB, "R1", "2", "").unwrap();
        let board = Board::from_text(&out).unwrap();
        assert!(board.footprint("R1").unwrap().pad("2").unwrap().net.is_none());

        assert!(assign_net(PCB, "R1", "3", "GND").unwrap_err().is_not_found());
        assert!(assign_net(PCB, "R9", "1", "GND").unwrap_err().is_not_found());
    }
}
