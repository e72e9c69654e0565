//! Board edits and schematic/board reconciliation.

mod common;

use common::{approx_eq, test_temp_dir, write_libraries, COORD_TOLERANCE, EMPTY_BOARD, R_0603};
use kicad_file_backend::kicad::board::edit::{
    add_track, add_via, assign_net, ensure_net, move_footprint, place_footprint, NewFootprint,
};
use kicad_file_backend::kicad::board::Board;
use kicad_file_backend::kicad::compare::{compare, compare_files};
use kicad_file_backend::kicad::document::modify_document;
use kicad_file_backend::kicad::schematic::edit::{add_component, create_schematic, NewComponent};
use kicad_file_backend::kicad::schematic::Schematic;
use kicad_file_backend::kicad::Point;
use std::fs;
use std::path::{Path, PathBuf};

const R_FOOTPRINT: &str = "Resistor_SMD:R_0603_1608Metric";
const C_FOOTPRINT: &str = "Capacitor_SMD:C_0603_1608Metric";

fn board_with_resistors(dir: &Path) -> PathBuf {
    let path = dir.join("divider.kicad_pcb");
    fs::write(&path, EMPTY_BOARD).expect("Failed to write board");
    for (reference, value, at) in [
        ("R1", "10k", Point::new(50.0, 50.0)),
        ("R2", "10k", Point::new(50.0, 55.0)),
    ] {
        let footprint = NewFootprint::new(R_FOOTPRINT, reference, value, at).with_source(R_0603);
        modify_document(&path, |text| place_footprint(text, &footprint)).expect("place");
    }
    path
}

fn divider_schematic(dir: &Path) -> PathBuf {
    let libs = write_libraries(dir);
    let mut text = create_schematic(None, None);
    for (lib_id, reference, value, footprint, x) in [
        ("Device:R", "R1", "10k", R_FOOTPRINT, 100.0),
        ("Device:R", "R2", "10k", R_FOOTPRINT, 120.0),
        ("Device:C", "C1", "100n", C_FOOTPRINT, 140.0),
    ] {
        let component = NewComponent::new(lib_id, reference, value, Point::new(x, 50.0))
            .with_footprint(footprint);
        text = add_component(&text, &component, &libs).expect("place").text;
    }
    let path = dir.join("divider.kicad_sch");
    fs::write(&path, text).expect("Failed to write schematic");
    path
}

// =============================================================================
// Footprints
// =============================================================================

#[test]
fn placed_footprints_carry_pads() {
    let temp_dir = test_temp_dir();
    let path = board_with_resistors(temp_dir.path());
    let board = Board::open(&path).expect("Failed to read board");

    assert_eq!(board.footprints.len(), 2);
    let r1 = board.footprint("R1").expect("R1 missing");
    assert_eq!(r1.lib_id, R_FOOTPRINT);
    assert_eq!(r1.value, "10k");
    assert_eq!(r1.pads.len(), 2);
    let pad1 = r1.pad("1").expect("pad 1");
    assert!(approx_eq(pad1.position.x, 49.175, COORD_TOLERANCE));
    assert!(approx_eq(pad1.position.y, 50.0, COORD_TOLERANCE));

    let text = fs::read_to_string(&path).expect("read");
    // the library placeholder reference never lands on the board
    assert!(!text.contains("REF**"));
    // tab indentation follows the board
    assert!(text.contains("\n\t(footprint \"Resistor_SMD:R_0603_1608Metric\""));

    let again = NewFootprint::new(R_FOOTPRINT, "R1", "1k", Point::new(0.0, 0.0));
    let err = place_footprint(&text, &again).expect_err("R1 already placed");
    assert!(err.is_already_exists());
}

#[test]
fn move_rotates_pads_about_the_anchor() {
    let temp_dir = test_temp_dir();
    let path = board_with_resistors(temp_dir.path());
    let old_uuid = Board::open(&path).expect("read").footprint("R1").and_then(|f| f.uuid.clone());

    modify_document(&path, |text| move_footprint(text, "R1", Point::new(60.0, 40.0), Some(90.0)))
        .expect("move");
    let board = Board::open(&path).expect("read");
    let r1 = board.footprint("R1").expect("R1 missing");
    assert!(r1.position.approx_eq(Point::new(60.0, 40.0)));
    assert!(approx_eq(r1.rotation, 90.0, COORD_TOLERANCE));
    assert_ne!(r1.uuid, old_uuid);

    let pad1 = r1.pad("1").expect("pad 1");
    assert!(approx_eq(pad1.position.x, 60.0, COORD_TOLERANCE));
    assert!(approx_eq(pad1.position.y, 40.825, COORD_TOLERANCE));

    // R2 is untouched
    let r2 = board.footprint("R2").expect("R2 missing");
    assert!(r2.position.approx_eq(Point::new(50.0, 55.0)));
}

// =============================================================================
// Nets, tracks and vias
// =============================================================================

#[test]
fn net_numbers_are_allocated_once() {
    let temp_dir = test_temp_dir();
    let path = board_with_resistors(temp_dir.path());

    modify_document(&path, |text| assign_net(text, "R1", "1", "+3V3")).expect("assign");
    modify_document(&path, |text| assign_net(text, "R1", "2", "MID")).expect("assign");
    modify_document(&path, |text| assign_net(text, "R2", "1", "MID")).expect("assign");
    modify_document(&path, |text| assign_net(text, "R2", "2", "GND")).expect("assign");

    let board = Board::open(&path).expect("read");
    let nets: Vec<(i64, &str)> = board.nets.iter().map(|n| (n.id, n.name.as_str())).collect();
    assert_eq!(nets, vec![(0, ""), (1, "+3V3"), (2, "MID"), (3, "GND")]);

    let r2 = board.footprint("R2").expect("R2 missing");
    assert_eq!(r2.pad("1").and_then(|p| p.net.as_deref()), Some("MID"));

    let text = fs::read_to_string(&path).expect("read");
    let (unchanged, id) = ensure_net(&text, "MID").expect("existing net");
    assert_eq!(id, 2);
    assert_eq!(unchanged, text);

    // an empty name disconnects the pad
    let text = assign_net(&text, "R2", "2", "").expect("disconnect");
    let board = Board::from_text(&text).expect("parse");
    let pad = board.footprint("R2").and_then(|f| f.pad("2")).expect("pad");
    assert!(pad.net.is_none());

    assert!(assign_net(&text, "R2", "3", "GND").expect_err("no pad 3").is_not_found());
    assert!(assign_net(&text, "U1", "1", "GND").expect_err("no U1").is_not_found());
}

#[test]
fn tracks_and_vias_declare_their_nets() {
    let temp_dir = test_temp_dir();
    let path = board_with_resistors(temp_dir.path());

    modify_document(&path, |text| {
        add_track(text, Point::new(50.825, 50.0), Point::new(50.825, 55.0), 0.25, "F.Cu", "MID")
    })
    .expect("track");
    modify_document(&path, |text| add_via(text, Point::new(52.0, 52.5), 0.6, 0.3, "MID"))
        .expect("via");

    let board = Board::open(&path).expect("read");
    assert_eq!(board.segments.len(), 1);
    assert_eq!(board.vias.len(), 1);
    assert_eq!(board.net_name(board.segments[0].net), Some("MID"));
    assert_eq!(board.vias[0].net, board.segments[0].net);
    assert!(approx_eq(board.segments[0].width, 0.25, COORD_TOLERANCE));

    let text = fs::read_to_string(&path).expect("read");
    assert!(add_track(&text, Point::new(0.0, 0.0), Point::new(1.0, 0.0), 0.0, "F.Cu", "")
        .is_err());
    assert!(add_via(&text, Point::new(0.0, 0.0), 0.3, 0.3, "").is_err());
}

// =============================================================================
// Schematic/board comparison
// =============================================================================

#[test]
fn compare_reports_missing_and_mismatched_parts() {
    let temp_dir = test_temp_dir();
    let sch_path = divider_schematic(temp_dir.path());
    let pcb_path = board_with_resistors(temp_dir.path());

    let result = compare_files(&sch_path, &pcb_path).expect("compare");
    assert_eq!(result.matched, vec!["R1", "R2"]);
    assert_eq!(result.missing_from_board.len(), 1);
    assert_eq!(result.missing_from_board[0].reference, "C1");
    assert_eq!(result.missing_from_board[0].footprint, C_FOOTPRINT);
    assert!(!result.in_sync());

    // C1 lands with a resistor footprint and a stray U1 appears
    let c1 = NewFootprint::new(R_FOOTPRINT, "C1", "100n", Point::new(60.0, 50.0));
    let u1 = NewFootprint::new("Package_SO:SOIC-8", "U1", "LM358", Point::new(70.0, 50.0));
    modify_document(&pcb_path, |text| place_footprint(text, &c1)).expect("place C1");
    modify_document(&pcb_path, |text| place_footprint(text, &u1)).expect("place U1");

    let result = compare(
        &Schematic::open(&sch_path).expect("schematic"),
        &Board::open(&pcb_path).expect("board"),
    );
    assert!(result.missing_from_board.is_empty());
    assert_eq!(result.missing_from_schematic.len(), 1);
    assert_eq!(result.missing_from_schematic[0].reference, "U1");
    assert_eq!(result.footprint_mismatches.len(), 1);
    assert_eq!(result.footprint_mismatches[0].reference, "C1");
    assert_eq!(result.footprint_mismatches[0].schematic, C_FOOTPRINT);
    assert_eq!(result.summary.schematic_parts, 3);
    assert_eq!(result.summary.board_parts, 4);
    assert_eq!(result.summary.matched, 2);
}

#[test]
fn compare_of_missing_file_fails() {
    let temp_dir = test_temp_dir();
    let sch_path = divider_schematic(temp_dir.path());
    let result = compare_files(&sch_path, &temp_dir.path().join("absent.kicad_pcb"));
    assert!(result.is_err());
}
