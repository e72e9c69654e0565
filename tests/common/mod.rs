//! Fixtures and helpers shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use kicad_file_backend::kicad::library::LibrarySet;
use tempfile::TempDir;

/// Creates a temporary directory inside `.tmp/` for test isolation.
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
///
/// Converts to an absolute path to avoid issues with parallel test execution.
pub fn test_temp_dir() -> TempDir {
    let tmp_root = Path::new(".tmp");
    fs::create_dir_all(tmp_root).expect("Failed to create .tmp directory");
    let tmp_root = tmp_root
        .canonicalize()
        .expect("Failed to canonicalize .tmp path");
    tempfile::tempdir_in(&tmp_root).expect("Failed to create temp dir")
}

/// Helper to compare floats with tolerance.
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() < tolerance
}

pub const COORD_TOLERANCE: f64 = 0.001;

/// Two-pin resistor, a capacitor derived from it, and a dual op-amp.
pub const DEVICE_LIB: &str = r#"(kicad_symbol_lib
  (version 20231120)
  (generator "kicad_symbol_editor")
  (symbol "R"
    (pin_numbers hide)
    (property "Reference" "R" (at 2.032 0 90) (effects (font (size 1.27 1.27))))
    (property "Value" "R" (at 0 0 90) (effects (font (size 1.27 1.27))))
    (property "Description" "Resistor" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
    (property "ki_keywords" "R res resistor" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
    (property "ki_fp_filters" "R_*" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "R_0_1"
      (rectangle (start -1.016 -2.54) (end 1.016 2.54) (stroke (width 0.254)) (fill (type none)))
    )
    (symbol "R_1_1"
      (pin passive line (at 0 3.81 270) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "1" (effects (font (size 1.27 1.27)))))
      (pin passive line (at 0 -3.81 90) (length 1.27) (name "~" (effects (font (size 1.27 1.27)))) (number "2" (effects (font (size 1.27 1.27)))))
    )
  )
  (symbol "R_Small" (extends "R")
    (property "Reference" "R" (at 0 0 0) (effects (font (size 1.27 1.27))))
    (property "Description" "Resistor, small symbol" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
  )
  (symbol "C"
    (property "Reference" "C" (at 0.635 2.54 0) (effects (font (size 1.27 1.27))))
    (property "Description" "Unpolarized capacitor" (at 0 0 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "C_1_1"
      (pin passive line (at 0 3.81 270) (length 2.794) (name "~") (number "1"))
      (pin passive line (at 0 -3.81 90) (length 2.794) (name "~") (number "2"))
    )
  )
)
"#;

/// Ground and supply symbols plus the power flag.
pub const POWER_LIB: &str = r##"(kicad_symbol_lib
  (version 20231120)
  (symbol "GND" (power)
    (property "Reference" "#PWR" (at 0 -6.35 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "GND_0_1"
      (pin power_in line (at 0 0 270) (length 0) hide (name "GND") (number "1"))
    )
  )
  (symbol "+3V3" (power)
    (property "Reference" "#PWR" (at 0 -3.81 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "+3V3_0_1"
      (pin power_in line (at 0 0 90) (length 0) hide (name "+3V3") (number "1"))
    )
  )
  (symbol "PWR_FLAG" (power)
    (property "Reference" "#FLG" (at 0 1.905 0) (effects (font (size 1.27 1.27)) hide))
    (symbol "PWR_FLAG_0_0"
      (pin power_out line (at 0 0 90) (length 0) (name "pwr") (number "1"))
    )
  )
)
"##;

/// A `.kicad_mod` footprint with two SMD pads.
pub const R_0603: &str = r#"(footprint "R_0603_1608Metric"
  (version 20240108)
  (generator "pcbnew")
  (layer "F.Cu")
  (descr "Resistor SMD 0603")
  (property "Reference" "REF**" (at 0 -1.43 0) (layer "F.SilkS"))
  (property "Value" "R_0603_1608Metric" (at 0 1.43 0) (layer "F.Fab"))
  (attr smd)
  (fp_line (start -0.8 -0.4125) (end 0.8 -0.4125) (stroke (width 0.1) (type solid)) (layer "F.Fab"))
  (pad "1" smd roundrect (at -0.825 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
  (pad "2" smd roundrect (at 0.825 0) (size 0.8 0.95) (layers "F.Cu" "F.Paste" "F.Mask"))
)
"#;

/// An empty two-layer board with the unconnected net only.
pub const EMPTY_BOARD: &str = "(kicad_pcb
\t(version 20240108)
\t(generator \"pcbnew\")
\t(general
\t\t(thickness 1.6)
\t)
\t(paper \"A4\")
\t(layers
\t\t(0 \"F.Cu\" signal)
\t\t(31 \"B.Cu\" signal)
\t)
\t(net 0 \"\")
)
";

/// Writes `Device.kicad_sym` and `power.kicad_sym` into `dir`.
pub fn write_libraries(dir: &Path) -> LibrarySet {
    let device = dir.join("Device.kicad_sym");
    let power = dir.join("power.kicad_sym");
    fs::write(&device, DEVICE_LIB).expect("Failed to write Device library");
    fs::write(&power, POWER_LIB).expect("Failed to write power library");
    LibrarySet::new([device, power])
}
