//! Hierarchical sheet tree.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use super::Schematic;
use crate::kicad::error::KicadResult;

/// One sheet in the hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct SheetNode {
    /// Sheet name (the file stem for the root).
    pub name: String,
    /// Schematic file.
    pub file: PathBuf,
    /// Placed symbols on this sheet.
    pub symbol_count: usize,
    /// Wires on this sheet.
    pub wire_count: usize,
    /// Labels on this sheet.
    pub label_count: usize,
    /// Pin names of the sheet box in the parent.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pins: Vec<String>,
    /// Why the sheet could not be expanded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Child sheets.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sheets: Vec<SheetNode>,
}

impl SheetNode {
    fn leaf(name: String, file: PathBuf, pins: Vec<String>) -> Self {
        Self {
            name,
            file,
            symbol_count: 0,
            wire_count: 0,
            label_count: 0,
            pins,
            error: None,
            sheets: Vec::new(),
        }
    }

    /// Total number of sheets in this subtree, itself included.
    #[must_use]
    pub fn sheet_count(&self) -> usize {
        1 + self.sheets.iter().map(Self::sheet_count).sum::<usize>()
    }
}

/// Reads the sheet tree rooted at `root`.
///
/// Child files are resolved relative to their parent. A missing or unreadable
/// child and a sheet that includes one of its own ancestors are reported in
/// that node's `error` instead of failing the whole walk. The same file may
/// appear several times when it is instantiated by different parents.
///
/// # Errors
///
/// Returns an error if the root schematic cannot be read or parsed.
pub fn sheet_hierarchy(root: &Path) -> KicadResult<SheetNode> {
    let sch = Schematic::open(root)?;
    let name = root
        .file_stem()
        .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let mut node = SheetNode::leaf(name, root.to_path_buf(), Vec::new());
    let mut ancestry = vec![canonical(root)];
    expand(&mut node, &sch, &mut ancestry);
    debug!(root = %root.display(), sheets = node.sheet_count(), "Read sheet hierarchy");
    Ok(node)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn expand(node: &mut SheetNode, sch: &Schematic, ancestry: &mut Vec<PathBuf>) {
    node.symbol_count = sch.symbols.iter().filter(|s| !s.is_power).count();
    node.wire_count = sch.wires.len();
    node.label_count = sch.labels.len();

    let base = node.file.parent().map(Path::to_path_buf).unwrap_or_default();
    for sheet in &sch.sheets {
        let file = base.join(&sheet.file);
        let pins = sheet.pins.iter().map(|p| p.name.clone()).collect();
        let mut child = SheetNode::leaf(sheet.name.clone(), file.clone(), pins);
        let key = canonical(&file);

        if ancestry.contains(&key) {
            warn!(sheet = %sheet.name, file = %file.display(), "Sheet includes its own ancestor");
            child.error = Some(format!("cycle: {} is an ancestor of this sheet", sheet.file));
        } else {
            match Schematic::open(&file) {
                Ok(child_sch) => {
                    ancestry.push(key);
                    expand(&mut child, &child_sch, ancestry);
                    ancestry.pop();
                }
                Err(e) => {
                    warn!(sheet = %sheet.name, file = %file.display(), error = %e, "Cannot read child sheet");
                    child.error = Some(e.to_string());
                }
            }
        }
        node.sheets.push(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sheet_ref(name: &str, file: &str) -> String {
        format!(
            "  (sheet (at 10 10) (size 20 10)\n    (property \"Sheetname\" \"{name}\")\n    (property \"Sheetfile\" \"{file}\")\n    (pin \"IN\" input (at 10 15 180))\n  )\n"
        )
    }

    fn write(dir: &Path, file: &str, body: &str) {
        fs::write(dir.join(file), format!("(kicad_sch\n{body})\n")).unwrap();
    }

    #[test]
    fn nested_sheets_and_missing_file() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "root.kicad_sch",
            &format!("{}{}", sheet_ref("Power", "power.kicad_sch"), sheet_ref("Gone", "gone.kicad_sch")),
        );
        write(
            dir.path(),
            "power.kicad_sch",
            "  (wire (pts (xy 0 0) (xy 1 0)))\n  (hierarchical_label \"IN\" (at 0 0 0))\n",
        );

        let tree = sheet_hierarchy(&dir.path().join("root.kicad_sch")).unwrap();
        assert_eq!(tree.name, "root");
        assert_eq!(tree.sheets.len(), 2);
        let power = &tree.sheets[0];
        assert_eq!(power.name, "Power");
        assert_eq!(power.wire_count, 1);
        assert_eq!(power.label_count, 1);
        assert_eq!(power.pins, vec!["IN".to_string()]);
        assert!(power.error.is_none());
        assert!(tree.sheets[1].error.is_some());
        assert_eq!(tree.sheet_count(), 3);
    }

    #[test]
    fn cycles_are_reported_not_followed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.kicad_sch", &sheet_ref("B", "b.kicad_sch"));
        write(dir.path(), "b.kicad_sch", &sheet_ref("A", "a.kicad_sch"));

        let tree = sheet_hierarchy(&dir.path().join("a.kicad_sch")).unwrap();
        let b = &tree.sheets[0];
        assert!(b.error.is_none());
        let back = &b.sheets[0];
        assert!(back.error.as_deref().unwrap().starts_with("cycle"));
        assert!(back.sheets.is_empty());
    }

    #[test]
    fn shared_subsheet_is_not_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "root.kicad_sch",
            &format!("{}{}", sheet_ref("Ch1", "chan.kicad_sch"), sheet_ref("Ch2", "chan.kicad_sch")),
        );
        write(dir.path(), "chan.kicad_sch", "");
        let tree = sheet_hierarchy(&dir.path().join("root.kicad_sch")).unwrap();
        assert!(tree.sheets.iter().all(|s| s.error.is_none()));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(sheet_hierarchy(&dir.path().join("nope.kicad_sch")).is_err());
    }
}
