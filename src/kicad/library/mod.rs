//! Symbol and footprint libraries.
//!
//! Library discovery is injected: callers pass an ordered list of `.kicad_sym`
//! paths (usually expanded from the configuration) as a [`LibrarySet`]. The
//! set is searched in order and the first match wins.

pub mod cache;
pub mod import;
pub mod symbol;
pub mod table;

pub use cache::{cached_symbol_span, ensure_cached, CacheOutcome, CacheStatus};
pub use import::{
    create_symbol_library, import_footprint, import_symbol, import_symbol_file,
    new_symbol_library,
};
pub use symbol::{resolve_symbol, LibPin, LibSymbol, MAX_EXTENDS_DEPTH};
pub use table::{register_project_library, LibraryKind, Registration};

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::document::read_document;
use super::error::{KicadError, KicadResult};
use super::ident::LibId;
use super::sexpr::find::{block_value, find_blocks_at_depth};
use super::sexpr::{parse, parse_block, Node, Span};

/// A parsed `.kicad_sym` file.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolLibrary {
    /// Library nickname (the file stem unless a library table says otherwise).
    pub nickname: String,
    /// File the library was read from.
    pub path: PathBuf,
    /// Top-level symbols by name, in file order.
    pub symbols: IndexMap<String, LibSymbol>,
}

impl SymbolLibrary {
    /// Reads and parses a library file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is malformed.
    pub fn open(path: impl AsRef<Path>) -> KicadResult<Self> {
        let path = path.as_ref();
        let text = read_document(path)?;
        Self::from_text(nickname_of(path), path, &text)
    }

    /// Parses library text.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::MalformedDocument`] if the text does not parse.
    pub fn from_text(
        nickname: impl Into<String>,
        path: impl Into<PathBuf>,
        text: &str,
    ) -> KicadResult<Self> {
        let root = parse(text)?;
        let lib = root
            .items()
            .iter()
            .find(|n| n.is("kicad_symbol_lib"))
            .ok_or_else(|| KicadError::malformed(0, "missing kicad_symbol_lib root"))?;
        let symbols = lib
            .children("symbol")
            .filter_map(LibSymbol::from_node)
            .map(|s| (s.name.clone(), s))
            .collect();
        Ok(Self {
            nickname: nickname.into(),
            path: path.into(),
            symbols,
        })
    }

    /// Symbol names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    /// A symbol with its `extends` chain folded in.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<LibSymbol> {
        resolve_symbol(&self.symbols, name)
    }
}

/// Library nickname for a path: the file stem, with `.pretty` dropped for
/// footprint directories.
#[must_use]
pub fn nickname_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().trim_end_matches(".pretty").to_string())
        .unwrap_or_default()
}

/// One library in a [`LibrarySet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    /// Nickname used in qualified ids.
    pub nickname: String,
    /// Path to the `.kicad_sym` file.
    pub path: PathBuf,
}

/// Ordered list of candidate symbol library files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LibrarySet {
    entries: Vec<LibraryEntry>,
}

/// A symbol block found in a library file.
#[derive(Debug, Clone)]
pub struct FoundSymbol {
    /// Library the symbol came from.
    pub library: LibraryEntry,
    /// Exact text of the top-level `(symbol …)` block.
    pub block: String,
    /// Indentation of the block's first line in the library file.
    pub indent: String,
}

/// One search hit.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMatch {
    /// Qualified id `Library:Name`.
    pub lib_id: String,
    /// Library nickname.
    pub library: String,
    /// Symbol name.
    pub name: String,
    /// Description, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LibrarySet {
    /// Creates a set from paths; nicknames are the file stems.
    #[must_use]
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            entries: paths
                .into_iter()
                .map(|p| {
                    let path = p.into();
                    LibraryEntry {
                        nickname: nickname_of(&path),
                        path,
                    }
                })
                .collect(),
        }
    }

    /// Appends a library with an explicit nickname.
    pub fn push(&mut self, nickname: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.push(LibraryEntry {
            nickname: nickname.into(),
            path: path.into(),
        });
    }

    /// Appends every entry of `other` after the existing ones.
    #[must_use]
    pub fn chain(mut self, other: Self) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// All entries in search order.
    #[must_use]
    pub fn entries(&self) -> &[LibraryEntry] {
        &self.entries
    }

    /// True when the set holds no libraries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries to search for `library`: those whose nickname matches, or every
    /// entry in order when none does.
    #[must_use]
    pub fn candidates(&self, library: &str) -> Vec<&LibraryEntry> {
        let named: Vec<&LibraryEntry> =
            self.entries.iter().filter(|e| e.nickname == library).collect();
        if named.is_empty() {
            self.entries.iter().collect()
        } else {
            named
        }
    }

    /// Finds the top-level block for `lib_id` in the first candidate file
    /// that defines it. Unreadable files are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::InvalidIdentifier`] if `lib_id` is not qualified.
    pub fn find_symbol_block(&self, lib_id: &str) -> KicadResult<Option<FoundSymbol>> {
        let id = LibId::parse(lib_id)?;
        for entry in self.candidates(&id.library) {
            let text = match read_document(&entry.path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "Skipping unreadable library");
                    continue;
                }
            };
            if let Some(span) = top_level_symbol(&text, &id.name) {
                debug!(lib_id, path = %entry.path.display(), "Found library symbol");
                return Ok(Some(FoundSymbol {
                    library: entry.clone(),
                    block: span.slice(&text).to_string(),
                    indent: line_indent(&text, span.start).to_string(),
                }));
            }
        }
        Ok(None)
    }

    /// Resolved definition of `lib_id`, `extends` chain included.
    ///
    /// # Errors
    ///
    /// Returns [`KicadError::InvalidIdentifier`] for an unqualified id.
    pub fn find_symbol(&self, lib_id: &str) -> KicadResult<Option<LibSymbol>> {
        let id = LibId::parse(lib_id)?;
        for entry in self.candidates(&id.library) {
            match SymbolLibrary::open(&entry.path) {
                Ok(lib) => {
                    if let Some(sym) = lib.symbol(&id.name) {
                        return Ok(Some(sym));
                    }
                }
                Err(e) => warn!(path = %entry.path.display(), error = %e, "Skipping library"),
            }
        }
        Ok(None)
    }

    /// Case-insensitive substring search over symbol names, up to `limit` hits.
    #[must_use]
    pub fn search(&self, query: &str, limit: usize) -> Vec<SymbolMatch> {
        let query = query.to_lowercase();
        let mut hits = Vec::new();
        for entry in &self.entries {
            let lib = match SymbolLibrary::open(&entry.path) {
                Ok(lib) => lib,
                Err(e) => {
                    debug!(path = %entry.path.display(), error = %e, "Skipping library in search");
                    continue;
                }
            };
            for sym in lib.symbols.values() {
                if !sym.name.to_lowercase().contains(&query) {
                    continue;
                }
                hits.push(SymbolMatch {
                    lib_id: format!("{}:{}", entry.nickname, sym.name),
                    library: entry.nickname.clone(),
                    name: sym.name.clone(),
                    description: sym.description().map(str::to_string),
                });
                if hits.len() >= limit {
                    return hits;
                }
            }
        }
        hits
    }
}

/// Span of the top-level `(symbol "<name>" …)` in a library text.
#[must_use]
pub fn top_level_symbol(text: &str, name: &str) -> Option<Span> {
    find_blocks_at_depth(text, "symbol", 1)
        .into_iter()
        .find(|span| block_value(text, *span).as_deref() == Some(name))
}

/// Whitespace between the start of the line and `offset`.
#[must_use]
pub fn line_indent(text: &str, offset: usize) -> &str {
    let line_start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let prefix = &text[line_start..offset];
    if prefix.chars().all(|c| c == ' ' || c == '\t') {
        prefix
    } else {
        ""
    }
}

/// Re-indents a block whose continuation lines carry `from` as their base
/// indentation so that they carry `to` instead. The first line is left as is.
#[must_use]
pub fn reindent(block: &str, from: &str, to: &str) -> String {
    let mut lines = block.split('\n');
    let mut out = lines.next().unwrap_or_default().to_string();
    for line in lines {
        out.push('\n');
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(to);
        out.push_str(line.strip_prefix(from).unwrap_or_else(|| line.trim_start()));
    }
    out
}

/// Libraries listed in the `sym-lib-table` next to a schematic.
///
/// `${KIPRJMOD}` and `${PROJ_DIR}` expand to the schematic's directory.
/// Entries whose file does not exist are skipped. A missing table yields an
/// empty set.
///
/// # Errors
///
/// Returns an error if the table exists but cannot be read or parsed.
pub fn project_symbol_libraries(schematic_path: &Path) -> KicadResult<LibrarySet> {
    let project_dir = schematic_path.parent().unwrap_or_else(|| Path::new("."));
    let table_path = project_dir.join("sym-lib-table");
    let mut set = LibrarySet::default();
    if !table_path.exists() {
        return Ok(set);
    }
    let table = parse_block(&read_document(&table_path)?)?;
    let dir = project_dir.to_string_lossy();
    for lib in table.children("lib") {
        let (Some(name), Some(uri)) = (lib.child_str("name"), lib.child_str("uri")) else {
            continue;
        };
        let uri = uri.replace("${KIPRJMOD}", &dir).replace("${PROJ_DIR}", &dir);
        let path = PathBuf::from(uri);
        if path.exists() {
            set.push(name, path);
        } else {
            debug!(path = %path.display(), "Library table entry does not exist");
        }
    }
    Ok(set)
}

/// One footprint found in a `.pretty` directory.
#[derive(Debug, Clone, Serialize)]
pub struct FootprintMatch {
    /// Qualified id `Library:Name`.
    pub lib_id: String,
    /// Library nickname.
    pub library: String,
    /// Footprint name.
    pub name: String,
    /// `.kicad_mod` file.
    pub path: PathBuf,
}

/// Footprints of every `.pretty` directory in order, sorted by file name
/// within each directory. Unreadable directories are skipped.
fn footprint_files(dirs: &[PathBuf]) -> impl Iterator<Item = FootprintMatch> + '_ {
    dirs.iter().flat_map(|dir| {
        let library = nickname_of(dir);
        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|e| e == "kicad_mod"))
                .collect(),
            Err(_) => {
                debug!(path = %dir.display(), "Skipping unreadable footprint library");
                Vec::new()
            }
        };
        files.sort();
        files.into_iter().map(move |path| {
            let name = nickname_of(&path);
            FootprintMatch {
                lib_id: format!("{library}:{name}"),
                library: library.clone(),
                name,
                path,
            }
        })
    })
}

/// Case-insensitive substring search over the `.kicad_mod` files of the given
/// `.pretty` directories, up to `limit` hits.
#[must_use]
pub fn search_footprints(dirs: &[PathBuf], query: &str, limit: usize) -> Vec<FootprintMatch> {
    let query = query.to_lowercase();
    footprint_files(dirs)
        .filter(|hit| hit.name.to_lowercase().contains(&query))
        .take(limit)
        .collect()
}

/// Footprints matching a symbol's `ki_fp_filters` wildcards, up to `limit`.
///
/// Patterns match the footprint name, case-sensitively. A name found in
/// several libraries is reported once, from the first library. A symbol
/// without filters yields no suggestions; malformed patterns are skipped.
#[must_use]
pub fn suggest_footprints(symbol: &LibSymbol, dirs: &[PathBuf], limit: usize) -> Vec<FootprintMatch> {
    let patterns: Vec<glob::Pattern> = symbol
        .footprint_filters()
        .into_iter()
        .filter_map(|filter| match glob::Pattern::new(filter) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(symbol = %symbol.name, filter, error = %e, "Ignoring malformed footprint filter");
                None
            }
        })
        .collect();
    if patterns.is_empty() {
        return Vec::new();
    }
    let mut seen = std::collections::HashSet::new();
    footprint_files(dirs)
        .filter(|hit| patterns.iter().any(|p| p.matches(&hit.name)))
        .filter(|hit| seen.insert(hit.name.clone()))
        .take(limit)
        .collect()
}

/// Parses the `(footprint …)` root of a `.kicad_mod` text.
///
/// # Errors
///
/// Returns [`KicadError::MalformedDocument`] if the text does not parse or has
/// no footprint root.
pub fn parse_footprint_file(text: &str) -> KicadResult<Node> {
    let node = parse_block(text)?;
    if node.is("footprint") || node.is("module") {
        Ok(node)
    } else {
        Err(KicadError::malformed(0, "missing footprint root"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const DEVICE: &str = r#"(kicad_symbol_lib
  (version 20231120)
  (symbol "R"
    (property "Reference" "R")
    (property "ki_description" "Resistor")
    (symbol "R_1_1"
      (pin passive line (at 0 3.81 270) (length 1.27) (name "~") (number "1"))
      (pin passive line (at 0 -3.81 90) (length 1.27) (name "~") (number "2"))
    )
  )
  (symbol "R_Small" (extends "R"))
)
"#;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn library_lists_symbols_and_resolves_extends() {
        let lib = SymbolLibrary::from_text("Device", "Device.kicad_sym", DEVICE).unwrap();
        assert_eq!(lib.names().collect::<Vec<_>>(), vec!["R", "R_Small"]);
        let small = lib.symbol("R_Small").unwrap();
        assert_eq!(small.pins.len(), 2);
        assert!(lib.symbol("C").is_none());
    }

    #[test]
    fn rejects_non_library_text() {
        assert!(SymbolLibrary::from_text("x", "x", "(kicad_sch)").is_err());
    }

    #[test]
    fn candidates_prefer_matching_stem() {
        let set = LibrarySet::new(["/a/Other.kicad_sym", "/b/Device.kicad_sym"]);
        let c = set.candidates("Device");
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].path, PathBuf::from("/b/Device.kicad_sym"));
        assert_eq!(set.candidates("Missing").len(), 2);
    }

    #[test]
    fn find_block_and_search() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "Device.kicad_sym", DEVICE);
        let set = LibrarySet::new([path]);

        let found = set.find_symbol_block("Device:R").unwrap().unwrap();
        assert!(found.block.starts_with("(symbol \"R\""));
        assert_eq!(found.indent, "  ");
        assert!(set.find_symbol_block("Device:C").unwrap().is_none());
        assert!(set.find_symbol_block("R").is_err());

        let hits = set.search("r_sm", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lib_id, "Device:R_Small");
        assert_eq!(set.search("r", 1).len(), 1);
    }

    #[test]
    fn reindent_moves_continuation_lines() {
        let block = "(symbol \"R\"\n    (pin)\n  )";
        assert_eq!(reindent(block, "  ", "    "), "(symbol \"R\"\n      (pin)\n    )");
    }

    #[test]
    fn project_table_substitutes_variables() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Local.kicad_sym", DEVICE);
        write(
            dir.path(),
            "sym-lib-table",
            r#"(sym_lib_table
  (lib (name "Mine")(type "KiCad")(uri "${KIPRJMOD}/Local.kicad_sym")(options "")(descr ""))
  (lib (name "Gone")(type "KiCad")(uri "${PROJ_DIR}/Gone.kicad_sym")(options "")(descr ""))
)
"#,
        );
        let sch = dir.path().join("board.kicad_sch");
        let set = project_symbol_libraries(&sch).unwrap();
        assert_eq!(set.entries().len(), 1);
        assert_eq!(set.entries()[0].nickname, "Mine");

        let empty = project_symbol_libraries(&TempDir::new().unwrap().path().join("x.kicad_sch"));
        assert!(empty.unwrap().is_empty());
    }

    #[test]
    fn footprint_search() {
        let dir = TempDir::new().unwrap();
        let pretty = dir.path().join("Resistor_SMD.pretty");
        fs::create_dir(&pretty).unwrap();
        write(&pretty, "R_0603_1608Metric.kicad_mod", "(footprint \"R_0603_1608Metric\")");
        write(&pretty, "R_0805_2012Metric.kicad_mod", "(footprint \"R_0805_2012Metric\")");
        let hits = search_footprints(&[pretty], "0603", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lib_id, "Resistor_SMD:R_0603_1608Metric");
    }

    #[test]
    fn footprint_suggestions_follow_filters() {
        let dir = TempDir::new().unwrap();
        let smd = dir.path().join("Resistor_SMD.pretty");
        let tht = dir.path().join("Resistor_THT.pretty");
        let caps = dir.path().join("Capacitor_SMD.pretty");
        for (lib, name) in [
            (&smd, "R_0603_1608Metric"),
            (&smd, "R_Array_Convex_4x0603"),
            (&tht, "R_Axial_DIN0207"),
            (&tht, "R_0603_1608Metric"),
            (&caps, "C_0603_1608Metric"),
        ] {
            fs::create_dir_all(lib).unwrap();
            write(lib, &format!("{name}.kicad_mod"), &format!("(footprint \"{name}\")"));
        }
        let lib_text = r#"(kicad_symbol_lib
  (symbol "R" (property "ki_fp_filters" "R_0* R_Axial*"))
  (symbol "X")
)
"#;
        let lib = SymbolLibrary::from_text("Device", "Device.kicad_sym", lib_text).unwrap();
        let dirs = vec![smd, tht, caps];

        let hits = suggest_footprints(&lib.symbol("R").unwrap(), &dirs, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.lib_id.as_str()).collect();
        // the THT copy of R_0603 is a duplicate name
        assert_eq!(ids, vec!["Resistor_SMD:R_0603_1608Metric", "Resistor_THT:R_Axial_DIN0207"]);
        assert_eq!(suggest_footprints(&lib.symbol("R").unwrap(), &dirs, 1).len(), 1);
        assert!(suggest_footprints(&lib.symbol("X").unwrap(), &dirs, 10).is_empty());
    }

    #[test]
    fn footprint_file_root() {
        assert!(parse_footprint_file("(footprint \"X\" (layer \"F.Cu\"))").is_ok());
        assert!(parse_footprint_file("(kicad_pcb)").is_err());
    }
}
