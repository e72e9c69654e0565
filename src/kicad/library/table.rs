//! Project library tables (`sym-lib-table`, `fp-lib-table`).

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::kicad::document::{read_document, write_document};
use crate::kicad::edit::insert_before_end;
use crate::kicad::error::{KicadError, KicadResult};
use crate::kicad::sexpr::find::{block_value, find_blocks_at_depth};
use crate::kicad::sexpr::quote;

/// Table format version written into new tables.
pub const TABLE_VERSION: u32 = 7;

/// Which project table a library belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// `.kicad_sym` files, listed in `sym-lib-table`.
    Symbol,
    /// `.pretty` directories, listed in `fp-lib-table`.
    Footprint,
}

impl LibraryKind {
    /// File name of the table inside the project directory.
    #[must_use]
    pub const fn table_file(self) -> &'static str {
        match self {
            Self::Symbol => "sym-lib-table",
            Self::Footprint => "fp-lib-table",
        }
    }

    /// Root tag of the table.
    #[must_use]
    pub const fn root_tag(self) -> &'static str {
        match self {
            Self::Symbol => "sym_lib_table",
            Self::Footprint => "fp_lib_table",
        }
    }
}

/// Result of [`register_project_library`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registration {
    /// Library nickname.
    pub name: String,
    /// Table file that holds the entry.
    pub table: PathBuf,
    /// URI written for a new entry; `None` when the name was already listed.
    pub uri: Option<String>,
    /// True when the table already had an entry with this nickname.
    pub already_registered: bool,
}

/// Text of an empty library table.
#[must_use]
pub fn new_library_table(kind: LibraryKind) -> String {
    format!("({}\n  (version {TABLE_VERSION})\n)\n", kind.root_tag())
}

/// Whether the table text lists a library called `name`.
#[must_use]
pub fn table_has_library(table: &str, name: &str) -> bool {
    find_blocks_at_depth(table, "lib", 1).into_iter().any(|lib| {
        find_blocks_at_depth(lib.slice(table), "name", 1)
            .first()
            .and_then(|span| block_value(lib.slice(table), *span))
            .as_deref()
            == Some(name)
    })
}

/// Appends a `(lib …)` entry to the table text.
///
/// # Errors
///
/// Returns [`KicadError::AlreadyExists`] if the nickname is listed and
/// [`KicadError::MalformedDocument`] if the table is unbalanced.
pub fn add_library_entry(table: &str, name: &str, uri: &str) -> KicadResult<String> {
    if table_has_library(table, name) {
        return Err(KicadError::already_exists("library", name));
    }
    let entry = format!(
        "  (lib (name {})(type \"KiCad\")(uri {})(options \"\")(descr \"\"))",
        quote(name),
        quote(uri)
    );
    insert_before_end(table, &entry)
}

/// URI for `library` as seen from `project_dir`: `${KIPRJMOD}/…` inside the
/// project, the absolute path otherwise. Separators are always `/`.
#[must_use]
pub fn project_uri(project_dir: &Path, library: &Path) -> String {
    let library = fs::canonicalize(library).unwrap_or_else(|_| library.to_path_buf());
    let project_dir = fs::canonicalize(project_dir).unwrap_or_else(|_| project_dir.to_path_buf());
    match library.strip_prefix(&project_dir) {
        Ok(relative) => format!("${{KIPRJMOD}}/{}", slash_path(relative)),
        Err(_) => slash_path(&library),
    }
}

fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::RootDir => out.push('/'),
            other => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&other.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// Registers `library` under `name` in the project's library table.
///
/// `project` is the project directory or any file inside it (the
/// `.kicad_pro` or a schematic). The table is created when missing. A
/// nickname already listed is reported, not raised, and the table is left
/// untouched.
///
/// # Errors
///
/// Returns [`KicadError::InvalidParameter`] for an empty nickname or one
/// containing `:`, and read, parse or write errors for the table.
pub fn register_project_library(
    project: &Path,
    name: &str,
    library: &Path,
    kind: LibraryKind,
) -> KicadResult<Registration> {
    if name.trim().is_empty() || name.contains(':') {
        return Err(KicadError::invalid_parameter(
            "name",
            format!("invalid library nickname {name:?}"),
        ));
    }
    let project_dir = if project.is_dir() {
        project
    } else {
        project.parent().unwrap_or_else(|| Path::new("."))
    };
    let table_path = project_dir.join(kind.table_file());
    let table = if table_path.exists() {
        read_document(&table_path)?
    } else {
        new_library_table(kind)
    };

    if table_has_library(&table, name) {
        debug!(name, table = %table_path.display(), "Library already registered");
        return Ok(Registration {
            name: name.to_string(),
            table: table_path,
            uri: None,
            already_registered: true,
        });
    }

    let uri = project_uri(project_dir, library);
    write_document(&table_path, &add_library_entry(&table, name, &uri)?)?;
    info!(name, uri = %uri, table = %table_path.display(), "Registered project library");
    Ok(Registration {
        name: name.to_string(),
        table: table_path,
        uri: Some(uri),
        already_registered: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kicad::library::project_symbol_libraries;
    use crate::kicad::sexpr::parse_block;
    use tempfile::TempDir;

    #[test]
    fn entries_are_appended_once() {
        let table = new_library_table(LibraryKind::Footprint);
        let out = add_library_entry(&table, "Project", "${KIPRJMOD}/Project.pretty").unwrap();
        assert!(out.starts_with("(fp_lib_table\n  (version 7)\n  (lib (name \"Project\")"));
        assert!(table_has_library(&out, "Project"));
        assert!(!table_has_library(&out, "Proj"));
        assert!(add_library_entry(&out, "Project", "x").unwrap_err().is_already_exists());

        let node = parse_block(&out).unwrap();
        let lib = node.child("lib").unwrap();
        assert_eq!(lib.child_str("uri"), Some("${KIPRJMOD}/Project.pretty"));
    }

    #[test]
    fn uri_is_relative_inside_the_project() {
        let dir = TempDir::new().unwrap();
        let inside = dir.path().join("lib").join("Mine.kicad_sym");
        fs::create_dir_all(inside.parent().unwrap()).unwrap();
        fs::write(&inside, "(kicad_symbol_lib)").unwrap();
        assert_eq!(project_uri(dir.path(), &inside), "${KIPRJMOD}/lib/Mine.kicad_sym");

        let elsewhere = TempDir::new().unwrap();
        let outside = elsewhere.path().join("Shared.kicad_sym");
        let uri = project_uri(dir.path(), &outside);
        assert!(!uri.contains("KIPRJMOD"));
        assert!(uri.ends_with("/Shared.kicad_sym"));
    }

    #[test]
    fn registration_creates_and_reuses_the_table() {
        let dir = TempDir::new().unwrap();
        let library = dir.path().join("Mine.kicad_sym");
        fs::write(&library, "(kicad_symbol_lib\n  (symbol \"X\")\n)\n").unwrap();
        let schematic = dir.path().join("main.kicad_sch");

        let first = register_project_library(&schematic, "Mine", &library, LibraryKind::Symbol).unwrap();
        assert!(!first.already_registered);
        assert_eq!(first.uri.as_deref(), Some("${KIPRJMOD}/Mine.kicad_sym"));
        assert_eq!(first.table, dir.path().join("sym-lib-table"));

        let before = fs::read_to_string(&first.table).unwrap();
        let again = register_project_library(dir.path(), "Mine", &library, LibraryKind::Symbol).unwrap();
        assert!(again.already_registered);
        assert_eq!(fs::read_to_string(&first.table).unwrap(), before);

        let libs = project_symbol_libraries(&schematic).unwrap();
        assert_eq!(libs.entries().len(), 1);
        assert_eq!(libs.entries()[0].nickname, "Mine");

        assert!(register_project_library(dir.path(), "", &library, LibraryKind::Symbol).is_err());
        assert!(register_project_library(dir.path(), "a:b", &library, LibraryKind::Symbol).is_err());
    }
}
