//! KiCad file format handling.
//!
//! This module reads and edits KiCad's S-expression files in place:
//!
//! - `.kicad_sch`: schematics
//! - `.kicad_pcb`: boards
//! - `.kicad_sym`: symbol libraries
//! - `.kicad_mod`: footprints (one file per footprint inside a `.pretty` directory)
//! - `sym-lib-table`: project library tables
//!
//! # File Format
//!
//! All of these files share one grammar: parenthesised lists whose first
//! element is a bare tag, with quoted strings, numbers and bare words as atoms.
//! KiCad writes them with two-space (schematic) or tab (board) indentation,
//! and users hand-edit them, so edits here never re-serialise a whole file.
//! Instead a block is located by byte span and spliced, which leaves every
//! other byte untouched.
//!
//! # Architecture
//!
//! - [`sexpr`]: tokenizer, tree, balanced-block locator, tagged-block finder
//! - [`edit`]: text splice primitives shared by every mutation
//! - [`schematic`], [`board`], [`library`]: typed views and edits per file kind
//! - [`compare`]: schematic/board reconciliation

pub mod board;
pub mod compare;
pub mod document;
pub mod edit;
pub mod error;
pub mod geometry;
pub mod ident;
pub mod library;
pub mod schematic;
pub mod sexpr;

pub use error::{KicadError, KicadResult};
pub use geometry::{Mirror, Placement, Point, Rotation, COORD_EPSILON};
pub use ident::{LibId, Reference};
pub use sexpr::{Node, Span};
