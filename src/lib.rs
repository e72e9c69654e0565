//! kicad-file-backend: structural engine for KiCad design files
//!
//! This library reads and edits KiCad schematic, board and library files
//! directly, with no KiCad installation present.
//!
//! # Architecture
//!
//! Reads flow one way (text → tree → derived views) and writes flow the other
//! (request → located span → text splice → full-file overwrite):
//!
//! - **S-expression engine**: tokenizer/parser, balanced-block locator and
//!   tagged-block finder working on raw document text
//! - **Structural editor**: byte-exact insert, replace and remove primitives
//! - **Library cache injector**: copies library symbols into a schematic's
//!   `lib_symbols` section under collision-free qualified names
//! - **Connectivity resolver**: derives nets from pin geometry, wires, labels,
//!   junctions and power symbols
//! - **Validator/comparator**: electrical sanity checks and schematic/board
//!   reconciliation
//!
//! Nothing is cached between calls: every operation re-reads its input.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration error types
//! - [`kicad`]: KiCad file format handling

pub mod config;
pub mod error;
pub mod kicad;
