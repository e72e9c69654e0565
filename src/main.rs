//! kicad-file-backend: inspect KiCad design files from the command line
//!
//! Every subcommand prints a pretty JSON result on stdout. Only
//! `register-library` writes a file (the project library table). Logs go to
//! stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, Level};
use tracing_subscriber::EnvFilter;

use kicad_file_backend::config::{self, Config};
use kicad_file_backend::error::ConfigError;
use kicad_file_backend::kicad::board::Board;
use kicad_file_backend::kicad::compare::compare_files;
use kicad_file_backend::kicad::document::read_document;
use kicad_file_backend::kicad::library::{
    project_symbol_libraries, register_project_library, search_footprints, suggest_footprints,
    LibraryKind,
};
use kicad_file_backend::kicad::schematic::{
    net_pins, pin_net, resolve_nets, sheet_hierarchy, validate, Schematic,
};
use kicad_file_backend::kicad::sexpr::{parse, to_text};
use kicad_file_backend::kicad::KicadError;

/// Structural engine for KiCad schematic, board and library files.
///
/// Reads `.kicad_sch`, `.kicad_pcb`, `.kicad_sym` and `.kicad_mod` files
/// directly, without a KiCad installation.
#[derive(Parser, Debug)]
#[command(name = "kicad-file-backend")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse any S-expression file and print its tree
    Parse {
        /// File to parse
        file: PathBuf,
        /// Print the re-serialised S-expression text instead of JSON
        #[arg(long)]
        sexpr: bool,
    },
    /// Print the typed view of a schematic
    Schematic {
        /// `.kicad_sch` file
        file: PathBuf,
    },
    /// Print the typed view of a board
    Board {
        /// `.kicad_pcb` file
        file: PathBuf,
    },
    /// Print the document-space pin positions of one component
    Pins {
        /// `.kicad_sch` file
        file: PathBuf,
        /// Reference designator, e.g. `U1`
        reference: String,
    },
    /// Resolve every net of a schematic
    Nets {
        /// `.kicad_sch` file
        file: PathBuf,
    },
    /// Print the net a component pin belongs to
    PinNet {
        /// `.kicad_sch` file
        file: PathBuf,
        /// Reference designator
        reference: String,
        /// Pin number
        pin: String,
    },
    /// Print the component pins on a named net
    NetPins {
        /// `.kicad_sch` file
        file: PathBuf,
        /// Net name or alias
        net: String,
    },
    /// Run the electrical checks; exits non-zero when errors are found
    Validate {
        /// `.kicad_sch` file
        file: PathBuf,
    },
    /// Compare a schematic with its board; exits non-zero when out of sync
    Compare {
        /// `.kicad_sch` file
        schematic: PathBuf,
        /// `.kicad_pcb` file
        board: PathBuf,
    },
    /// Print the hierarchical sheet tree
    Hierarchy {
        /// Root `.kicad_sch` file
        file: PathBuf,
    },
    /// Search the configured symbol libraries by name
    SearchSymbols {
        /// Case-insensitive substring
        query: String,
        /// Maximum number of hits
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Search the configured footprint libraries by name
    SearchFootprints {
        /// Case-insensitive substring
        query: String,
        /// Maximum number of hits
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List footprints matching a library symbol's footprint filters
    SuggestFootprints {
        /// Symbol id, e.g. `Device:R`
        lib_id: String,
        /// Maximum number of hits
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Print the values of a board's setup section
    DesignRules {
        /// `.kicad_pcb` file
        file: PathBuf,
    },
    /// Add a library to the project's sym-lib-table or fp-lib-table
    RegisterLibrary {
        /// Project directory or any file inside it
        project: PathBuf,
        /// Library nickname
        name: String,
        /// `.kicad_sym` file or `.pretty` directory
        path: PathBuf,
        /// Which table to add the library to
        #[arg(long, value_enum, default_value_t = TableKind::Symbol)]
        kind: TableKind,
    },
}

/// Library table selected by `register-library --kind`.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum TableKind {
    Symbol,
    Footprint,
}

impl From<TableKind> for LibraryKind {
    fn from(kind: TableKind) -> Self {
        match kind {
            TableKind::Symbol => Self::Symbol,
            TableKind::Footprint => Self::Footprint,
        }
    }
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Schematic { .. } => "schematic",
            Self::Board { .. } => "board",
            Self::Pins { .. } => "pins",
            Self::Nets { .. } => "nets",
            Self::PinNet { .. } => "pin-net",
            Self::NetPins { .. } => "net-pins",
            Self::Validate { .. } => "validate",
            Self::Compare { .. } => "compare",
            Self::Hierarchy { .. } => "hierarchy",
            Self::SearchSymbols { .. } => "search-symbols",
            Self::SearchFootprints { .. } => "search-footprints",
            Self::SuggestFootprints { .. } => "suggest-footprints",
            Self::DesignRules { .. } => "design-rules",
            Self::RegisterLibrary { .. } => "register-library",
        }
    }
}

/// Errors surfaced by a subcommand.
#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Kicad(#[from] KicadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Opens a schematic and fills in library definitions its cache lacks, from
/// the project `sym-lib-table` first and the configured libraries after.
fn open_schematic(path: &Path, cfg: &Config) -> Result<Schematic, CliError> {
    let mut sch = Schematic::open(path)?;
    let libraries = project_symbol_libraries(path)?.chain(cfg.library_set()?);
    if !libraries.is_empty() {
        sch.fill_missing_definitions(&libraries);
    }
    Ok(sch)
}

/// Runs one subcommand. `Ok(false)` means the command ran but found problems.
fn run(command: Command, cfg: &Config) -> Result<bool, CliError> {
    match command {
        Command::Parse { file, sexpr } => {
            let root = parse(&read_document(&file)?)?;
            if sexpr {
                print!("{}", to_text(&root));
            } else {
                print_json(&root)?;
            }
        }
        Command::Schematic { file } => print_json(&Schematic::open(&file)?)?,
        Command::Board { file } => print_json(&Board::open(&file)?)?,
        Command::Pins { file, reference } => {
            print_json(&open_schematic(&file, cfg)?.pin_positions(&reference)?)?;
        }
        Command::Nets { file } => print_json(&resolve_nets(&open_schematic(&file, cfg)?))?,
        Command::PinNet {
            file,
            reference,
            pin,
        } => print_json(&pin_net(&open_schematic(&file, cfg)?, &reference, &pin)?)?,
        Command::NetPins { file, net } => {
            print_json(&net_pins(&open_schematic(&file, cfg)?, &net)?)?;
        }
        Command::Validate { file } => {
            let report = validate(&open_schematic(&file, cfg)?);
            print_json(&report)?;
            return Ok(report.passed());
        }
        Command::Compare { schematic, board } => {
            let comparison = compare_files(&schematic, &board)?;
            print_json(&comparison)?;
            return Ok(comparison.in_sync());
        }
        Command::Hierarchy { file } => print_json(&sheet_hierarchy(&file)?)?,
        Command::SearchSymbols { query, limit } => {
            print_json(&cfg.library_set()?.search(&query, limit))?;
        }
        Command::SearchFootprints { query, limit } => {
            print_json(&search_footprints(&cfg.footprint_dirs()?, &query, limit))?;
        }
        Command::SuggestFootprints { lib_id, limit } => {
            let symbol = cfg
                .library_set()?
                .find_symbol(&lib_id)?
                .ok_or_else(|| KicadError::not_found("library symbol", &lib_id))?;
            print_json(&suggest_footprints(&symbol, &cfg.footprint_dirs()?, limit))?;
        }
        Command::DesignRules { file } => print_json(&Board::open(&file)?.design_rules)?,
        Command::RegisterLibrary {
            project,
            name,
            path,
            kind,
        } => print_json(&register_project_library(&project, &name, &path, kind.into())?)?,
    }
    Ok(true)
}

/// Entry point for the kicad-file-backend CLI.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    let name = args.command.name();
    info!(version = env!("CARGO_PKG_VERSION"), command = name, "Starting");

    match run(args.command, &cfg) {
        Ok(true) => {
            debug!(command = name, "Done");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            info!(command = name, "Completed with findings");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(command = name, error = %e, "Command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(get_log_level(3, true, "trace"), Level::ERROR);
    }

    #[test]
    fn config_level_applies_without_flags() {
        assert_eq!(get_log_level(0, false, "Debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "loud"), Level::WARN);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
    }

    #[test]
    fn subcommand_names_match_clap() {
        let args = Args::try_parse_from(["kicad-file-backend", "pin-net", "a.kicad_sch", "U1", "3"])
            .unwrap();
        assert_eq!(args.command.name(), "pin-net");
        let args =
            Args::try_parse_from(["kicad-file-backend", "-vv", "search-footprints", "0603"]).unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.command.name(), "search-footprints");
    }

    #[test]
    fn register_library_defaults_to_symbols() {
        let args = Args::try_parse_from([
            "kicad-file-backend",
            "register-library",
            "proj",
            "Mine",
            "Mine.pretty",
            "--kind",
            "footprint",
        ])
        .unwrap();
        assert_eq!(args.command.name(), "register-library");
        let Command::RegisterLibrary { kind, .. } = args.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(LibraryKind::from(kind), LibraryKind::Footprint);

        let args =
            Args::try_parse_from(["kicad-file-backend", "register-library", "proj", "Mine", "Mine.kicad_sym"])
                .unwrap();
        let Command::RegisterLibrary { kind, .. } = args.command else {
            panic!("wrong subcommand");
        };
        assert_eq!(LibraryKind::from(kind), LibraryKind::Symbol);

        let args = Args::try_parse_from(["kicad-file-backend", "suggest-footprints", "Device:R"]).unwrap();
        assert_eq!(args.command.name(), "suggest-footprints");
        let args = Args::try_parse_from(["kicad-file-backend", "design-rules", "b.kicad_pcb"]).unwrap();
        assert_eq!(args.command.name(), "design-rules");
    }
}
