//! Command-line interface definitions.
//!
//! # Example
//!
//! ```bash
//! # Record the state of a tree, reporting what changed since last time
//! filestamp scan ./site
//!
//! # Same, as JSON, without writing the store
//! filestamp scan ./site --dry-run --output json
//!
//! # What would change, read-only
//! filestamp status ./site
//!
//! # Upgrade an old store in place
//! filestamp --cache ./site/.filestamp.sqlite migrate
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// File change detection backed by a persistent mtime/size/checksum cache.
#[derive(Debug, Parser)]
#[command(name = "filestamp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report fatal errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache store location
    ///
    /// Defaults to <ROOT>/.filestamp.sqlite for scan and status, and to the
    /// platform cache directory otherwise.
    #[arg(long, global = true, value_name = "FILE")]
    pub cache: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk a tree, report changes since the last scan and record them
    Scan(ScanArgs),
    /// Report changes without writing the store
    Status(StatusArgs),
    /// Bring the store to the latest schema version
    Migrate,
    /// Print every stored record
    List(ListArgs),
    /// Drop the records for the given keys
    Forget(ForgetArgs),
}

/// Walk options shared by `scan` and `status`.
#[derive(Debug, Clone, Args)]
pub struct WalkArgs {
    /// Directory to check
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Hash every file, even when mtime and size are unchanged
    #[arg(long)]
    pub force_deep_check: bool,

    /// Glob patterns to ignore (can be specified multiple times)
    ///
    /// These patterns are added to any .gitignore patterns found.
    #[arg(short, long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Follow symbolic links
    ///
    /// Warning: May cause infinite loops if symlinks form cycles.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (starting with .)
    #[arg(long)]
    pub skip_hidden: bool,

    /// Number of hashing threads (default: 4, or the configured value)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub walk: WalkArgs,

    /// Delete every record before scanning
    #[arg(long)]
    pub clear_cache: bool,

    /// Classify and hash, but do not write the store
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the status subcommand.
#[derive(Debug, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub walk: WalkArgs,
}

/// Arguments for the list subcommand.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the forget subcommand.
#[derive(Debug, Args)]
pub struct ForgetArgs {
    /// Keys to drop, as printed by `list`
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,
}

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
