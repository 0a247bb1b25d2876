//! filestamp - file change detection backed by a persistent cache
//!
//! For every tracked file the cache stores the modification time, size and
//! content checksum last observed, so a caller can tell which files may have
//! changed without rehashing the whole tree on every run.
//!
//! - [`cache`]: the SQLite store, its schema migrations and the record model
//! - [`scanner`]: directory walking, hashing and cache keys
//! - [`detect`]: a full pass over a tree (classify, hash, confirm, remove)
//! - [`output`], [`cli`]: the command-line front end

pub mod cache;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use cache::{CacheError, FileStateCache, Migrator};
use cli::{Cli, Commands, ForgetArgs, ListArgs, OutputFormat, WalkArgs};
use config::Config;
use detect::{ChangeDetector, DetectError, DetectorConfig, PathError, ScanReport};
use error::ExitCode;
use output::{JsonListing, JsonOutput, TextOutput};
use progress::{Progress, ProgressCallback};
use scanner::path_utils::normalize_path_str;
use scanner::WalkerConfig;

/// Terminal settings shared by every command.
#[derive(Debug, Clone, Copy)]
struct Ui {
    quiet: bool,
    color: bool,
}

/// Run a parsed command line and return the process exit code.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, the store cannot be
/// opened or migrated, the root is not a directory, or output cannot be
/// written. Per-file problems do not error; they yield
/// [`ExitCode::PartialSuccess`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::try_init_logging(cli.verbose, cli.quiet, cli.no_color);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(cache) = cli.cache {
        config.cache_path = Some(cache);
    }
    let ui = Ui {
        quiet: cli.quiet,
        color: !cli.no_color && std::io::stdout().is_terminal(),
    };

    match cli.command {
        Commands::Scan(args) => run_walk(&args.walk, config, ui, args.dry_run, args.clear_cache),
        Commands::Status(args) => run_walk(&args.walk, config, ui, true, false),
        Commands::Migrate => run_migrate(&config, ui),
        Commands::List(args) => run_list(&args, &config, ui),
        Commands::Forget(args) => run_forget(&args, &config, ui),
    }
}

/// Fold walk flags into the loaded configuration. Flags only switch
/// features on; patterns are appended.
fn apply_walk_args(mut config: Config, args: &WalkArgs) -> Config {
    config.force_deep_check |= args.force_deep_check;
    config.follow_symlinks |= args.follow_symlinks;
    config.skip_hidden |= args.skip_hidden;
    config
        .ignore_patterns
        .extend(args.ignore_patterns.iter().cloned());
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    config
}

/// `scan` and `status`.
fn run_walk(
    args: &WalkArgs,
    config: Config,
    ui: Ui,
    dry_run: bool,
    clear_cache: bool,
) -> Result<ExitCode> {
    let config = apply_walk_args(config, args);
    let root = args.root.as_path();

    // Checked before opening, since the default store lives inside the root
    if !root.exists() {
        return Err(DetectError::PathNotFound(root.to_path_buf()).into());
    }
    if !root.is_dir() {
        return Err(DetectError::NotADirectory(root.to_path_buf()).into());
    }

    let store = config.store_path_for_root(root);
    let cache = Arc::new(open_for_walk(&store, &config, dry_run)?);

    if clear_cache {
        if dry_run {
            log::warn!("--clear-cache ignored in a dry run");
        } else {
            let cleared = cache.clear().context("Failed to clear the cache")?;
            log::info!("Cleared {} records from {}", cleared, store.display());
        }
    }

    let shutdown = signal::install_handler()?;
    let progress: Arc<dyn ProgressCallback> =
        Arc::new(Progress::new(ui.quiet || args.output == OutputFormat::Json));

    let detector_config = DetectorConfig::default()
        .with_threads(config.threads)
        .with_force_deep_check(config.force_deep_check)
        .with_dry_run(dry_run)
        .with_walker_config(WalkerConfig {
            follow_symlinks: config.follow_symlinks,
            skip_hidden: config.skip_hidden,
            ignore_patterns: config.ignore_patterns.clone(),
            exclude_paths: Vec::new(),
        })
        .with_shutdown_flag(shutdown.get_flag())
        .with_progress_callback(progress);

    let detector = ChangeDetector::new(Arc::clone(&cache), detector_config);
    let report = detector.detect(root)?;
    drop(detector);

    let exit_code = exit_code_for(&report);
    let mut stdout = std::io::stdout().lock();
    match args.output {
        OutputFormat::Json => JsonOutput::new(&report, exit_code).write_to(&mut stdout, true)?,
        OutputFormat::Text => {
            if !ui.quiet {
                TextOutput::new(ui.color).write_report(&report, &mut stdout)?;
            }
        }
    }
    stdout.flush()?;

    close(cache)?;
    Ok(exit_code)
}

/// Writable store for a scan; read-only (or in-memory when absent) for a
/// dry run, which must not create or migrate anything.
fn open_for_walk(store: &Path, config: &Config, dry_run: bool) -> Result<FileStateCache> {
    let cache: Result<FileStateCache> = if !dry_run {
        FileStateCache::open_with(store, &config.cache_options()).map_err(Into::into)
    } else if store.exists() {
        FileStateCache::open_read_only(store).map_err(|e| match e {
            CacheError::Migration(_) => anyhow::Error::new(e).context(format!(
                "Cache store {} is not at the current schema; run `filestamp --cache {} migrate` first",
                store.display(),
                store.display()
            )),
            other => other.into(),
        })
    } else {
        log::debug!("No store at {}; dry run against an empty cache", store.display());
        FileStateCache::open_in_memory().map_err(Into::into)
    };
    cache.with_context(|| format!("Failed to open cache store {}", store.display()))
}

fn exit_code_for(report: &ScanReport) -> ExitCode {
    if report.interrupted {
        ExitCode::Interrupted
    } else if report.has_errors() {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    }
}

fn close(cache: Arc<FileStateCache>) -> Result<()> {
    match Arc::try_unwrap(cache) {
        Ok(cache) => cache.close().context("Failed to close cache store"),
        Err(_) => {
            log::debug!("Cache store still shared; closing on drop");
            Ok(())
        }
    }
}

/// `migrate`: bring the store to the latest version and report the steps.
fn run_migrate(config: &Config, ui: Ui) -> Result<ExitCode> {
    let store = config.store_path()?;
    if let Some(parent) = store.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut conn = rusqlite::Connection::open(&store)
        .with_context(|| format!("Failed to open cache store {}", store.display()))?;
    conn.busy_timeout(config.cache_options().busy_timeout)?;
    let report = Migrator::default()
        .migrate(&mut conn)
        .map_err(CacheError::from)?;
    conn.close().map_err(|(_, e)| e)?;

    // Reopen through the cache to apply connection settings and verify the shape
    FileStateCache::open_with(&store, &config.cache_options())?.close()?;

    let mut stdout = std::io::stdout().lock();
    if !ui.quiet {
        TextOutput::new(ui.color).write_migration(&report, &mut stdout)?;
    }
    Ok(ExitCode::Success)
}

/// `list`: print every record, reporting unreadable rows.
fn run_list(args: &ListArgs, config: &Config, ui: Ui) -> Result<ExitCode> {
    let store = config.store_path()?;
    if !store.exists() {
        anyhow::bail!("No cache store at {}", store.display());
    }
    let cache = FileStateCache::open_read_only(&store)
        .with_context(|| format!("Failed to open cache store {}", store.display()))?;

    let mut records = Vec::new();
    let mut corrupt = Vec::new();
    for record in cache.scan_all() {
        match record {
            Ok(record) => records.push(record),
            Err(CacheError::RecordCorrupt { path, reason }) => {
                log::warn!("Corrupt record {}: {}", path, reason);
                corrupt.push(PathError { path, message: reason });
            }
            Err(CacheError::KeyCorrupt { key, reason }) => {
                log::warn!("Corrupt key {}: {}", key, reason);
                corrupt.push(PathError { path: key, message: reason });
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut stdout = std::io::stdout().lock();
    match args.output {
        OutputFormat::Json => {
            JsonListing::new(cache.schema_version()?, &records, corrupt.clone())
                .write_to(&mut stdout, true)?;
        }
        OutputFormat::Text => {
            TextOutput::new(ui.color).write_records(&records, &mut stdout)?;
            for bad in &corrupt {
                writeln!(stdout, "! {}: {}", bad.path, bad.message)?;
            }
        }
    }
    stdout.flush()?;
    cache.close()?;

    Ok(if corrupt.is_empty() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    })
}

/// `forget`: remove records by key.
fn run_forget(args: &ForgetArgs, config: &Config, ui: Ui) -> Result<ExitCode> {
    let store = config.store_path()?;
    let cache = FileStateCache::open_with(&store, &config.cache_options())
        .with_context(|| format!("Failed to open cache store {}", store.display()))?;

    let mut stdout = std::io::stdout().lock();
    for key in &args.keys {
        let key = normalize_path_str(key);
        let removed = cache.remove(&key)?;
        if !ui.quiet {
            if removed {
                writeln!(stdout, "Forgot {}", key)?;
            } else {
                writeln!(stdout, "Not tracked: {}", key)?;
            }
        }
    }
    cache.close()?;
    Ok(ExitCode::Success)
}
