//! Logging setup on top of the `log` facade and `env_logger`.
//!
//! The level comes from, in priority order:
//!
//! 1. `RUST_LOG` (if set)
//! 2. `--quiet` (errors only) or `-v`/`-vv` (debug/trace)
//! 3. Default: info
//!
//! Debug builds prefix each line with a timestamp, and at `-v` or more the
//! module path. Release builds print level and message only.
//!
//! ```rust,no_run
//! use filestamp::logging::init_logging;
//!
//! init_logging(1, false, false);
//! log::debug!("cache opened");
//! ```

use env_logger::{Builder, WriteStyle};
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Initialize the logger. Call once, before any logging.
///
/// `no_color` disables ANSI styling of the level column.
///
/// # Panics
///
/// Panics if a logger is already installed, as `env_logger::Builder::init` does.
pub fn init_logging(verbose: u8, quiet: bool, no_color: bool) {
    let mut builder = build_logger(verbose, quiet, no_color);
    builder.init();
    log::debug!("Logging initialized at level: {}", current_level_name());
}

/// Like [`init_logging`], but returns instead of panicking when a logger
/// already exists. Used by `run_app`, which tests call repeatedly.
pub fn try_init_logging(verbose: u8, quiet: bool, no_color: bool) -> bool {
    build_logger(verbose, quiet, no_color).try_init().is_ok()
}

fn build_logger(verbose: u8, quiet: bool, no_color: bool) -> Builder {
    let mut builder = Builder::new();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        // ignore and globset are chatty at debug
        builder.filter_level(determine_level(verbose, quiet));
        if verbose < 3 {
            builder.filter_module("ignore", LevelFilter::Warn);
            builder.filter_module("globset", LevelFilter::Warn);
        }
    }

    if no_color {
        builder.write_style(WriteStyle::Never);
    }

    configure_format(&mut builder, verbose);
    builder
}

/// Map CLI flags to a level filter. `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let level_style = buf.default_level_style(level);
            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} {}",
                    timestamp,
                    level,
                    record.args()
                )
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let level_style = buf.default_level_style(level);
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} {}",
                level,
                record.args()
            )
        });
    }
}

/// The current maximum log level as a lowercase name.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
