//! Configuration layering: defaults, TOML file, environment, CLI flags.

use clap::Parser;
use filestamp::cli::Cli;
use filestamp::config::{Config, DEFAULT_STORE_NAME, ENV_PREFIX};
use filestamp::error::ExitCode;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clear all FILESTAMP_* environment variables to avoid interference.
fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with(ENV_PREFIX) {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_config_file_overrides_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("filestamp.toml");
    fs::write(
        &path,
        r#"
threads = 8
skip_hidden = true
ignore_patterns = ["target/", "*.tmp"]

[store]
busy_timeout_ms = 2000
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.threads, 8);
    assert!(config.skip_hidden);
    assert!(!config.follow_symlinks);
    assert_eq!(config.ignore_patterns, vec!["target/", "*.tmp"]);
    assert_eq!(config.store.busy_timeout_ms, 2000);
    // Untouched nested keys keep their defaults
    assert_eq!(config.store.scan_page_size, 512);
    assert_eq!(config.cache_options().busy_timeout, Duration::from_millis(2000));
}

#[test]
fn test_environment_overrides_file() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("filestamp.toml");
    fs::write(&path, "threads = 8\n[store]\nbusy_timeout_ms = 2000\n").unwrap();

    std::env::set_var("FILESTAMP_THREADS", "2");
    std::env::set_var("FILESTAMP_STORE__BUSY_TIMEOUT_MS", "250");
    let config = Config::load(Some(&path));
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.threads, 2);
    assert_eq!(config.store.busy_timeout_ms, 250);
}

#[test]
fn test_invalid_value_is_an_error() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("filestamp.toml");
    fs::write(&path, "threads = \"many\"\n").unwrap();

    assert!(Config::load(Some(&path)).is_err());
}

#[test]
fn test_save_then_load() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("filestamp.toml");

    let config = Config {
        cache_path: Some(PathBuf::from("/var/cache/site.sqlite")),
        force_deep_check: true,
        threads: 3,
        ..Config::default()
    };
    let written = config.save(Some(&path)).unwrap();
    assert_eq!(written, path);

    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_store_location_defaults_inside_root() {
    let config = Config::default();
    let root = PathBuf::from("/srv/site");
    assert_eq!(
        config.store_path_for_root(&root),
        root.join(DEFAULT_STORE_NAME)
    );
}

#[test]
fn test_missing_config_file_fails_run() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();

    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--config",
        dir.path().join("absent.toml").to_str().unwrap(),
        "scan",
        dir.path().to_str().unwrap(),
    ])
    .unwrap();

    let err = filestamp::run_app(cli).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(!dir.path().join(DEFAULT_STORE_NAME).exists());
}

#[test]
fn test_config_file_cache_path_is_used() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let root = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();
    fs::write(root.path().join("a.txt"), "a").unwrap();

    let store = elsewhere.path().join("site.sqlite");
    let config_path = elsewhere.path().join("filestamp.toml");
    Config {
        cache_path: Some(store.clone()),
        ..Config::default()
    }
    .save(Some(&config_path))
    .unwrap();

    let cli = Cli::try_parse_from([
        "filestamp",
        "--quiet",
        "--config",
        config_path.to_str().unwrap(),
        "scan",
        root.path().to_str().unwrap(),
    ])
    .unwrap();
    assert_eq!(filestamp::run_app(cli).unwrap(), ExitCode::Success);

    assert!(store.exists());
    assert!(!root.path().join(DEFAULT_STORE_NAME).exists());
}
