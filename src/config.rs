//! Layered application configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config`, else `filestamp.toml` in the platform config dir)
//! 3. Environment, `FILESTAMP_` prefix, `__` for nesting
//!    (`FILESTAMP_STORE__BUSY_TIMEOUT_MS=250`)
//! 4. CLI flags, applied by the caller
//!
//! ```toml
//! threads = 8
//! skip_hidden = true
//! ignore_patterns = ["target/", "*.tmp"]
//!
//! [store]
//! busy_timeout_ms = 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FILESTAMP_";

/// File name of the store written next to a scanned tree.
pub const DEFAULT_STORE_NAME: &str = ".filestamp.sqlite";

/// Store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Milliseconds to wait on another process's lock.
    pub busy_timeout_ms: u64,
    /// Records per page when listing the store.
    pub scan_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            scan_page_size: 512,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store location. Unset means `<ROOT>/.filestamp.sqlite` for commands
    /// that take a root, the platform cache dir otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_path: Option<PathBuf>,
    /// Hash every file on every pass.
    pub force_deep_check: bool,
    /// Follow symbolic links while walking.
    pub follow_symlinks: bool,
    /// Skip dotfiles and dot-directories.
    pub skip_hidden: bool,
    /// Extra gitignore-style patterns.
    pub ignore_patterns: Vec<String>,
    /// Hashing threads.
    pub threads: usize,
    /// Store connection settings.
    pub store: StoreConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_path: None,
            force_deep_check: false,
            follow_symlinks: false,
            skip_hidden: false,
            ignore_patterns: Vec::new(),
            threads: 4,
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, then `path` (or the default config file), then the
    /// environment.
    ///
    /// # Errors
    ///
    /// Fails when an explicitly given file is missing, or when any source
    /// holds a value of the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(explicit) => {
                if !explicit.is_file() {
                    anyhow::bail!("Config file not found: {}", explicit.display());
                }
                Self::figment(Some(explicit))
            }
            None => Self::figment(Self::config_path().ok().as_deref()),
        };

        figment
            .extract()
            .context("Failed to read configuration")
    }

    /// The layered sources, without extracting them.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            log::debug!("Reading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Write this configuration as TOML to `path`, or the default location.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created or the file written.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Connection options for the store.
    #[must_use]
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            scan_page_size: self.store.scan_page_size,
            ..CacheOptions::default()
        }
    }

    /// Store location for a command that scans `root`.
    #[must_use]
    pub fn store_path_for_root(&self, root: &Path) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_STORE_NAME))
    }

    /// Store location for commands without a root.
    ///
    /// # Errors
    ///
    /// Fails when no path is configured and the platform has no cache dir.
    pub fn store_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.cache_path {
            return Ok(path.clone());
        }
        Ok(project_dirs()?.cache_dir().join("cache.sqlite"))
    }

    /// Default platform-specific configuration file.
    ///
    /// # Errors
    ///
    /// Fails when the platform has no home directory.
    pub fn config_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("filestamp.toml"))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "filestamp")
        .ok_or_else(|| anyhow::anyhow!("Failed to determine project directories"))
}
