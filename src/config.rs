//! Run configuration and the optional TOML defaults file.
//!
//! [`PipelineConfig`] is built once per run and passed by reference to every
//! component. Values come from, in increasing priority: built-in defaults,
//! a [`FileConfig`] loaded from disk, then explicit command-line flags.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::download::paths::DEFAULT_OUTPUT_DIR;

/// Default catalog listing pages fetched concurrently.
pub const DEFAULT_CATALOG_PAGE_WORKERS: usize = 100;
/// Default series processed concurrently.
pub const DEFAULT_ITEM_WORKERS: usize = 10;
/// Default chapters processed concurrently per run.
pub const DEFAULT_CHAPTER_WORKERS: usize = 5;
/// Default assets downloaded concurrently per run.
pub const DEFAULT_ASSET_WORKERS: usize = 20;
/// Upper bound for any worker count.
pub const MAX_WORKERS: usize = 100;
/// Upper bound for attempts per download.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`FileConfig`].
    #[error("invalid config file {path}: {source}")]
    Toml {
        /// Config file path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Accepted range or form.
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Immutable settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Catalog listing pages fetched concurrently (adapter-owned pool).
    pub catalog_page_workers: usize,
    /// Series processed concurrently.
    pub item_workers: usize,
    /// Chapters processed concurrently.
    pub chapter_workers: usize,
    /// Assets downloaded concurrently.
    pub asset_workers: usize,
    /// Per-request timeout.
    pub transport_timeout: Duration,
    /// Attempts per download, including the first.
    pub max_retries: u32,
    /// Linear backoff unit.
    pub retry_base_delay: Duration,
    /// Per-task pause before each asset download.
    pub asset_delay: Duration,
    /// Pause between sequential chapter probes.
    pub probe_delay: Duration,
    /// Minimum spacing between same-host requests; zero disables.
    pub rate_limit: Duration,
    /// Output root.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog_page_workers: DEFAULT_CATALOG_PAGE_WORKERS,
            item_workers: DEFAULT_ITEM_WORKERS,
            chapter_workers: DEFAULT_CHAPTER_WORKERS,
            asset_workers: DEFAULT_ASSET_WORKERS,
            transport_timeout: Duration::from_secs(15),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            asset_delay: Duration::from_millis(50),
            probe_delay: Duration::from_millis(100),
            rate_limit: Duration::ZERO,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl PipelineConfig {
    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_workers("catalog_page_workers", self.catalog_page_workers)?;
        validate_workers("item_workers", self.item_workers)?;
        validate_workers("chapter_workers", self.chapter_workers)?;
        validate_workers("asset_workers", self.asset_workers)?;

        if !(1..=MAX_RETRIES_LIMIT).contains(&self.max_retries) {
            return Err(ConfigError::invalid(
                "max_retries",
                self.max_retries,
                "range 1..=10",
            ));
        }
        if self.transport_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "transport_timeout",
                format!("{:?}", self.transport_timeout),
                "a non-zero duration",
            ));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("output_dir", "\"\"", "a non-empty path"));
        }
        Ok(())
    }

    /// Copy writing under `{output_dir}/{site}`, for runs that drive several sites.
    #[must_use]
    pub fn scoped_to_site(&self, site: &str) -> Self {
        Self {
            output_dir: self.output_dir.join(site),
            ..self.clone()
        }
    }
}

fn validate_workers(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if (1..=MAX_WORKERS).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, value, "range 1..=100"))
    }
}

/// Defaults read from a TOML file. Every key is optional; unknown keys are rejected.
///
/// ```toml
/// workers = 30
/// max_retries = 5
/// output_dir = "/srv/manhwa"
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Catalog listing pages fetched concurrently.
    pub catalog_page_workers: Option<usize>,
    /// Series processed concurrently.
    pub item_workers: Option<usize>,
    /// Chapters processed concurrently.
    pub chapter_workers: Option<usize>,
    /// Assets downloaded concurrently (same as `--workers`).
    pub workers: Option<usize>,
    /// Attempts per download.
    pub max_retries: Option<u32>,
    /// Linear backoff unit in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Per-asset pause in milliseconds.
    pub asset_delay_ms: Option<u64>,
    /// Chapter probe pause in milliseconds.
    pub probe_delay_ms: Option<u64>,
    /// Per-host spacing in milliseconds (0 disables).
    pub rate_limit_ms: Option<u64>,
    /// Output root.
    pub output_dir: Option<PathBuf>,
    /// Default log filter when neither `RUST_LOG` nor `-v`/`-q` is given.
    pub log_level: Option<String>,
}

impl FileConfig {
    /// Parses a config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if unreadable, [`ConfigError::Toml`] if malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML decoding error.
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Default config location.
    ///
    /// Priority:
    /// 1. `$XDG_CONFIG_HOME/manhwa-downloader/config.toml`
    /// 2. `$HOME/.config/manhwa-downloader/config.toml`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        if let Some(xdg) = env_var_non_empty_os("XDG_CONFIG_HOME") {
            return Some(
                PathBuf::from(xdg)
                    .join("manhwa-downloader")
                    .join("config.toml"),
            );
        }
        let home = env_var_non_empty_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("manhwa-downloader")
                .join("config.toml"),
        )
    }

    /// Loads the default config file if it exists.
    ///
    /// # Errors
    ///
    /// Same as [`FileConfig::load`] when the file exists but is bad.
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Overlays the values present in this file onto `config`.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(value) = self.catalog_page_workers {
            config.catalog_page_workers = value;
        }
        if let Some(value) = self.item_workers {
            config.item_workers = value;
        }
        if let Some(value) = self.chapter_workers {
            config.chapter_workers = value;
        }
        if let Some(value) = self.workers {
            config.asset_workers = value;
        }
        if let Some(value) = self.max_retries {
            config.max_retries = value;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            config.transport_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.asset_delay_ms {
            config.asset_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.probe_delay_ms {
            config.probe_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.rate_limit_ms {
            config.rate_limit = Duration::from_millis(ms);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
    }
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
