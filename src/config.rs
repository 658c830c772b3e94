// src/config.rs

//! Engine configuration
//!
//! `<cache>/global.toml` holds the knobs of the engine itself; tool
//! configuration coming from profiles lives in [`crate::conf::Conf`].
//!
//! ```toml
//! max_concurrency = 8
//! build_timeout = 3600
//! log_tail = 40
//! keep_going = false
//! policy = "missing"
//!
//! [download]
//! retries = 3
//! backoff = 1.0
//! timeout = 60.0
//! ```

use crate::error::{Error, Result};
use crate::source::DownloadSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Environment variable overriding the cache root
pub const HOME_VAR: &str = "PANTRY_HOME";

/// File name of the engine configuration inside the cache root
pub const CONFIG_FILE: &str = "global.toml";

/// When to build from source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BuildPolicy {
    /// Build packages missing from the cache
    #[default]
    Missing,
    /// Rebuild every package
    Always,
    /// Never build; a missing package is an error
    Never,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_log_tail() -> usize {
    crate::build::runner::DEFAULT_LOG_TAIL
}

/// Configuration of one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cache root; filled in from the environment when loading
    #[serde(skip)]
    pub cache_root: PathBuf,

    /// Nodes driven at the same time
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// Job-count hint for build tools; defaults to the concurrency
    #[serde(default)]
    pub jobs: Option<usize>,

    #[serde(default)]
    pub download: DownloadSettings,

    /// Build subprocess deadline in seconds; unbounded when absent
    #[serde(default)]
    pub build_timeout: Option<u64>,

    /// Lines of build output attached to build failures
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    /// Keep building independent nodes after a failure
    #[serde(default)]
    pub keep_going: bool,

    #[serde(default)]
    pub policy: BuildPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(".pantry"),
            max_concurrency: default_concurrency(),
            jobs: None,
            download: DownloadSettings::default(),
            build_timeout: None,
            log_tail: default_log_tail(),
            keep_going: false,
            policy: BuildPolicy::Missing,
        }
    }
}

/// Cache root from an override value, else `~/.pantry`
pub fn cache_root(override_value: Option<String>) -> Result<PathBuf> {
    if let Some(value) = override_value.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    dirs::home_dir()
        .map(|home| home.join(".pantry"))
        .ok_or_else(|| {
            Error::InvalidConfiguration(format!("no home directory; set {} to a cache folder", HOME_VAR))
        })
}

impl EngineConfig {
    /// Configuration for the cache named by `$PANTRY_HOME` or `~/.pantry`
    pub fn load() -> Result<Self> {
        let root = cache_root(std::env::var(HOME_VAR).ok())?;
        Self::load_from(&root)
    }

    /// Configuration of a given cache root, defaults when no file exists
    pub fn load_from(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            debug!("Loading engine configuration from {}", path.display());
            Self::parse(&fs::read_to_string(&path)?)?
        } else {
            Self::default()
        };
        config.cache_root = root.to_path_buf();
        Ok(config)
    }

    /// Parse `global.toml` content
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.max_concurrency == 0 {
            return Err(Error::InvalidConfiguration(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.build_timeout.map(Duration::from_secs)
    }

    /// Job-count hint handed to build tools
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or(self.max_concurrency).max(1)
    }
}
