//! Settings parsing for the skills manager.
//!
//! Plain key=value format with `#` comments and optional quotes.
//! Precedence: CLI flags > `--config` file > `$XDG_CONFIG_HOME/osm/config` > defaults.

use crate::error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid number for {key}: {value} (expected 0.0..=1.0)")]
    InvalidFloat { key: String, value: String },
}

impl From<ConfigError> for error::Error {
    fn from(e: ConfigError) -> Self {
        error::Error::config(e.to_string())
    }
}

/// Manager settings.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Directories
    /// Holds appstores.json, catalog.json and skills.json.
    pub data_dir: PathBuf,
    /// Installed skills, scanned by the `local` appstore.
    pub skills_dir: PathBuf,

    // Fetching
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_sec: u64,
    /// Per-source budget for GitHub README/LICENSE lookups.
    pub enrich_timeout_sec: u64,
    pub fetch_retries: u32,
    /// Base backoff, doubled per attempt.
    pub retry_backoff_ms: u64,
    pub cache_ttl_sec: u64,
    pub user_agent: String,

    // Sources
    /// Branch of the mycroft skills-data repository.
    pub marketplace_branch: String,

    // Search
    pub search_threshold: f64,
    pub search_ignore_case: bool,

    // Daemon
    pub sync_interval_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .map_or_else(|| PathBuf::from("~/.local/share/osm"), |d| d.join("osm")),
            skills_dir: dirs::data_local_dir().map_or_else(
                || PathBuf::from("~/.local/share/mycroft/skills"),
                |d| d.join("mycroft/skills"),
            ),
            max_concurrent_fetches: 4,
            fetch_timeout_sec: 30,
            enrich_timeout_sec: 120,
            fetch_retries: 2,
            retry_backoff_ms: 500,
            cache_ttl_sec: 300,
            user_agent: format!("osm/{}", env!("CARGO_PKG_VERSION")),
            marketplace_branch: "21.02".to_string(),
            search_threshold: 0.85,
            search_ignore_case: true,
            sync_interval_sec: 3600,
        }
    }
}

impl Config {
    /// Default settings file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("osm").join("config"))
    }

    /// Resolve settings: defaults, then the default file if it exists, then
    /// `explicit` (which must exist).
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = Self::default_path().filter(|p| p.is_file()) {
            config.load_file(&path)?;
        }
        if let Some(path) = explicit {
            config.load_file(path)?;
        }
        Ok(config)
    }

    /// Load config from a file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Parse config content (key=value format).
    pub fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_sec)
    }

    pub fn enrich_timeout(&self) -> Duration {
        Duration::from_secs(self.enrich_timeout_sec)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_sec)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_sec)
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    /// Apply a single config value.
    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "data_dir" => self.data_dir = expand_home(value),
            "skills_dir" => self.skills_dir = expand_home(value),
            "max_concurrent_fetches" => {
                self.max_concurrent_fetches = Self::parse_int(key, value)?;
                if self.max_concurrent_fetches == 0 {
                    return Err(ConfigError::InvalidInt {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            "fetch_timeout_sec" => self.fetch_timeout_sec = Self::parse_int(key, value)?,
            "enrich_timeout_sec" => self.enrich_timeout_sec = Self::parse_int(key, value)?,
            "fetch_retries" => self.fetch_retries = Self::parse_int(key, value)?,
            "retry_backoff_ms" => self.retry_backoff_ms = Self::parse_int(key, value)?,
            "cache_ttl_sec" => self.cache_ttl_sec = Self::parse_int(key, value)?,
            "user_agent" => self.user_agent = value.to_string(),
            "marketplace_branch" => self.marketplace_branch = value.to_string(),
            "search_threshold" => {
                self.search_threshold = value
                    .parse::<f64>()
                    .ok()
                    .filter(|t| (0.0..=1.0).contains(t))
                    .ok_or_else(|| ConfigError::InvalidFloat {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
            }
            "search_ignore_case" => self.search_ignore_case = Self::parse_bool(key, value)?,
            "sync_interval_sec" => self.sync_interval_sec = Self::parse_int(key, value)?,
            _ => {
                // Warn but don't fail for unknown keys
                warn!(key, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Parse a boolean value.
    pub fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map_or_else(|| PathBuf::from(value), |h| h.join(rest)),
        None => PathBuf::from(value),
    }
}
