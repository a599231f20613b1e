//! Configuration file parser for ~/.config/gator/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, with a warning logged for each so
//! typos do not go unnoticed.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::fetcher::{DEFAULT_MAX_FEED_SIZE, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::feed::{DateFormat, DateParser, FetcherOptions};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Well-formed TOML with a value the poller cannot use
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. `None` means `gator.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Owner recorded on feeds registered from the command line.
    pub current_user: String,

    /// `User-Agent` header sent with every feed request.
    pub user_agent: String,

    /// Total time allowed for one feed request, body included.
    pub request_timeout_secs: u64,

    /// Largest feed document accepted, in bytes.
    pub max_feed_bytes: usize,

    /// Publish-date formats, tried in order.
    pub date_formats: Vec<DateFormat>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            current_user: std::env::var("USER").unwrap_or_else(|_| "default".to_string()),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            max_feed_bytes: DEFAULT_MAX_FEED_SIZE,
            date_formats: DateParser::default().formats().to_vec(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "database_path",
        "current_user",
        "user_agent",
        "request_timeout_secs",
        "max_feed_bytes",
        "date_formats",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML or an unknown date format → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), user = %config.current_user, "Loaded configuration");
        Ok(config)
    }

    /// Resolve the database path, defaulting to `config_dir/gator.db`
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("gator.db"))
    }

    pub fn fetcher_options(&self) -> Result<FetcherOptions, ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.max_feed_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_feed_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(FetcherOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_feed_size: self.max_feed_bytes,
        })
    }

    pub fn date_parser(&self) -> Result<DateParser, ConfigError> {
        DateParser::new(self.date_formats.clone())
            .map_err(|e| ConfigError::Invalid(format!("date_formats: {}", e)))
    }
}

// ============================================================================
// Tests
// ============================================================================
