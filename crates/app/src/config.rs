//! Service configuration
//!
//! Read from a TOML file, then overridden by environment variables. Every key
//! is optional; a missing file means all defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use wormhole_core::EngineConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One assistant imported into the directory at start
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
    pub id: i64,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub archive_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub topic: String,
    /// Seconds between reminder digests; 0 disables them
    pub reminder_interval_secs: u64,
    pub claim_attempts: u32,
    pub candidate_window: usize,
    pub roster: Vec<RosterEntry>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        let engine = EngineConfig::default();
        Self {
            database_path: data_dir.join("wormhole.db"),
            archive_path: data_dir.join("archive.csv"),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], wormhole_net::DEFAULT_PORT)),
            topic: "queue".to_string(),
            reminder_interval_secs: 900,
            claim_attempts: engine.claim_attempts,
            candidate_window: engine.candidate_window,
            roster: Vec::new(),
        }
    }
}

/// Platform data directory, or the working directory if there is none
fn data_dir() -> PathBuf {
    ProjectDirs::from("edu", "wormhole", "wormhole")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    /// Load from `path` (if it exists) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                Self::from_toml(&std::fs::read_to_string(path)?)?
            }
            Some(path) => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `WORMHOLE_*` overrides using `lookup` to read variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(path) = lookup("WORMHOLE_DATABASE") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("WORMHOLE_ARCHIVE") {
            self.archive_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("WORMHOLE_LISTEN") {
            self.listen_addr = addr.parse().map_err(|_| ConfigError::InvalidValue {
                key: "WORMHOLE_LISTEN",
                value: addr.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".into()));
        }
        self.engine_config()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            claim_attempts: self.claim_attempts,
            candidate_window: self.candidate_window,
        }
    }
}
