//! Petition engine configuration loading
//!
//! Loads configuration from `~/.config/petition/petition.toml` (or the
//! `PETITION_CONFIG` env var). A missing file means defaults.

use crate::errors::{PetitionError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PetitionConfig {
    /// Creating a petition wipes every existing petition and its signatures
    #[serde(default = "default_single_petition_mode")]
    pub single_petition_mode: bool,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub service: ServiceConfig,
}

fn default_single_petition_mode() -> bool {
    true
}

/// SQLite store settings
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Path to the SQLite database; `~/` is expanded
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String {
    data_dir()
        .map(|d| d.join("petition.db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "petition.db".to_string())
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Socket service settings
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// Unix socket the service listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Where decoded signature images are written
    #[serde(default = "default_signatures_dir")]
    pub signatures_dir: String,
}

fn default_socket_path() -> String {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("petition.sock")
        .to_string_lossy()
        .into_owned()
}

fn default_signatures_dir() -> String {
    data_dir()
        .map(|d| d.join("signatures").to_string_lossy().into_owned())
        .unwrap_or_else(|| "signatures".to_string())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            signatures_dir: default_signatures_dir(),
        }
    }
}

impl Default for PetitionConfig {
    fn default() -> Self {
        Self {
            single_petition_mode: default_single_petition_mode(),
            storage: StorageConfig::default(),
            service: ServiceConfig::default(),
        }
    }
}

fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".local").join("share").join("petition"))
}

impl PetitionConfig {
    /// Environment variable overriding the config file location
    pub const ENV_CONFIG_PATH: &'static str = "PETITION_CONFIG";

    const DEFAULT_CONFIG_FILENAME: &'static str = "petition.toml";

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Petition config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PetitionError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: PetitionConfig = toml::from_str(contents)
            .map_err(|e| PetitionError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("petition")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.storage.pool_size == 0 {
            return Err(PetitionError::config("storage.pool_size must be at least 1"));
        }
        if self.storage.db_path.trim().is_empty() {
            return Err(PetitionError::config("storage.db_path must not be empty"));
        }

        if !self.single_petition_mode {
            tracing::debug!("Multi-petition mode: creation requires an authenticated caller");
        }

        Ok(())
    }

    /// Database path with `~/` expanded
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.storage.db_path)
    }

    pub fn resolved_socket_path(&self) -> PathBuf {
        expand_home(&self.service.socket_path)
    }

    pub fn resolved_signatures_dir(&self) -> PathBuf {
        expand_home(&self.service.signatures_dir)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}
