//! Configuration file handling.
//!
//! ```toml
//! vault_path = "/home/me/Notes"
//! wal_dir = "/home/me/.config/notes-vault/wal"
//! update_links = true
//!
//! [log]
//! level = "info"
//! format = "pretty"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// JSON format.
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory of the vault.
    pub vault_path: Option<PathBuf>,
    /// Write-ahead log directory. Defaults to `<config dir>/notes-vault/wal`.
    pub wal_dir: Option<PathBuf>,
    /// Rewrite links when renaming unless told otherwise.
    pub update_links: bool,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_path: None,
            wal_dir: None,
            update_links: true,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// `<config dir>/notes-vault/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notes-vault").join("config.toml"))
    }

    /// Load from `path` when given (it must exist), otherwise from the default
    /// location if a file is there, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                if !path.is_file() {
                    bail!("config file not found: {}", path.display());
                }
                Self::from_file(path)
            }
            None => match Self::default_path() {
                Some(default) if default.is_file() => Self::from_file(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
