//! Persistent CLI configuration.
//!
//! Loaded from `~/.config/zakat/config.toml` on Linux,
//! `~/Library/Application Support/zakat/config.toml` on macOS and
//! `%APPDATA%\zakat\config.toml` on Windows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    /// Gold price per gram.
    pub gold_price: Option<Decimal>,
    /// Silver price per gram.
    pub silver_price: Option<Decimal>,
    /// Methodology used when `--methodology` is omitted.
    pub methodology: Option<String>,
    /// "lunar" or "solar".
    pub calendar: Option<String>,
    /// Write logs under `logs/` by default.
    pub enable_logging: Option<bool>,
}

impl CliConfig {
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("zakat"))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Loads the config file. Falls back to defaults when it is missing or malformed.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            debug!("Could not determine config directory");
            return Self::default();
        };
        if !path.exists() {
            debug!("No config file found at {:?}", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!("Failed to parse config file {:?}: {}", path, e);
                Self::default()
            }),
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self) -> Result<PathBuf, std::io::Error> {
        let path = Self::config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "Could not determine config directory")
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, content)?;
        debug!("Saved configuration to {:?}", path);
        Ok(path)
    }

    /// Writes a sample config file and returns its path.
    pub fn create_sample() -> Result<PathBuf, std::io::Error> {
        CliConfig {
            gold_price: Some(Decimal::from(85)),
            silver_price: Some(Decimal::ONE),
            methodology: Some("standard".to_string()),
            calendar: Some("lunar".to_string()),
            enable_logging: Some(false),
        }
        .save()
    }
}
