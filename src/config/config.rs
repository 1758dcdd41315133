use std::net::IpAddr;
use std::path::{Path, PathBuf};

use dimse::DimseConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::config::LoggingConfig;

/// Complete honeypot configuration, one field per TOML section.
///
/// Every section is optional; an empty document yields a working honeypot.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub honeypot: HoneypotConfig,
    #[serde(default)]
    pub dimse: DimseConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("honeypot id must not be empty")]
    InvalidHoneypotId,
    #[error("invalid DIMSE settings: {0}")]
    InvalidDimse(String),
    #[error("dashboard port must be greater than 0")]
    InvalidDashboardPort,
    #[error("invalid catalog settings: {0}")]
    InvalidCatalog(String),
}

impl Config {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse and validate a configuration document
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.honeypot.id.trim().is_empty() {
            return Err(ConfigError::InvalidHoneypotId);
        }

        self.dimse
            .validate()
            .map_err(|e| ConfigError::InvalidDimse(e.to_string()))?;

        if self.dashboard.bind_port == 0 {
            return Err(ConfigError::InvalidDashboardPort);
        }

        if self.catalog.image_size == 0 || self.catalog.image_size > 4096 {
            return Err(ConfigError::InvalidCatalog(
                "image_size must be between 1 and 4096".into(),
            ));
        }

        if self.catalog.generate_count > 10_000 {
            return Err(ConfigError::InvalidCatalog(
                "generate_count must not exceed 10000".into(),
            ));
        }

        Ok(())
    }
}

/// Represents the identity of this honeypot instance
#[derive(Debug, Clone, Deserialize)]
pub struct HoneypotConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Default filter for operator output, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for HoneypotConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            log_level: default_log_level(),
        }
    }
}

/// Synthetic catalog served to peers
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_dir")]
    pub directory: PathBuf,
    /// Files generated when the directory holds none
    #[serde(default = "default_generate_count")]
    pub generate_count: usize,
    /// Rows and columns of generated images
    #[serde(default = "default_image_size")]
    pub image_size: u16,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            directory: default_catalog_dir(),
            generate_count: default_generate_count(),
            image_size: default_image_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_dashboard_port")]
    pub bind_port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            bind_port: default_dashboard_port(),
        }
    }
}

fn default_id() -> String {
    "dicomhawk".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_catalog_dir() -> PathBuf {
    PathBuf::from("dicom_files")
}

fn default_generate_count() -> usize {
    10
}

fn default_image_size() -> u16 {
    512
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_dashboard_port() -> u16 {
    5000
}
