//! Configuration types for the DIMSE listener

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::DEFAULT_DIMSE_PORT;

/// Configuration for the DIMSE listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimseConfig {
    /// Local Application Entity Title announced to peers
    #[serde(default = "default_local_aet")]
    pub local_aet: String,

    /// Bind address for SCP listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Port for SCP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum PDU size in bytes
    #[serde(default = "default_max_pdu")]
    pub max_pdu: u32,

    /// Idle read timeout for an established association, in milliseconds
    #[serde(default = "default_association_timeout")]
    pub association_timeout_ms: u64,

    /// Maximum number of concurrent associations
    #[serde(default = "default_max_associations")]
    pub max_associations: u32,

    /// Reject PDUs that violate the standard instead of tolerating them
    #[serde(default)]
    pub strict: bool,

    /// Accept presentation contexts with unknown abstract syntaxes
    #[serde(default = "default_true")]
    pub promiscuous: bool,
}

impl Default for DimseConfig {
    fn default() -> Self {
        Self {
            local_aet: default_local_aet(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_pdu: default_max_pdu(),
            association_timeout_ms: default_association_timeout(),
            max_associations: default_max_associations(),
            strict: false,
            promiscuous: true,
        }
    }
}

impl DimseConfig {
    /// Get association timeout as Duration
    pub fn association_timeout(&self) -> Duration {
        Duration::from_millis(self.association_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.local_aet.trim().is_empty() || self.local_aet.len() > 16 {
            return Err(crate::error::DimseError::config(
                "Local AE title must be 1-16 characters",
            ));
        }

        if self.port == 0 {
            return Err(crate::error::DimseError::config(
                "Port must be greater than 0",
            ));
        }

        if self.max_pdu < 4096 || self.max_pdu > 131072 {
            return Err(crate::error::DimseError::config(
                "Max PDU size must be between 4096 and 131072 bytes",
            ));
        }

        if self.max_associations == 0 {
            return Err(crate::error::DimseError::config(
                "At least one concurrent association must be allowed",
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_local_aet() -> String {
    "DICOMHAWK".to_string()
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    DEFAULT_DIMSE_PORT
}

fn default_max_pdu() -> u32 {
    16384
}

fn default_association_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_max_associations() -> u32 {
    64
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DimseConfig::default();
        assert_eq!(config.local_aet, "DICOMHAWK");
        assert_eq!(config.port, DEFAULT_DIMSE_PORT);
        assert!(config.promiscuous);
        assert!(!config.strict);
        assert_eq!(config.association_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation() {
        let mut config = DimseConfig::default();
        assert!(config.validate().is_ok());

        config.local_aet = "".to_string();
        assert!(config.validate().is_err());

        config.local_aet = "A".repeat(17);
        assert!(config.validate().is_err());

        config.local_aet = "PACS".to_string();
        config.max_pdu = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DimseConfig = toml::from_str(
            r#"
            local_aet = "ARCHIVE"
            port = 104
            "#,
        )
        .expect("TOML parse error");

        assert_eq!(config.local_aet, "ARCHIVE");
        assert_eq!(config.port, 104);
        assert_eq!(config.max_pdu, 16384);
        assert_eq!(config.max_associations, 64);
    }
}
