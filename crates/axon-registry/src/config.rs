//! Registry configuration loading and validation

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::time::Duration;
use tracing::info;

/// Well-known device-info resource path
pub const DEVICE_INFO_URI: &str = "/oic/d";
/// Well-known platform-info resource path
pub const PLATFORM_INFO_URI: &str = "/oic/p";
/// Resource type implemented by the device resource
pub const DEVICE_RESOURCE_TYPE: &str = "oic.wd.d";
/// Resource type implemented by the maintenance resource
pub const MAINTENANCE_RESOURCE_TYPE: &str = "oic.wd.mnt";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tuning for the registry's background engines. Every threshold is
/// configurable; the defaults match the behavior of the reference stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Staleness sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Idle time after the last close before an unopened device is evicted
    #[serde(default = "default_unused_after")]
    pub unused_after_secs: u64,
    /// Discovery silence before a device is flagged not-responding
    #[serde(default = "default_unresponsive_after")]
    pub unresponsive_after_secs: u64,
    /// Attempt cap per metadata field (device info, platform info,
    /// maintenance resource)
    #[serde(default = "default_metadata_attempts")]
    pub metadata_attempts: u8,
    /// Timeout for the multi-owner-transfer capability probe, in seconds
    #[serde(default = "default_security_discovery_timeout")]
    pub security_discovery_timeout_secs: u64,
    /// Timeout for an ownership-transfer completion, in seconds
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            unused_after_secs: default_unused_after(),
            unresponsive_after_secs: default_unresponsive_after(),
            metadata_attempts: default_metadata_attempts(),
            security_discovery_timeout_secs: default_security_discovery_timeout(),
            transfer_timeout_secs: default_transfer_timeout(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    2
}

fn default_unused_after() -> u64 {
    300
}

fn default_unresponsive_after() -> u64 {
    60
}

fn default_metadata_attempts() -> u8 {
    3
}

fn default_security_discovery_timeout() -> u64 {
    5
}

fn default_transfer_timeout() -> u64 {
    30
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn unused_after(&self) -> Duration {
        Duration::from_secs(self.unused_after_secs)
    }

    pub fn unresponsive_after(&self) -> Duration {
        Duration::from_secs(self.unresponsive_after_secs)
    }

    pub fn security_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.security_discovery_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: RegistryConfig = toml::from_str(&content)?;
            info!(path = %path.display(), "Loaded registry configuration");
            Ok(config)
        } else {
            info!(
                path = %path.display(),
                "Configuration file not found, using defaults"
            );
            Ok(Self::default())
        }
    }
}
