//! Auth, CDC, quota, and schema sections of the configuration tree.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{humantime_serde, ConfigError};

/// Authentication options. Token validation itself is an external
/// collaborator; the server only consumes the decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Namespaces allowed to call administrative APIs.
    pub admin_namespaces: Vec<String>,
    /// Validate tokens but never reject, for rollout.
    pub log_only: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            admin_namespaces: vec!["lodestone-admin".to_owned()],
            log_only: true,
        }
    }
}

/// Change-data-capture streaming options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CdcConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub stream_interval: Duration,
    pub stream_batch: u32,
    pub stream_buffer: u32,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stream_interval: Duration::from_millis(500),
            stream_batch: 100,
            stream_buffer: 200,
        }
    }
}

/// Request and storage quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub node: RateLimits,
    pub namespace: RateLimits,
    pub storage: StorageLimits,
}

impl QuotaConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (section, limits) in [("node", &self.node), ("namespace", &self.namespace)] {
            if limits.enabled && limits.read_units == 0 {
                return Err(ConfigError::Validation {
                    message: format!("quota.{section}.read_units must be non-zero when enabled"),
                });
            }
        }
        Ok(())
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            node: RateLimits::default(),
            namespace: RateLimits::default(),
            storage: StorageLimits::default(),
        }
    }
}

/// Read/write unit limits for a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub enabled: bool,
    pub read_units: u32,
    pub write_units: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self { enabled: false, read_units: 4096, write_units: 1024 }
    }
}

/// On-disk size limit for a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLimits {
    pub enabled: bool,
    pub data_size_limit: u64,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self { enabled: false, data_size_limit: 100 * 1024 * 1024 * 1024 }
    }
}

/// Schema management options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Allow schema updates that break backward compatibility (field
    /// removal, type changes, narrowing constraints).
    pub allow_incompatible: bool,
}
