//! Configuration tree for the Lodestone server.
//!
//! Configuration is loaded from a TOML file with every section optional;
//! missing sections take their defaults. Durations are expressed in
//! humantime format ("500ms", "5m"). `validate()` is called after
//! deserialization and rejects cross-field inconsistencies.

mod limits;
mod observability;
mod server;
mod stores;

pub use limits::*;
pub use observability::*;
pub use server::*;
use snafu::Snafu;
pub use stores::*;

use serde::{Deserialize, Serialize};

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The configuration file could not be parsed.
    #[snafu(display("failed to parse config: {message}"))]
    Parse {
        /// Description of the parse failure.
        message: String,
    },
}

/// Root of the configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub cdc: CdcConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
    pub quota: QuotaConfig,
    pub schema: SchemaConfig,
}

impl Config {
    /// Parses a TOML document and validates the result.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)
            .map_err(|e| ConfigError::Parse { message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.quota.validate()?;
        Ok(())
    }
}

/// Duration serialization using humantime format.
pub(crate) mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
