//! Server section of the configuration tree.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Listener and data-plane behavior of the server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the HTTP gateway to.
    pub host: String,
    /// Port to bind the HTTP gateway to.
    pub port: u16,
    /// When set, dropping a collection also deletes its key range from the
    /// transactional store instead of only removing the metadata.
    pub kv_hard_drop: bool,
}

impl ServerConfig {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation {
                message: "server.port must be non-zero".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8081,
            kv_hard_drop: true,
        }
    }
}
