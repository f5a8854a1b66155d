//! Search and cache store sections of the configuration tree.

use serde::{Deserialize, Serialize};

/// Connection and routing options for the external search store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub host: String,
    pub port: u16,
    /// When unset, reads never route to the search store even if the query
    /// shape would prefer it.
    pub read_enabled: bool,
    /// When unset, commits are not mirrored into the search store and DDL
    /// skips index management.
    pub write_enabled: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 8108,
            read_enabled: true,
            write_enabled: true,
        }
    }
}

/// Connection options for the ephemeral cache store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on keys returned by a single cache keys scan.
    pub max_scan: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 6379,
            max_scan: 500,
        }
    }
}
