//! Logging, metrics, and tracing sections of the configuration tree.
//!
//! The metrics and tracing backends themselves live outside this
//! repository; these sections only carry the knobs the server wires
//! through to them.

use serde::{Deserialize, Serialize};

/// Log emission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Minimum level: trace, debug, info, warn, error.
    pub level: String,
    /// Sampling rate for high-volume debug logs.
    pub sample_rate: f64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), sample_rate: 0.01 }
    }
}

/// Metrics emission options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Quantiles reported for request timers.
    pub timer_quantiles: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true, timer_quantiles: vec![0.5, 0.95, 0.99] }
    }
}

/// Distributed tracing options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    /// Collector endpoint, when enabled.
    pub endpoint: Option<String>,
    pub sample_rate: f64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { enabled: false, endpoint: None, sample_rate: 0.01 }
    }
}
