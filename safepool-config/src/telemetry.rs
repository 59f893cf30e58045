//! Observability configuration.
//!
//! Controls the log filter installed by `safepool-telemetry` and whether
//! pool operations are recorded as Prometheus metrics.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default `tracing` level when `RUST_LOG` is unset.
    #[validate(custom(function = validation::validate_log_level))]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_metrics")]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_metrics() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: default_metrics(),
        }
    }
}
