//! # Safepool Telemetry
//!
//! `tracing` subscriber setup and Prometheus metrics for pool workloads.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
