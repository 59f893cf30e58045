//! ## safepool-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! `RUST_LOG` wins over the configured level when it is set.

use tracing::info_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global fmt subscriber. Fails if one is already set.
    pub fn init(level: &str) -> Result<(), InitError> {
        fmt()
            .with_env_filter(Self::filter(level))
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
    }

    fn filter(level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// Emits one `info` event inside a `pool_event` span.
    #[inline]
    pub fn log_event(event_type: &str, detail: &str) {
        let span = info_span!("pool_event", event_type = event_type);
        let _guard = span.enter();
        tracing::info!(detail = detail, "Pool event recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_logging() {
        EventLogger::log_event("simulate", "digest=abc");
        assert!(logs_contain("Pool event recorded"));
        assert!(logs_contain("digest=abc"));
    }
}
