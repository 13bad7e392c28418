//! Structured logging configuration.
//!
//! - JSON output for production (`LOG_FORMAT=json`)
//! - Human-readable output for development (default)
//! - `RUST_LOG` drives the level filter, same as any other tracing service
//! - `init_logging` returns a [`LogLevelHandle`] so operators can raise or
//!   lower verbosity at runtime without a restart, mirroring the original
//!   collector's `LogLevelManager`.
//!
//! ```rust,ignore
//! use pulse_common::logging::init_logging;
//!
//! let handle = init_logging("pulse-collectord");
//! handle.set("debug").unwrap();
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Runtime handle over the active `EnvFilter`, letting the status endpoint
/// or an admin command change log verbosity without restarting the process.
#[derive(Clone)]
pub struct LogLevelHandle(reload::Handle<EnvFilter, tracing_subscriber::Registry>);

impl LogLevelHandle {
    /// Replace the active filter directive, e.g. `"debug"` or
    /// `"pulse_collector=trace,pulse_export=info"`.
    pub fn set(&self, directive: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directive).map_err(|e| e.to_string())?;
        self.0.reload(filter).map_err(|e| e.to_string())
    }
}

/// Initialize logging for the given service and return a handle for runtime
/// level changes. Reads `LOG_FORMAT` ("json" vs. text) and `RUST_LOG`
/// (defaults to "info") once at startup.
pub fn init_logging(_service_name: &str) -> LogLevelHandle {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, reload_handle) = reload::Layer::new(initial);

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(false)
                    .with_target(true)
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(true),
            )
            .init();
    }

    LogLevelHandle(reload_handle)
}

/// Initialize logging with defaults (service name "pulseone").
pub fn init_default_logging() -> LogLevelHandle {
    init_logging("pulseone")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_parses_from_directive() {
        let filter = EnvFilter::try_new("debug");
        assert!(filter.is_ok());
    }
}
