//! Tracing setup: env-filtered, with a human or JSON formatter toggle.

use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. `json_mode` picks structured JSON lines
/// (for piping into a log aggregator) over the human-readable default.
pub fn setup_logging(json_mode: bool) {
    if json_mode {
        tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(false).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(false).init();
    }
}
