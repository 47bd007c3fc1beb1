//! Structured logging with `tracing`.
//!
//! Library code only emits events; the binary decides where they go by
//! calling [`init_subscriber`] (compact, human-readable) or
//! [`init_json_subscriber`] (one JSON object per line) once at startup.
//! `RUST_LOG` takes precedence over the configured level in both.
//!
//! Field conventions: `session_id`, `conn`, `attempt`, `delay_ms`, `status`.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Log level used when neither settings nor `RUST_LOG` name one.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}

/// Initialize the global tracing subscriber with compact stderr output.
///
/// Subsequent calls are no-ops. An unparsable `level` falls back to `warn`.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails only if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(false);

    let _ = subscriber.try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
