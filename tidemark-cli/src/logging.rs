//! Logging setup for the CLI.
//!
//! Diagnostics go to stderr through `tracing-subscriber`. Nothing is
//! installed unless logging is requested.
//!
//! # Environment Variables
//!
//! - `TIDEMARK_DEBUG=true|1|yes` - Enable debug logging
//! - `TIDEMARK_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `TIDEMARK_LOG_FORMAT=pretty|compact|json` - Output format (default: compact)
//!
//! `-v` on the command line raises the level to info, `-vv` to debug and
//! `-vvv` to trace.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Crates whose events are shown.
const TARGETS: &[&str] = &["tidemark", "tidemark_migrate", "tidemark_postgres", "tidemark_cli"];

/// Check if debug logging is enabled via `TIDEMARK_DEBUG`.
pub fn is_debug_enabled() -> bool {
    env::var("TIDEMARK_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Resolve the log level, or `None` when logging was not requested.
pub fn log_level(verbose: u8) -> Option<&'static str> {
    let from_env = env::var("TIDEMARK_LOG_LEVEL").ok().and_then(|level| {
        match level.to_lowercase().as_str() {
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" => Some("warn"),
            "error" => Some("error"),
            _ => None,
        }
    });

    let from_flags = match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    };

    from_flags
        .or(from_env)
        .or_else(|| is_debug_enabled().then_some("debug"))
}

/// Get the configured log format from `TIDEMARK_LOG_FORMAT`.
pub fn log_format() -> &'static str {
    env::var("TIDEMARK_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "json" => "json",
            _ => "compact",
        })
        .unwrap_or("compact")
}

fn filter_directives(level: &str) -> String {
    TARGETS
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init(verbose: u8) {
    INIT.call_once(|| {
        let Some(level) = log_level(verbose) else {
            return;
        };

        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = EnvFilter::try_new(filter_directives(level))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let layer = fmt::layer().with_writer(std::io::stderr);

        match log_format() {
            "json" => tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init(),
            "pretty" => tracing_subscriber::registry()
                .with(filter)
                .with(layer.pretty())
                .init(),
            _ => tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact())
                .init(),
        }

        tracing::debug!(level, format = log_format(), "Logging initialized");
    });
}
