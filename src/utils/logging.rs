//! Structured logging setup.
//!
//! Installs a `tracing_subscriber` fmt subscriber configured from [`LoggingConfig`]. The
//! `RUST_LOG` environment variable, when set, overrides the configured level.

use crate::config::LoggingConfig;
use tracing::{debug, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

/// Filter used by [`init_logging`]: `RUST_LOG` if present, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_name(config.log_level)))
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed; calling this more than once is
/// harmless.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_span_events(FmtSpan::NONE)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.with_line_number(true).try_init().is_ok()
    };

    if installed {
        debug!(app = %config.app_name, level = level_name(config.log_level), "logging initialized");
    }
    installed
}
