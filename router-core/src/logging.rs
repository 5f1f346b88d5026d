//! JSON structured logging, filtered by `RUST_LOG` (default `info`).

use std::io::{self, IsTerminal};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Call once, at process start.
///
/// When `ROUTER_LOG_DIR` is set, logs are written to a daily-rolling file in
/// that directory instead of stdout.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Ok(dir) = std::env::var("ROUTER_LOG_DIR") {
        let appender = rolling::daily(dir, "router.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_writer(writer)
            .init();

        // Kept alive for the process lifetime so buffered lines still flush.
        std::mem::forget(guard);
    } else {
        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .init();
    }
}

/// How `router logs` renders piped-in JSON lines.
#[derive(Debug, Clone, Copy)]
pub enum LogMode {
    Raw,
    Pretty,
}

/// `Raw` when stdout isn't a terminal (e.g. piped to a file), `Pretty` otherwise.
pub fn default_log_mode() -> LogMode {
    if io::stdout().is_terminal() {
        LogMode::Pretty
    } else {
        LogMode::Raw
    }
}
