/// Structured logging setup using tracing
///
/// Writes to stderr so stdout stays clean for the CLI's JSON output.
/// Auto-detects format: human-readable with ANSI colors when stderr is a terminal,
/// structured JSON when piped/redirected. When `log_file` is configured, a second
/// plain-text layer appends to that file.

use std::fs::OpenOptions;
use std::io::IsTerminal;
use std::sync::Mutex;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use crate::config::Config;

/// Initialize tracing subscriber with stderr output
///
/// Format auto-detection:
/// - Terminal: human-readable with ANSI colors
/// - Pipe/redirect: structured JSON
///
/// Log level from config.log_level (default: info)
/// RUST_LOG env var can override at runtime
pub fn init_logging(config: &Config) {
    // Build env filter from config, with RUST_LOG override
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_layer = if std::io::stderr().is_terminal() {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .boxed()
    };

    let mut file_error = None;
    let file_layer = config.log_file.as_deref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .boxed(),
            ),
            Err(e) => {
                file_error = Some((path.to_string(), e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some((path, e)) = file_error {
        tracing::warn!(path = %path, error = %e, "Could not open log file, logging to stderr only");
    }
}
