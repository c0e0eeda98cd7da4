//! Logging setup shared by the Crosspost binaries.
//!
//! Pipeline events carry structured fields (`content_id`, `platform`,
//! `message_id`, per-session counts), so the JSON format flattens event
//! fields into the top-level object for log collectors. Everything goes to
//! stderr; stdout is reserved for run summaries and query output.

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use crate::error::CrosspostError;

/// Log output format, selected via `CROSSPOST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain text, one event per line
    #[default]
    Text,
    /// One flattened JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = CrosspostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CrosspostError::InvalidInput(format!(
                "Unknown log format '{}'. Valid options: text, json",
                other
            ))),
        }
    }
}

/// Directives applied when `RUST_LOG` is unset. The broker issues a query
/// per claimed message, so sqlx statement logging would drown the pipeline
/// events at debug level.
fn default_directives(level: &str) -> String {
    format!("{},sqlx=warn", level)
}

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Install the global subscriber. Call once at startup.
pub fn init(format: LogFormat, level: &str) {
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .flatten_event(true)
                .with_env_filter(filter_for(level))
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter_for(level))
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
}

/// Initialize from `CROSSPOST_LOG_FORMAT` and `CROSSPOST_LOG_LEVEL`,
/// falling back to text at info. `verbose` overrides the level to debug.
///
/// ```bash
/// CROSSPOST_LOG_FORMAT=json CROSSPOST_LOG_LEVEL=debug crosspost-dispatch
/// ```
pub fn init_from_env(verbose: bool) {
    let format = std::env::var("CROSSPOST_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let level = if verbose {
        "debug".to_string()
    } else {
        std::env::var("CROSSPOST_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };

    init(format, &level);
}
