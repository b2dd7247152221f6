//! # Structured logging
//!
//! The library only emits `tracing` events; installing a subscriber is the application's
//! choice. [`init_logging`] installs the default one: a `tracing-subscriber` fmt layer writing
//! JSON lines (or human-readable text) to stdout, filtered by `RUST_LOG` when set and by the
//! configured level otherwise.
//!
//! Pipeline events carry their context as fields (`ingest_id`, `vendor`, `batch_size`,
//! `accepted`, `rejected`, `duration_ms`), so JSON output can be indexed without parsing
//! messages.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::bhulan_errors::BhulanError;
use crate::settings::Settings;

/// Directives appended to the base level to keep dependencies quiet.
const DEPENDENCY_DIRECTIVES: &[&str] = &["rusqlite=warn"];

/// Output format of the default subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = BhulanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "structured" => Ok(LogFormat::Json),
            "pretty" | "text" | "plain" => Ok(LogFormat::Pretty),
            other => Err(BhulanError::InvalidSettings(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// Filter for `level` (`"info"`, `"DEBUG"`, ...) plus the dependency directives.
pub fn build_filter(level: &str) -> Result<EnvFilter, BhulanError> {
    let directives = std::iter::once(level.trim().to_ascii_lowercase())
        .chain(DEPENDENCY_DIRECTIVES.iter().map(|d| d.to_string()))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).map_err(|e| BhulanError::Logging(e.to_string()))
}

/// Boxed subscriber writing `format` lines to `writer`, filtered by `filter`.
pub fn build_subscriber<W>(
    filter: EnvFilter,
    format: LogFormat,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt()
                .json()
                .with_current_span(false)
                .with_env_filter(filter)
                .with_writer(writer)
                .finish(),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(writer)
                .finish(),
        ),
    }
}

/// Subscriber for `settings.log_level` and `settings.log_format`. `RUST_LOG` is ignored.
pub fn subscriber_from_settings<W>(
    settings: &Settings,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>, BhulanError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(&settings.log_level)?;
    Ok(build_subscriber(filter, settings.log_format, writer))
}

/// Install the global subscriber.
///
/// Arguments
/// ---------
/// * `level`: base level, used when `RUST_LOG` is not set
/// * `format`: JSON lines or human-readable text
///
/// Return
/// ------
/// * `Ok(true)` when the subscriber was installed, `Ok(false)` when a global subscriber was
///   already set (the call is then a no-op)
/// * `Err(BhulanError::Logging)` when `level` is not a valid filter
pub fn init_logging(level: &str, format: LogFormat) -> Result<bool, BhulanError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(level)?,
    };
    Ok(build_subscriber(filter, format, std::io::stdout)
        .try_init()
        .is_ok())
}

/// [`init_logging`] with the level and format of `settings`.
pub fn init_logging_from(settings: &Settings) -> Result<bool, BhulanError> {
    init_logging(&settings.log_level, settings.log_format)
}
