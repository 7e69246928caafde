//! Structured logging setup.
//!
//! Worker processes use stdout for protocol frames, so every subscriber
//! installed here writes to stderr.

use crate::result::{ExecError, ExecResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Default filter when neither an explicit filter nor `RUST_LOG` is given
pub const DEFAULT_FILTER: &str = "info";

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = ExecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ExecError::config(format!("unknown log format '{other}'"))),
        }
    }
}

fn build_filter(filter: Option<&str>) -> ExecResult<EnvFilter> {
    match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|err| ExecError::config(format!("invalid log filter '{directives}': {err}"))),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Install the global subscriber.
///
/// `filter` takes `RUST_LOG`-style directives; when absent, `RUST_LOG` is
/// consulted and then [`DEFAULT_FILTER`]. Installing twice is an error.
pub fn init(format: LogFormat, filter: Option<&str>) -> ExecResult<()> {
    let filter = build_filter(filter)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let installed = match format {
        LogFormat::Text => builder.with_ansi(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|err| ExecError::config(format!("logging already initialised: {err}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_filter_validation() {
        assert!(build_filter(Some("concrete_exec=debug,warn")).is_ok());
        assert!(build_filter(Some("concrete_exec=loud")).is_err());
    }
}
