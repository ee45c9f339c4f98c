//! Log output for the node process.
//!
//! Stdout carries the protocol, so every log line goes to stderr.

use crate::config::{ConfigError, LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Later calls leave the first one in place.
pub fn init(config: &LogConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|err| ConfigError::Invalid {
        key: "MURMUR_LOG",
        value: config.filter.clone(),
        reason: err.to_string(),
    })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);

    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    Ok(())
}
