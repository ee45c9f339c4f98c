//! Process configuration read from the environment.
//!
//! | variable | meaning | default |
//! |---|---|---|
//! | `MURMUR_RETRY_INTERVAL_MS` | period of the retry sweeper | 5000 |
//! | `MURMUR_DELIVERY_TIMEOUT_MS` | wait for a peer's acknowledgment | 2000 |
//! | `MURMUR_QUEUE_CAPACITY` | outbound delivery queue size | 10000 |
//! | `MURMUR_DEDUP_CAPACITY` | remembered broadcast ids | unbounded |
//! | `MURMUR_LOG`, then `RUST_LOG` | log filter directives | `info` |
//! | `MURMUR_LOG_FORMAT` | `text` or `json` | `text` |

use murmur_broadcast::{BroadcastConfig, BroadcastConfigBuilder};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {:?}", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,murmur_broadcast=debug`.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeConfig {
    pub broadcast: BroadcastConfig,
    pub log: LogConfig,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key-to-value lookup. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut broadcast = BroadcastConfigBuilder::new();

        if let Some(ms) = positive(&lookup, "MURMUR_RETRY_INTERVAL_MS")? {
            broadcast = broadcast.retry_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = positive(&lookup, "MURMUR_DELIVERY_TIMEOUT_MS")? {
            broadcast = broadcast.delivery_timeout(Duration::from_millis(ms));
        }
        if let Some(capacity) = positive(&lookup, "MURMUR_QUEUE_CAPACITY")? {
            broadcast = broadcast.queue_capacity(as_usize("MURMUR_QUEUE_CAPACITY", capacity)?);
        }
        if let Some(capacity) = positive(&lookup, "MURMUR_DEDUP_CAPACITY")? {
            broadcast =
                broadcast.dedup_capacity(Some(as_usize("MURMUR_DEDUP_CAPACITY", capacity)?));
        }

        let mut log = LogConfig::default();
        if let Some(filter) = lookup("MURMUR_LOG").or_else(|| lookup("RUST_LOG")) {
            if !filter.trim().is_empty() {
                log.filter = filter;
            }
        }
        if let Some(format) = lookup("MURMUR_LOG_FORMAT") {
            log.format = format
                .parse()
                .map_err(|reason: String| ConfigError::invalid("MURMUR_LOG_FORMAT", &format, reason))?;
        }

        Ok(Self {
            broadcast: broadcast.build(),
            log,
        })
    }
}

fn positive<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid(key, &raw, "must be greater than zero")),
        Ok(n) => Ok(Some(n)),
        Err(err) => Err(ConfigError::invalid(key, &raw, err.to_string())),
    }
}

fn as_usize(key: &'static str, n: u64) -> Result<usize, ConfigError> {
    usize::try_from(n).map_err(|err| ConfigError::invalid(key, &n.to_string(), err.to_string()))
}
