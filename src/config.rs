//! Relay configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Generation backend WebSocket endpoint
    pub upstream_url: String,
    pub upstream_connect_timeout: Duration,
    /// Frames buffered per connection before the pipeline waits on the writer
    pub outbound_queue: usize,
    pub ping_interval: Duration,
    /// Header carrying the session's user id
    pub user_header: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("RELAY_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".geochat-relay").join("relay.db")
            },
            PathBuf::from,
        );

        let outbound_queue = parse_var(&lookup, "RELAY_OUTBOUND_QUEUE", 64usize)?;
        if outbound_queue == 0 {
            return Err(ConfigError::Zero {
                var: "RELAY_OUTBOUND_QUEUE",
            });
        }
        let ping_secs = parse_var(&lookup, "RELAY_PING_INTERVAL_SECS", 30u64)?;
        if ping_secs == 0 {
            return Err(ConfigError::Zero {
                var: "RELAY_PING_INTERVAL_SECS",
            });
        }

        Ok(Self {
            port: parse_var(&lookup, "RELAY_PORT", 4000)?,
            db_path,
            upstream_url: lookup("RELAY_UPSTREAM_URL")
                .unwrap_or_else(|| "ws://localhost:8000/ws/chat".to_string()),
            upstream_connect_timeout: Duration::from_secs(parse_var(
                &lookup,
                "RELAY_UPSTREAM_CONNECT_TIMEOUT_SECS",
                10,
            )?),
            outbound_queue,
            ping_interval: Duration::from_secs(ping_secs),
            user_header: lookup("RELAY_USER_HEADER")
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or_else(|| "x-user-id".to_string()),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
