//! Ingestion service configuration.
//!
//! Static, env-driven settings read once at startup. Broker coordinates and
//! the ingest token live in [`crate::settings`] because they reload at runtime.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};

use crate::publisher::StreamDefaults;
use crate::settings::Secret;

/// Which broker adapter to publish through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerMode {
    /// HTTP stream gateway in front of the broker.
    Http,
    /// In-process broker, for local development.
    Memory,
}

/// Ingestion configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address.
    pub listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Definition source base URL (example: http://localhost:8081).
    pub definitions_url: String,

    /// Bearer token for the definition source.
    pub definitions_token: Option<Secret>,

    /// Max definition events to fetch per poll.
    pub sync_limit: i64,

    /// Poll interval when no new definition events are available.
    pub sync_poll_interval: Duration,

    /// Bound on a single definition-source request.
    pub sync_request_timeout: Duration,

    /// Optional cursor file to persist the last applied definition seq.
    pub sync_cursor_file: Option<PathBuf>,

    /// Optional live settings file.
    pub settings_file: Option<PathBuf>,

    /// How often live settings are re-read.
    pub settings_reload_interval: Duration,

    pub broker_mode: BrokerMode,

    /// Bound on connecting and provisioning a publisher client.
    pub broker_connect_timeout: Duration,

    /// Bound on a single send.
    pub broker_send_timeout: Duration,

    /// Stream settings applied when provisioning.
    pub stream_defaults: StreamDefaults,
}

fn env_number<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(name)
        .ok()
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{name} must be an integer."))
}

/// Millisecond duration from an optional value, never below `min_ms`.
fn bounded_millis(value: Option<u64>, default_ms: u64, min_ms: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default_ms).max(min_ms))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = std::env::var("ADMIT_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("ADMIT_LISTEN_ADDR must be a socket address (example: 0.0.0.0:8080).")?;

        let log_level = std::env::var("ADMIT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let definitions_url = std::env::var("ADMIT_DEFINITIONS_URL")
            .unwrap_or_else(|_| "http://localhost:8081".to_string());

        let definitions_token = std::env::var("ADMIT_DEFINITIONS_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Secret::new);

        let sync_limit = env_number::<i64>("ADMIT_SYNC_LIMIT")?
            .unwrap_or(200)
            .clamp(1, 500);

        let sync_poll_interval =
            bounded_millis(env_number("ADMIT_SYNC_POLL_INTERVAL_MS")?, 1000, 50);

        let sync_request_timeout =
            bounded_millis(env_number("ADMIT_SYNC_REQUEST_TIMEOUT_MS")?, 10_000, 100);

        let sync_cursor_file = std::env::var("ADMIT_SYNC_CURSOR_FILE")
            .ok()
            .map(PathBuf::from);

        let settings_file = std::env::var("ADMIT_SETTINGS_FILE")
            .ok()
            .map(PathBuf::from);

        let settings_reload_interval =
            bounded_millis(env_number("ADMIT_SETTINGS_RELOAD_INTERVAL_MS")?, 5000, 100);

        let broker_mode = match std::env::var("ADMIT_BROKER_MODE")
            .unwrap_or_else(|_| "http".to_string())
            .to_lowercase()
            .as_str()
        {
            "http" => BrokerMode::Http,
            "memory" => BrokerMode::Memory,
            other => bail!("ADMIT_BROKER_MODE must be `http` or `memory`, got `{other}`."),
        };

        let broker_connect_timeout =
            bounded_millis(env_number("ADMIT_BROKER_CONNECT_TIMEOUT_MS")?, 2000, 100);
        let broker_send_timeout =
            bounded_millis(env_number("ADMIT_BROKER_SEND_TIMEOUT_MS")?, 5000, 100);

        let defaults = StreamDefaults::default();
        let stream_defaults = StreamDefaults {
            duplicate_window: env_number::<u64>("ADMIT_STREAM_DUPLICATE_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.duplicate_window),
            max_age: env_number::<u64>("ADMIT_STREAM_MAX_AGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_age),
        };

        Ok(Self {
            listen_addr,
            log_level,
            definitions_url,
            definitions_token,
            sync_limit,
            sync_poll_interval,
            sync_request_timeout,
            sync_cursor_file,
            settings_file,
            settings_reload_interval,
            broker_mode,
            broker_connect_timeout,
            broker_send_timeout,
            stream_defaults,
        })
    }
}
