//! Live (hot-reloadable) settings.
//!
//! Broker coordinates and the ingest token can change while the service runs.
//! They are loaded from an optional settings file plus `ADMIT_`-prefixed
//! environment variables (`ADMIT_BROKER__ADDRESS`, `ADMIT_AUTH__TOKEN`), held in
//! a [`SettingsCell`] and re-read periodically by [`run_settings_reload_loop`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_ENV_PREFIX: &str = "ADMIT";
pub const DEFAULT_BROKER_ADDRESS: &str = "nats-cluster.svc.cluster.local";
pub const DEFAULT_BROKER_PORT: u16 = 4222;

/// A string that never shows up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Where to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub address: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
}

impl BrokerSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_BROKER_ADDRESS.to_string(),
            port: DEFAULT_BROKER_PORT,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Expected ingest API key. Requests are refused while unset.
    pub token: Option<Secret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    pub broker: BrokerSettings,
    pub auth: AuthSettings,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
}

/// Settings file plus environment overrides.
#[derive(Debug, Clone)]
pub struct SettingsSource {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl SettingsSource {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load a fresh snapshot. A missing file is treated as empty.
    pub fn load(&self) -> Result<LiveSettings, SettingsError> {
        let mut builder = config::Config::builder();

        if let Some(path) = &self.file {
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

/// Atomically swapped settings snapshot with change notification.
#[derive(Debug)]
pub struct SettingsCell {
    current: ArcSwap<LiveSettings>,
    changes: watch::Sender<Arc<LiveSettings>>,
}

impl SettingsCell {
    pub fn new(initial: LiveSettings) -> Self {
        let initial = Arc::new(initial);
        let (changes, _) = watch::channel(initial.clone());
        Self {
            current: ArcSwap::new(initial),
            changes,
        }
    }

    /// The current settings, by value.
    pub fn snapshot(&self) -> Arc<LiveSettings> {
        self.current.load_full()
    }

    /// Receiver notified with every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<LiveSettings>> {
        self.changes.subscribe()
    }

    /// Swap in `next` if it differs from the current snapshot.
    pub fn replace(&self, next: LiveSettings) -> bool {
        if **self.current.load() == next {
            return false;
        }

        let next = Arc::new(next);
        self.current.store(next.clone());
        self.changes.send_replace(next);
        true
    }
}

/// Periodically reload settings into `cell`.
pub async fn run_settings_reload_loop(
    cell: Arc<SettingsCell>,
    source: SettingsSource,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; the initial load already happened.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        match source.load() {
            Ok(next) => {
                let broker = next.broker.base_url();
                if cell.replace(next) {
                    info!(broker = %broker, "live settings changed");
                } else {
                    debug!("live settings unchanged");
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to reload settings; keeping last good settings");
            }
        }
    }
}
