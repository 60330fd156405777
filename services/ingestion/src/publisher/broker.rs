//! Broker capability.
//!
//! The publisher cache talks to the broker only through [`BrokerConnector`]
//! and [`BrokerClient`]. Streams group subjects by their first segment:
//!
//! ```text
//! PullRequest.Created  -> stream PullRequest, wildcard PullRequest.*
//! Commit               -> stream Commit,      wildcard Commit
//! ```

use std::sync::Arc;
use std::time::Duration;

use admit_events::EventEnvelope;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::settings::BrokerSettings;

/// Default dedupe window applied when provisioning a stream.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default retention age applied when provisioning a stream.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("stream {stream}: {message}")]
    Stream { stream: String, message: String },

    #[error("send rejected: {0}")]
    Send(String),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
}

/// The stream and subject a client publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamBinding {
    pub stream: String,
    pub subject: String,
}

impl StreamBinding {
    /// Bind a dotted subject; the stream is its first segment.
    pub fn for_subject(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        let stream = subject
            .split_once('.')
            .map_or(subject.as_str(), |(head, _)| head)
            .to_string();
        Self { stream, subject }
    }

    pub fn for_envelope(envelope: &EventEnvelope) -> Self {
        Self::for_subject(envelope.metadata.type_identifier())
    }

    /// Wildcard covering this subject and its siblings.
    pub fn wildcard(&self) -> String {
        match self.subject.rsplit_once('.') {
            Some((prefix, _)) => format!("{prefix}.*"),
            None => self.subject.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Stream configuration as the broker reports and accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "duplicate_window_secs", with = "duration_secs")]
    pub duplicate_window: Duration,
    #[serde(default)]
    pub retention: Retention,
    #[serde(default, rename = "max_age_secs", with = "duration_secs")]
    pub max_age: Duration,
}

/// Stream settings applied when the publisher provisions a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDefaults {
    pub duplicate_window: Duration,
    pub max_age: Duration,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

impl StreamDefaults {
    /// The update needed for `binding` to be routable, if any.
    ///
    /// - Missing stream: create it with the wildcard
    /// - Wildcard absent: append it, keeping description and retention
    /// - Wildcard present: nothing to do
    pub fn reconcile(&self, binding: &StreamBinding, current: Option<&StreamConfig>) -> Option<StreamConfig> {
        let wildcard = binding.wildcard();

        match current {
            None => Some(StreamConfig {
                name: binding.stream.clone(),
                subjects: vec![wildcard],
                description: None,
                duplicate_window: self.duplicate_window,
                retention: Retention::default(),
                max_age: self.max_age,
            }),
            Some(config) if config.subjects.contains(&wildcard) => None,
            Some(config) => {
                let mut subjects = config.subjects.clone();
                subjects.push(wildcard);
                Some(StreamConfig {
                    name: config.name.clone(),
                    subjects,
                    description: config.description.clone(),
                    duplicate_window: self.duplicate_window,
                    retention: config.retention,
                    max_age: self.max_age,
                })
            }
        }
    }
}

/// Broker acknowledgement for one send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub acknowledged: bool,
    #[serde(default)]
    pub duplicate: bool,
}

/// Event as handed to the broker: CloudEvents 1.0, structured JSON mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub specversion: String,
    /// Also the broker dedupe key.
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: DateTime<FixedOffset>,
    pub datacontenttype: String,
    pub eventversion: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn from_envelope(envelope: &EventEnvelope) -> Self {
        let metadata = &envelope.metadata;

        Self {
            specversion: "1.0".to_string(),
            id: metadata
                .event_uuid
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            source: metadata.source.clone(),
            event_type: metadata.type_identifier(),
            time: metadata
                .event_time
                .unwrap_or_else(|| Utc::now().fixed_offset()),
            datacontenttype: "application/json".to_string(),
            eventversion: metadata.version.clone(),
            data: envelope.payload.clone(),
        }
    }
}

/// A client bound to one stream/subject.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Current stream configuration, `None` when the stream does not exist.
    async fn stream_info(&self) -> Result<Option<StreamConfig>, BrokerError>;

    /// Create or replace the stream configuration.
    async fn update_stream(&self, config: &StreamConfig) -> Result<(), BrokerError>;

    async fn send(&self, event: &OutboundEvent) -> Result<SendReceipt, BrokerError>;
}

/// Builds clients from the current broker settings.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(
        &self,
        settings: &BrokerSettings,
        binding: &StreamBinding,
    ) -> Result<Arc<dyn BrokerClient>, BrokerError>;
}
