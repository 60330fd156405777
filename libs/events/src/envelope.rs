//! Event envelope - the unit producers submit for ingestion.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EventError, ValidationCause};
use crate::metadata::MetadataValidator;

/// Envelope metadata.
///
/// Field names follow the wire format (`type`, `subType`, `eventUUID`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventMetadata {
    /// Producer identifier (e.g. "github").
    pub source: String,

    /// Event type (e.g. "PullRequest").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Optional refinement of the type (e.g. "Created").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,

    /// Schema version, `major.minor.patch`.
    pub version: String,

    /// When the producer observed the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<FixedOffset>>,

    /// Producer-assigned id, used as the broker dedupe key when present.
    #[serde(default, rename = "eventUUID", skip_serializing_if = "Option::is_none")]
    pub event_uuid: Option<String>,
}

impl EventMetadata {
    /// Dotted type identifier: `type` or `type.subType`.
    pub fn type_identifier(&self) -> String {
        match &self.sub_type {
            Some(sub_type) => format!("{}.{}", self.event_type, sub_type),
            None => self.event_type.clone(),
        }
    }
}

/// A parsed, shape-checked envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub metadata: EventMetadata,
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(metadata: EventMetadata, payload: Value) -> Self {
        Self { metadata, payload }
    }

    /// Parse a raw request body.
    ///
    /// Stages, in order: JSON object → `metadata` present → `payload` present →
    /// metadata shape → typed metadata. The first failing stage wins.
    pub fn parse(body: &[u8], validator: &MetadataValidator) -> Result<Self, EventError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| EventError::Body(e.to_string()))?;

        let Value::Object(mut sections) = value else {
            return Err(EventError::Body(
                "request body must be a JSON object".to_string(),
            ));
        };

        let metadata = sections
            .remove("metadata")
            .ok_or(EventError::MetadataMissing)?;
        let payload = sections.remove("payload").ok_or(EventError::PayloadMissing)?;

        validator.validate(&metadata).map_err(EventError::Metadata)?;

        let metadata: EventMetadata = serde_json::from_value(metadata)
            .map_err(|e| EventError::Metadata(vec![ValidationCause::new(e.to_string())]))?;

        Ok(Self { metadata, payload })
    }

    /// The value policies are evaluated against.
    pub fn policy_subject(&self) -> Value {
        serde_json::json!({
            "metadata": self.metadata,
            "payload": self.payload,
        })
    }
}

/// Builder for constructing envelopes in code (tests, tooling).
#[derive(Debug)]
pub struct EventEnvelopeBuilder {
    source: String,
    event_type: String,
    sub_type: Option<String>,
    version: String,
    event_time: Option<DateTime<FixedOffset>>,
    event_uuid: Option<String>,
    payload: Value,
}

impl EventEnvelopeBuilder {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            sub_type: None,
            version: "1.0.0".to_string(),
            event_time: None,
            event_uuid: None,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn sub_type(mut self, sub_type: impl Into<String>) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn event_time(mut self, ts: DateTime<FixedOffset>) -> Self {
        self.event_time = Some(ts);
        self
    }

    pub fn event_uuid(mut self, id: impl Into<String>) -> Self {
        self.event_uuid = Some(id.into());
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            metadata: EventMetadata {
                source: self.source,
                event_type: self.event_type,
                sub_type: self.sub_type,
                version: self.version,
                event_time: self.event_time,
                event_uuid: self.event_uuid,
            },
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: &str) -> Result<EventEnvelope, EventError> {
        let validator = MetadataValidator::new().unwrap();
        EventEnvelope::parse(body.as_bytes(), &validator)
    }

    #[test]
    fn test_parse_full_envelope() {
        let envelope = parse(
            r#"{"metadata":{"source":"github","type":"PullRequest","subType":"Created",
                "version":"1.0.0","eventTime":"2024-05-01T10:00:00Z","eventUUID":"abc-123"},
                "payload":{"number":7}}"#,
        )
        .unwrap();

        assert_eq!(envelope.metadata.source, "github");
        assert_eq!(envelope.metadata.sub_type.as_deref(), Some("Created"));
        assert_eq!(envelope.metadata.event_uuid.as_deref(), Some("abc-123"));
        assert!(envelope.metadata.event_time.is_some());
        assert_eq!(envelope.payload, json!({"number": 7}));
        assert_eq!(envelope.metadata.type_identifier(), "PullRequest.Created");
    }

    #[test]
    fn test_parse_stages() {
        assert!(matches!(parse("not json"), Err(EventError::Body(_))));
        assert!(matches!(parse("[1, 2]"), Err(EventError::Body(_))));
        assert!(matches!(
            parse(r#"{"payload":{}}"#),
            Err(EventError::MetadataMissing)
        ));
        assert!(matches!(
            parse(r#"{"metadata":{"source":"github","type":"Commit","version":"1.0.0"}}"#),
            Err(EventError::PayloadMissing)
        ));
        assert!(matches!(
            parse(r#"{"metadata":{"source":"g","type":"Commit","version":"1.0.0"},"payload":{}}"#),
            Err(EventError::Metadata(_))
        ));
    }

    #[test]
    fn test_metadata_missing_wins_over_payload_missing() {
        assert!(matches!(parse("{}"), Err(EventError::MetadataMissing)));
    }

    #[test]
    fn test_invalid_event_time_is_metadata_error() {
        let err = parse(
            r#"{"metadata":{"source":"github","type":"Commit","version":"1.0.0",
                "eventTime":"yesterday"},"payload":{}}"#,
        )
        .unwrap_err();

        match err {
            EventError::Metadata(causes) => assert_eq!(causes.len(), 1),
            other => panic!("Expected Metadata, got {:?}", other),
        }
    }

    #[test]
    fn test_type_identifier_without_sub_type() {
        let envelope = EventEnvelopeBuilder::new("github", "Commit").build();
        assert_eq!(envelope.metadata.type_identifier(), "Commit");
    }

    #[test]
    fn test_policy_subject_uses_wire_names() {
        let envelope = EventEnvelopeBuilder::new("github", "PullRequest")
            .sub_type("Created")
            .payload(json!({"draft": true}))
            .build();

        let subject = envelope.policy_subject();
        assert_eq!(subject["metadata"]["type"], "PullRequest");
        assert_eq!(subject["metadata"]["subType"], "Created");
        assert_eq!(subject["payload"]["draft"], true);
    }
}
