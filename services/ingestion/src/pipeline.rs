//! Ingestion pipeline.
//!
//! `Parsed -> MetadataPresent -> SchemaValid -> PolicyAllowed -> Published`.
//! Each transition either advances or ends the request with an
//! [`IngestError`] carrying a stable reason string.

use std::sync::Arc;

use admit_events::{EventEnvelope, EventError, MetadataValidator, ValidationCause};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::policy::{PolicyDecisionEngine, PolicyError};
use crate::publisher::{OutboundEvent, PublisherClientCache, StreamBinding};
use crate::schema::{SchemaError, SchemaRegistry};

/// Terminal failure of one ingest request.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to parse request body: {0}")]
    RequestBody(String),

    #[error("the 'metadata' section is missing")]
    MetadataMissing,

    #[error("the 'payload' section is missing")]
    PayloadMissing,

    #[error("the event metadata is invalid")]
    Metadata(Vec<ValidationCause>),

    #[error("event types are not available yet")]
    RegistryUnavailable,

    #[error("the payload does not match the event schema")]
    SchemaViolation(Vec<ValidationCause>),

    /// No schema found, or subtype/source not registered.
    #[error("{0}")]
    SchemaRejected(SchemaError),

    #[error("ingestion policies are not available yet")]
    PolicyUnavailable,

    #[error("unable to evaluate ingestion policies: {0}")]
    PolicyEvaluation(PolicyError),

    #[error("event rejected by ingestion policy")]
    PolicyRejected,

    #[error("unable to publish event to {subject}")]
    PublishFailure { subject: String },
}

impl IngestError {
    /// Stable reason string exposed to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            IngestError::RequestBody(_) => "request-body",
            IngestError::MetadataMissing => "metadata-missing",
            IngestError::PayloadMissing => "payload-missing",
            IngestError::Metadata(_) => "metadata",
            IngestError::RegistryUnavailable => "event-type",
            IngestError::SchemaViolation(_) => "event-validation",
            IngestError::SchemaRejected(_) => "event-validation-failure",
            IngestError::PolicyUnavailable => "ingestion-service",
            IngestError::PolicyEvaluation(_) => "ingestion-service-failure",
            IngestError::PolicyRejected => "ingestion-service-rejected",
            IngestError::PublishFailure { .. } => "publish",
        }
    }

    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            IngestError::RegistryUnavailable
                | IngestError::PolicyUnavailable
                | IngestError::PolicyEvaluation(_)
                | IngestError::PublishFailure { .. }
        )
    }

    pub fn causes(&self) -> Option<&[ValidationCause]> {
        match self {
            IngestError::Metadata(causes) | IngestError::SchemaViolation(causes) => Some(causes),
            _ => None,
        }
    }
}

impl From<EventError> for IngestError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::Body(message) => IngestError::RequestBody(message),
            EventError::MetadataMissing => IngestError::MetadataMissing,
            EventError::PayloadMissing => IngestError::PayloadMissing,
            EventError::Metadata(causes) => IngestError::Metadata(causes),
            other => IngestError::RequestBody(other.to_string()),
        }
    }
}

impl From<SchemaError> for IngestError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::Unavailable => IngestError::RegistryUnavailable,
            SchemaError::Violation(causes) => IngestError::SchemaViolation(causes),
            other => IngestError::SchemaRejected(other),
        }
    }
}

impl From<PolicyError> for IngestError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Unavailable => IngestError::PolicyUnavailable,
            other => IngestError::PolicyEvaluation(other),
        }
    }
}

/// A published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub id: String,
    pub stream: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

/// Stateless orchestration over the three engines.
pub struct IngestionPipeline {
    metadata: MetadataValidator,
    registry: Arc<SchemaRegistry>,
    engine: Arc<PolicyDecisionEngine>,
    publisher: Arc<PublisherClientCache>,
}

impl IngestionPipeline {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        engine: Arc<PolicyDecisionEngine>,
        publisher: Arc<PublisherClientCache>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            metadata: MetadataValidator::new()?,
            registry,
            engine,
            publisher,
        })
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<PolicyDecisionEngine> {
        &self.engine
    }

    pub fn publisher(&self) -> &Arc<PublisherClientCache> {
        &self.publisher
    }

    /// Run one raw request body through the pipeline.
    pub async fn handle(&self, body: &[u8]) -> Result<Accepted, IngestError> {
        let envelope = EventEnvelope::parse(body, &self.metadata)?;
        self.admit(&envelope).await
    }

    /// Run an already-parsed envelope through validation, policy and publish.
    pub async fn admit(&self, envelope: &EventEnvelope) -> Result<Accepted, IngestError> {
        let metadata = &envelope.metadata;

        self.registry.validate(envelope).await.inspect_err(|e| {
            debug!(
                source = %metadata.source,
                event_type = %metadata.type_identifier(),
                version = %metadata.version,
                error = %e,
                "event failed schema validation"
            );
        })?;

        let decision = self.engine.decide(envelope).await?;
        if !decision.allow {
            warn!(
                source = %metadata.source,
                event_type = %metadata.type_identifier(),
                "event rejected by ingestion policy"
            );
            return Err(IngestError::PolicyRejected);
        }

        let binding = StreamBinding::for_envelope(envelope);
        let event = OutboundEvent::from_envelope(envelope);
        if !self.publisher.publish_event(&binding, &event).await {
            return Err(IngestError::PublishFailure {
                subject: binding.subject,
            });
        }

        Ok(Accepted {
            id: event.id,
            stream: binding.stream,
            subject: binding.subject,
            ttl: decision.ttl,
        })
    }
}
