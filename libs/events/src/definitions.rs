//! Definition-source resources.
//!
//! The definition source publishes two resource kinds:
//! - Event types (`event_type`): a JSON Schema for one `type`/`version`,
//!   optionally restricted to a set of subtypes and sources
//! - Ingestion policies (`ingestion_policy`): default bindings plus a rule body
//!
//! Every resource carries a `resourceVersion` that changes whenever the
//! resource does. Consumers use it to skip redundant updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EventError;

/// `namespace/name` identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An event-type definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeDefinition {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub resource_version: String,
    pub spec: EventTypeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeSpec {
    /// Event type this schema applies to.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Schema version, `major.minor.patch`.
    pub version: String,
    /// Subtypes this definition registers; empty registers the `*` wildcard.
    #[serde(default)]
    pub sub_types: Vec<String>,
    /// Sources allowed to submit this type; empty allows any source.
    #[serde(default)]
    pub sources: Vec<String>,
    /// JSON Schema text for the payload.
    pub schema: String,
}

impl EventTypeDefinition {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.namespace, &self.name)
    }
}

/// An ingestion policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionPolicyDefinition {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub resource_version: String,
    pub spec: IngestionPolicySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionPolicySpec {
    #[serde(default)]
    pub defaults: PolicyDefaults,
    /// Rule body handed to the rule evaluator.
    #[serde(default)]
    pub policy: String,
}

/// Bindings a policy yields when its rule body produces nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default)]
    pub allow: bool,
    /// Retention hint in seconds. Zero or negative means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl IngestionPolicyDefinition {
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(&self.namespace, &self.name)
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionAction {
    Added,
    Updated,
    Deleted,
}

impl DefinitionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionAction::Added => "added",
            DefinitionAction::Updated => "updated",
            DefinitionAction::Deleted => "deleted",
        }
    }
}

/// Resource kinds carried by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    EventType,
    IngestionPolicy,
}

impl DefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionKind::EventType => "event_type",
            DefinitionKind::IngestionPolicy => "ingestion_policy",
        }
    }
}

/// One item of the definition feed, resource still untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionEvent {
    pub seq: i64,
    pub action: DefinitionAction,
    pub kind: DefinitionKind,
    pub resource: Value,
}

/// A typed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionResource {
    EventType(EventTypeDefinition),
    IngestionPolicy(IngestionPolicyDefinition),
}

impl DefinitionEvent {
    /// Decode the resource according to `kind`.
    pub fn decode(&self) -> Result<DefinitionResource, EventError> {
        let invalid = |e: serde_json::Error| EventError::InvalidResource {
            kind: self.kind.as_str(),
            message: e.to_string(),
        };

        match self.kind {
            DefinitionKind::EventType => serde_json::from_value(self.resource.clone())
                .map(DefinitionResource::EventType)
                .map_err(invalid),
            DefinitionKind::IngestionPolicy => serde_json::from_value(self.resource.clone())
                .map(DefinitionResource::IngestionPolicy)
                .map_err(invalid),
        }
    }
}
