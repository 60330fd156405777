//! Schema registry.
//!
//! Maps `(type, subType, version)` to a compiled payload validator.
//!
//! - One definition with N subtypes fans out into N entries; a definition
//!   without subtypes registers a single `*` entry
//! - Updates are idempotent on `resourceVersion`
//! - A failed compile leaves the previous entries in place
//! - Compilation runs outside the lock; only the final swap holds it

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use admit_events::{EventEnvelope, EventTypeDefinition, ResourceRef, ValidationCause};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::compiler::{CompiledSchema, SchemaCompiler};

/// Subtype used by definitions that do not declare any.
pub const WILDCARD_SUB_TYPE: &str = "*";

/// Registry lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaKey {
    pub event_type: String,
    pub sub_type: String,
    pub version: String,
}

impl SchemaKey {
    pub fn new(
        event_type: impl Into<String>,
        sub_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            sub_type: sub_type.into(),
            version: version.into(),
        }
    }

    /// Keys a definition registers.
    pub fn derive_all(definition: &EventTypeDefinition) -> BTreeSet<SchemaKey> {
        let spec = &definition.spec;
        if spec.sub_types.is_empty() {
            return BTreeSet::from([SchemaKey::new(
                &spec.event_type,
                WILDCARD_SUB_TYPE,
                &spec.version,
            )]);
        }

        spec.sub_types
            .iter()
            .map(|sub_type| SchemaKey::new(&spec.event_type, sub_type, &spec.version))
            .collect()
    }

    fn exact(envelope: &EventEnvelope) -> Self {
        let meta = &envelope.metadata;
        SchemaKey::new(
            &meta.event_type,
            meta.sub_type.as_deref().unwrap_or(WILDCARD_SUB_TYPE),
            &meta.version,
        )
    }

    fn wildcard(&self) -> Self {
        SchemaKey::new(&self.event_type, WILDCARD_SUB_TYPE, &self.version)
    }
}

impl std::fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.event_type, self.sub_type, self.version)
    }
}

/// Validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The registry has not finished its initial sync.
    #[error("the schema registry is not ready")]
    Unavailable,

    #[error("no matching schema found for: {0}")]
    NoSchemaFound(SchemaKey),

    #[error("'{event_type}' is not registered for subType '{sub_type}'")]
    SubTypeNotAllowed { event_type: String, sub_type: String },

    #[error("'{event_type}' is not registered for source '{event_source}'")]
    SourceNotAllowed {
        event_type: String,
        event_source: String,
    },

    #[error("the payload does not match the event schema")]
    Violation(Vec<ValidationCause>),
}

/// A registered validator.
pub struct SchemaEntry {
    pub key: SchemaKey,
    pub owner: ResourceRef,
    pub sub_types: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub resource_version: String,
    schema: Arc<dyn CompiledSchema>,
}

impl SchemaEntry {
    fn check(&self, envelope: &EventEnvelope) -> Result<(), SchemaError> {
        let meta = &envelope.metadata;

        if !self.sub_types.is_empty() {
            let sub_type = meta.sub_type.as_deref().unwrap_or_default();
            if !self.sub_types.contains(sub_type) {
                return Err(SchemaError::SubTypeNotAllowed {
                    event_type: meta.event_type.clone(),
                    sub_type: sub_type.to_string(),
                });
            }
        }

        if !self.sources.is_empty() && !self.sources.contains(&meta.source) {
            return Err(SchemaError::SourceNotAllowed {
                event_type: meta.event_type.clone(),
                event_source: meta.source.clone(),
            });
        }

        self.schema
            .validate(&envelope.payload)
            .map_err(SchemaError::Violation)
    }
}

impl std::fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("sub_types", &self.sub_types)
            .field("sources", &self.sources)
            .field("resource_version", &self.resource_version)
            .finish_non_exhaustive()
    }
}

/// Result of applying a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every derived key already carries this resource version.
    Unchanged,
    /// Entries were written (and stale keys of the same definition dropped).
    Applied { written: usize, removed: usize },
    /// The schema failed to compile; nothing changed.
    Rejected,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<SchemaKey, Arc<SchemaEntry>>,
    /// Keys each definition currently owns.
    owners: HashMap<ResourceRef, BTreeSet<SchemaKey>>,
}

impl RegistryState {
    fn is_current(&self, owner: &ResourceRef, keys: &BTreeSet<SchemaKey>, rv: &str) -> bool {
        let owned_matches = self.owners.get(owner).is_some_and(|owned| owned == keys);
        owned_matches
            && keys.iter().all(|key| {
                self.entries
                    .get(key)
                    .is_some_and(|e| e.resource_version == rv && &e.owner == owner)
            })
    }
}

/// Store of compiled event-type validators.
pub struct SchemaRegistry {
    compiler: Arc<dyn SchemaCompiler>,
    state: RwLock<RegistryState>,
    synced: AtomicBool,
}

impl SchemaRegistry {
    /// Create a ready registry.
    pub fn new(compiler: Arc<dyn SchemaCompiler>) -> Self {
        let registry = Self::pending(compiler);
        registry.mark_synced();
        registry
    }

    /// Create a registry that rejects lookups until [`mark_synced`](Self::mark_synced).
    pub fn pending(compiler: Arc<dyn SchemaCompiler>) -> Self {
        Self {
            compiler,
            state: RwLock::new(RegistryState::default()),
            synced: AtomicBool::new(false),
        }
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Validate an envelope against its registered schema.
    pub async fn validate(&self, envelope: &EventEnvelope) -> Result<(), SchemaError> {
        if !self.is_synced() {
            return Err(SchemaError::Unavailable);
        }

        let exact = SchemaKey::exact(envelope);
        let entry = {
            let state = self.state.read().await;
            state
                .entries
                .get(&exact)
                .or_else(|| state.entries.get(&exact.wildcard()))
                .cloned()
        };

        let Some(entry) = entry else {
            return Err(SchemaError::NoSchemaFound(exact));
        };

        debug!(key = %entry.key, "schema matched");
        entry.check(envelope)
    }

    /// Add or update the entries a definition derives.
    pub async fn apply_definition(&self, definition: &EventTypeDefinition) -> ApplyOutcome {
        let owner = definition.resource_ref();
        let keys = SchemaKey::derive_all(definition);
        let rv = definition.resource_version.as_str();

        if self.state.read().await.is_current(&owner, &keys, rv) {
            debug!(definition = %owner, resource_version = %rv, "event type unchanged");
            return ApplyOutcome::Unchanged;
        }

        let schema = match self.compiler.compile(&definition.spec.schema) {
            Ok(schema) => schema,
            Err(e) => {
                error!(
                    definition = %owner,
                    event_type = %definition.spec.event_type,
                    version = %definition.spec.version,
                    resource_version = %rv,
                    error = %e,
                    "cannot compile event schema; keeping previous state"
                );
                return ApplyOutcome::Rejected;
            }
        };

        let sub_types: BTreeSet<String> = definition.spec.sub_types.iter().cloned().collect();
        let sources: BTreeSet<String> = definition.spec.sources.iter().cloned().collect();

        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut written = 0;

        for key in &keys {
            if let Some(existing) = state.entries.get(key) {
                if existing.owner == owner && existing.resource_version == rv {
                    continue;
                }
                if existing.owner != owner {
                    warn!(
                        key = %key,
                        previous_owner = %existing.owner,
                        definition = %owner,
                        "schema key taken over by another definition"
                    );
                    if let Some(owned) = state.owners.get_mut(&existing.owner) {
                        owned.remove(key);
                    }
                }
            }

            state.entries.insert(
                key.clone(),
                Arc::new(SchemaEntry {
                    key: key.clone(),
                    owner: owner.clone(),
                    sub_types: sub_types.clone(),
                    sources: sources.clone(),
                    resource_version: rv.to_string(),
                    schema: Arc::clone(&schema),
                }),
            );
            written += 1;
        }

        let previously_owned = state.owners.insert(owner.clone(), keys.clone());
        let mut removed = 0;
        for stale in previously_owned.unwrap_or_default().difference(&keys) {
            if state.entries.get(stale).is_some_and(|e| e.owner == owner) {
                state.entries.remove(stale);
                removed += 1;
            }
        }
        drop(guard);

        info!(
            definition = %owner,
            event_type = %definition.spec.event_type,
            version = %definition.spec.version,
            resource_version = %rv,
            written,
            removed,
            "event type applied"
        );

        ApplyOutcome::Applied { written, removed }
    }

    /// Delete every entry a definition owns. Returns the number removed.
    pub async fn remove_definition(&self, definition: &EventTypeDefinition) -> usize {
        let owner = definition.resource_ref();
        let mut state = self.state.write().await;

        let mut keys = state.owners.remove(&owner).unwrap_or_default();
        keys.extend(SchemaKey::derive_all(definition));

        let mut removed = 0;
        for key in &keys {
            if state.entries.get(key).is_some_and(|e| e.owner == owner) {
                state.entries.remove(key);
                removed += 1;
            }
        }
        drop(state);

        info!(
            definition = %owner,
            event_type = %definition.spec.event_type,
            removed,
            "event type deleted"
        );
        removed
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Registered keys, sorted.
    pub async fn keys(&self) -> Vec<SchemaKey> {
        let state = self.state.read().await;
        let mut keys: Vec<SchemaKey> = state.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn get(&self, key: &SchemaKey) -> Option<Arc<SchemaEntry>> {
        self.state.read().await.entries.get(key).cloned()
    }
}
