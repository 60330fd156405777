//! Test harness for ingestion integration tests.
//!
//! Wires the real registry, engine, pipeline and router over an in-memory
//! broker, with helpers to register definitions and build request bodies.

#![allow(dead_code)]

use std::sync::Arc;

use admit_events::{
    EventTypeDefinition, EventTypeSpec, IngestionPolicyDefinition, IngestionPolicySpec,
    PolicyDefaults,
};
use admit_ingestion::{
    api,
    policy::{
        CompiledRule, EvaluationError, PolicyDecisionEngine, RuleEvaluator, RuleOutput,
        SchemaRuleEvaluator,
    },
    publisher::{InMemoryBroker, PublisherClientCache, PublisherOptions},
    schema::{CompileError, JsonSchemaCompiler, SchemaRegistry},
    settings::{AuthSettings, BrokerSettings, LiveSettings, Secret, SettingsCell},
    AppState, IngestionPipeline,
};
use axum::Router;
use serde_json::{json, Value};

pub const API_KEY: &str = "test-key";

pub struct Gateway {
    pub broker: InMemoryBroker,
    pub registry: Arc<SchemaRegistry>,
    pub engine: Arc<PolicyDecisionEngine>,
    pub publisher: Arc<PublisherClientCache>,
    pub settings: Arc<SettingsCell>,
    pub state: AppState,
}

pub struct GatewayOptions {
    pub registry_ready: bool,
    pub engine_ready: bool,
    pub evaluator: Arc<dyn RuleEvaluator>,
    pub token: Option<&'static str>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            registry_ready: true,
            engine_ready: true,
            evaluator: Arc::new(SchemaRuleEvaluator::new()),
            token: Some(API_KEY),
        }
    }
}

impl Gateway {
    pub fn new() -> Self {
        Self::with(GatewayOptions::default())
    }

    pub fn with(options: GatewayOptions) -> Self {
        let broker = InMemoryBroker::new();

        let compiler = Arc::new(JsonSchemaCompiler::new());
        let registry = Arc::new(if options.registry_ready {
            SchemaRegistry::new(compiler)
        } else {
            SchemaRegistry::pending(compiler)
        });
        let engine = Arc::new(if options.engine_ready {
            PolicyDecisionEngine::new(options.evaluator)
        } else {
            PolicyDecisionEngine::pending(options.evaluator)
        });

        let settings = Arc::new(SettingsCell::new(LiveSettings {
            broker: BrokerSettings::default(),
            auth: AuthSettings {
                token: options.token.map(Secret::new),
            },
        }));

        let publisher = Arc::new(PublisherClientCache::new(
            Arc::new(broker.clone()),
            settings.snapshot().broker.clone(),
            PublisherOptions::default(),
        ));

        let pipeline = IngestionPipeline::new(
            Arc::clone(&registry),
            Arc::clone(&engine),
            Arc::clone(&publisher),
        )
        .unwrap();

        let state = AppState::new(pipeline, Arc::clone(&settings));

        Self {
            broker,
            registry,
            engine,
            publisher,
            settings,
            state,
        }
    }

    pub fn router(&self) -> Router {
        api::create_router(self.state.clone())
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        self.state.pipeline()
    }

    pub async fn register_event_type(&self, definition: EventTypeDefinition) {
        self.registry.apply_definition(&definition).await;
    }

    pub async fn register_policy(&self, policy: IngestionPolicyDefinition) {
        self.engine.apply_policy(&policy).await;
    }
}

pub fn event_type(
    name: &str,
    event_type: &str,
    version: &str,
    sub_types: &[&str],
    schema: Value,
) -> EventTypeDefinition {
    EventTypeDefinition {
        name: name.to_string(),
        namespace: "default".to_string(),
        resource_version: "1".to_string(),
        spec: EventTypeSpec {
            event_type: event_type.to_string(),
            version: version.to_string(),
            sub_types: sub_types.iter().map(|s| s.to_string()).collect(),
            sources: Vec::new(),
            schema: schema.to_string(),
        },
    }
}

/// `PullRequest` 1.0.0 with subtype `Created`, accepting any object payload.
pub fn pull_request_type() -> EventTypeDefinition {
    event_type(
        "pull-request",
        "PullRequest",
        "1.0.0",
        &["Created"],
        json!({"type": "object"}),
    )
}

pub fn policy(name: &str, allow: bool, ttl: Option<i64>, body: &str) -> IngestionPolicyDefinition {
    IngestionPolicyDefinition {
        name: name.to_string(),
        namespace: "default".to_string(),
        resource_version: "1".to_string(),
        spec: IngestionPolicySpec {
            defaults: PolicyDefaults { allow, ttl },
            policy: body.to_string(),
        },
    }
}

pub fn body(source: &str, event_type: &str, sub_type: Option<&str>, payload: Value) -> Vec<u8> {
    versioned_body(source, event_type, sub_type, "1.0.0", payload)
}

pub fn versioned_body(
    source: &str,
    event_type: &str,
    sub_type: Option<&str>,
    version: &str,
    payload: Value,
) -> Vec<u8> {
    let mut metadata = json!({
        "source": source,
        "type": event_type,
        "version": version,
    });
    if let Some(sub_type) = sub_type {
        metadata["subType"] = json!(sub_type);
    }

    serde_json::to_vec(&json!({"metadata": metadata, "payload": payload})).unwrap()
}

pub fn pull_request_created() -> Vec<u8> {
    body("github", "PullRequest", Some("Created"), json!({}))
}

/// Evaluator whose rules compile but always fail at runtime.
pub struct FailingEvaluator;

struct FailingRule;

impl CompiledRule for FailingRule {
    fn evaluate(&self, _subject: &Value) -> Result<RuleOutput, EvaluationError> {
        Err(EvaluationError("rule evaluation blew up".to_string()))
    }
}

impl RuleEvaluator for FailingEvaluator {
    fn compile(&self, _source: &str) -> Result<Arc<dyn CompiledRule>, CompileError> {
        Ok(Arc::new(FailingRule))
    }
}
