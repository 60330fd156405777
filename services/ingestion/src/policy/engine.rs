//! Policy decision engine.
//!
//! Aggregates every registered ingestion policy into one verdict:
//! - No policies → allow (fail-open)
//! - Any policy denying → deny (deny-wins)
//! - `ttl` is the largest positive ttl any policy yields
//! - Any evaluation failure fails the whole decision

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use admit_events::{EventEnvelope, IngestionPolicyDefinition, PolicyDefaults, ResourceRef};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use super::evaluator::{CompiledRule, EvaluationError, RuleEvaluator, RuleOutput};

/// Aggregated admission verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            ttl: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The engine has not finished its initial sync.
    #[error("the policy engine is not ready")]
    Unavailable,

    #[error("policy {policy} failed to evaluate: {source}")]
    Evaluation {
        policy: ResourceRef,
        #[source]
        source: EvaluationError,
    },
}

/// Result of applying a policy definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyOutcome {
    Unchanged,
    Added,
    Updated,
    /// The rule body failed to compile; nothing changed.
    Rejected,
}

/// A compiled ingestion policy.
pub struct Policy {
    pub reference: ResourceRef,
    pub defaults: PolicyDefaults,
    pub resource_version: String,
    rule: Arc<dyn CompiledRule>,
}

fn positive(ttl: Option<i64>) -> Option<i64> {
    ttl.filter(|ttl| *ttl > 0)
}

impl Policy {
    /// Evaluate the rule and merge its output over the defaults.
    pub fn evaluate(&self, subject: &serde_json::Value) -> Result<Decision, EvaluationError> {
        let defaults = RuleOutput {
            allow: Some(self.defaults.allow),
            ttl: positive(self.defaults.ttl),
        };
        let output = self.rule.evaluate(subject)?;
        let merged = defaults.merge(RuleOutput {
            allow: output.allow,
            ttl: positive(output.ttl),
        });

        Ok(Decision {
            allow: merged.allow.unwrap_or(self.defaults.allow),
            ttl: merged.ttl,
        })
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("reference", &self.reference)
            .field("defaults", &self.defaults)
            .field("resource_version", &self.resource_version)
            .finish_non_exhaustive()
    }
}

/// Store of compiled policies plus the aggregation logic.
pub struct PolicyDecisionEngine {
    evaluator: Arc<dyn RuleEvaluator>,
    /// Policies in `(namespace, name)` order.
    policies: RwLock<BTreeMap<ResourceRef, Arc<Policy>>>,
    synced: AtomicBool,
}

impl PolicyDecisionEngine {
    /// Create a ready engine.
    pub fn new(evaluator: Arc<dyn RuleEvaluator>) -> Self {
        let engine = Self::pending(evaluator);
        engine.mark_synced();
        engine
    }

    /// Create an engine that refuses decisions until [`mark_synced`](Self::mark_synced).
    pub fn pending(evaluator: Arc<dyn RuleEvaluator>) -> Self {
        Self {
            evaluator,
            policies: RwLock::new(BTreeMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Decide whether an envelope may be ingested.
    pub async fn decide(&self, envelope: &EventEnvelope) -> Result<Decision, PolicyError> {
        if !self.is_synced() {
            return Err(PolicyError::Unavailable);
        }

        let policies: Vec<Arc<Policy>> = self.policies.read().await.values().cloned().collect();
        if policies.is_empty() {
            return Ok(Decision::allow());
        }

        let subject = envelope.policy_subject();
        let mut decision = Decision::allow();

        for policy in &policies {
            let vote = policy
                .evaluate(&subject)
                .map_err(|source| PolicyError::Evaluation {
                    policy: policy.reference.clone(),
                    source,
                })?;

            if !vote.allow {
                debug!(policy = %policy.reference, "policy denied event");
                decision.allow = false;
            }
            decision.ttl = match (decision.ttl, vote.ttl) {
                (Some(current), Some(ttl)) => Some(current.max(ttl)),
                (current, ttl) => current.or(ttl),
            };
        }

        Ok(decision)
    }

    /// Add or update a policy.
    pub async fn apply_policy(&self, definition: &IngestionPolicyDefinition) -> PolicyOutcome {
        let reference = definition.resource_ref();
        let rv = definition.resource_version.as_str();

        let existed = match self.policies.read().await.get(&reference) {
            Some(existing) if existing.resource_version == rv => {
                debug!(policy = %reference, resource_version = %rv, "ingestion policy unchanged");
                return PolicyOutcome::Unchanged;
            }
            Some(_) => true,
            None => false,
        };

        let rule = match self.evaluator.compile(&definition.spec.policy) {
            Ok(rule) => rule,
            Err(e) => {
                error!(
                    policy = %reference,
                    resource_version = %rv,
                    error = %e,
                    "cannot compile ingestion policy; keeping previous state"
                );
                return PolicyOutcome::Rejected;
            }
        };

        let policy = Arc::new(Policy {
            reference: reference.clone(),
            defaults: definition.spec.defaults,
            resource_version: rv.to_string(),
            rule,
        });

        {
            let mut policies = self.policies.write().await;
            if policies
                .get(&reference)
                .is_some_and(|p| p.resource_version == rv)
            {
                return PolicyOutcome::Unchanged;
            }
            policies.insert(reference.clone(), policy);
        }

        info!(
            policy = %reference,
            resource_version = %rv,
            allow = definition.spec.defaults.allow,
            ttl = ?definition.spec.defaults.ttl,
            "{}",
            if existed { "updated ingestion policy" } else { "added ingestion policy" }
        );

        if existed {
            PolicyOutcome::Updated
        } else {
            PolicyOutcome::Added
        }
    }

    /// Remove a policy. Returns whether it was registered.
    pub async fn remove_policy(&self, reference: &ResourceRef) -> bool {
        let existed = self.policies.write().await.remove(reference).is_some();
        info!(
            policy = %reference,
            existed,
            "deleted ingestion policy; it is no longer in effect"
        );
        existed
    }

    pub async fn len(&self) -> usize {
        self.policies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.policies.read().await.is_empty()
    }

    pub async fn policy_names(&self) -> Vec<ResourceRef> {
        self.policies.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, reference: &ResourceRef) -> Option<Arc<Policy>> {
        self.policies.read().await.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::evaluator::SchemaRuleEvaluator;
    use crate::schema::CompileError;
    use admit_events::{EventEnvelopeBuilder, IngestionPolicySpec};
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    fn policy(name: &str, rv: &str, allow: bool, ttl: Option<i64>, body: &str) -> IngestionPolicyDefinition {
        IngestionPolicyDefinition {
            name: name.to_string(),
            namespace: "default".to_string(),
            resource_version: rv.to_string(),
            spec: IngestionPolicySpec {
                defaults: PolicyDefaults { allow, ttl },
                policy: body.to_string(),
            },
        }
    }

    fn engine() -> PolicyDecisionEngine {
        PolicyDecisionEngine::new(Arc::new(SchemaRuleEvaluator::new()))
    }

    fn envelope(source: &str) -> EventEnvelope {
        EventEnvelopeBuilder::new(source, "PullRequest")
            .sub_type("Created")
            .payload(json!({}))
            .build()
    }

    /// Counts compilations, delegating to the schema evaluator.
    #[derive(Default)]
    struct CountingEvaluator {
        inner: SchemaRuleEvaluator,
        calls: AtomicUsize,
    }

    impl RuleEvaluator for CountingEvaluator {
        fn compile(&self, source: &str) -> Result<Arc<dyn CompiledRule>, CompileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.compile(source)
        }
    }

    /// Compiles anything; evaluation always fails.
    struct BrokenEvaluator;

    struct BrokenRule;

    impl CompiledRule for BrokenRule {
        fn evaluate(&self, _subject: &Value) -> Result<RuleOutput, EvaluationError> {
            Err(EvaluationError("undefined reference: input.nope".to_string()))
        }
    }

    impl RuleEvaluator for BrokenEvaluator {
        fn compile(&self, _source: &str) -> Result<Arc<dyn CompiledRule>, CompileError> {
            Ok(Arc::new(BrokenRule))
        }
    }

    #[tokio::test]
    async fn test_no_policies_allows() {
        let decision = engine().decide(&envelope("github")).await.unwrap();
        assert_eq!(decision, Decision::allow());
    }

    #[tokio::test]
    async fn test_deny_wins() {
        let engine = engine();
        engine.apply_policy(&policy("a", "1", true, None, "")).await;
        engine.apply_policy(&policy("b", "1", false, None, "")).await;
        engine.apply_policy(&policy("c", "1", true, None, "")).await;

        let decision = engine.decide(&envelope("github")).await.unwrap();
        assert!(!decision.allow);
    }

    #[tokio::test]
    async fn test_rule_output_overrides_defaults() {
        let engine = engine();
        let body = r#"{"rules":[{"match":{"properties":{"metadata":{"properties":
            {"source":{"const":"github"}}}}},"bindings":{"allow":true}}]}"#;
        engine.apply_policy(&policy("github-only", "1", false, None, body)).await;

        assert!(engine.decide(&envelope("github")).await.unwrap().allow);
        assert!(!engine.decide(&envelope("gitlab")).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_max_positive_ttl() {
        let engine = engine();
        engine.apply_policy(&policy("a", "1", true, Some(60), "")).await;
        engine.apply_policy(&policy("b", "1", true, Some(3600), "")).await;
        engine.apply_policy(&policy("c", "1", true, Some(0), "")).await;
        engine
            .apply_policy(&policy("d", "1", true, None, r#"{"rules":[{"bindings":{"ttl":-5}}]}"#))
            .await;

        let decision = engine.decide(&envelope("github")).await.unwrap();
        assert_eq!(decision, Decision { allow: true, ttl: Some(3600) });
    }

    #[tokio::test]
    async fn test_no_positive_ttl_yields_none() {
        let engine = engine();
        engine.apply_policy(&policy("a", "1", true, Some(0), "")).await;

        assert_eq!(engine.decide(&envelope("github")).await.unwrap().ttl, None);
    }

    #[tokio::test]
    async fn test_evaluation_failure_is_fatal() {
        let engine = PolicyDecisionEngine::new(Arc::new(BrokenEvaluator));
        engine.apply_policy(&policy("broken", "1", true, None, "")).await;

        match engine.decide(&envelope("github")).await {
            Err(PolicyError::Evaluation { policy, .. }) => assert_eq!(policy.name, "broken"),
            other => panic!("Expected Evaluation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_same_resource_version_compiles_once() {
        let evaluator = Arc::new(CountingEvaluator::default());
        let engine = PolicyDecisionEngine::new(evaluator.clone());
        let def = policy("a", "1", false, None, "");

        assert_eq!(engine.apply_policy(&def).await, PolicyOutcome::Added);
        assert_eq!(engine.apply_policy(&def).await, PolicyOutcome::Unchanged);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_compile_keeps_previous_policy() {
        let engine = engine();
        engine.apply_policy(&policy("a", "1", false, None, "")).await;

        let outcome = engine.apply_policy(&policy("a", "2", true, None, "{oops")).await;
        assert_eq!(outcome, PolicyOutcome::Rejected);

        let kept = engine.get(&ResourceRef::new("default", "a")).await.unwrap();
        assert_eq!(kept.resource_version, "1");
        assert!(!engine.decide(&envelope("github")).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let engine = engine();
        engine.apply_policy(&policy("a", "1", false, None, "")).await;
        assert_eq!(
            engine.apply_policy(&policy("a", "2", true, None, "")).await,
            PolicyOutcome::Updated
        );
        assert!(engine.decide(&envelope("github")).await.unwrap().allow);

        engine.apply_policy(&policy("b", "1", false, None, "")).await;
        assert!(!engine.decide(&envelope("github")).await.unwrap().allow);

        assert!(engine.remove_policy(&ResourceRef::new("default", "b")).await);
        assert!(!engine.remove_policy(&ResourceRef::new("default", "b")).await);
        assert!(engine.decide(&envelope("github")).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_policies_are_scoped_by_namespace() {
        let engine = engine();
        let mut first = policy("shared", "1", true, None, "");
        first.namespace = "team-a".to_string();
        let mut second = policy("shared", "1", false, None, "");
        second.namespace = "team-b".to_string();

        engine.apply_policy(&first).await;
        engine.apply_policy(&second).await;

        assert_eq!(engine.len().await, 2);
        assert!(!engine.decide(&envelope("github")).await.unwrap().allow);
    }

    #[tokio::test]
    async fn test_pending_engine_is_unavailable() {
        let engine = PolicyDecisionEngine::pending(Arc::new(SchemaRuleEvaluator::new()));
        assert_eq!(
            engine.decide(&envelope("github")).await,
            Err(PolicyError::Unavailable)
        );
    }
}
