//! Ingestion policies.
//!
//! Each policy has default bindings and an optional rule body. The engine
//! evaluates every policy for every event and folds the votes into a single
//! [`Decision`].

mod engine;
mod evaluator;

pub use engine::{Decision, Policy, PolicyDecisionEngine, PolicyError, PolicyOutcome};
pub use evaluator::{CompiledRule, EvaluationError, RuleEvaluator, RuleOutput, SchemaRuleEvaluator};
