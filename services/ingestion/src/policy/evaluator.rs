//! Rule evaluation capability.
//!
//! A policy's rule body is compiled once and evaluated per event against the
//! normalized subject (`{"metadata": .., "payload": ..}`). The engine only
//! sees [`RuleEvaluator`] and [`CompiledRule`].

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::schema::{CompileError, JsonSchema, JsonSchemaCompiler};

/// Bindings produced by a rule. Unset fields fall back to policy defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleOutput {
    #[serde(default)]
    pub allow: Option<bool>,
    #[serde(default)]
    pub ttl: Option<i64>,
}

impl RuleOutput {
    /// Overlay `other` on top of `self`; set fields in `other` win.
    pub fn merge(self, other: RuleOutput) -> RuleOutput {
        RuleOutput {
            allow: other.allow.or(self.allow),
            ttl: other.ttl.or(self.ttl),
        }
    }
}

/// Runtime failure of a compiled rule.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EvaluationError(pub String);

pub trait CompiledRule: Send + Sync {
    fn evaluate(&self, subject: &Value) -> Result<RuleOutput, EvaluationError>;
}

pub trait RuleEvaluator: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledRule>, CompileError>;
}

/// Rule bodies whose predicates are JSON Schemas.
///
/// ```json
/// { "rules": [ { "match": { "properties": { "metadata": { "properties":
///     { "source": { "const": "legacy" } } } } },
///   "bindings": { "allow": false } } ] }
/// ```
///
/// Every rule whose `match` schema accepts the subject contributes its
/// bindings, later rules overriding earlier ones. An empty body has no rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaRuleEvaluator {
    schemas: JsonSchemaCompiler,
}

impl SchemaRuleEvaluator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDocument {
    #[serde(default)]
    rules: Vec<RuleSource>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSource {
    #[serde(rename = "match", default = "match_everything")]
    matcher: Value,
    #[serde(default)]
    bindings: RuleOutput,
}

fn match_everything() -> Value {
    Value::Bool(true)
}

struct SchemaRule {
    matcher: JsonSchema,
    bindings: RuleOutput,
}

struct SchemaRuleSet {
    rules: Vec<SchemaRule>,
}

impl RuleEvaluator for SchemaRuleEvaluator {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledRule>, CompileError> {
        if source.trim().is_empty() {
            return Ok(Arc::new(SchemaRuleSet { rules: Vec::new() }));
        }

        let document: RuleDocument =
            serde_json::from_str(source).map_err(|e| CompileError::Syntax(e.to_string()))?;

        let rules = document
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| {
                let matcher = self.schemas.compile_value(&rule.matcher).map_err(|e| {
                    CompileError::Invalid(format!("rules[{index}].match: {e}"))
                })?;
                Ok(SchemaRule {
                    matcher,
                    bindings: rule.bindings,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        Ok(Arc::new(SchemaRuleSet { rules }))
    }
}

impl CompiledRule for SchemaRuleSet {
    fn evaluate(&self, subject: &Value) -> Result<RuleOutput, EvaluationError> {
        Ok(self
            .rules
            .iter()
            .filter(|rule| rule.matcher.is_valid(subject))
            .fold(RuleOutput::default(), |acc, rule| acc.merge(rule.bindings)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject(source: &str) -> Value {
        json!({
            "metadata": {"source": source, "type": "Release", "version": "1.0.0"},
            "payload": {"draft": false}
        })
    }

    #[test]
    fn test_empty_body_has_no_output() {
        let rule = SchemaRuleEvaluator::new().compile("  ").unwrap();
        assert_eq!(rule.evaluate(&subject("github")).unwrap(), RuleOutput::default());
    }

    #[test]
    fn test_matching_rule_sets_bindings() {
        let rule = SchemaRuleEvaluator::new()
            .compile(
                r#"{"rules":[{"match":{"properties":{"metadata":{"properties":
                    {"source":{"const":"legacy"}}}}},"bindings":{"allow":false}}]}"#,
            )
            .unwrap();

        assert_eq!(rule.evaluate(&subject("legacy")).unwrap().allow, Some(false));
        assert_eq!(rule.evaluate(&subject("github")).unwrap().allow, None);
    }

    #[test]
    fn test_later_rules_override() {
        let rule = SchemaRuleEvaluator::new()
            .compile(
                r#"{"rules":[
                    {"bindings":{"allow":false,"ttl":30}},
                    {"match":{"properties":{"payload":{"properties":{"draft":{"const":false}}}}},
                     "bindings":{"allow":true}}
                ]}"#,
            )
            .unwrap();

        let out = rule.evaluate(&subject("github")).unwrap();
        assert_eq!(out, RuleOutput { allow: Some(true), ttl: Some(30) });
    }

    #[test]
    fn test_compile_errors() {
        let evaluator = SchemaRuleEvaluator::new();
        assert!(matches!(
            evaluator.compile("allow = false").err(),
            Some(CompileError::Syntax(_))
        ));
        assert!(matches!(
            evaluator.compile(r#"{"rules":[{"bindings":{"allow":"no"}}]}"#).err(),
            Some(CompileError::Syntax(_))
        ));
        assert!(matches!(
            evaluator.compile(r#"{"rules":[{"match":{"type":7}}]}"#).err(),
            Some(CompileError::Invalid(_))
        ));
    }
}
