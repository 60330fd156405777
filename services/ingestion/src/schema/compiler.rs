//! Schema compilation capability.
//!
//! The registry only needs `compile(source)` and `validate(payload)`; the
//! schema language lives behind these two traits.

use std::sync::Arc;

use admit_events::ValidationCause;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling a schema or rule body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The source is not valid JSON.
    #[error("source is not valid JSON: {0}")]
    Syntax(String),

    /// The source parsed but is not a valid document for its language.
    #[error("invalid source: {0}")]
    Invalid(String),
}

/// A compiled payload validator.
pub trait CompiledSchema: Send + Sync {
    /// Validate a payload, returning every violation on failure.
    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationCause>>;
}

/// Turns schema source text into a validator.
pub trait SchemaCompiler: Send + Sync {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledSchema>, CompileError>;
}

/// JSON Schema compiler backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy)]
pub struct JsonSchemaCompiler {
    draft: Draft,
}

impl JsonSchemaCompiler {
    pub fn new() -> Self {
        Self {
            draft: Draft::Draft202012,
        }
    }

    /// Compile an already-parsed schema document.
    pub fn compile_value(&self, schema: &Value) -> Result<JsonSchema, CompileError> {
        let validator = jsonschema::options()
            .with_draft(self.draft)
            .build(schema)
            .map_err(|e| CompileError::Invalid(e.to_string()))?;

        Ok(JsonSchema { validator })
    }
}

impl Default for JsonSchemaCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCompiler for JsonSchemaCompiler {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledSchema>, CompileError> {
        let schema: Value =
            serde_json::from_str(source).map_err(|e| CompileError::Syntax(e.to_string()))?;
        Ok(Arc::new(self.compile_value(&schema)?))
    }
}

/// A compiled JSON Schema.
pub struct JsonSchema {
    validator: Validator,
}

impl JsonSchema {
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }
}

impl CompiledSchema for JsonSchema {
    fn validate(&self, payload: &Value) -> Result<(), Vec<ValidationCause>> {
        let causes: Vec<ValidationCause> = self
            .validator
            .iter_errors(payload)
            .map(|err| ValidationCause::new(err.to_string()))
            .collect();

        if causes.is_empty() {
            Ok(())
        } else {
            Err(causes)
        }
    }
}
