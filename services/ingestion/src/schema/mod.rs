//! Event-type schemas.
//!
//! ```text
//! definition source -> apply_definition -> compile -> SchemaRegistry
//!                                                         |
//!                    envelope -> validate(type, subType | *, version)
//! ```

mod compiler;
mod registry;

pub use compiler::{CompileError, CompiledSchema, JsonSchema, JsonSchemaCompiler, SchemaCompiler};
pub use registry::{ApplyOutcome, SchemaEntry, SchemaError, SchemaKey, SchemaRegistry, WILDCARD_SUB_TYPE};
