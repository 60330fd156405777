//! Shape validation for the envelope `metadata` section.

use jsonschema::{Draft, Validator};
use serde_json::{json, Value};

use crate::error::{EventError, ValidationCause};

/// Builds the JSON Schema every metadata section must satisfy.
fn metadata_schema() -> Value {
    let name = json!({
        "type": "string",
        "pattern": "^[A-Za-z-]{3,63}$"
    });

    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "source": name,
            "type": name,
            "subType": name,
            "version": {
                "type": "string",
                "pattern": "^[0-9]{1,4}\\.[0-9]{1,4}\\.[0-9]{1,4}$"
            },
            "eventTime": { "type": "string" },
            "eventUUID": { "type": "string" }
        },
        "required": ["source", "type", "version"]
    })
}

/// Compiled metadata validator.
///
/// Built once at startup and shared by every request.
pub struct MetadataValidator {
    schema: Validator,
}

impl MetadataValidator {
    pub fn new() -> Result<Self, EventError> {
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&metadata_schema())
            .map_err(|err| EventError::MetadataSchema(err.to_string()))?;

        Ok(Self { schema })
    }

    /// Check a raw metadata value, collecting every violation.
    pub fn validate(&self, metadata: &Value) -> Result<(), Vec<ValidationCause>> {
        let causes: Vec<ValidationCause> = self
            .schema
            .iter_errors(metadata)
            .map(|err| ValidationCause::new(err.to_string()))
            .collect();

        if causes.is_empty() {
            Ok(())
        } else {
            Err(causes)
        }
    }
}

impl std::fmt::Debug for MetadataValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validator() -> MetadataValidator {
        MetadataValidator::new().unwrap()
    }

    #[test]
    fn test_minimal_metadata_is_valid() {
        let meta = json!({"source": "github", "type": "PullRequest", "version": "1.0.0"});
        assert!(validator().validate(&meta).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let causes = validator().validate(&json!({"source": "github"})).unwrap_err();
        assert_eq!(causes.len(), 2, "type and version are required: {causes:?}");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let meta = json!({
            "source": "github",
            "type": "PullRequest",
            "version": "1.0.0",
            "tenant": "acme"
        });
        assert!(validator().validate(&meta).is_err());
    }

    #[test]
    fn test_name_length_bounds() {
        let v = validator();
        let short = json!({"source": "gh", "type": "PullRequest", "version": "1.0.0"});
        assert!(v.validate(&short).is_err());

        let long = "a".repeat(64);
        let too_long = json!({"source": long, "type": "PullRequest", "version": "1.0.0"});
        assert!(v.validate(&too_long).is_err());

        let max = "a".repeat(63);
        let at_max = json!({"source": max, "type": "PullRequest", "version": "1.0.0"});
        assert!(v.validate(&at_max).is_ok());
    }

    #[test]
    fn test_non_object_metadata() {
        assert!(validator().validate(&json!("github")).is_err());
        assert!(validator().validate(&Value::Null).is_err());
    }

    proptest! {
        #[test]
        fn prop_versions_with_short_components_are_valid(
            major in 0u32..10_000,
            minor in 0u32..10_000,
            patch in 0u32..10_000,
        ) {
            let meta = json!({
                "source": "github",
                "type": "Release",
                "version": format!("{major}.{minor}.{patch}"),
            });
            prop_assert!(validator().validate(&meta).is_ok());
        }

        #[test]
        fn prop_names_with_digits_are_rejected(name in "[A-Za-z]{2,10}[0-9][A-Za-z]{0,10}") {
            let meta = json!({"source": name, "type": "Release", "version": "1.0.0"});
            prop_assert!(validator().validate(&meta).is_err());
        }

        #[test]
        fn prop_five_digit_version_components_are_rejected(major in 10_000u32..100_000) {
            let meta = json!({
                "source": "github",
                "type": "Release",
                "version": format!("{major}.0.0"),
            });
            prop_assert!(validator().validate(&meta).is_err());
        }
    }
}
