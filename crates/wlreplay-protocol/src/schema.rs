//! JSON Schema for notification messages.
//!
//! Used when the orchestrator runs with `validate_on_ingest` enabled. The
//! schema mirrors the structural checks performed by [`EventFactory`], but
//! also rejects wrongly typed fields. Unknown top-level keys pass, as they
//! do through the factory.
//!
//! [`EventFactory`]: crate::EventFactory

use serde_json::{json, Value};

use crate::error::EventError;

/// Schema identifier for notification messages
pub const SCHEMA_ID: &str = "wlreplay/notification@1";

/// Build the notification JSON Schema (draft 2020-12).
pub fn notification_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": SCHEMA_ID,
        "type": "object",
        "required": ["info", "type"],
        "properties": {
            "info": {
                "type": "object",
                "required": ["job", "app"],
                "properties": {
                    "job": { "type": "integer", "minimum": 0 },
                    "app": { "type": "string", "minLength": 1 }
                }
            },
            "type": {
                "enum": ["Complete", "Failed", "MetadataChange", "NotifyMetadata"]
            },
            "token": { "type": "string" },
            "metadata": { "type": "object" }
        },
        "if": {
            "properties": { "type": { "enum": ["MetadataChange", "NotifyMetadata"] } }
        },
        "then": {
            "required": ["metadata"],
            "properties": { "metadata": { "type": "object", "minProperties": 1 } }
        }
    })
}

/// Compiled notification schema.
pub struct NotificationValidator {
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for NotificationValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationValidator")
            .field("schema_id", &SCHEMA_ID)
            .finish()
    }
}

impl NotificationValidator {
    /// Compile the built-in notification schema.
    pub fn new() -> Result<Self, EventError> {
        let validator = jsonschema::options()
            .build(&notification_schema())
            .map_err(|e| EventError::SchemaViolation(format!("invalid schema: {}", e)))?;
        Ok(Self { validator })
    }

    /// Validate a raw message, reporting the first violation.
    pub fn validate(&self, message: &Value) -> Result<(), EventError> {
        match self.validator.iter_errors(message).next() {
            Some(error) => Err(EventError::SchemaViolation(error.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> NotificationValidator {
        NotificationValidator::new().unwrap()
    }

    #[test]
    fn test_accepts_complete() {
        let msg = json!({"info": {"job": 3, "app": "ioburst"}, "type": "Complete", "token": "t"});
        assert!(validator().validate(&msg).is_ok());
    }

    #[test]
    fn test_accepts_notify_metadata() {
        let msg = json!({
            "info": {"job": 0, "app": "stepper"},
            "type": "NotifyMetadata",
            "metadata": {"step": 1}
        });
        assert!(validator().validate(&msg).is_ok());
    }

    #[test]
    fn test_rejects_metadata_kind_without_metadata() {
        let msg = json!({"info": {"job": 0, "app": "stepper"}, "type": "MetadataChange"});
        let err = validator().validate(&msg).unwrap_err();
        assert!(matches!(err, EventError::SchemaViolation(_)));
    }

    #[test]
    fn test_rejects_string_job_id() {
        let msg = json!({"info": {"job": "0", "app": "stepper"}, "type": "Complete"});
        assert!(validator().validate(&msg).is_err());
    }

    #[test]
    fn test_accepts_unknown_top_level_key() {
        let msg = json!({"info": {"job": 0, "app": "a"}, "type": "Complete", "host": "node17"});
        assert!(validator().validate(&msg).is_ok());
    }

    #[test]
    fn test_rejects_unknown_type() {
        let msg = json!({"info": {"job": 0, "app": "a"}, "type": "Started"});
        assert!(validator().validate(&msg).is_err());
    }
}
