//! Error types for event ingestion.

use thiserror::Error;

/// Reasons an inbound notification could not be turned into an [`Event`].
///
/// Both variants are recoverable: the listener drops the message and keeps
/// serving.
///
/// [`Event`]: crate::Event
#[derive(Debug, Error)]
pub enum EventError {
    /// Unknown `type`, missing `info.app` / `info.job`, or missing metadata.
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Message rejected by the notification schema before construction.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Payload is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl EventError {
    /// Short, stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            EventError::Malformed(_) => "MALFORMED_EVENT",
            EventError::SchemaViolation(_) => "SCHEMA_VIOLATION",
            EventError::Json(_) => "INVALID_JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EventError::Malformed("x".into()).code(), "MALFORMED_EVENT");
        let err = EventError::SchemaViolation("\"info\" is a required property".into());
        assert_eq!(err.code(), "SCHEMA_VIOLATION");
        assert!(err.to_string().contains("required"));
    }
}
