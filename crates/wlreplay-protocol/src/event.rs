//! Job lifecycle events and their structural identity
//!
//! An [`Event`] is produced by a running job and delivered to the
//! orchestrator; the same shape (minus the token) is used in job lists to
//! describe event dependencies. Matching between the two is done purely on
//! [`EventIdentity`], which ignores the token and any ordering of metadata.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EventError;
use crate::schema::NotificationValidator;

/// Metadata attached to metadata-carrying events.
pub type Metadata = serde_json::Map<String, Value>;

/// Event variant tag (`type` on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// The job finished successfully
    Complete,
    /// The job finished with an error
    Failed,
    /// The job changed a piece of its metadata
    MetadataChange,
    /// Trigger fired by a job for others waiting on a metadata signal
    NotifyMetadata,
}

impl EventKind {
    /// All kinds, in wire order.
    pub const ALL: [EventKind; 4] = [
        EventKind::Complete,
        EventKind::Failed,
        EventKind::MetadataChange,
        EventKind::NotifyMetadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Complete => "Complete",
            EventKind::Failed => "Failed",
            EventKind::MetadataChange => "MetadataChange",
            EventKind::NotifyMetadata => "NotifyMetadata",
        }
    }

    /// Whether events of this kind require (and are identified by) metadata.
    pub fn carries_metadata(&self) -> bool {
        matches!(self, EventKind::MetadataChange | EventKind::NotifyMetadata)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::Malformed(format!("unrecognized event type '{}'", s)))
    }
}

/// Producer of an event (`info` on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    /// Application name of the producing job
    pub app: String,
    /// Job id of the producing job
    pub job: u64,
}

impl Subject {
    pub fn new(app: impl Into<String>, job: u64) -> Self {
        Self {
            app: app.into(),
            job,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.job)
    }
}

/// A typed job notification.
///
/// Metadata is present exactly when `kind` carries metadata; the
/// constructors enforce this.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    subject: Subject,
    metadata: Option<Metadata>,
    token: Option<String>,
}

impl Event {
    /// Create a `Complete` event
    pub fn complete(subject: Subject) -> Self {
        Self {
            kind: EventKind::Complete,
            subject,
            metadata: None,
            token: None,
        }
    }

    /// Create a `Failed` event
    pub fn failed(subject: Subject) -> Self {
        Self {
            kind: EventKind::Failed,
            subject,
            metadata: None,
            token: None,
        }
    }

    /// Create a `MetadataChange` event; metadata must be non-empty
    pub fn metadata_change(subject: Subject, metadata: Metadata) -> Result<Self, EventError> {
        Self::with_metadata(EventKind::MetadataChange, subject, metadata)
    }

    /// Create a `NotifyMetadata` event; metadata must be non-empty
    pub fn notify_metadata(subject: Subject, metadata: Metadata) -> Result<Self, EventError> {
        Self::with_metadata(EventKind::NotifyMetadata, subject, metadata)
    }

    fn with_metadata(
        kind: EventKind,
        subject: Subject,
        metadata: Metadata,
    ) -> Result<Self, EventError> {
        if metadata.is_empty() {
            return Err(EventError::Malformed(format!(
                "{} event for {} requires non-empty metadata",
                kind, subject
            )));
        }
        Ok(Self {
            kind,
            subject,
            metadata: Some(metadata),
            token: None,
        })
    }

    /// Attach the run token carried on the wire
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Canonical comparison key used for dependency matching
    pub fn identity(&self) -> EventIdentity {
        EventIdentity::new(self.kind, &self.subject, self.metadata.as_ref())
    }

    /// Wire representation of this event
    pub fn to_message(&self) -> Value {
        let mut message = json!({
            "info": { "job": self.subject.job, "app": self.subject.app },
            "type": self.kind.as_str(),
        });
        if let Some(token) = &self.token {
            message["token"] = Value::String(token.clone());
        }
        if let Some(metadata) = &self.metadata {
            message["metadata"] = Value::Object(metadata.clone());
        }
        message
    }
}

/// Order-independent structural identity of an event or event pattern.
///
/// Equal for two events iff kind, app and job match and, for metadata kinds,
/// the metadata holds the same key/value pairs. Values are compared in their
/// RFC 8785 canonical form, so nested objects are order-independent too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventIdentity {
    kind: EventKind,
    subject: Subject,
    metadata: BTreeMap<String, String>,
}

impl EventIdentity {
    fn new(kind: EventKind, subject: &Subject, metadata: Option<&Metadata>) -> Self {
        let metadata = match metadata {
            Some(map) if kind.carries_metadata() => map
                .iter()
                .map(|(key, value)| (key.clone(), canonical_value(value)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            kind,
            subject: subject.clone(),
            metadata,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// SHA-256 hex digest of the canonical identity, for log correlation
    pub fn digest(&self) -> String {
        let canonical = json!({
            "kind": self.kind.as_str(),
            "app": self.subject.app,
            "job": self.subject.job,
            "metadata": self.metadata,
        });
        let bytes = serde_json_canonicalizer::to_vec(&canonical)
            .unwrap_or_else(|_| canonical.to_string().into_bytes());

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.subject)?;
        if !self.metadata.is_empty() {
            let pairs: Vec<String> = self
                .metadata
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }
        Ok(())
    }
}

fn canonical_value(value: &Value) -> String {
    match serde_json_canonicalizer::to_vec(value) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Builds typed events from raw notification messages.
#[derive(Debug, Default)]
pub struct EventFactory {
    validator: Option<NotificationValidator>,
}

impl EventFactory {
    /// Create a factory; with `validate_on_ingest` every message is checked
    /// against the notification schema before construction.
    pub fn new(validate_on_ingest: bool) -> Result<Self, EventError> {
        let validator = if validate_on_ingest {
            Some(NotificationValidator::new()?)
        } else {
            None
        };
        Ok(Self { validator })
    }

    /// Factory for trusted input (dependency descriptors in job lists)
    pub fn trusted() -> Self {
        Self { validator: None }
    }

    pub fn validates(&self) -> bool {
        self.validator.is_some()
    }

    /// Parse a raw payload read from the wire
    pub fn parse_bytes(&self, bytes: &[u8]) -> Result<Event, EventError> {
        let message: Value = serde_json::from_slice(bytes)?;
        self.from_message(&message)
    }

    /// Dispatch on `type` and build the matching event variant
    pub fn from_message(&self, message: &Value) -> Result<Event, EventError> {
        if let Some(validator) = &self.validator {
            validator.validate(message)?;
        }

        let object = message
            .as_object()
            .ok_or_else(|| EventError::Malformed("message is not a JSON object".to_string()))?;

        let kind: EventKind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::Malformed("missing field 'type'".to_string()))?
            .parse()?;

        let info = object
            .get("info")
            .and_then(Value::as_object)
            .ok_or_else(|| EventError::Malformed("missing field 'info'".to_string()))?;
        let app = info
            .get("app")
            .and_then(Value::as_str)
            .filter(|app| !app.is_empty())
            .ok_or_else(|| EventError::Malformed("missing field 'info.app'".to_string()))?;
        let job = info
            .get("job")
            .and_then(Value::as_u64)
            .ok_or_else(|| EventError::Malformed("missing field 'info.job'".to_string()))?;
        let subject = Subject::new(app, job);

        let event = match kind {
            EventKind::Complete => Event::complete(subject),
            EventKind::Failed => Event::failed(subject),
            EventKind::MetadataChange | EventKind::NotifyMetadata => {
                let metadata = object
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned()
                    .ok_or_else(|| {
                        EventError::Malformed(format!("{} event requires 'metadata'", kind))
                    })?;
                Event::with_metadata(kind, subject, metadata)?
            }
        };

        match object.get("token").and_then(Value::as_str) {
            Some(token) => Ok(event.with_token(token)),
            None => Ok(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(value: Value) -> Metadata {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_kind_roundtrip_str() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("Started".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_identity_ignores_metadata_order() {
        // Same pairs, different insertion order.
        let mut first = Metadata::new();
        first.insert("a".into(), json!(1));
        first.insert("b".into(), json!(2));
        let mut second = Metadata::new();
        second.insert("b".into(), json!(2));
        second.insert("a".into(), json!(1));

        let subject = Subject::new("app", 4);
        let e1 = Event::metadata_change(subject.clone(), first).unwrap();
        let e2 = Event::metadata_change(subject, second).unwrap();
        assert_eq!(e1.identity(), e2.identity());
        assert_eq!(e1.identity().digest(), e2.identity().digest());
    }

    #[test]
    fn test_identity_nested_metadata_order() {
        let factory = EventFactory::trusted();
        let e1 = factory
            .from_message(&serde_json::from_str(
                r#"{"info":{"job":1,"app":"a"},"type":"MetadataChange","metadata":{"x":{"p":1,"q":2}}}"#,
            ).unwrap())
            .unwrap();
        let e2 = factory
            .from_message(&serde_json::from_str(
                r#"{"info":{"job":1,"app":"a"},"type":"MetadataChange","metadata":{"x":{"q":2,"p":1}}}"#,
            ).unwrap())
            .unwrap();
        assert_eq!(e1.identity(), e2.identity());
    }

    #[test]
    fn test_identity_differs_on_metadata_value() {
        let subject = Subject::new("app", 4);
        let e1 = Event::metadata_change(subject.clone(), metadata(json!({"a": 1, "b": 2}))).unwrap();
        let e2 = Event::metadata_change(subject, metadata(json!({"a": 1, "b": 3}))).unwrap();
        assert_ne!(e1.identity(), e2.identity());
    }

    #[test]
    fn test_identity_ignores_token() {
        let subject = Subject::new("app", 4);
        let e1 = Event::complete(subject.clone()).with_token("one");
        let e2 = Event::complete(subject).with_token("two");
        assert_eq!(e1.identity(), e2.identity());
    }

    #[test]
    fn test_failed_never_matches_complete() {
        let subject = Subject::new("app", 4);
        assert_ne!(
            Event::failed(subject.clone()).identity(),
            Event::complete(subject).identity()
        );
    }

    #[test]
    fn test_notify_metadata_distinct_from_metadata_change() {
        let subject = Subject::new("stepper", 0);
        let md = metadata(json!({"step": 1}));
        let change = Event::metadata_change(subject.clone(), md.clone()).unwrap();
        let notify = Event::notify_metadata(subject, md).unwrap();
        assert_ne!(change.identity(), notify.identity());
    }

    #[test]
    fn test_factory_parses_complete() {
        let factory = EventFactory::trusted();
        let event = factory
            .from_message(&json!({"info": {"job": 7, "app": "io"}, "type": "Complete", "token": "tok"}))
            .unwrap();
        assert_eq!(event.kind(), EventKind::Complete);
        assert_eq!(event.subject(), &Subject::new("io", 7));
        assert_eq!(event.token(), Some("tok"));
        assert!(event.metadata().is_none());
    }

    #[test]
    fn test_factory_ignores_metadata_on_complete() {
        let factory = EventFactory::trusted();
        let event = factory
            .from_message(&json!({"info": {"job": 7, "app": "io"}, "type": "Complete", "metadata": {"x": 1}}))
            .unwrap();
        assert!(event.metadata().is_none());
        assert_eq!(event.identity(), Event::complete(Subject::new("io", 7)).identity());
    }

    #[test]
    fn test_validating_factory_accepts_extra_keys() {
        let message = json!({"info": {"job": 7, "app": "io"}, "type": "Complete", "host": "node17"});
        let checked = EventFactory::new(true).unwrap().from_message(&message).unwrap();
        let trusted = EventFactory::trusted().from_message(&message).unwrap();
        assert_eq!(checked, trusted);
    }

    #[test]
    fn test_factory_rejects_unknown_type() {
        let err = EventFactory::trusted()
            .from_message(&json!({"info": {"job": 7, "app": "io"}, "type": "Started"}))
            .unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn test_factory_rejects_missing_info_fields() {
        let factory = EventFactory::trusted();
        assert!(factory
            .from_message(&json!({"info": {"job": 7}, "type": "Complete"}))
            .is_err());
        assert!(factory
            .from_message(&json!({"info": {"app": "io"}, "type": "Complete"}))
            .is_err());
        assert!(factory.from_message(&json!({"type": "Complete"})).is_err());
    }

    #[test]
    fn test_factory_rejects_empty_metadata() {
        let err = EventFactory::trusted()
            .from_message(&json!({"info": {"job": 0, "app": "s"}, "type": "NotifyMetadata", "metadata": {}}))
            .unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }

    #[test]
    fn test_validating_factory_reports_schema_violation() {
        let factory = EventFactory::new(true).unwrap();
        assert!(factory.validates());
        let err = factory
            .from_message(&json!({"info": {"job": "x", "app": "s"}, "type": "Complete"}))
            .unwrap_err();
        assert!(matches!(err, EventError::SchemaViolation(_)));
    }

    #[test]
    fn test_parse_bytes_invalid_json() {
        let err = EventFactory::trusted().parse_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, EventError::Json(_)));
    }

    #[test]
    fn test_to_message_parses_back_to_same_identity() {
        let event = Event::notify_metadata(Subject::new("stepper", 0), metadata(json!({"step": 1})))
            .unwrap()
            .with_token("secret");
        let parsed = EventFactory::new(true)
            .unwrap()
            .from_message(&event.to_message())
            .unwrap();
        assert_eq!(parsed.identity(), event.identity());
        assert_eq!(parsed.token(), Some("secret"));
    }

    #[test]
    fn test_identity_display() {
        let event = Event::notify_metadata(Subject::new("stepper", 0), metadata(json!({"step": 1}))).unwrap();
        assert_eq!(event.identity().to_string(), "NotifyMetadata(stepper/0){step=1}");
    }
}
