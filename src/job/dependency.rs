//! Job dependencies
//!
//! A job's raw `depends` field is either a list of integer job ids (ordering
//! resolved by the scheduler's native dependency syntax) or a list of event
//! descriptors (resolved by the orchestrator when matching events arrive).
//! The two forms cannot be mixed within one job.

use serde_json::Value;
use std::fmt;
use thiserror::Error;
use wlreplay_protocol::{EventFactory, EventIdentity};

/// Pattern an incoming event must match to satisfy a dependency
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventPattern {
    identity: EventIdentity,
}

impl EventPattern {
    pub fn new(identity: EventIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &EventIdentity {
        &self.identity
    }

    /// Whether an event with `identity` satisfies this pattern
    pub fn matches(&self, identity: &EventIdentity) -> bool {
        &self.identity == identity
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

/// A precondition for submitting a job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Native ordering on another job of the list
    JobId(u64),
    /// Wait for a matching event
    Event(EventPattern),
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dependency::JobId(id) => write!(f, "job {}", id),
            Dependency::Event(pattern) => write!(f, "event {}", pattern),
        }
    }
}

/// Dependency configuration errors; all are fatal at load time
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("job {job}: dependencies mix job ids and event descriptors")]
    KindMismatch { job: String },

    #[error("job {job}: invalid dependency descriptor: {reason}")]
    InvalidDescriptor { job: String, reason: String },

    #[error("job {job} depends on unknown job {target}")]
    UnknownJob { job: String, target: u64 },

    #[error("duplicate job id {0}")]
    DuplicateJob(String),

    #[error("job id dependency cycle through jobs {0:?}")]
    Cycle(Vec<String>),
}

/// Parse a job's raw `depends` field.
///
/// `job` is only used for error messages. Event descriptors are trusted at
/// load time and are not schema-validated.
pub fn build_dependencies(job: &str, raw: &Value) -> Result<Vec<Dependency>, DependencyError> {
    let items = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(DependencyError::InvalidDescriptor {
                job: job.to_string(),
                reason: format!("expected a list, got {}", other),
            })
        }
    };

    if items.is_empty() {
        return Ok(Vec::new());
    }

    let all_ids = items.iter().all(Value::is_u64);
    let all_events = items.iter().all(Value::is_object);

    if all_ids {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            if let Some(id) = item.as_u64() {
                ids.push(Dependency::JobId(id));
            }
        }
        return Ok(ids);
    }

    if all_events {
        let factory = EventFactory::trusted();
        return items
            .iter()
            .map(|item| {
                factory
                    .from_message(item)
                    .map(|event| Dependency::Event(EventPattern::new(event.identity())))
                    .map_err(|e| DependencyError::InvalidDescriptor {
                        job: job.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect();
    }

    let has_id = items.iter().any(Value::is_u64);
    let has_event = items.iter().any(Value::is_object);
    if has_id && has_event {
        return Err(DependencyError::KindMismatch {
            job: job.to_string(),
        });
    }

    let bad = items
        .iter()
        .find(|item| !item.is_u64() && !item.is_object())
        .map(|item| item.to_string())
        .unwrap_or_default();
    Err(DependencyError::InvalidDescriptor {
        job: job.to_string(),
        reason: format!("expected a job id or an event descriptor, got {}", bad),
    })
}

/// Append `extra` to `deps`, skipping duplicates and keeping order
pub fn union_into(deps: &mut Vec<Dependency>, extra: &[Dependency]) {
    for dep in extra {
        if !deps.contains(dep) {
            deps.push(dep.clone());
        }
    }
}
