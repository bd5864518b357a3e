//! Job state machine
//!
//! CREATED → GENERATED → SUBMITTED → RUNNING → {COMPLETED | FAILED},
//! CANCELLED from any non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{next_seq, now_utc, TerminalState};

/// Job state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Loaded from the job list, waiting for its dependencies
    Created,
    /// Script and input written to the working directory
    Generated,
    /// Accepted by the scheduler
    Submitted,
    /// Reported as started
    Running,
    /// Reported as finished successfully
    Completed,
    /// Failed to generate, submit or run
    Failed,
    /// Cancelled by the operator
    Cancelled,
}

impl TerminalState for JobState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl JobState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: JobState) -> bool {
        match (self, target) {
            (JobState::Created, JobState::Generated) => true,
            // Generation failed, dependency wait timed out, or upstream failed
            (JobState::Created, JobState::Failed) => true,

            (JobState::Generated, JobState::Submitted) => true,
            (JobState::Generated, JobState::Failed) => true,

            (JobState::Submitted, JobState::Running) => true,
            // End reported without a preceding start report
            (JobState::Submitted, JobState::Completed) => true,
            (JobState::Submitted, JobState::Failed) => true,

            (JobState::Running, JobState::Completed) => true,
            (JobState::Running, JobState::Failed) => true,

            (from, JobState::Cancelled) => !from.is_terminal(),

            _ => false,
        }
    }

    /// Still waiting to be handed to the scheduler
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Created | JobState::Generated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::Generated => "GENERATED",
            JobState::Submitted => "SUBMITTED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job state record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateData {
    /// Job identifier
    pub job_id: String,

    /// Current state
    pub state: JobState,

    /// Why the job ended up FAILED or CANCELLED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the state was last updated
    pub updated_at: DateTime<Utc>,

    /// Monotonic sequence counter for ordering
    pub seq: u64,
}

/// Errors for job state operations
#[derive(Debug, thiserror::Error)]
pub enum JobStateError {
    #[error("invalid state transition for job {job_id} from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },
}

impl JobStateData {
    /// Create a new record in CREATED state
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            job_id: job_id.into(),
            state: JobState::Created,
            reason: None,
            created_at: now,
            updated_at: now,
            seq: next_seq(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: JobState) -> Result<(), JobStateError> {
        if !self.state.can_transition_to(new_state) {
            return Err(JobStateError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.state,
                to: new_state,
            });
        }

        self.state = new_state;
        self.updated_at = now_utc();
        self.seq = next_seq();

        Ok(())
    }

    /// CREATED → GENERATED
    pub fn generated(&mut self) -> Result<(), JobStateError> {
        self.transition(JobState::Generated)
    }

    /// GENERATED → SUBMITTED
    pub fn submitted(&mut self) -> Result<(), JobStateError> {
        self.transition(JobState::Submitted)
    }

    /// SUBMITTED → RUNNING
    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.transition(JobState::Running)
    }

    /// Mark job as completed
    pub fn complete(&mut self) -> Result<(), JobStateError> {
        self.transition(JobState::Completed)
    }

    /// Mark job as failed, recording why
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), JobStateError> {
        self.transition(JobState::Failed)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// Cancel the job, recording why
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), JobStateError> {
        self.transition(JobState::Cancelled)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
