//! Job lifecycle state machine
//!
//! Job states: CREATED → GENERATED → SUBMITTED → RUNNING → {COMPLETED | FAILED}
//! with CANCELLED reachable from any non-terminal state.

mod job_state;

pub use job_state::{JobState, JobStateData, JobStateError};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global sequence counter for ordering transitions within one process
static SEQUENCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get the next sequence number for ordering
pub fn next_seq() -> u64 {
    SEQUENCE_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Get current UTC timestamp
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
