//! wlreplay - HPC workload replay orchestrator
//!
//! Replays a recorded workload by generating and submitting a graph of
//! synthetic jobs to a batch scheduler (PBS, SLURM, LSF, or local
//! processes), then tracking their progress through one-shot TCP
//! notifications so dependent jobs launch at the right time.

pub mod config;
pub mod context;
pub mod job;
pub mod ledger;
pub mod listener;
pub mod notify;
pub mod orchestrator;
pub mod state;
pub mod submit;
pub mod ticker;

pub use config::{EffectiveConfig, ReplayConfig};
pub use context::{ExecutionContext, Scheduler};
pub use job::{Job, JobId, JobList};
pub use orchestrator::{JobGraph, Orchestrator, Replay, RunError, RunOutcome, RunSummary};
pub use submit::{CommandSubmitter, MockSubmitter, Submitter};
pub use ticker::TimeTicker;
pub use wlreplay_protocol::{Event, EventFactory, EventKind, Subject};
