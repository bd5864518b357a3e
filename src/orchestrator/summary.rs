//! Run summary (run_summary.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::context::Scheduler;
use crate::job::Job;
use crate::state::JobState;

/// Schema version for run_summary.json
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_summary.json
pub const RUN_SUMMARY_SCHEMA_ID: &str = "wlreplay/run_summary@1";

/// Artifact file name inside the output directory
pub const RUN_SUMMARY_NAME: &str = "run_summary.json";

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every job was submitted or reached a terminal state
    Finished,
    /// Stopped by the operator
    Interrupted,
}

/// Final record of one job (children included)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub app: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobRecord {
    fn collect(job: &Job, out: &mut Vec<JobRecord>) {
        for child in &job.children {
            Self::collect(child, out);
        }
        out.push(JobRecord {
            job_id: job.id.to_string(),
            app: job.app.clone(),
            state: job.state.state,
            sequence_id: job.scheduler_sequence_id.clone(),
            reason: job.state.reason.clone(),
        });
    }
}

/// Run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub schema_id: String,
    pub run_id: String,
    pub scheduler: Scheduler,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Events accepted by the coordinator
    pub events_received: u64,
    /// Job count per state
    pub states: BTreeMap<JobState, usize>,
    pub jobs: Vec<JobRecord>,
    pub human_summary: String,
}

impl RunSummary {
    pub fn new<'a>(
        run_id: String,
        scheduler: Scheduler,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
        events_received: u64,
        jobs: impl Iterator<Item = &'a Job>,
    ) -> Self {
        let mut records = Vec::new();
        for job in jobs {
            JobRecord::collect(job, &mut records);
        }

        let mut states = BTreeMap::new();
        for record in &records {
            *states.entry(record.state).or_insert(0) += 1;
        }

        let human_summary = Self::generate_human_summary(outcome, &states, records.len());

        Self {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            schema_id: RUN_SUMMARY_SCHEMA_ID.to_string(),
            run_id,
            scheduler,
            started_at,
            finished_at: Utc::now(),
            outcome,
            events_received,
            states,
            jobs: records,
            human_summary,
        }
    }

    fn generate_human_summary(outcome: RunOutcome, states: &BTreeMap<JobState, usize>, total: usize) -> String {
        if total == 0 {
            return "No jobs in run".to_string();
        }
        let parts: Vec<String> = states
            .iter()
            .map(|(state, count)| format!("{} {}", count, state.as_str().to_lowercase()))
            .collect();
        let verb = match outcome {
            RunOutcome::Finished => "finished",
            RunOutcome::Interrupted => "interrupted",
        };
        format!("Run {}: {} job(s): {}", verb, total, parts.join(", "))
    }

    /// Count of jobs (children included) in `state`
    pub fn count(&self, state: JobState) -> usize {
        self.states.get(&state).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON serialization failed: {}", e),
            )
        })?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobList;

    fn jobs() -> Vec<Job> {
        JobList::from_json(
            r#"{"jobs": [
                {"id": 0, "executable": "x"},
                {"id": 1, "executable": "x", "children": [{"executable": "y"}]}
            ]}"#,
        )
        .unwrap()
        .into_jobs(Path::new("/run"))
        .unwrap()
    }

    #[test]
    fn test_records_include_children() {
        let mut jobs = jobs();
        jobs[0].state.generated().unwrap();
        jobs[0].state.submitted().unwrap();
        jobs[0].scheduler_sequence_id = Some("77".into());

        let summary = RunSummary::new("run-1".into(), Scheduler::Slurm, Utc::now(), RunOutcome::Finished, 2, jobs.iter());
        let ids: Vec<&str> = summary.jobs.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1.1", "1"]);
        assert_eq!(summary.count(JobState::Submitted), 1);
        assert_eq!(summary.count(JobState::Created), 2);
        assert_eq!(summary.human_summary, "Run finished: 3 job(s): 2 created, 1 submitted");
    }

    #[test]
    fn test_empty_run() {
        let summary = RunSummary::new("run-1".into(), Scheduler::Local, Utc::now(), RunOutcome::Finished, 0, std::iter::empty());
        assert_eq!(summary.human_summary, "No jobs in run");
    }

    #[test]
    fn test_serialization() {
        let jobs = jobs();
        let summary = RunSummary::new("run-1".into(), Scheduler::Pbs, Utc::now(), RunOutcome::Interrupted, 0, jobs.iter());
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"schema_id\": \"wlreplay/run_summary@1\""));
        assert!(json.contains("\"outcome\": \"interrupted\""));
        assert!(json.contains("\"CREATED\": 3"));
    }
}
