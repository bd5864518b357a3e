//! Orchestration loop
//!
//! One coordinator task owns the [`JobGraph`]. It wakes on ticker ticks,
//! on events forwarded by the listener and on reports from submission
//! tasks; after each wake-up it generates and dispatches every job that
//! became eligible. Submissions run on the blocking pool so a slow
//! scheduler CLI never holds up event ingestion.

mod graph;
mod summary;

pub use graph::{EventEffect, JobGraph};
pub use summary::{JobRecord, RunOutcome, RunSummary, RUN_SUMMARY_NAME, RUN_SUMMARY_SCHEMA_ID};

use chrono::Utc;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wlreplay_protocol::{Event, EventError, EventFactory};

use crate::config::{ConfigError, DispatchConfig, EffectiveConfig, FailurePolicy, ReplayConfig, EFFECTIVE_CONFIG_NAME};
use crate::context::{ExecutionContext, SubmitCommand};
use crate::job::{DependencyError, JobError, JobId, JobList, ScriptEnv};
use crate::ledger::{CancelLedger, LEDGER_NAME};
use crate::listener::EventListener;
use crate::state::JobState;
use crate::submit::{SubmitError, Submitter};
use crate::ticker::TimeTicker;

/// Capacity of the coordinator's inbound queues
const QUEUE_DEPTH: usize = 1024;

/// Exit code for a run stopped by the operator
pub const EXIT_INTERRUPTED: i32 = 80;

/// Run-level errors
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load job list: {0}")]
    Load(#[from] JobError),

    #[error("invalid job graph: {0}")]
    Graph(#[from] DependencyError),

    #[error("event listener on {addr}: {source}")]
    Listener {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("notification schema: {0}")]
    Schema(#[from] EventError),

    #[error("output directory {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Schema(_) | RunError::Output { .. } => 1,
            RunError::Load(_) | RunError::Graph(_) => 2,
            RunError::Listener { .. } => 3,
        }
    }
}

/// Reports from submission tasks and local process watchers
#[derive(Debug)]
enum Report {
    Dispatched {
        root: u64,
        results: Vec<(JobId, Result<String, SubmitError>)>,
        processes: usize,
    },
    ProcessExited {
        job_id: JobId,
        success: bool,
    },
}

#[derive(Debug)]
struct PlannedSubmission {
    job_id: JobId,
    command: SubmitCommand,
}

/// The coordinator: sole owner of dependency state
pub struct Orchestrator {
    graph: JobGraph,
    ctx: ExecutionContext,
    env: ScriptEnv,
    dispatch: DispatchConfig,
    submitter: Arc<dyn Submitter>,
    ledger: Arc<Mutex<CancelLedger>>,
    /// Last elapsed second processed
    elapsed: u64,
    in_flight: usize,
    processes: usize,
    events_received: u64,
}

impl Orchestrator {
    pub fn new(
        graph: JobGraph,
        ctx: ExecutionContext,
        env: ScriptEnv,
        dispatch: DispatchConfig,
        submitter: Arc<dyn Submitter>,
        ledger_path: PathBuf,
    ) -> Self {
        let ledger = CancelLedger::new(ledger_path, ctx.clone());
        Self {
            graph,
            ctx,
            env,
            dispatch,
            submitter,
            ledger: Arc::new(Mutex::new(ledger)),
            elapsed: 0,
            in_flight: 0,
            processes: 0,
            events_received: 0,
        }
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    fn is_finished(&self) -> bool {
        self.graph.is_settled() && self.in_flight == 0 && self.processes == 0
    }

    /// Drive the run until every job is settled or `shutdown` resolves
    pub async fn run(
        mut self,
        listener: EventListener,
        shutdown: impl Future<Output = ()>,
        run_id: String,
    ) -> RunSummary {
        let started_at = Utc::now();
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(QUEUE_DEPTH);
        let (report_tx, mut report_rx) = mpsc::channel::<Report>(QUEUE_DEPTH);
        let listener_task = tokio::spawn(listener.serve(event_tx));

        let mut ticker = TimeTicker::starting_now();
        let mut interval = tokio::time::interval(self.dispatch.poll_interval());
        tokio::pin!(shutdown);

        info!(jobs = self.graph.len(), scheduler = %self.ctx.scheduler(), "run started");

        let outcome = loop {
            if self.is_finished() {
                break RunOutcome::Finished;
            }

            tokio::select! {
                _ = &mut shutdown => {
                    let cancelled = self.graph.cancel_pending("run interrupted before submission");
                    warn!(
                        cancelled,
                        "interrupted; submitted jobs keep running (use the cancellation ledger to stop them)"
                    );
                    break RunOutcome::Interrupted;
                }
                _ = interval.tick() => {
                    for second in ticker.elapsed_seconds(Instant::now()) {
                        self.elapsed = second;
                        self.pass(&report_tx);
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_event(event);
                    self.pass(&report_tx);
                }
                Some(report) = report_rx.recv() => {
                    self.handle_report(report);
                    self.pass(&report_tx);
                }
            }
        };

        listener_task.abort();

        let summary = RunSummary::new(
            run_id,
            self.ctx.scheduler(),
            started_at,
            outcome,
            self.events_received,
            self.graph.jobs(),
        );
        info!("{}", summary.human_summary);
        summary
    }

    /// One eligibility pass at the current elapsed second
    fn pass(&mut self, reports: &mpsc::Sender<Report>) {
        let native = self.ctx.supports_native_dependencies();

        if let Some(timeout) = self.dispatch.dependency_timeout_seconds {
            for id in self.graph.expired(self.elapsed, timeout) {
                let pending: Vec<String> = self
                    .graph
                    .pending_patterns(id)
                    .iter()
                    .map(|p| p.to_string())
                    .collect();
                warn!(job_id = id, ?pending, "dependency wait timed out after {timeout}s");
                self.fail(&JobId::from_number(id), &format!("dependency wait exceeded {timeout}s"));
            }
        }

        for (id, target) in self.graph.unreachable(native) {
            self.fail(&JobId::from_number(id), &format!("dependency {} did not complete", target));
        }

        for id in self.graph.ready(self.elapsed, native) {
            self.dispatch_job(id, reports);
        }
    }

    /// Generate a job (children first) and hand it to a submission task
    fn dispatch_job(&mut self, id: u64, reports: &mpsc::Sender<Report>) {
        let native = self.ctx.supports_native_dependencies();
        let Some(job) = self.graph.job(id) else {
            return;
        };

        if let Err(e) = job.generate(&self.ctx, &self.env) {
            error!(job_id = id, "generation failed: {e}");
            self.fail(&JobId::from_number(id), &e.to_string());
            return;
        }

        let plan: Vec<PlannedSubmission> = job
            .submission_order()
            .into_iter()
            .map(|j| {
                let dependencies = if native {
                    self.graph.sequence_ids_for(j)
                } else {
                    Vec::new()
                };
                let params = self.ctx.resolve(&j.overrides());
                PlannedSubmission {
                    job_id: j.id.clone(),
                    command: self.ctx.submit_command(&params, &j.script_path(), &dependencies),
                }
            })
            .collect();

        if let Err(e) = self.graph.mark_generated(id) {
            error!(job_id = id, "{e}");
            return;
        }

        debug!(job_id = id, submissions = plan.len(), "dispatching");
        self.in_flight += 1;

        let submitter = Arc::clone(&self.submitter);
        let ledger = Arc::clone(&self.ledger);
        let ctx = self.ctx.clone();
        let reports = reports.clone();
        tokio::task::spawn_blocking(move || {
            submit_plan(submitter.as_ref(), &ctx, &ledger, plan, id, reports);
        });
    }

    fn handle_event(&mut self, event: Event) {
        self.events_received += 1;
        let identity = event.identity();
        let effect = self.graph.apply_event(&event);
        info!(
            identity = %identity,
            digest = %identity.digest(),
            satisfied = effect.satisfied,
            "event received"
        );

        if effect.deferred {
            debug!(job_id = event.subject().job, "submission in flight; subject update deferred");
        }

        if let Some(state) = effect.subject_state {
            let subject = event.subject();
            debug!(job_id = subject.job, %state, "job state updated by event");
            if state == JobState::Failed {
                self.propagate(subject.job);
            }
        }
    }

    fn handle_report(&mut self, report: Report) {
        match report {
            Report::Dispatched {
                root,
                results,
                processes,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.processes += processes;

                for (job_id, result) in results {
                    match result {
                        Ok(sequence_id) => {
                            info!(job_id = %job_id, sequence_id = %sequence_id, "submitted");
                            match self.graph.record_submission(&job_id, sequence_id) {
                                Ok(Some(state)) => {
                                    debug!(job_id = %job_id, %state, "early event applied");
                                    if state == JobState::Failed {
                                        if let Some(id) = job_id.as_number() {
                                            self.propagate(id);
                                        }
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => warn!(job_id = %job_id, "{e}"),
                            }
                        }
                        Err(e) => {
                            error!(job_id = %job_id, "{e}");
                            self.fail(&job_id, &e.to_string());
                        }
                    }
                }

                // The root is submitted last; if it is still waiting, an
                // earlier submission in the same dispatch failed
                let root_id = JobId::from_number(root);
                if self.graph.job(root).is_some_and(|job| job.state.state == JobState::Generated) {
                    self.fail(&root_id, "not submitted: a child submission failed");
                }
            }
            Report::ProcessExited { job_id, success } => {
                self.processes = self.processes.saturating_sub(1);
                let Some(job) = self.graph.find_mut(&job_id) else {
                    return;
                };
                let result = if success {
                    job.state.complete()
                } else {
                    job.state.fail("process exited with failure")
                };
                match result {
                    Ok(()) => info!(job_id = %job_id, success, "local job exited"),
                    Err(e) => debug!(job_id = %job_id, "exit after state already settled: {e}"),
                }
                if !success {
                    if let Some(id) = job_id.as_number() {
                        self.propagate(id);
                    }
                }
            }
        }
    }

    /// Fail a job (and its unsubmitted children), propagating per policy
    fn fail(&mut self, job_id: &JobId, reason: &str) {
        if !self.graph.fail(job_id, reason) {
            return;
        }
        warn!(job_id = %job_id, reason, "job failed");
        if let Some(id) = job_id.as_number() {
            self.propagate(id);
        }
    }

    fn propagate(&mut self, id: u64) {
        if self.dispatch.failure_policy != FailurePolicy::Propagate {
            return;
        }
        for dependent in self.graph.fail_dependents(id) {
            warn!(job_id = dependent, upstream = id, "job failed: upstream failure");
        }
    }
}

/// Submit a dispatch plan in order, stopping at the first failure
fn submit_plan(
    submitter: &dyn Submitter,
    ctx: &ExecutionContext,
    ledger: &Mutex<CancelLedger>,
    plan: Vec<PlannedSubmission>,
    root: u64,
    reports: mpsc::Sender<Report>,
) {
    let mut results = Vec::with_capacity(plan.len());
    let mut processes: Vec<(JobId, Child)> = Vec::new();

    for planned in plan {
        debug!(job_id = %planned.job_id, command = %planned.command.display(), "submitting");
        match submitter.submit(ctx, &planned.command) {
            Ok(submission) => {
                record_in_ledger(ledger, &planned.job_id, &submission.sequence_id);
                if let Some(child) = submission.process {
                    processes.push((planned.job_id.clone(), child));
                }
                results.push((planned.job_id, Ok(submission.sequence_id)));
            }
            Err(e) => {
                results.push((planned.job_id, Err(e)));
                break;
            }
        }
    }

    let report = Report::Dispatched {
        root,
        results,
        processes: processes.len(),
    };
    if reports.blocking_send(report).is_err() {
        debug!(job_id = root, "submission finished after the run ended");
        return;
    }

    for (job_id, mut child) in processes {
        let reports = reports.clone();
        std::thread::spawn(move || {
            let success = match child.wait() {
                Ok(status) => status.success(),
                Err(e) => {
                    warn!(job_id = %job_id, "failed to wait for local job: {e}");
                    false
                }
            };
            if reports.blocking_send(Report::ProcessExited { job_id, success }).is_err() {
                debug!("local job exited after the run ended");
            }
        });
    }
}

fn record_in_ledger(ledger: &Mutex<CancelLedger>, job_id: &JobId, sequence_id: &str) {
    let mut guard = match ledger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(e) = guard.append(sequence_id) {
        error!(job_id = %job_id, sequence_id, "{e}");
    }
}

/// A loaded, validated run with its listener bound
pub struct Replay {
    orchestrator: Orchestrator,
    listener: EventListener,
    effective: EffectiveConfig,
    output_dir: PathBuf,
    run_id: String,
    token: String,
    local_addr: SocketAddr,
}

impl Replay {
    /// Load the job list, create the output directory and bind the listener.
    ///
    /// Every run-fatal check happens here, before anything is submitted.
    pub async fn prepare(
        config: &ReplayConfig,
        effective: EffectiveConfig,
        jobs_path: &Path,
        submitter: Arc<dyn Submitter>,
    ) -> Result<Self, RunError> {
        let list = JobList::from_file(jobs_path)?;
        let output_dir = config.output_dir.clone();
        let jobs = list.into_jobs(&output_dir)?;
        let graph = JobGraph::new(jobs)?;

        std::fs::create_dir_all(&output_dir).map_err(|source| RunError::Output {
            path: output_dir.clone(),
            source,
        })?;

        let run_id = uuid::Uuid::new_v4().to_string();
        let token = config
            .token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let addr = config.listener.bind_addr();
        let factory = EventFactory::new(config.listener.validate_on_ingest)?;
        let listener = EventListener::bind(&addr, factory, Some(token.clone()), config.listener.max_message_bytes)
            .await
            .map_err(|source| RunError::Listener {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| RunError::Listener { addr, source })?;

        let env = ScriptEnv {
            read_dir: under(&output_dir, &config.directories.read_dir),
            shared_dir: under(&output_dir, &config.directories.shared_dir),
            token: token.clone(),
            notify_host: config.listener.advertised_host(),
            notify_port: local_addr.port(),
            profiling: config.profiling.clone(),
            notify_command: Some(config.listener.notify_command.clone()),
        };

        let orchestrator = Orchestrator::new(
            graph,
            config.execution_context(),
            env,
            config.dispatch.clone(),
            submitter,
            output_dir.join(LEDGER_NAME),
        );

        Ok(Self {
            orchestrator,
            listener,
            effective: effective.with_run_id(run_id.clone()),
            output_dir,
            run_id,
            token,
            local_addr,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join(LEDGER_NAME)
    }

    /// Run to completion, writing the config and summary artifacts
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunSummary, RunError> {
        let config_path = self.output_dir.join(EFFECTIVE_CONFIG_NAME);
        self.effective
            .write_to_file(&config_path)
            .map_err(output_error(config_path.clone()))?;

        info!(run_id = %self.run_id, addr = %self.local_addr, "listening for notifications");
        let summary = self.orchestrator.run(self.listener, shutdown, self.run_id).await;

        let summary_path = self.output_dir.join(RUN_SUMMARY_NAME);
        summary
            .write_to_file(&summary_path)
            .map_err(output_error(summary_path.clone()))?;

        Ok(summary)
    }
}

fn output_error(path: PathBuf) -> impl FnOnce(io::Error) -> RunError {
    move |source| RunError::Output { path, source }
}

fn under(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
