//! Dependency state
//!
//! The graph owns every top-level job (and through them their children)
//! together with the satisfaction state of each job's event patterns. It
//! is owned by the coordinator task alone and is never shared.

use std::collections::{HashMap, HashSet};
use tracing::debug;
use wlreplay_protocol::{Event, EventKind};

use crate::job::{DependencyError, EventPattern, Job, JobId};
use crate::state::{JobState, JobStateError};

#[derive(Debug)]
struct Node {
    job: Job,
    /// Event patterns with their satisfaction flag, in declaration order
    patterns: Vec<(EventPattern, bool)>,
    /// Elapsed second at which the start delay was first met
    time_eligible_at: Option<u64>,
    /// Subject events received while the submission was in flight
    early: Vec<EventKind>,
}

impl Node {
    fn new(job: Job) -> Self {
        let patterns = job.event_patterns().map(|p| (p.clone(), false)).collect();
        Self {
            job,
            patterns,
            time_eligible_at: None,
            early: Vec::new(),
        }
    }

    fn patterns_satisfied(&self) -> bool {
        self.patterns.iter().all(|(_, satisfied)| *satisfied)
    }

    fn waits_on_completion_of(&self, app: &str, id: u64) -> bool {
        self.job.job_id_dependencies().contains(&id)
            || self.patterns.iter().any(|(pattern, _)| {
                let identity = pattern.identity();
                identity.kind() == EventKind::Complete
                    && identity.subject().app == app
                    && identity.subject().job == id
            })
    }
}

/// What applying one event changed
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EventEffect {
    /// Patterns newly marked satisfied
    pub satisfied: usize,
    /// New state of the event's subject job, if it changed
    pub subject_state: Option<JobState>,
    /// The subject was still being submitted; the event waits for the
    /// submission to be recorded
    pub deferred: bool,
}

/// Dependency graph over top-level jobs
#[derive(Debug)]
pub struct JobGraph {
    nodes: Vec<Node>,
    index: HashMap<u64, usize>,
}

impl JobGraph {
    /// Build the graph, rejecting duplicate ids, unknown job-id targets
    /// and job-id cycles
    pub fn new(jobs: Vec<Job>) -> Result<Self, DependencyError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (position, job) in jobs.iter().enumerate() {
            let id = job
                .id
                .as_number()
                .ok_or_else(|| DependencyError::DuplicateJob(job.id.to_string()))?;
            if index.insert(id, position).is_some() {
                return Err(DependencyError::DuplicateJob(job.id.to_string()));
            }
        }

        for job in &jobs {
            for target in job.job_id_dependencies() {
                if !index.contains_key(&target) {
                    return Err(DependencyError::UnknownJob {
                        job: job.id.to_string(),
                        target,
                    });
                }
            }
        }

        let graph = Self {
            nodes: jobs.into_iter().map(Node::new).collect(),
            index,
        };
        graph.check_cycles()?;
        Ok(graph)
    }

    fn check_cycles(&self) -> Result<(), DependencyError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // Iterative DFS; the stack holds (node, next dependency index)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::InProgress;
            while let Some(&mut (node, ref mut next)) = stack.last_mut() {
                let deps = self.nodes[node].job.job_id_dependencies();
                if *next >= deps.len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
                let target = self.index[&deps[*next]];
                *next += 1;
                match marks[target] {
                    Mark::Unvisited => {
                        marks[target] = Mark::InProgress;
                        stack.push((target, 0));
                    }
                    Mark::InProgress => {
                        let from = stack.iter().position(|(n, _)| *n == target).unwrap_or(0);
                        let cycle = stack[from..]
                            .iter()
                            .map(|(n, _)| self.nodes[*n].job.id.to_string())
                            .collect();
                        return Err(DependencyError::Cycle(cycle));
                    }
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level jobs in job-list order
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.nodes.iter().map(|node| &node.job)
    }

    pub fn job(&self, id: u64) -> Option<&Job> {
        self.index.get(&id).map(|&i| &self.nodes[i].job)
    }

    /// Look up a top-level job or any descendant
    pub fn find_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        let root: u64 = id.as_str().split('.').next()?.parse().ok()?;
        let position = *self.index.get(&root)?;
        self.nodes[position].job.find_mut(id)
    }

    /// Unsatisfied patterns of a job, for diagnostics
    pub fn pending_patterns(&self, id: u64) -> Vec<&EventPattern> {
        self.index
            .get(&id)
            .map(|&i| {
                self.nodes[i]
                    .patterns
                    .iter()
                    .filter(|(_, satisfied)| !satisfied)
                    .map(|(pattern, _)| pattern)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mark matching patterns satisfied and update the subject job's state.
    ///
    /// Only jobs still in CREATED have their patterns updated; applying the
    /// same event twice changes nothing the second time.
    pub fn apply_event(&mut self, event: &Event) -> EventEffect {
        let identity = event.identity();
        let mut effect = EventEffect::default();

        for node in &mut self.nodes {
            if node.job.state.state != JobState::Created {
                continue;
            }
            for (pattern, satisfied) in &mut node.patterns {
                if !*satisfied && pattern.matches(&identity) {
                    *satisfied = true;
                    effect.satisfied += 1;
                }
            }
        }

        let subject = event.subject();
        if let Some(&i) = self.index.get(&subject.job) {
            let node = &mut self.nodes[i];
            if node.job.app == subject.app {
                if node.job.state.state == JobState::Generated {
                    node.early.push(event.kind());
                    effect.deferred = true;
                } else {
                    let before = node.job.state.state;
                    match apply_subject_event(&mut node.job, event.kind()) {
                        Ok(()) if node.job.state.state != before => {
                            effect.subject_state = Some(node.job.state.state);
                        }
                        Ok(()) => {}
                        Err(e) => debug!(job_id = %node.job.id, "{} ignored: {e}", event.kind().as_str()),
                    }
                }
            }
        }

        effect
    }

    /// Top-level jobs that may be submitted at `elapsed` seconds.
    ///
    /// Job-id dependencies resolve once the target holds a scheduler id when
    /// the backend encodes dependencies natively, otherwise once the target
    /// has completed.
    pub fn ready(&mut self, elapsed: u64, native: bool) -> Vec<u64> {
        let mut ready = Vec::new();
        for position in 0..self.nodes.len() {
            let node = &self.nodes[position];
            if node.job.state.state != JobState::Created || elapsed < node.job.start_delay {
                continue;
            }
            if node.time_eligible_at.is_none() {
                self.nodes[position].time_eligible_at = Some(elapsed);
            }
            let node = &self.nodes[position];
            if !node.patterns_satisfied() {
                continue;
            }
            let resolved = node.job.job_id_dependencies().iter().all(|target| {
                self.job(*target).is_some_and(|t| {
                    if native {
                        t.scheduler_sequence_id.is_some()
                    } else {
                        t.state.state == JobState::Completed
                    }
                })
            });
            if resolved {
                if let Some(id) = node.job.id.as_number() {
                    ready.push(id);
                }
            }
        }
        ready
    }

    /// Waiting jobs whose job-id dependency can never resolve: the target
    /// ended without the scheduler id (native) or completion (local) they need
    pub fn unreachable(&self, native: bool) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.job.state.state != JobState::Created {
                continue;
            }
            for target in node.job.job_id_dependencies() {
                let Some(t) = self.job(target) else { continue };
                let dead = t.state.is_terminal()
                    && if native {
                        t.scheduler_sequence_id.is_none()
                    } else {
                        t.state.state != JobState::Completed
                    };
                if dead {
                    if let Some(id) = node.job.id.as_number() {
                        out.push((id, target));
                    }
                    break;
                }
            }
        }
        out
    }

    /// Waiting jobs whose event patterns have been pending for `timeout`
    /// seconds past their start delay
    pub fn expired(&self, elapsed: u64, timeout: u64) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|node| node.job.state.state == JobState::Created)
            .filter(|node| !node.patterns_satisfied())
            .filter(|node| {
                node.time_eligible_at
                    .is_some_and(|since| elapsed.saturating_sub(since) >= timeout)
            })
            .filter_map(|node| node.job.id.as_number())
            .collect()
    }

    /// Created jobs that wait on `id` finishing successfully
    pub fn dependents_of(&self, id: u64) -> Vec<u64> {
        let Some(app) = self.job(id).map(|job| job.app.clone()) else {
            return Vec::new();
        };
        self.nodes
            .iter()
            .filter(|node| node.job.state.state == JobState::Created)
            .filter(|node| node.waits_on_completion_of(&app, id))
            .filter_map(|node| node.job.id.as_number())
            .collect()
    }

    /// Fail a job and every child of it that has not been submitted.
    ///
    /// Returns whether the job itself changed state.
    pub fn fail(&mut self, id: &JobId, reason: &str) -> bool {
        let Some(job) = self.find_mut(id) else {
            return false;
        };
        let changed = job.state.fail(reason).is_ok();
        fail_pending_children(job, reason);
        changed
    }

    /// Fail everything still waiting on `id`, transitively.
    ///
    /// Returns the ids that were failed.
    pub fn fail_dependents(&mut self, id: u64) -> Vec<u64> {
        let mut failed = Vec::new();
        let mut queue = vec![id];
        let mut seen = HashSet::from([id]);
        while let Some(current) = queue.pop() {
            for dependent in self.dependents_of(current) {
                if !seen.insert(dependent) {
                    continue;
                }
                let reason = format!("dependency {} failed", current);
                if self.fail(&JobId::from_number(dependent), &reason) {
                    failed.push(dependent);
                    queue.push(dependent);
                }
            }
        }
        failed
    }

    /// CREATED → GENERATED for a job and all of its children
    pub fn mark_generated(&mut self, id: u64) -> Result<(), JobStateError> {
        match self.find_mut(&JobId::from_number(id)) {
            Some(job) => mark_generated(job),
            None => Ok(()),
        }
    }

    /// GENERATED → SUBMITTED, recording the scheduler id, then apply any
    /// subject events that arrived while the submission was in flight.
    ///
    /// Returns the job's new state when those events moved it past SUBMITTED.
    pub fn record_submission(
        &mut self,
        id: &JobId,
        sequence_id: String,
    ) -> Result<Option<JobState>, JobStateError> {
        let early = match id.as_number().and_then(|n| self.index.get(&n).copied()) {
            Some(position) => std::mem::take(&mut self.nodes[position].early),
            None => Vec::new(),
        };
        let Some(job) = self.find_mut(id) else {
            return Ok(None);
        };

        job.state.submitted()?;
        job.scheduler_sequence_id = Some(sequence_id);

        for kind in early {
            if let Err(e) = apply_subject_event(job, kind) {
                debug!(job_id = %id, "early {} ignored: {e}", kind.as_str());
            }
        }
        Ok((job.state.state != JobState::Submitted).then_some(job.state.state))
    }

    /// CANCELLED for every job and child that was never submitted.
    ///
    /// Returns how many jobs were cancelled.
    pub fn cancel_pending(&mut self, reason: &str) -> usize {
        let mut cancelled = 0;
        for node in &mut self.nodes {
            cancel_pending(&mut node.job, reason, &mut cancelled);
        }
        cancelled
    }

    /// Scheduler ids of the targets of `job`'s job-id dependencies
    pub fn sequence_ids_for(&self, job: &Job) -> Vec<String> {
        job.job_id_dependencies()
            .into_iter()
            .filter_map(|target| self.job(target)?.scheduler_sequence_id.clone())
            .collect()
    }

    /// Nothing left that could still be generated or submitted
    pub fn is_settled(&self) -> bool {
        fn settled(job: &Job) -> bool {
            !job.state.state.is_pending() && job.children.iter().all(settled)
        }
        self.nodes.iter().all(|node| settled(&node.job))
    }
}

fn mark_generated(job: &mut Job) -> Result<(), JobStateError> {
    for child in &mut job.children {
        mark_generated(child)?;
    }
    job.state.generated()
}

/// Lifecycle update of an event's subject job
fn apply_subject_event(job: &mut Job, kind: EventKind) -> Result<(), JobStateError> {
    match kind {
        EventKind::Complete => job.state.complete(),
        EventKind::Failed => job.state.fail("job reported failure"),
        EventKind::MetadataChange | EventKind::NotifyMetadata => {
            if job.state.state == JobState::Submitted {
                job.state.start()
            } else {
                Ok(())
            }
        }
    }
}

fn fail_pending_children(job: &mut Job, reason: &str) {
    for child in &mut job.children {
        if child.state.state.is_pending() {
            if let Err(e) = child.state.fail(reason) {
                debug!(job_id = %child.id, "child not failed: {e}");
            }
        }
        fail_pending_children(child, reason);
    }
}

fn cancel_pending(job: &mut Job, reason: &str, cancelled: &mut usize) {
    for child in &mut job.children {
        cancel_pending(child, reason, cancelled);
    }
    if job.state.state.is_pending() {
        match job.state.cancel(reason) {
            Ok(()) => *cancelled += 1,
            Err(e) => debug!(job_id = %job.id, "not cancelled: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobList;
    use serde_json::json;
    use std::path::Path;
    use wlreplay_protocol::Subject;

    fn graph(value: serde_json::Value) -> Result<JobGraph, DependencyError> {
        let jobs = JobList::from_json(&value.to_string())
            .unwrap()
            .into_jobs(Path::new("/run"))
            .unwrap();
        JobGraph::new(jobs)
    }

    fn submit(graph: &mut JobGraph, id: u64, seq: &str) {
        graph.mark_generated(id).unwrap();
        graph.record_submission(&JobId::from_number(id), seq.to_string()).unwrap();
    }

    fn metadata(step: u64) -> wlreplay_protocol::Metadata {
        let mut map = serde_json::Map::new();
        map.insert("step".into(), json!(step));
        map
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = graph(json!({"jobs": [
            {"id": 1, "executable": "x"},
            {"id": 1, "executable": "y"}
        ]}))
        .unwrap_err();
        assert!(matches!(err, DependencyError::DuplicateJob(_)));
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = graph(json!({"jobs": [{"id": 1, "executable": "x", "depends": [7]}]})).unwrap_err();
        assert!(matches!(err, DependencyError::UnknownJob { target: 7, .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = graph(json!({"jobs": [
            {"id": 0, "executable": "x", "depends": [2]},
            {"id": 1, "executable": "x", "depends": [0]},
            {"id": 2, "executable": "x", "depends": [1]}
        ]}))
        .unwrap_err();
        let DependencyError::Cycle(ids) = err else {
            panic!("expected cycle");
        };
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = graph(json!({"jobs": [{"id": 0, "executable": "x", "depends": [0]}]})).unwrap_err();
        assert!(matches!(err, DependencyError::Cycle(_)));
    }

    #[test]
    fn test_start_delay_gates_readiness() {
        let mut g = graph(json!({"jobs": [{"id": 0, "executable": "x", "start_delay": 3}]})).unwrap();
        assert!(g.ready(2, true).is_empty());
        assert_eq!(g.ready(3, true), vec![0]);
    }

    #[test]
    fn test_native_job_id_waits_for_sequence_id() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "executable": "x"},
            {"id": 1, "executable": "x", "depends": [0]}
        ]}))
        .unwrap();
        assert_eq!(g.ready(0, true), vec![0]);
        submit(&mut g, 0, "500");
        assert_eq!(g.ready(0, true), vec![1]);
        let dependent = g.job(1).unwrap().clone();
        assert_eq!(g.sequence_ids_for(&dependent), vec!["500".to_string()]);
    }

    #[test]
    fn test_local_job_id_waits_for_completion() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "executable": "x"},
            {"id": 1, "executable": "x", "depends": [0]}
        ]}))
        .unwrap();
        submit(&mut g, 0, "4242");
        assert!(g.ready(0, false).is_empty());
        g.find_mut(&JobId::from_number(0)).unwrap().state.complete().unwrap();
        assert_eq!(g.ready(0, false), vec![1]);
    }

    #[test]
    fn test_scenario_complete_and_metadata_patterns() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "app": "B", "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "Complete"}]},
            {"id": 2, "app": "C", "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "NotifyMetadata", "metadata": {"step": 1}}]}
        ]}))
        .unwrap();

        assert_eq!(g.ready(0, true), vec![0]);
        submit(&mut g, 0, "100");
        assert!(g.ready(0, true).is_empty());

        let step = Event::notify_metadata(Subject::new("A", 0), metadata(1)).unwrap();
        let effect = g.apply_event(&step);
        assert_eq!(effect.satisfied, 1);
        assert_eq!(effect.subject_state, Some(JobState::Running));
        assert_eq!(g.ready(1, true), vec![2]);

        let done = Event::complete(Subject::new("A", 0));
        assert_eq!(g.apply_event(&done).subject_state, Some(JobState::Completed));
        assert_eq!(g.ready(2, true), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_event_is_idempotent() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "app": "B", "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "Complete"}]}
        ]}))
        .unwrap();
        let done = Event::complete(Subject::new("A", 0));
        assert_eq!(g.apply_event(&done).satisfied, 1);
        assert_eq!(g.apply_event(&done).satisfied, 0);
        assert_eq!(g.ready(0, true), vec![0, 1]);
    }

    #[test]
    fn test_failed_does_not_satisfy_complete_pattern() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "app": "B", "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "Complete"}]}
        ]}))
        .unwrap();
        submit(&mut g, 0, "100");
        let effect = g.apply_event(&Event::failed(Subject::new("A", 0)));
        assert_eq!(effect.satisfied, 0);
        assert_eq!(effect.subject_state, Some(JobState::Failed));
        assert!(g.ready(5, true).is_empty());
    }

    #[test]
    fn test_metadata_kinds_do_not_cross_match() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "NotifyMetadata", "metadata": {"step": 1}}]}
        ]}))
        .unwrap();
        let change = Event::metadata_change(Subject::new("A", 0), metadata(1)).unwrap();
        assert_eq!(g.apply_event(&change).satisfied, 0);
    }

    #[test]
    fn test_event_for_other_app_does_not_touch_subject() {
        let mut g = graph(json!({"jobs": [{"id": 0, "app": "A", "executable": "x"}]})).unwrap();
        submit(&mut g, 0, "100");
        let effect = g.apply_event(&Event::complete(Subject::new("Z", 0)));
        assert_eq!(effect.subject_state, None);
        assert_eq!(g.job(0).unwrap().state.state, JobState::Submitted);
    }

    #[test]
    fn test_expired_counts_from_start_delay() {
        let mut g = graph(json!({"jobs": [
            {"id": 1, "executable": "x", "start_delay": 5,
             "depends": [{"info": {"app": "A", "job": 0}, "type": "Complete"}]}
        ]}))
        .unwrap();
        g.ready(6, true);
        assert!(g.expired(15, 10).is_empty());
        assert_eq!(g.expired(16, 10), vec![1]);
    }

    #[test]
    fn test_fail_dependents_transitively() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "app": "B", "executable": "x",
             "depends": [{"info": {"app": "A", "job": 0}, "type": "Complete"}]},
            {"id": 2, "app": "C", "executable": "x", "depends": [1]},
            {"id": 3, "app": "D", "executable": "x"}
        ]}))
        .unwrap();
        g.fail(&JobId::from_number(0), "boom");
        let mut failed = g.fail_dependents(0);
        failed.sort();
        assert_eq!(failed, vec![1, 2]);
        assert_eq!(g.job(2).unwrap().state.reason.as_deref(), Some("dependency 1 failed"));
        assert_eq!(g.job(3).unwrap().state.state, JobState::Created);
    }

    #[test]
    fn test_unreachable_local_dependency() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "executable": "x"},
            {"id": 1, "executable": "x", "depends": [0]}
        ]}))
        .unwrap();
        submit(&mut g, 0, "4242");
        assert!(g.unreachable(false).is_empty());
        g.fail(&JobId::from_number(0), "exit 1");
        assert_eq!(g.unreachable(false), vec![(1, 0)]);
        // The scheduler already holds the afterok dependency
        assert!(g.unreachable(true).is_empty());
    }

    #[test]
    fn test_complete_during_submission_applied_once_recorded() {
        let mut g = graph(json!({"jobs": [{"id": 0, "app": "A", "executable": "x"}]})).unwrap();
        g.mark_generated(0).unwrap();

        let effect = g.apply_event(&Event::complete(Subject::new("A", 0)));
        assert!(effect.deferred);
        assert_eq!(effect.subject_state, None);
        assert_eq!(g.job(0).unwrap().state.state, JobState::Generated);

        let state = g.record_submission(&JobId::from_number(0), "100".into()).unwrap();
        assert_eq!(state, Some(JobState::Completed));
        let job = g.job(0).unwrap();
        assert_eq!(job.state.state, JobState::Completed);
        assert_eq!(job.scheduler_sequence_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_failed_during_submission_keeps_sequence_id() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "app": "A", "executable": "x"},
            {"id": 1, "app": "B", "executable": "x", "depends": [0]}
        ]}))
        .unwrap();
        g.mark_generated(0).unwrap();
        assert!(g.apply_event(&Event::failed(Subject::new("A", 0))).deferred);

        let state = g.record_submission(&JobId::from_number(0), "100".into()).unwrap();
        assert_eq!(state, Some(JobState::Failed));
        assert_eq!(g.job(0).unwrap().scheduler_sequence_id.as_deref(), Some("100"));
        // The scheduler already holds the dependency; nothing is unreachable
        assert!(g.unreachable(true).is_empty());
        assert_eq!(g.ready(0, true), vec![1]);
    }

    #[test]
    fn test_early_events_replay_in_order() {
        let mut g = graph(json!({"jobs": [{"id": 0, "app": "A", "executable": "x"}]})).unwrap();
        g.mark_generated(0).unwrap();
        g.apply_event(&Event::notify_metadata(Subject::new("A", 0), metadata(1)).unwrap());
        g.apply_event(&Event::complete(Subject::new("A", 0)));
        g.apply_event(&Event::complete(Subject::new("A", 0)));

        let state = g.record_submission(&JobId::from_number(0), "7".into()).unwrap();
        assert_eq!(state, Some(JobState::Completed));
    }

    #[test]
    fn test_cancel_pending_leaves_submitted_jobs() {
        let mut g = graph(json!({"jobs": [
            {"id": 0, "executable": "x"},
            {"id": 1, "executable": "x", "children": [{"executable": "a"}]},
            {"id": 2, "executable": "x"}
        ]}))
        .unwrap();
        submit(&mut g, 0, "10");
        g.mark_generated(1).unwrap();

        assert_eq!(g.cancel_pending("interrupted"), 3);
        assert_eq!(g.job(0).unwrap().state.state, JobState::Submitted);
        assert_eq!(g.job(1).unwrap().state.state, JobState::Cancelled);
        assert_eq!(g.job(1).unwrap().children[0].state.state, JobState::Cancelled);
        assert_eq!(g.job(2).unwrap().state.reason.as_deref(), Some("interrupted"));
        assert!(g.is_settled());
    }

    #[test]
    fn test_composite_generation_and_settling() {
        let mut g = graph(json!({"jobs": [
            {"id": 3, "executable": "x", "children": [
                {"executable": "a"}, {"executable": "b"}
            ]}
        ]}))
        .unwrap();
        assert!(!g.is_settled());
        g.mark_generated(3).unwrap();
        let child = JobId::from_number(3).child(2);
        assert_eq!(g.find_mut(&child).unwrap().state.state, JobState::Generated);
        g.record_submission(&child, "9".into()).unwrap();
        assert!(!g.is_settled());
        g.fail(&JobId::from_number(3), "child 3.1 not submitted");
        assert!(g.is_settled());
        assert_eq!(g.find_mut(&child).unwrap().state.state, JobState::Submitted);
    }
}
