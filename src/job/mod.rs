//! Job model
//!
//! Jobs are loaded from the job list produced by the workload generator.
//! A job is either a leaf or a composite owning child jobs; children get
//! dotted ids (`3.1`) and live in subdirectories of their parent's working
//! directory. A composite's dependency set is the union of its own and all
//! of its children's, so it never becomes eligible before they do.

mod dependency;
mod script;

pub use dependency::{build_dependencies, union_into, Dependency, DependencyError, EventPattern};
pub use script::{render_script, shell_quote, Profiler, ScriptEnv};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use wlreplay_protocol::Subject;

use crate::context::{render_map, ExecutionContext, Param, ParamMap};
use crate::state::JobStateData;

/// Name of the generated submission script inside a working directory
pub const SCRIPT_NAME: &str = "job.sh";

/// Name of the generated input file inside a working directory
pub const INPUT_NAME: &str = "input.json";

/// Job identifier: the integer from the job list, or a dotted child id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn from_number(id: u64) -> Self {
        Self(id.to_string())
    }

    /// Id of this job's `index`-th child (1-based)
    pub fn child(&self, index: usize) -> Self {
        Self(format!("{}.{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric id for top-level jobs; `None` for children
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job errors
#[derive(Debug, Error)]
pub enum JobError {
    #[error("working directory already exists: {0} (artifacts of a previous run?)")]
    PathExists(PathBuf),

    #[error("top-level job without an id")]
    MissingId,

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_app() -> String {
    "synthetic".to_string()
}

fn default_num_procs() -> u64 {
    1
}

fn default_timed() -> bool {
    true
}

/// One entry of the job list, as produced by the workload generator
#[derive(Debug, Clone, Deserialize)]
pub struct JobDescriptor {
    /// Required for top-level jobs; ignored for children
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default = "default_num_procs")]
    pub num_procs: u64,
    /// Seconds after run start at which the job was originally submitted
    #[serde(default)]
    pub start_delay: u64,
    #[serde(default = "default_timed")]
    pub timed: bool,
    #[serde(default)]
    pub needs_read_cache: bool,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub depends: Value,
    #[serde(default)]
    pub children: Vec<JobDescriptor>,
}

/// The job list file
#[derive(Debug, Clone, Deserialize)]
pub struct JobList {
    pub jobs: Vec<JobDescriptor>,
}

impl JobList {
    pub fn from_json(json: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, JobError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Build top-level jobs whose working directories live under `output_dir`
    pub fn into_jobs(self, output_dir: &Path) -> Result<Vec<Job>, JobError> {
        self.jobs
            .iter()
            .map(|desc| {
                let id = desc.id.ok_or(JobError::MissingId)?;
                Job::from_descriptor(desc, JobId::from_number(id), output_dir)
            })
            .collect()
    }
}

/// A unit of scheduled work
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub app: String,
    pub working_path: PathBuf,
    pub num_procs: u64,
    pub start_delay: u64,
    pub timed: bool,
    needs_read_cache: bool,
    pub executable: String,
    pub args: Vec<String>,
    pub params: BTreeMap<Param, String>,
    pub payload: Value,
    /// Own dependencies unioned with all children's
    pub dependencies: Vec<Dependency>,
    pub children: Vec<Job>,
    pub state: JobStateData,
    pub scheduler_sequence_id: Option<String>,
}

impl Job {
    /// Build a job (and its children) rooted in `parent_dir`
    pub fn from_descriptor(desc: &JobDescriptor, id: JobId, parent_dir: &Path) -> Result<Self, JobError> {
        let working_path = parent_dir.join(format!("job-{}", id));
        let mut dependencies = build_dependencies(id.as_str(), &desc.depends)?;

        let children = desc
            .children
            .iter()
            .enumerate()
            .map(|(index, child)| Job::from_descriptor(child, id.child(index + 1), &working_path))
            .collect::<Result<Vec<_>, _>>()?;
        for child in &children {
            union_into(&mut dependencies, &child.dependencies);
        }

        Ok(Self {
            state: JobStateData::new(id.as_str()),
            id,
            app: desc.app.clone(),
            working_path,
            num_procs: desc.num_procs,
            start_delay: desc.start_delay,
            timed: desc.timed,
            needs_read_cache: desc.needs_read_cache,
            executable: desc.executable.clone(),
            args: desc.args.clone(),
            params: render_map(&desc.params),
            payload: desc.payload.clone(),
            dependencies,
            children,
            scheduler_sequence_id: None,
        })
    }

    pub fn is_composite(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether this job, or any of its children, reads from the read cache
    pub fn needs_read_cache(&self) -> bool {
        self.needs_read_cache || self.children.iter().any(Job::needs_read_cache)
    }

    /// Event subject this job reports as; children have none
    pub fn subject(&self) -> Option<Subject> {
        self.id.as_number().map(|id| Subject::new(self.app.clone(), id))
    }

    pub fn script_path(&self) -> PathBuf {
        self.working_path.join(SCRIPT_NAME)
    }

    pub fn input_path(&self) -> PathBuf {
        self.working_path.join(INPUT_NAME)
    }

    /// Job-specific parameter overrides, before context defaults apply
    pub fn overrides(&self) -> BTreeMap<Param, String> {
        let mut overrides = BTreeMap::new();
        overrides.insert(Param::JobName, format!("wlr-{}", self.id));
        overrides.insert(Param::NumProcs, self.num_procs.to_string());
        overrides.insert(
            Param::Stdout,
            self.working_path.join("stdout").display().to_string(),
        );
        overrides.insert(
            Param::Stderr,
            self.working_path.join("stderr").display().to_string(),
        );
        // Explicit per-job params win over the computed ones
        overrides.extend(self.params.iter().map(|(k, v)| (*k, v.clone())));
        overrides
    }

    /// Event-pattern dependencies
    pub fn event_patterns(&self) -> impl Iterator<Item = &EventPattern> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Event(pattern) => Some(pattern),
            Dependency::JobId(_) => None,
        })
    }

    /// Job-id dependencies
    pub fn job_id_dependencies(&self) -> Vec<u64> {
        self.dependencies
            .iter()
            .filter_map(|dep| match dep {
                Dependency::JobId(id) => Some(*id),
                Dependency::Event(_) => None,
            })
            .collect()
    }

    /// Jobs to submit for this one: children depth-first, then the job itself
    pub fn submission_order(&self) -> Vec<&Job> {
        let mut order = Vec::new();
        for child in &self.children {
            order.extend(child.submission_order());
        }
        order.push(self);
        order
    }

    /// Mutable lookup of this job or a descendant by id
    pub fn find_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        if &self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    fn input_document(&self) -> Value {
        json!({
            "job_id": self.id,
            "app": self.app,
            "num_procs": self.num_procs,
            "timed": self.timed,
            "payload": self.payload,
        })
    }

    /// Create the working directory and write input + script.
    ///
    /// Composite jobs generate every child in its own subdirectory before
    /// writing their own script. An existing working directory is an error.
    pub fn generate(&self, ctx: &ExecutionContext, env: &ScriptEnv) -> Result<(), JobError> {
        match fs::create_dir(&self.working_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(JobError::PathExists(self.working_path.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        for child in &self.children {
            child.generate(ctx, env)?;
        }

        fs::write(
            self.input_path(),
            serde_json::to_string_pretty(&self.input_document())?,
        )?;

        let script = render_script(self, ctx, env);
        let path = self.script_path();
        fs::write(&path, script)?;
        make_executable(&path)?;

        Ok(())
    }
}

#[cfg(unix)]
pub(crate) fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
pub(crate) fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
