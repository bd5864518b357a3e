//! Scheduler backends
//!
//! An [`ExecutionContext`] is the per-scheduler strategy used to turn a
//! job's resolved parameters into scheduler directives, a launcher line, a
//! submit command and cancellation ledger entries. All backends share one
//! table-driven implementation; they differ only in their [`BackendTable`].
//!
//! Directive policy: for each parameter in the backend's fixed order, a line
//! is emitted only when the backend has a directive token for it and the job
//! has a value. Parameters without a token are skipped silently.

mod local;
mod lsf;
mod params;
mod pbs;
mod slurm;

pub use params::{num_nodes, render_map, render_value, JobParams, Param, ParamMap};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Supported batch schedulers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    Pbs,
    Slurm,
    Lsf,
    /// Run scripts directly as local processes
    Local,
}

impl Scheduler {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheduler::Pbs => "pbs",
            Scheduler::Slurm => "slurm",
            Scheduler::Lsf => "lsf",
            Scheduler::Local => "local",
        }
    }

    fn table(&self) -> &'static BackendTable {
        match self {
            Scheduler::Pbs => &pbs::TABLE,
            Scheduler::Slurm => &slurm::TABLE,
            Scheduler::Lsf => &lsf::TABLE,
            Scheduler::Local => &local::TABLE,
        }
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheduler {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pbs" => Ok(Scheduler::Pbs),
            "slurm" => Ok(Scheduler::Slurm),
            "lsf" => Ok(Scheduler::Lsf),
            "local" | "trivial" => Ok(Scheduler::Local),
            _ => Err(ContextError::UnknownScheduler(s.to_string())),
        }
    }
}

/// Execution context errors
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("unknown scheduler '{0}' (expected pbs, slurm, lsf or local)")]
    UnknownScheduler(String),

    #[error("unknown scheduler parameter '{0}'")]
    UnknownParam(String),

    #[error("no scheduler job id in submit output: {0:?}")]
    MissingSequenceId(String),
}

/// How a backend expresses native job-id dependencies on its submit line.
///
/// Rendered as one argument: `<flag><prefix>id<suffix><separator>...`.
#[derive(Debug)]
pub struct DependencyEncoding {
    pub flag: &'static str,
    pub item_prefix: &'static str,
    pub item_suffix: &'static str,
    pub separator: &'static str,
}

impl DependencyEncoding {
    fn render(&self, sequence_ids: &[String]) -> String {
        let items: Vec<String> = sequence_ids
            .iter()
            .map(|id| format!("{}{}{}", self.item_prefix, id, self.item_suffix))
            .collect();
        format!("{}{}", self.flag, items.join(self.separator))
    }
}

/// Where the scheduler-assigned job id is found in submit output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceIdFormat {
    /// First whitespace-separated token of the first non-empty line
    FirstToken,
    /// `sbatch --parsable` output: `<id>[;<cluster>]`
    Parsable,
    /// `Job <id> is submitted to queue <q>.`
    AngleBracketed,
    /// Not printed; the local process id is used
    ProcessId,
}

/// Static per-backend syntax tables
#[derive(Debug)]
pub struct BackendTable {
    pub directive_prefix: &'static str,
    pub directive_order: &'static [Param],
    pub directives: &'static [(Param, &'static str)],
    pub launcher: &'static str,
    pub launcher_params: &'static [(Param, &'static str)],
    /// Only prefix the launcher when more than one process is requested
    pub launcher_parallel_only: bool,
    pub submit: &'static [&'static str],
    /// Script is fed on stdin instead of passed as an argument
    pub script_on_stdin: bool,
    pub dependency: Option<DependencyEncoding>,
    pub cancel_command: &'static str,
    pub sequence_id: SequenceIdFormat,
}

impl BackendTable {
    fn directive_token(&self, param: Param) -> Option<&'static str> {
        self.directives
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, token)| *token)
    }
}

/// A submit invocation: argv plus optional stdio redirection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitCommand {
    pub argv: Vec<String>,
    pub stdin: Option<PathBuf>,
    /// Output files for backends that run the script directly
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl SubmitCommand {
    /// Render for logs and error messages
    pub fn display(&self) -> String {
        let mut line = self.argv.join(" ");
        if let Some(path) = &self.stdin {
            line.push_str(&format!(" < {}", path.display()));
        }
        line
    }
}

/// Per-scheduler strategy value, built once per run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    scheduler: Scheduler,
    table: &'static BackendTable,
    defaults: BTreeMap<Param, String>,
    submit_host: Option<String>,
}

impl ExecutionContext {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler,
            table: scheduler.table(),
            defaults: BTreeMap::new(),
            submit_host: None,
        }
    }

    /// Backend defaults merged under every job's own parameters
    pub fn with_defaults(mut self, defaults: BTreeMap<Param, String>) -> Self {
        self.defaults = defaults;
        self
    }

    /// Submit through `ssh <host>` instead of locally
    pub fn with_submit_host(mut self, host: Option<String>) -> Self {
        self.submit_host = host;
        self
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler
    }

    pub fn defaults(&self) -> &BTreeMap<Param, String> {
        &self.defaults
    }

    /// Whether job-id dependencies can be handed to the scheduler
    pub fn supports_native_dependencies(&self) -> bool {
        self.table.dependency.is_some()
    }

    /// Resolve a job's overrides against the context defaults
    pub fn resolve(&self, overrides: &BTreeMap<Param, String>) -> JobParams {
        JobParams::resolve(overrides, &self.defaults)
    }

    /// Scheduler directive block, one line per emitted parameter
    pub fn scheduler_directives(&self, params: &JobParams) -> String {
        let mut out = String::new();
        for param in self.table.directive_order {
            let Some(token) = self.table.directive_token(*param) else {
                continue;
            };
            if let Some(value) = params.get(*param) {
                out.push_str(self.table.directive_prefix);
                out.push_str(token);
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }

    /// Launcher prefix for the job's executable (may be empty)
    pub fn launch_command(&self, params: &JobParams) -> String {
        if self.table.launcher_parallel_only && params.num_procs() <= 1 {
            return String::new();
        }

        let mut parts = vec![self.table.launcher.to_string()];
        for (param, token) in self.table.launcher_params {
            if let Some(value) = params.get(*param) {
                parts.push(format!("{}{}", token, value));
            }
        }
        parts.join(" ")
    }

    /// Submit command for `script`, encoding scheduler-native dependencies
    /// on the given scheduler job ids when the backend supports it
    pub fn submit_command(
        &self,
        params: &JobParams,
        script: &Path,
        dependencies: &[String],
    ) -> SubmitCommand {
        let mut argv: Vec<String> = Vec::new();
        if let Some(host) = &self.submit_host {
            argv.push("ssh".to_string());
            argv.push(host.clone());
        }
        argv.extend(self.table.submit.iter().map(|s| s.to_string()));

        if let Some(encoding) = &self.table.dependency {
            if !dependencies.is_empty() {
                argv.push(encoding.render(dependencies));
            }
        }

        let stdin = if self.table.script_on_stdin {
            Some(script.to_path_buf())
        } else {
            argv.push(script.display().to_string());
            None
        };

        // Schedulers honour the output directives; local scripts need the
        // redirection done by whoever spawns them
        let (stdout, stderr) = if self.scheduler == Scheduler::Local {
            (
                params.get(Param::Stdout).map(PathBuf::from),
                params.get(Param::Stderr).map(PathBuf::from),
            )
        } else {
            (None, None)
        };

        SubmitCommand {
            argv,
            stdin,
            stdout,
            stderr,
        }
    }

    /// Ledger text for one submitted job; the header precedes the first entry
    pub fn cancel_entry(&self, sequence_id: &str, is_first: bool) -> String {
        let mut out = String::new();
        if is_first {
            out.push_str(&self.cancel_header());
        }
        out.push_str(&format!("{} {}\n", self.table.cancel_command, sequence_id));
        out
    }

    fn cancel_header(&self) -> String {
        format!(
            "#!/bin/sh\n# wlreplay cancellation ledger ({}): {} every submitted job\n",
            self.scheduler, self.table.cancel_command
        )
    }

    /// Extract the scheduler job id from submit command output
    pub fn parse_sequence_id(&self, stdout: &str) -> Result<String, ContextError> {
        let first_line = stdout.lines().map(str::trim).find(|line| !line.is_empty());
        let parsed = match self.table.sequence_id {
            SequenceIdFormat::FirstToken => {
                first_line.and_then(|line| line.split_whitespace().next())
            }
            SequenceIdFormat::Parsable => {
                first_line.and_then(|line| line.split(';').next()).map(str::trim)
            }
            SequenceIdFormat::AngleBracketed => stdout.find('<').and_then(|start| {
                let rest = &stdout[start + 1..];
                rest.find('>').map(|end| &rest[..end])
            }),
            SequenceIdFormat::ProcessId => None,
        };

        parsed
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ContextError::MissingSequenceId(stdout.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(Param, &str)]) -> JobParams {
        let overrides = pairs.iter().map(|(p, v)| (*p, v.to_string())).collect();
        JobParams::resolve(&overrides, &BTreeMap::new())
    }

    #[test]
    fn test_scheduler_from_str() {
        assert_eq!("SLURM".parse::<Scheduler>().unwrap(), Scheduler::Slurm);
        assert_eq!("trivial".parse::<Scheduler>().unwrap(), Scheduler::Local);
        assert!("sge".parse::<Scheduler>().is_err());
    }

    #[test]
    fn test_native_dependency_support() {
        assert!(ExecutionContext::new(Scheduler::Pbs).supports_native_dependencies());
        assert!(ExecutionContext::new(Scheduler::Slurm).supports_native_dependencies());
        assert!(ExecutionContext::new(Scheduler::Lsf).supports_native_dependencies());
        assert!(!ExecutionContext::new(Scheduler::Local).supports_native_dependencies());
    }

    #[test]
    fn test_defaults_are_merged_under_overrides() {
        let mut defaults = BTreeMap::new();
        defaults.insert(Param::Queue, "normal".to_string());
        defaults.insert(Param::ProcsPerNode, "4".to_string());
        let ctx = ExecutionContext::new(Scheduler::Slurm).with_defaults(defaults);

        let mut overrides = BTreeMap::new();
        overrides.insert(Param::NumProcs, "8".to_string());
        let resolved = ctx.resolve(&overrides);
        assert_eq!(resolved.get(Param::Queue), Some("normal"));
        assert_eq!(resolved.get(Param::NumNodes), Some("2"));
    }

    #[test]
    fn test_submit_without_dependencies_omits_flag() {
        let ctx = ExecutionContext::new(Scheduler::Slurm);
        let cmd = ctx.submit_command(&params(&[]), Path::new("/r/job-1/job.sh"), &[]);
        assert_eq!(cmd.argv, vec!["sbatch", "--parsable", "/r/job-1/job.sh"]);
    }

    #[test]
    fn test_submit_via_ssh_host() {
        let ctx = ExecutionContext::new(Scheduler::Pbs).with_submit_host(Some("login1".into()));
        let cmd = ctx.submit_command(&params(&[]), Path::new("job.sh"), &[]);
        assert_eq!(cmd.argv, vec!["ssh", "login1", "qsub", "job.sh"]);
    }

    #[test]
    fn test_cancel_entry_header_only_first() {
        let ctx = ExecutionContext::new(Scheduler::Slurm);
        let first = ctx.cancel_entry("101", true);
        let second = ctx.cancel_entry("102", false);
        assert!(first.starts_with("#!/bin/sh\n"));
        assert!(first.ends_with("scancel 101\n"));
        assert_eq!(second, "scancel 102\n");
    }

    #[test]
    fn test_missing_sequence_id() {
        let ctx = ExecutionContext::new(Scheduler::Pbs);
        assert!(matches!(
            ctx.parse_sequence_id("  \n"),
            Err(ContextError::MissingSequenceId(_))
        ));
    }

    #[test]
    fn test_submit_command_display() {
        let ctx = ExecutionContext::new(Scheduler::Lsf);
        let cmd = ctx.submit_command(&params(&[]), Path::new("job.sh"), &[]);
        assert_eq!(cmd.display(), "bsub < job.sh");
    }
}
