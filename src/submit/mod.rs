//! Job submission
//!
//! A [`Submitter`] runs one [`SubmitCommand`] and returns the scheduler's
//! job id. Submissions are blocking and run on tokio's blocking pool, never
//! on the coordinator task.
//!
//! - [`CommandSubmitter`]: runs the scheduler CLI (or `sh` for the local
//!   backend) as a child process
//! - [`MockSubmitter`]: records commands and hands out ids, for tests

use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::context::{ContextError, ExecutionContext, Scheduler, SubmitCommand};

/// Submission errors; each is isolated to the job it concerns
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission failed: `{command}` exited with {status}: {output}")]
    BackendSubmissionFailure {
        command: String,
        status: String,
        output: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    MissingSequenceId(#[from] ContextError),
}

/// Result of a successful submission
#[derive(Debug)]
pub struct Submission {
    /// Scheduler-assigned id (the process id for the local backend)
    pub sequence_id: String,
    /// Local backend only: the running job process
    pub process: Option<Child>,
}

impl Submission {
    pub fn scheduled(sequence_id: impl Into<String>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            process: None,
        }
    }
}

/// Submission strategy
pub trait Submitter: Send + Sync {
    /// Submit one job script
    fn submit(&self, ctx: &ExecutionContext, command: &SubmitCommand) -> Result<Submission, SubmitError>;
}

/// Runs submit commands as child processes
#[derive(Debug, Default)]
pub struct CommandSubmitter;

impl CommandSubmitter {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &SubmitCommand) -> Result<Command, SubmitError> {
        let (program, args) = command.argv.split_first().ok_or_else(|| SubmitError::Spawn {
            command: command.display(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty submit command"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(path) = &command.stdin {
            let file = File::open(path).map_err(|source| SubmitError::Spawn {
                command: command.display(),
                source,
            })?;
            cmd.stdin(Stdio::from(file));
        } else {
            cmd.stdin(Stdio::null());
        }
        Ok(cmd)
    }

    fn spawn_local(command: &SubmitCommand) -> Result<Submission, SubmitError> {
        let mut cmd = Self::build(command)?;
        cmd.stdout(Self::output_file(command, command.stdout.as_deref())?);
        cmd.stderr(Self::output_file(command, command.stderr.as_deref())?);
        let child = cmd.spawn().map_err(|source| SubmitError::Spawn {
            command: command.display(),
            source,
        })?;

        Ok(Submission {
            sequence_id: child.id().to_string(),
            process: Some(child),
        })
    }
}

impl CommandSubmitter {
    fn output_file(command: &SubmitCommand, path: Option<&Path>) -> Result<Stdio, SubmitError> {
        match path {
            Some(path) => File::create(path).map(Stdio::from).map_err(|source| SubmitError::Spawn {
                command: command.display(),
                source,
            }),
            None => Ok(Stdio::null()),
        }
    }
}

impl Submitter for CommandSubmitter {
    fn submit(&self, ctx: &ExecutionContext, command: &SubmitCommand) -> Result<Submission, SubmitError> {
        if ctx.scheduler() == Scheduler::Local {
            return Self::spawn_local(command);
        }

        let output = Self::build(command)?
            .output()
            .map_err(|source| SubmitError::Spawn {
                command: command.display(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubmitError::BackendSubmissionFailure {
                command: command.display(),
                status: output.status.to_string(),
                output: format!("{}{}", stdout, stderr).trim().to_string(),
            });
        }

        let sequence_id = ctx.parse_sequence_id(&stdout)?;
        Ok(Submission::scheduled(sequence_id))
    }
}

/// In-process submitter for tests
///
/// Hands out sequential ids starting at `first_id` and fails any command
/// whose rendering contains one of the configured substrings. An optional
/// delay stands in for a slow scheduler CLI.
#[derive(Debug)]
pub struct MockSubmitter {
    next_id: AtomicU64,
    failing: Vec<String>,
    delay: Option<Duration>,
    submitted: Mutex<Vec<SubmitCommand>>,
}

impl MockSubmitter {
    pub fn new(first_id: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first_id),
            failing: Vec::new(),
            delay: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Block every submission for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every command mentioning `pattern` (e.g. a working directory)
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.failing.push(pattern.into());
        self
    }

    /// Commands accepted so far, in submission order
    pub fn submitted(&self) -> Vec<SubmitCommand> {
        match self.submitted.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for MockSubmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl Submitter for MockSubmitter {
    fn submit(&self, _ctx: &ExecutionContext, command: &SubmitCommand) -> Result<Submission, SubmitError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let rendered = command.display();
        if self.failing.iter().any(|pattern| rendered.contains(pattern.as_str())) {
            return Err(SubmitError::BackendSubmissionFailure {
                command: rendered,
                status: "exit status: 1".to_string(),
                output: "mock rejection".to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.submitted.lock() {
            Ok(mut guard) => guard.push(command.clone()),
            Err(poisoned) => poisoned.into_inner().push(command.clone()),
        }
        Ok(Submission::scheduled(id.to_string()))
    }
}
