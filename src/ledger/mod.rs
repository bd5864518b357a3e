//! Cancellation ledger
//!
//! An append-only shell script with one cancel line per submitted job.
//! Nothing is written until the first submission; that append also writes
//! the backend's header and makes the file executable. Running the script
//! (`wlreplay cancel`) aborts every job the run handed to the scheduler.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::job::make_executable;

/// Default ledger file name inside the output directory
pub const LEDGER_NAME: &str = "cancel.sh";

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cancellation ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cancellation ledger not found: {0}")]
    NotFound(PathBuf),

    #[error("cancellation ledger {path} exited with {status}")]
    ReplayFailed { path: PathBuf, status: String },
}

/// Append-only cancellation ledger for one run
#[derive(Debug)]
pub struct CancelLedger {
    path: PathBuf,
    ctx: ExecutionContext,
    entries: usize,
}

impl CancelLedger {
    pub fn new(path: impl Into<PathBuf>, ctx: ExecutionContext) -> Self {
        Self {
            path: path.into(),
            ctx,
            entries: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of cancel lines written so far
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Record one submitted job
    pub fn append(&mut self, sequence_id: &str) -> Result<(), LedgerError> {
        let is_first = self.entries == 0;
        let entry = self.ctx.cancel_entry(sequence_id, is_first);

        let io_err = |source: io::Error| LedgerError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(entry.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        if is_first {
            make_executable(&self.path).map_err(io_err)?;
        }

        self.entries += 1;
        Ok(())
    }
}

/// Run a ledger script, cancelling every job it lists
pub fn replay(path: &Path) -> Result<(), LedgerError> {
    if !path.is_file() {
        return Err(LedgerError::NotFound(path.to_path_buf()));
    }

    // Sanity check before handing the file to a shell
    let contents = fs::read_to_string(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !contents.starts_with("#!/bin/sh\n") {
        return Err(LedgerError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidData, "missing ledger header"),
        });
    }

    let status = Command::new("sh")
        .arg(path)
        .status()
        .map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(LedgerError::ReplayFailed {
            path: path.to_path_buf(),
            status: status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Scheduler;

    #[test]
    fn test_nothing_written_before_first_submission() {
        let temp = tempfile::tempdir().unwrap();
        let ledger = CancelLedger::new(temp.path().join(LEDGER_NAME), ExecutionContext::new(Scheduler::Slurm));
        assert!(ledger.is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_header_written_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(LEDGER_NAME);
        let mut ledger = CancelLedger::new(&path, ExecutionContext::new(Scheduler::Slurm));
        ledger.append("101").unwrap();
        ledger.append("102").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("#!/bin/sh").count(), 1);
        assert!(contents.ends_with("scancel 101\nscancel 102\n"));
        assert_eq!(ledger.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_ledger_is_executable() {
        use std::os::unix::fs::PermissionsExt;
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(LEDGER_NAME);
        let mut ledger = CancelLedger::new(&path, ExecutionContext::new(Scheduler::Pbs));
        ledger.append("7.server").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[test]
    fn test_replay_missing_file() {
        let temp = tempfile::tempdir().unwrap();
        let err = replay(&temp.path().join("absent.sh")).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn test_replay_rejects_foreign_script() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("other.sh");
        fs::write(&path, "echo hi\n").unwrap();
        assert!(replay(&path).is_err());
    }
}
