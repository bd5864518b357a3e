//! Local backend: scripts run as child processes of the orchestrator
//!
//! There is no scheduler to encode job-id dependencies, so the orchestrator
//! waits for the upstream process to exit before submitting dependents.

use super::{BackendTable, Param, SequenceIdFormat};

pub(super) static TABLE: BackendTable = BackendTable {
    directive_prefix: "",
    directive_order: &[],
    directives: &[],
    launcher: "mpirun",
    launcher_params: &[(Param::NumProcs, "-np ")],
    launcher_parallel_only: true,
    submit: &["sh"],
    script_on_stdin: false,
    dependency: None,
    cancel_command: "kill",
    sequence_id: SequenceIdFormat::ProcessId,
};
