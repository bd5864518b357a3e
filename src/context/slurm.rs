//! SLURM backend

use super::{BackendTable, DependencyEncoding, Param, SequenceIdFormat};

pub(super) static TABLE: BackendTable = BackendTable {
    directive_prefix: "#SBATCH ",
    directive_order: &[
        Param::JobName,
        Param::Queue,
        Param::NumNodes,
        Param::NumProcs,
        Param::ProcsPerNode,
        Param::WallTime,
        Param::Account,
        Param::Stdout,
        Param::Stderr,
    ],
    directives: &[
        (Param::JobName, "--job-name="),
        (Param::Queue, "--partition="),
        (Param::NumNodes, "--nodes="),
        (Param::NumProcs, "--ntasks="),
        (Param::ProcsPerNode, "--ntasks-per-node="),
        (Param::WallTime, "--time="),
        (Param::Account, "--account="),
        (Param::Stdout, "--output="),
        (Param::Stderr, "--error="),
    ],
    launcher: "srun",
    launcher_params: &[(Param::NumNodes, "-N "), (Param::NumProcs, "-n ")],
    launcher_parallel_only: false,
    submit: &["sbatch", "--parsable"],
    script_on_stdin: false,
    dependency: Some(DependencyEncoding {
        flag: "--dependency=afterok:",
        item_prefix: "",
        item_suffix: "",
        separator: ":",
    }),
    cancel_command: "scancel",
    sequence_id: SequenceIdFormat::Parsable,
};
