//! PBS / Torque backend

use super::{BackendTable, DependencyEncoding, Param, SequenceIdFormat};

pub(super) static TABLE: BackendTable = BackendTable {
    directive_prefix: "#PBS ",
    directive_order: &[
        Param::JobName,
        Param::Queue,
        Param::NumNodes,
        Param::ProcsPerNode,
        Param::WallTime,
        Param::Account,
        Param::Stdout,
        Param::Stderr,
    ],
    // procs_per_node has no standalone PBS directive
    directives: &[
        (Param::JobName, "-N "),
        (Param::Queue, "-q "),
        (Param::NumNodes, "-l nodes="),
        (Param::WallTime, "-l walltime="),
        (Param::Account, "-A "),
        (Param::Stdout, "-o "),
        (Param::Stderr, "-e "),
    ],
    launcher: "mpiexec",
    launcher_params: &[(Param::NumProcs, "-n ")],
    launcher_parallel_only: false,
    submit: &["qsub"],
    script_on_stdin: false,
    dependency: Some(DependencyEncoding {
        flag: "-Wdepend=afterok:",
        item_prefix: "",
        item_suffix: "",
        separator: ":",
    }),
    cancel_command: "qdel",
    sequence_id: SequenceIdFormat::FirstToken,
};
