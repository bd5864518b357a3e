//! IBM Spectrum LSF backend
//!
//! `bsub` only honours `#BSUB` directives when the script is read from
//! stdin.

use super::{BackendTable, DependencyEncoding, Param, SequenceIdFormat};

pub(super) static TABLE: BackendTable = BackendTable {
    directive_prefix: "#BSUB ",
    directive_order: &[
        Param::JobName,
        Param::Queue,
        Param::NumProcs,
        Param::ProcsPerNode,
        Param::WallTime,
        Param::Account,
        Param::Stdout,
        Param::Stderr,
    ],
    directives: &[
        (Param::JobName, "-J "),
        (Param::Queue, "-q "),
        (Param::NumProcs, "-n "),
        (Param::WallTime, "-W "),
        (Param::Account, "-P "),
        (Param::Stdout, "-o "),
        (Param::Stderr, "-e "),
    ],
    launcher: "mpirun",
    launcher_params: &[(Param::NumProcs, "-np ")],
    launcher_parallel_only: false,
    submit: &["bsub"],
    script_on_stdin: true,
    dependency: Some(DependencyEncoding {
        flag: "-w",
        item_prefix: "done(",
        item_suffix: ")",
        separator: "&&",
    }),
    cancel_command: "bkill",
    sequence_id: SequenceIdFormat::AngleBracketed,
};
