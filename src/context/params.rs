//! Scheduler parameter schema and layered lookup
//!
//! Every backend table is keyed by [`Param`]. A job's values are resolved
//! from its own overrides first, then the context defaults; `num_nodes` is
//! derived from `num_procs` and `procs_per_node` unless set explicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::ContextError;

/// Named scheduler parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    JobName,
    Queue,
    NumNodes,
    ProcsPerNode,
    NumProcs,
    WallTime,
    Account,
    Stdout,
    Stderr,
}

impl Param {
    pub const ALL: [Param; 9] = [
        Param::JobName,
        Param::Queue,
        Param::NumNodes,
        Param::ProcsPerNode,
        Param::NumProcs,
        Param::WallTime,
        Param::Account,
        Param::Stdout,
        Param::Stderr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Param::JobName => "job_name",
            Param::Queue => "queue",
            Param::NumNodes => "num_nodes",
            Param::ProcsPerNode => "procs_per_node",
            Param::NumProcs => "num_procs",
            Param::WallTime => "wall_time",
            Param::Account => "account",
            Param::Stdout => "stdout",
            Param::Stderr => "stderr",
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Param {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Param::ALL
            .iter()
            .copied()
            .find(|param| param.as_str() == s)
            .ok_or_else(|| ContextError::UnknownParam(s.to_string()))
    }
}

/// Raw parameter values as they appear in job lists and config files
pub type ParamMap = BTreeMap<Param, Value>;

/// Render a raw parameter value for a script or command line.
///
/// Strings are used verbatim, numbers and booleans in their JSON form;
/// null, arrays and objects have no scalar rendering.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Nodes needed to host `num_procs` processes at `procs_per_node` each.
///
/// A `procs_per_node` of zero is treated as one.
pub fn num_nodes(num_procs: u64, procs_per_node: u64) -> u64 {
    let per_node = procs_per_node.max(1);
    num_procs.div_ceil(per_node)
}

/// Fully resolved parameter mapping for one job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobParams {
    values: BTreeMap<Param, String>,
}

impl JobParams {
    /// Layered lookup: `overrides` win over `defaults`.
    pub fn resolve(overrides: &BTreeMap<Param, String>, defaults: &BTreeMap<Param, String>) -> Self {
        let mut values: BTreeMap<Param, String> = Param::ALL
            .iter()
            .filter_map(|param| {
                overrides
                    .get(param)
                    .or_else(|| defaults.get(param))
                    .map(|value| (*param, value.clone()))
            })
            .collect();

        if !overrides.contains_key(&Param::NumNodes) {
            let procs = values.get(&Param::NumProcs).and_then(|v| v.parse::<u64>().ok());
            let per_node = values
                .get(&Param::ProcsPerNode)
                .and_then(|v| v.parse::<u64>().ok());
            if let (Some(procs), Some(per_node)) = (procs, per_node) {
                values.insert(Param::NumNodes, num_nodes(procs, per_node).to_string());
            }
        }

        Self { values }
    }

    pub fn get(&self, param: Param) -> Option<&str> {
        self.values.get(&param).map(String::as_str)
    }

    /// Number of processes requested, defaulting to one
    pub fn num_procs(&self) -> u64 {
        self.get(Param::NumProcs)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }
}

/// Convert raw values into rendered strings, dropping non-scalars.
pub fn render_map(raw: &ParamMap) -> BTreeMap<Param, String> {
    raw.iter()
        .filter_map(|(param, value)| render_value(value).map(|v| (*param, v)))
        .collect()
}
