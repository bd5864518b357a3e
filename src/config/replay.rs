//! Typed run configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::{render_map, ExecutionContext, Param, ParamMap, Scheduler};
use crate::job::Profiler;

use super::effective::{ConfigError, EffectiveConfig};

/// What happens to jobs that depend on a failed job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Dependents keep waiting; a failure only affects the failed job
    #[default]
    Isolate,
    /// Dependents still waiting are failed, transitively
    Propagate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address
    pub host: String,
    pub port: u16,
    /// Host jobs connect back to; defaults to `host`, or loopback when
    /// `host` is a wildcard address
    #[serde(default)]
    pub advertise_host: Option<String>,
    pub validate_on_ingest: bool,
    pub max_message_bytes: usize,
    pub notify_command: String,
}

impl ListenerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn advertised_host(&self) -> String {
        match &self.advertise_host {
            Some(host) => host.clone(),
            None if self.host == "0.0.0.0" || self.host == "::" => "127.0.0.1".to_string(),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub failure_policy: FailurePolicy,
    /// Fail jobs still waiting on events this long after their start delay
    #[serde(default)]
    pub dependency_timeout_seconds: Option<u64>,
    pub poll_interval_ms: u64,
}

impl DispatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    pub read_dir: PathBuf,
    pub shared_dir: PathBuf,
}

/// Fully merged run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub scheduler: Scheduler,
    pub output_dir: PathBuf,
    /// Run token; generated when absent
    #[serde(default)]
    pub token: Option<String>,
    /// Submit through `ssh <host>`
    #[serde(default)]
    pub submit_host: Option<String>,
    pub listener: ListenerConfig,
    /// Scheduler parameter defaults for every job
    #[serde(default)]
    pub defaults: ParamMap,
    pub dispatch: DispatchConfig,
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub profiling: Vec<Profiler>,
}

impl ReplayConfig {
    /// Deserialize the merged configuration
    pub fn from_effective(effective: &EffectiveConfig) -> Result<Self, ConfigError> {
        serde_json::from_value(effective.config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Rendered parameter defaults
    pub fn param_defaults(&self) -> BTreeMap<Param, String> {
        render_map(&self.defaults)
    }

    /// Execution context for the configured backend
    pub fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::new(self.scheduler)
            .with_defaults(self.param_defaults())
            .with_submit_host(self.submit_host.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(cli: serde_json::Value) -> Result<ReplayConfig, ConfigError> {
        let effective = EffectiveConfig::build(None, Some(cli))?;
        ReplayConfig::from_effective(&effective)
    }

    #[test]
    fn test_defaults_deserialize() {
        let config = load(json!({})).unwrap();
        assert_eq!(config.scheduler, Scheduler::Local);
        assert_eq!(config.dispatch.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.dispatch.dependency_timeout_seconds, None);
        assert_eq!(config.dispatch.poll_interval(), Duration::from_millis(250));
        assert!(config.token.is_none());
        assert!(config.profiling.is_empty());
        assert_eq!(config.listener.advertised_host(), "127.0.0.1");
    }

    #[test]
    fn test_full_override() {
        let config = load(json!({
            "scheduler": "slurm",
            "submit_host": "login1",
            "defaults": {"queue": "debug", "procs_per_node": 4},
            "dispatch": {"failure_policy": "propagate", "dependency_timeout_seconds": 600},
            "profiling": ["darshan"],
            "listener": {"host": "10.0.0.5"}
        }))
        .unwrap();

        assert_eq!(config.scheduler, Scheduler::Slurm);
        assert_eq!(config.dispatch.failure_policy, FailurePolicy::Propagate);
        assert_eq!(config.dispatch.dependency_timeout_seconds, Some(600));
        assert_eq!(config.profiling, vec![Profiler::Darshan]);
        assert_eq!(config.listener.advertised_host(), "10.0.0.5");
        assert_eq!(config.param_defaults().get(&Param::ProcsPerNode).map(String::as_str), Some("4"));

        let ctx = config.execution_context();
        assert_eq!(ctx.scheduler(), Scheduler::Slurm);
        assert_eq!(ctx.defaults().get(&Param::Queue).map(String::as_str), Some("debug"));
    }

    #[test]
    fn test_unknown_scheduler_rejected() {
        let err = load(json!({"scheduler": "sge"})).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_unknown_param_rejected() {
        assert!(load(json!({"defaults": {"walltime": "1:00"}})).is_err());
    }
}
