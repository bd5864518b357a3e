//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};
use wlreplay_protocol::{DEFAULT_NOTIFY_PORT, MAX_MESSAGE_BYTES};

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Scheduler backend (default: "local")
    pub scheduler: String,

    /// Run output directory (default: "wlreplay-run")
    pub output_dir: String,

    /// Listener bind host (default: "0.0.0.0")
    pub listener_host: String,

    /// Listener port (default: 7363)
    pub listener_port: u16,

    /// Schema-validate incoming notifications (default: true)
    pub validate_on_ingest: bool,

    /// Largest accepted notification in bytes (default: 64 KiB)
    pub max_message_bytes: usize,

    /// Command jobs use to report back (default: "wlreplay notify")
    pub notify_command: String,

    /// What happens to dependents of a failed job (default: "isolate")
    pub failure_policy: String,

    /// Coordinator tick interval in milliseconds (default: 250)
    pub poll_interval_ms: u64,

    /// Directory jobs read input data from (default: "read")
    pub read_dir: String,

    /// Directory shared by all jobs (default: "shared")
    pub shared_dir: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            scheduler: "local".to_string(),
            output_dir: "wlreplay-run".to_string(),
            listener_host: "0.0.0.0".to_string(),
            listener_port: DEFAULT_NOTIFY_PORT,
            validate_on_ingest: true,
            max_message_bytes: MAX_MESSAGE_BYTES,
            notify_command: "wlreplay notify".to_string(),
            failure_policy: "isolate".to_string(),
            poll_interval_ms: 250,
            read_dir: "read".to_string(),
            shared_dir: "shared".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "scheduler": self.scheduler,
            "output_dir": self.output_dir,
            "listener": {
                "host": self.listener_host,
                "port": self.listener_port,
                "validate_on_ingest": self.validate_on_ingest,
                "max_message_bytes": self.max_message_bytes,
                "notify_command": self.notify_command
            },
            "defaults": {},
            "dispatch": {
                "failure_policy": self.failure_policy,
                "poll_interval_ms": self.poll_interval_ms
            },
            "directories": {
                "read_dir": self.read_dir,
                "shared_dir": self.shared_dir
            },
            "profiling": []
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.scheduler, "local");
        assert_eq!(defaults.listener_port, 7363);
        assert!(defaults.validate_on_ingest);
        assert_eq!(defaults.failure_policy, "isolate");
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();
        assert_eq!(value["listener"]["port"], 7363);
        assert_eq!(value["dispatch"]["failure_policy"], "isolate");
        assert!(value["dispatch"].get("dependency_timeout_seconds").is_none());
        assert!(value["profiling"].as_array().unwrap().is_empty());
    }
}
