//! Shared helpers for end-to-end replay tests
//!
//! Each test gets its own temp directory holding the job list and the run
//! output directory, and a listener on an ephemeral loopback port.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wlreplay::config::{deep_merge, EffectiveConfig, ReplayConfig};
use wlreplay::notify;
use wlreplay::Event;

/// Token every fixture run is configured with
pub const TOKEN: &str = "fixture-token";

/// How long helpers wait for the orchestrator before giving up
pub const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Write `{"jobs": jobs}` into `dir` and return its path
pub fn write_jobs(dir: &Path, jobs: Value) -> PathBuf {
    let path = dir.join("jobs.json");
    std::fs::write(&path, serde_json::to_string_pretty(&json!({ "jobs": jobs })).unwrap()).unwrap();
    path
}

/// Run output directory used by [`load_config`]
pub fn output_dir(dir: &Path) -> PathBuf {
    dir.join("run")
}

/// Build a config for `scheduler` with test-friendly listener and dispatch
/// settings, then overlay `extra`
pub fn load_config(dir: &Path, scheduler: &str, extra: Value) -> (ReplayConfig, EffectiveConfig) {
    let base = json!({
        "scheduler": scheduler,
        "output_dir": output_dir(dir),
        "token": TOKEN,
        "listener": {
            "host": "127.0.0.1",
            "port": 0,
            "notify_command": "true"
        },
        "dispatch": {
            "poll_interval_ms": 20
        }
    });
    let effective = EffectiveConfig::build(None, Some(deep_merge(base, extra))).unwrap();
    let config = ReplayConfig::from_effective(&effective).unwrap();
    (config, effective)
}

/// Poll `condition` until it holds or [`WAIT_LIMIT`] passes
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Deliver one event to a running orchestrator
pub async fn send(addr: SocketAddr, event: Event) {
    tokio::task::spawn_blocking(move || notify::send("127.0.0.1", addr.port(), &event))
        .await
        .unwrap()
        .unwrap();
}

/// Let the coordinator drain its queues before asserting a negative
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
