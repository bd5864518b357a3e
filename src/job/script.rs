//! Submission script rendering
//!
//! Layout, in order: shebang, scheduler directives, environment exports,
//! profiling setup, launcher line, and (for top-level jobs) the completion
//! notification trailer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::context::ExecutionContext;

use super::Job;

/// Profiling tools that can be preloaded into job processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profiler {
    Darshan,
    Ipm,
}

impl Profiler {
    fn setup_block(&self, log_dir: &Path) -> String {
        let dir = shell_quote(&log_dir.display().to_string());
        match self {
            Profiler::Darshan => format!(
                "# darshan\n\
                 export DARSHAN_LOG_DIR_PATH={dir}\n\
                 export DARSHAN_ENABLE_NONMPI=1\n\
                 export LD_PRELOAD=\"${{DARSHAN_LIB:-libdarshan.so}}${{LD_PRELOAD:+:$LD_PRELOAD}}\"\n"
            ),
            Profiler::Ipm => format!(
                "# ipm\n\
                 export IPM_LOGDIR={dir}\n\
                 export IPM_REPORT=full\n\
                 export LD_PRELOAD=\"${{IPM_LIB:-libipm.so}}${{LD_PRELOAD:+:$LD_PRELOAD}}\"\n"
            ),
        }
    }
}

/// Run-wide values exported into every script
#[derive(Debug, Clone)]
pub struct ScriptEnv {
    pub read_dir: PathBuf,
    pub shared_dir: PathBuf,
    pub token: String,
    pub notify_host: String,
    pub notify_port: u16,
    pub profiling: Vec<Profiler>,
    /// Command used by finished jobs to report back, e.g. `wlreplay notify`
    pub notify_command: Option<String>,
}

/// Quote a word for POSIX sh when it contains anything but safe characters
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r#"'\''"#))
    }
}

fn export(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!("export {}={}\n", name, shell_quote(value)));
}

/// Render the complete submission script for one job (not its children)
pub fn render_script(job: &Job, ctx: &ExecutionContext, env: &ScriptEnv) -> String {
    let params = ctx.resolve(&job.overrides());
    let mut out = String::from("#!/bin/sh\n");

    out.push_str(&ctx.scheduler_directives(&params));
    out.push('\n');

    export(&mut out, "WLR_JOB_ID", job.id.as_str());
    export(&mut out, "WLR_APP", &job.app);
    export(&mut out, "WLR_WRITE_DIR", &job.working_path.display().to_string());
    export(&mut out, "WLR_READ_DIR", &env.read_dir.display().to_string());
    export(&mut out, "WLR_SHARED_DIR", &env.shared_dir.display().to_string());
    export(&mut out, "WLR_INPUT", &job.input_path().display().to_string());
    export(&mut out, "WLR_TOKEN", &env.token);
    export(&mut out, "WLR_NOTIFY_HOST", &env.notify_host);
    export(&mut out, "WLR_NOTIFY_PORT", &env.notify_port.to_string());
    export(&mut out, "WLR_TIMED", if job.timed { "1" } else { "0" });
    if job.needs_read_cache() {
        export(&mut out, "WLR_READ_CACHE", "1");
    }

    for profiler in &env.profiling {
        out.push('\n');
        out.push_str(&profiler.setup_block(&job.working_path));
    }

    out.push('\n');
    let mut words: Vec<String> = Vec::new();
    let launcher = ctx.launch_command(&params);
    if !launcher.is_empty() {
        words.push(launcher);
    }
    words.push(shell_quote(&job.executable));
    words.extend(job.args.iter().map(|arg| shell_quote(arg)));
    out.push_str(&words.join(" "));
    out.push('\n');

    if let (Some(command), Some(_)) = (&env.notify_command, job.id.as_number()) {
        out.push_str(&format!(
            "status=$?\n\
             if [ \"$status\" -eq 0 ]; then\n    \
             {command} --type Complete || true\n\
             else\n    \
             {command} --type Failed || true\n\
             fi\n\
             exit \"$status\"\n"
        ));
    }

    out
}
