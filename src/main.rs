//! wlreplay CLI
//!
//! Entry point for the `wlreplay` command-line tool.

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use wlreplay::config::{EffectiveConfig, ReplayConfig};
use wlreplay::notify;
use wlreplay::orchestrator::{Replay, RunError, RunOutcome, EXIT_INTERRUPTED};
use wlreplay::{CommandSubmitter, EventKind, JobGraph, JobList, Scheduler, Subject};
use wlreplay_protocol::DEFAULT_NOTIFY_PORT;

#[derive(Parser)]
#[command(name = "wlreplay")]
#[command(about = "Replay a recorded HPC workload against a batch scheduler", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, submit and track every job of a job list
    Run {
        /// Job list (JSON)
        #[arg(long, short = 'j')]
        jobs: PathBuf,

        /// Configuration file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Scheduler backend: pbs, slurm, lsf or local
        #[arg(long, short = 's')]
        scheduler: Option<Scheduler>,

        /// Directory for job working directories and run artifacts
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Listener port (0 picks a free one)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Submit through `ssh <host>`
        #[arg(long)]
        submit_host: Option<String>,

        /// Write logs to this file instead of stdout
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Report a job event to a running orchestrator
    Notify {
        /// Event type: Complete, Failed, MetadataChange or NotifyMetadata
        #[arg(long = "type")]
        kind: EventKind,

        /// Application name of the reporting job
        #[arg(long, env = "WLR_APP")]
        app: String,

        /// Job id of the reporting job
        #[arg(long, env = "WLR_JOB_ID")]
        job: u64,

        /// Metadata entry, key=value (repeatable)
        #[arg(long, short = 'm')]
        metadata: Vec<String>,

        #[arg(long, env = "WLR_NOTIFY_HOST", default_value = "127.0.0.1")]
        host: String,

        #[arg(long, env = "WLR_NOTIFY_PORT", default_value_t = DEFAULT_NOTIFY_PORT)]
        port: u16,

        #[arg(long, env = "WLR_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Cancel every job recorded in a cancellation ledger
    Cancel {
        /// Ledger script written by `wlreplay run` (cancel.sh)
        #[arg(long, short = 'l')]
        ledger: PathBuf,
    },

    /// Load and validate a job list without submitting anything
    Check {
        /// Job list (JSON)
        #[arg(long, short = 'j')]
        jobs: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            jobs,
            config,
            scheduler,
            output_dir,
            port,
            submit_host,
            log_file,
        } => {
            let overrides = cli_overrides(scheduler, output_dir, port, submit_host);
            run_replay(&jobs, config.as_deref(), overrides, log_file.as_deref())
        }
        Commands::Notify {
            kind,
            app,
            job,
            metadata,
            host,
            port,
            token,
        } => run_notify(kind, app, job, &metadata, &host, port, token),
        Commands::Cancel { ledger } => run_cancel(&ledger),
        Commands::Check { jobs } => run_check(&jobs),
    };

    process::exit(code);
}

/// CLI flags as the top configuration layer
fn cli_overrides(
    scheduler: Option<Scheduler>,
    output_dir: Option<PathBuf>,
    port: Option<u16>,
    submit_host: Option<String>,
) -> Value {
    let mut overrides = Map::new();
    if let Some(scheduler) = scheduler {
        overrides.insert("scheduler".into(), json!(scheduler.as_str()));
    }
    if let Some(dir) = output_dir {
        overrides.insert("output_dir".into(), json!(dir));
    }
    if let Some(port) = port {
        overrides.insert("listener".into(), json!({ "port": port }));
    }
    if let Some(host) = submit_host {
        overrides.insert("submit_host".into(), json!(host));
    }
    Value::Object(overrides)
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), std::io::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

fn run_replay(jobs: &Path, config_path: Option<&Path>, overrides: Value, log_file: Option<&Path>) -> i32 {
    if let Err(e) = init_tracing(log_file) {
        eprintln!("Error opening log file: {}", e);
        return 1;
    }

    let effective = match EffectiveConfig::build(config_path, Some(overrides)) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return RunError::from(e).exit_code();
        }
    };
    let config = match ReplayConfig::from_effective(&effective) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return RunError::from(e).exit_code();
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            return 1;
        }
    };

    let result = runtime.block_on(async {
        let replay = Replay::prepare(&config, effective, jobs, Arc::new(CommandSubmitter::new())).await?;
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        };
        replay.run(shutdown).await
    });

    match result {
        Ok(summary) => {
            println!("{}", summary.human_summary);
            match summary.outcome {
                RunOutcome::Finished => 0,
                RunOutcome::Interrupted => EXIT_INTERRUPTED,
            }
        }
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run_notify(
    kind: EventKind,
    app: String,
    job: u64,
    metadata: &[String],
    host: &str,
    port: u16,
    token: Option<String>,
) -> i32 {
    let result = notify::parse_metadata(metadata)
        .and_then(|metadata| notify::build_event(kind, Subject::new(app, job), metadata, token))
        .and_then(|event| notify::send(host, port, &event));

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_cancel(ledger: &Path) -> i32 {
    match wlreplay::ledger::replay(ledger) {
        Ok(()) => {
            println!("Cancelled every job in {}", ledger.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_check(jobs: &Path) -> i32 {
    // Working directories are not created, so any base path will do
    let result = JobList::from_file(jobs)
        .and_then(|list| list.into_jobs(Path::new(".")))
        .map_err(RunError::from)
        .and_then(|jobs| JobGraph::new(jobs).map_err(RunError::from));

    match result {
        Ok(graph) => {
            let total: usize = graph.jobs().map(|job| job.submission_order().len()).sum();
            println!(
                "{}: {} top-level job(s), {} including children",
                jobs.display(),
                graph.len(),
                total
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}
