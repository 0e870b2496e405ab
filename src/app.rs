use crate::config::NodeBootstrapConfig;
use crate::controller::{BootstrapController, BootstrapError, RunOutcome};
use crate::logging::init_tracing;
use crate::shutdown::ShutdownSignal;
use crate::storage::{FileLedgerStore, FileWatermarkStore, WatermarkStore};
use crate::types::TargetEpoch;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{error, info};

type FileController = BootstrapController<FileLedgerStore, FileWatermarkStore>;

#[derive(Debug, Parser)]
#[command(name = "ol-bootstrap", version, about = "Restore and catch-up for 0L full nodes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Restore from the archive, resuming from the persisted watermark.
    Restore {
        #[arg(long)]
        config: PathBuf,
        /// Stop after this epoch instead of the configured target.
        #[arg(long)]
        epoch: Option<u64>,
    },
    /// Restore, catch up from peers and supervise until interrupted.
    Start {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the persisted watermark and waypoint.
    Status {
        #[arg(long)]
        config: PathBuf,
    },
}

/// Binary entrypoint; returns the process exit code.
pub fn run() -> Result<i32> {
    init_tracing();
    run_cli(Cli::parse())
}

pub fn run_cli(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Restore { config, epoch } => {
            let config = match load_config(&config) {
                Ok(config) => config,
                Err(err) => return Ok(report(err)),
            };
            let target = epoch.map(TargetEpoch::Epoch).unwrap_or(config.target_epoch);
            let result = run_controller(config, move |controller| controller.run_restore(target))?;
            Ok(match result {
                Ok(summary) => {
                    let waypoint = summary.watermark.as_ref().map(|wm| wm.waypoint().to_string());
                    let output = json!({
                        "segments_applied": summary.segments_applied,
                        "cancelled": summary.cancelled,
                        "watermark": summary.watermark,
                        "waypoint": waypoint,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                    0
                }
                Err(err) => report(err),
            })
        }
        Command::Start { config } => {
            let config = match load_config(&config) {
                Ok(config) => config,
                Err(err) => return Ok(report(err)),
            };
            let result = run_controller(config, |controller| controller.run())?;
            Ok(match result {
                Ok(RunOutcome::Live { waypoint }) => {
                    info!(waypoint = %waypoint, "node is live");
                    0
                }
                Ok(RunOutcome::ShutDown { state }) => {
                    info!(state = %state, "clean shutdown");
                    0
                }
                Err(err) => report(err),
            })
        }
        Command::Status { config } => {
            let config = NodeBootstrapConfig::load(&config)
                .with_context(|| format!("loading config {}", config.display()))?;
            let watermark = FileWatermarkStore::new(&config.data_dir)
                .load()
                .context("reading restore watermark")?;
            let output = json!({
                "data_dir": config.data_dir,
                "watermark": watermark,
                "waypoint": watermark.as_ref().map(|wm| wm.waypoint()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(0)
        }
    }
}

fn load_config(path: &Path) -> Result<NodeBootstrapConfig, BootstrapError> {
    NodeBootstrapConfig::load(path).map_err(BootstrapError::from)
}

fn report(err: BootstrapError) -> i32 {
    let code = err.exit_code();
    error!(error = %err, exit_code = code, "ol-bootstrap failed");
    eprintln!("fatal: {err}");
    code
}

/// Runs `job` on a blocking worker while Ctrl-C requests a cooperative shutdown.
fn run_controller<T, F>(config: NodeBootstrapConfig, job: F) -> Result<Result<T, BootstrapError>>
where
    T: Send + 'static,
    F: FnOnce(&mut FileController) -> Result<T, BootstrapError> + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let shutdown = ShutdownSignal::new();
    runtime.block_on(async move {
        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                interrupt.request();
            }
        });
        let worker = tokio::task::spawn_blocking(move || {
            let mut controller = BootstrapController::from_config(config, shutdown)?;
            job(&mut controller)
        });
        worker.await.context("bootstrap worker panicked")
    })
}
