//! jobhostd - worker host supervisor daemon.
//!
//! Starts the configured worker process, drives the periodic health check
//! loop, and exits once the host reaches Offline: either a graceful stop
//! via SIGTERM/SIGINT, or the supervisor's own fatal escalation after the
//! restart budget is exhausted.

mod loadavg;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use jobhost_core::config::SupervisorConfig;
use jobhost_core::lifecycle::LifecycleError;
use jobhost_core::process::ProcessHost;
use jobhost_core::supervisor::Supervisor;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::loadavg::LoadavgSampler;

/// jobhostd - supervised worker host
#[derive(Parser, Debug)]
#[command(name = "jobhostd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to supervisor configuration file
    #[arg(short, long, default_value = "jobhost.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// High-load threshold for the 1-minute load average
    /// (defaults to the number of available CPUs)
    #[arg(long)]
    load_threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !args.config.exists() {
        bail!(
            "configuration file {} not found (a [worker] section is required)",
            args.config.display()
        );
    }
    let config =
        SupervisorConfig::from_file(&args.config).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let threshold = args
        .load_threshold
        .unwrap_or_else(LoadavgSampler::default_threshold);
    info!(
        command = %config.worker.command,
        load_threshold = threshold,
        "jobhostd starting"
    );

    let host = Arc::new(ProcessHost::new(config.worker.clone()));
    let sampler = LoadavgSampler::new(threshold);
    let supervisor = Supervisor::new(config.health.clone(), config.restart.clone(), sampler, host);
    let lifecycle = supervisor.lifecycle();
    let controller = supervisor.controller();
    let trigger = supervisor.shutdown_trigger();
    let mut fatal_rx = trigger.subscribe();

    let mut supervisor_task = tokio::spawn(supervisor.run());

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("failed to register SIGINT handler")?;

    let mut supervisor_finished = false;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
        _ = fatal_rx.changed() => info!("shutdown trigger fired"),
        exit = &mut supervisor_task => {
            report_supervisor_exit(exit);
            supervisor_finished = true;
        },
    }

    if !supervisor_finished {
        // No-op when the fatal path already finished the teardown.
        if let Err(error) = controller.shutdown().await {
            error!(%error, "graceful shutdown failed");
        }
        report_supervisor_exit(supervisor_task.await);
    }

    info!(state = %lifecycle.state(), "jobhostd exiting");
    Ok(())
}

fn report_supervisor_exit(exit: Result<Result<(), LifecycleError>, JoinError>) {
    match exit {
        Ok(Ok(())) => info!("supervisor exited cleanly"),
        Ok(Err(error)) => error!(%error, "supervisor exited with error"),
        Err(error) => error!(%error, "supervisor task failed"),
    }
}
