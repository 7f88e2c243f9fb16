// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod process;
pub mod reactor;
pub mod sched;
pub mod sync;
pub mod types;
pub mod watch;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_optional};
use crate::engine::Supervisor;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (file plus `--cmd`/`--watch`)
/// - the supervisor and its threads
/// - one deploy per configured deployment
/// - SIGTERM / Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_optional(args.config.as_deref())?;
    if let Some(deployment) = args.deployment() {
        cfg.push_deployment(deployment)?;
    }
    cfg.require_deployments()?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let supervisor = Supervisor::new(cfg.supervisor.clone())?;
    supervisor.start()?;

    for deployment in &cfg.deployments {
        let pid = supervisor
            .deploy(deployment.args.clone(), &deployment.watch)
            .with_context(|| format!("failed to deploy '{}'", deployment.name))?;
        info!(name = %deployment.name, %pid, "deployment running");
    }

    wait_for_shutdown().await?;

    info!("shutdown requested");
    supervisor.stop();
    let undeployed = supervisor.undeploy_all()?;
    info!(undeployed, "all deployments stopped");
    Ok(())
}

/// Resolve on SIGTERM or Ctrl-C, whichever comes first.
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            debug!("received Ctrl+C");
        }
        _ = terminate.recv() => {
            debug!("received SIGTERM");
        }
    }
    Ok(())
}

/// Simple dry-run output: print settings and deployments.
fn print_dry_run(cfg: &ConfigFile) {
    let sup = &cfg.supervisor;
    println!("watchdeploy dry-run");
    println!("  supervisor.queue_capacity = {}", sup.queue_capacity);
    println!("  supervisor.poll_timeout_ms = {}", sup.poll_timeout.as_millis());
    println!("  supervisor.backoff_ceiling = {}", sup.backoff_ceiling);
    println!("  supervisor.backoff_unit_ms = {}", sup.backoff_unit.as_millis());
    println!("  supervisor.backoff_scope = {:?}", sup.backoff_scope);
    println!("  supervisor.kill_signal = {}", sup.kill_signal.as_str());
    println!("  supervisor.watch_events = {}", sup.watch_events);
    println!();

    println!("deployments ({}):", cfg.deployments.len());
    for deployment in &cfg.deployments {
        println!("  - {}", deployment.name);
        println!("      cmd: {:?}", deployment.args);
        println!("      watch: {}", deployment.watch.display());
    }

    debug!("dry-run complete (nothing deployed)");
}
