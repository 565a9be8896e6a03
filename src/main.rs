use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use battery_control_engine::clock::SystemClock;
use battery_control_engine::config::EngineConfig;
use battery_control_engine::driver::SimulatedBattery;
use battery_control_engine::model::Publication;
use battery_control_engine::orchestrator::Engine;

const fn about_text() -> &'static str {
    "battery control engine: coulomb counting, CVL/CCL/DCL regulation and a simulated driver harness"
}

#[derive(Parser, Debug)]
#[command(version, about = about_text(), long_about = None)]
struct CliArgs {
    /// Path to the TOML configuration file. Missing keys fall back to
    /// compiled-in defaults matching the reference implementation.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the log level (e.g. "debug", "info,battery_control_engine=debug").
    #[arg(long)]
    log_level: Option<String>,

    /// Run a fixed number of ticks then exit, instead of running forever.
    #[arg(long)]
    ticks: Option<u64>,
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| directive.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &CliArgs) -> Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::load(path).context("loading configuration"),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;

    let log_directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| format!("info,battery_control_engine={}", config.log_level));
    init_tracing(&log_directive);

    let driver = Box::new(SimulatedBattery::new(config.cell_count, config.capacity_ah));
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let mut engine = Engine::new(config, driver, Box::new(SystemClock::new()));

    let (tx, rx) = watch::channel(Arc::new(Publication::from(&engine.state)));
    let cancel = CancellationToken::new();

    let publisher_cancel = cancel.clone();
    let publisher = tokio::spawn(async move {
        let mut rx = rx;
        loop {
            tokio::select! {
                _ = publisher_cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let publication = rx.borrow().clone();
                    tracing::debug!(
                        mode = %publication.charge_mode,
                        soc = ?publication.soc_calc,
                        "publication updated"
                    );
                }
            }
        }
    });

    let ticks_remaining = args.ticks;
    let engine_cancel = cancel.clone();
    let engine_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut ticks_done = 0u64;
        loop {
            tokio::select! {
                _ = engine_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let publication = engine.tick();
                    if tx.send(Arc::new(publication)).is_err() {
                        break;
                    }
                    if let Some(limit) = ticks_remaining {
                        ticks_done += 1;
                        if ticks_done >= limit {
                            break;
                        }
                    }
                }
            }
        }
        engine_cancel.cancel();
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
        _ = engine_task => {}
    }

    cancel.cancel();
    let _ = publisher.await;

    Ok(())
}
