//! CLI Entry Point for photoreactor-daq
//!
//! Provides command-line interface for:
//! - Running an acquisition against the simulated rig
//! - Checking a settings file
//!
//! # Usage
//!
//! Sample for a minute with the analyzer and save a session:
//! ```bash
//! photoreactor-daq run --analyzer --save --seconds 60
//! ```
//!
//! Validate settings:
//! ```bash
//! photoreactor-daq check-config --config config/photoreactor.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use photoreactor_daq::acquisition::{Orchestrator, OrchestratorStatus, Sampler};
use photoreactor_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use photoreactor_daq::data::storage::SessionStore;
use photoreactor_daq::hardware::mock::{MockFlowMeter, MockMassAnalyzer};
use photoreactor_daq::hardware::{InstrumentPowerState, ScanningController};
use photoreactor_daq::tracing_setup;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "photoreactor-daq")]
#[command(about = "Photoreactor chamber acquisition controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an acquisition on the simulated rig
    Run {
        /// Settings file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Write the run to a session file
        #[arg(long)]
        save: bool,

        /// Attach and power up the gas analyzer before the run
        #[arg(long)]
        analyzer: bool,

        /// Run length in seconds (Ctrl-C stops early)
        #[arg(long, default_value = "10")]
        seconds: u64,
    },

    /// Load and validate a settings file
    CheckConfig {
        /// Settings file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            save,
            analyzer,
            seconds,
        } => run(config, save, analyzer, Duration::from_secs(seconds)).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(config: PathBuf, save: bool, analyzer: bool, length: Duration) -> Result<()> {
    let settings = Settings::load_from(&config)?;
    settings.validate()?;
    tracing_setup::init_from_settings(&settings)?;
    info!(name = %settings.application.name, config = %config.display(), "Starting");

    let meter = settings
        .channels
        .iter()
        .enumerate()
        .fold(MockFlowMeter::new(), |meter, (i, channel)| {
            meter.with_channel(channel.id.clone(), 1.0 + i as f64)
        })
        .with_latency(Duration::from_millis(20));
    let mut sampler = Sampler::new(Arc::new(meter));

    let attach_analyzer = analyzer || settings.analyzer.enabled;
    if attach_analyzer {
        let driver = MockMassAnalyzer::new()
            .with_step_latency(Duration::from_millis(200))
            .with_scan_latency(Duration::from_millis(10));
        sampler = sampler.with_analyzer(ScanningController::new(
            Arc::new(driver),
            settings.analyzer.ionizer(),
        ));
    }

    let store = SessionStore::new(&settings.storage.time_unit, &settings.storage.scan_unit);
    let orchestrator = Orchestrator::new(sampler, store);

    let (control_tx, control_rx) = watch::channel(settings.control_input()?);
    let (status_tx, mut status_rx) = watch::channel(OrchestratorStatus::default());
    let task = tokio::spawn(orchestrator.run(control_rx, status_tx, settings.tick_interval()));

    if attach_analyzer {
        control_tx.send_modify(|input| input.analyzer_on = true);
        let failure = {
            let status = status_rx
                .wait_for(|s| {
                    s.power == Some(InstrumentPowerState::Ready) || s.analyzer_forced_off
                })
                .await?;
            status.analyzer_forced_off.then(|| status.last_error.clone())
        };
        if let Some(error) = failure {
            drop(control_tx);
            task.await?;
            bail!(
                "analyzer did not power up: {}",
                error.unwrap_or_else(|| "unknown error".into())
            );
        }
    }

    control_tx.send_modify(|input| {
        input.run = true;
        input.save = save;
    });

    tokio::select! {
        _ = tokio::time::sleep(length) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    // Dropping the control input shuts the orchestrator down.
    drop(control_tx);
    task.await?;

    let status = status_rx.borrow().clone();
    if let Some(error) = &status.last_error {
        warn!(%error, "Last reported error");
    }
    println!("Run complete: {} samples", status.series.len());
    Ok(())
}

fn check_config(config: PathBuf) -> Result<()> {
    let settings = Settings::load_from(&config)?;
    settings.validate()?;

    let targets = settings.analyzer.scan_targets()?;
    println!("Configuration OK: {}", config.display());
    println!("  tick interval: {} ms", settings.acquisition.tick_interval_ms);
    println!("  data root:     {}", settings.storage.data_root.display());
    for channel in &settings.channels {
        println!(
            "  channel {:<6} {:<8} {}",
            channel.id,
            channel.label,
            if channel.enabled { "enabled" } else { "disabled" }
        );
    }
    if settings.analyzer.enabled {
        println!(
            "  analyzer on {} @ {} baud, {} scan targets",
            settings.analyzer.port,
            settings.analyzer.baud_rate,
            targets.len()
        );
    }
    Ok(())
}
