//! CLI entry point for the ADLINK AI controller.
//!
//! Runs scans against the simulated card and prints one JSON record per
//! reading on stdout:
//!
//! ```bash
//! # Step scan: one software-triggered point per step
//! adlink-scan step --points 10 --integration-time 0.1
//!
//! # Continuous scan: hardware triggers every 20 ms
//! adlink-scan continuous --points 100 --period-ms 20
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_core::capabilities::{Settable, Stageable, Triggerable};
use daq_core::DaqError;
use daq_driver_adlink::{AdlinkAiDriver, MockAiDevice, Reading, MAX_DEVICE};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use crate::logging::{OutputFormat, TracingConfig};

#[derive(Parser)]
#[command(name = "adlink-scan")]
#[command(about = "Step and continuous scans with the ADLINK analog-input controller", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    /// Log entry and exit of every controller operation
    #[arg(long, global = true)]
    span_events: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Software-synchronized step scan
    Step {
        /// Number of steps
        #[arg(long, default_value = "5")]
        points: u32,

        /// Integration time per step (s)
        #[arg(long)]
        integration_time: Option<f64>,

        /// State polling period (ms)
        #[arg(long, default_value = "20")]
        poll_ms: u64,
    },

    /// Hardware-synchronized continuous scan
    Continuous {
        /// Number of trigger pulses
        #[arg(long, default_value = "20")]
        points: u32,

        /// Integration time per point (s)
        #[arg(long)]
        integration_time: Option<f64>,

        /// Period of the simulated trigger pulses (ms)
        #[arg(long, default_value = "20")]
        period_ms: u64,

        /// State polling period (ms)
        #[arg(long, default_value = "50")]
        poll_ms: u64,
    },
}

/// One line of scan output.
#[derive(Serialize)]
struct ScanRecord<'a> {
    reading: usize,
    state: String,
    data: &'a BTreeMap<u32, Vec<f64>>,
}

fn emit(index: usize, reading: &Reading) -> Result<()> {
    let record = ScanRecord {
        reading: index,
        state: reading.state.to_string(),
        data: &reading.data,
    };
    println!("{}", serde_json::to_string(&record)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ScanConfig::load_from(&cli.config)
        .map_err(DaqError::from)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.validate().map_err(DaqError::Configuration)?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.application.log_level.clone());
    logging::init(
        TracingConfig::from_level_str(&level)
            .map_err(anyhow::Error::msg)?
            .with_format(cli.log_format)
            .with_span_events(cli.span_events),
    )
    .map_err(anyhow::Error::msg)?;

    info!(app = %config.application.name, device = %config.controller.controller.device_name, "Starting");

    let mut mock = MockAiDevice::new(config.controller.controller.device_name.clone())
        .with_channels(MAX_DEVICE - 1);
    if let Some(rate) = config.controller.controller.sample_rate {
        mock = mock.with_sample_rate(rate);
    }
    let mock = Arc::new(mock);
    let driver = AdlinkAiDriver::new(config.controller.clone(), mock.clone()).await?;

    let scan = async {
        match cli.command {
            Commands::Step {
                points,
                integration_time,
                poll_ms,
            } => {
                run_step_scan(&driver, points, integration_time, Duration::from_millis(poll_ms))
                    .await
            }
            Commands::Continuous {
                points,
                integration_time,
                period_ms,
                poll_ms,
            } => {
                run_continuous_scan(
                    &driver,
                    mock.clone(),
                    points,
                    integration_time,
                    Duration::from_millis(period_ms),
                    Duration::from_millis(poll_ms),
                )
                .await
            }
        }
    };

    tokio::select! {
        result = scan => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, aborting acquisition");
        }
    }

    driver.unstage().await?;
    info!("Done");
    Ok(())
}

async fn run_step_scan(
    driver: &AdlinkAiDriver,
    points: u32,
    integration_time: Option<f64>,
    poll: Duration,
) -> Result<()> {
    driver
        .set_value("synchronization", json!("software_trigger"))
        .await?;
    if let Some(time) = integration_time {
        driver.set_value("integration_time", json!(time)).await?;
    }

    driver.stage().await?;
    for step in 0..points as usize {
        driver.arm().await?;
        driver.trigger().await?;
        let reading = loop {
            let reading = driver.read().await?;
            if !reading.is_busy() {
                break reading;
            }
            tokio::time::sleep(poll).await;
        };
        emit(step, &reading)?;
    }
    Ok(())
}

async fn run_continuous_scan(
    driver: &AdlinkAiDriver,
    mock: Arc<MockAiDevice>,
    points: u32,
    integration_time: Option<f64>,
    period: Duration,
    poll: Duration,
) -> Result<()> {
    driver
        .set_value("synchronization", json!("hardware_trigger"))
        .await?;
    driver.set_value("repetitions", json!(points)).await?;
    if let Some(time) = integration_time {
        driver.set_value("integration_time", json!(time)).await?;
    }

    driver.stage().await?;
    driver.arm().await?;
    driver.trigger().await?;

    let pulses = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        for _ in 0..points {
            ticker.tick().await;
            mock.fire_trigger()?;
        }
        Ok::<_, daq_driver_adlink::AdlinkError>(())
    });

    let mut index = 0;
    loop {
        let reading = driver.read().await?;
        if !reading.data.is_empty() {
            emit(index, &reading)?;
            index += 1;
        }
        if !reading.is_busy() {
            break;
        }
        tokio::time::sleep(poll).await;
    }

    pulses.await.context("Trigger task panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_logging_flags() {
        let cli = Cli::try_parse_from([
            "adlink-scan",
            "continuous",
            "--points",
            "5",
            "--span-events",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(cli.span_events);
        assert_eq!(cli.log_format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Continuous { points: 5, .. }));

        let cli = Cli::try_parse_from(["adlink-scan", "step"]).unwrap();
        assert!(!cli.span_events);
    }
}
