//! DriverFactory integration for the ADLINK AI controller.
//!
//! [`AdlinkAiDriver`] wraps an [`AdlinkAiController`] behind the capability
//! traits so generic scan code can stage, arm, trigger and configure it.
//!
//! # Example Configuration
//!
//! ```toml
//! [[devices]]
//! id = "adlink_ai"
//! type = "adlink_ai"
//!
//! [devices.config]
//! device_name = "lab/adlink/ai-01"
//! channels = 5
//! synchronization = "software_trigger"
//! integration_time = 0.1
//! mock = true
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use daq_core::capabilities::{Parameterized, Settable, Stageable, Triggerable};
use daq_core::driver::{Capability, DeviceComponents, DeviceMetadata, DriverFactory};
use daq_core::observable::{Observable, ParameterSet};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::AdlinkConfig;
use crate::controller::{AdlinkAiController, LATENCY_TIME, MAX_DEVICE, TIMER_AXIS};
use crate::device::AiDevice;
use crate::error::DRIVER_TYPE;
use crate::mock::MockAiDevice;
use crate::state::State;
use crate::synchronization::AcqSynch;

// =============================================================================
// Configuration
// =============================================================================

/// Registry configuration of an ADLINK AI driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlinkAiDriverConfig {
    /// Controller properties
    #[serde(flatten)]
    pub controller: AdlinkConfig,

    /// Number of axes to register, timer included (1..=5)
    #[serde(default = "default_channels")]
    pub channels: u32,

    /// Initial synchronization
    #[serde(default = "default_synchronization")]
    pub synchronization: AcqSynch,

    /// Initial integration time (s)
    #[serde(default = "default_integration_time")]
    pub integration_time: f64,

    /// Use the simulated card
    #[serde(default)]
    pub mock: bool,
}

fn default_channels() -> u32 {
    MAX_DEVICE
}

fn default_synchronization() -> AcqSynch {
    AcqSynch::SoftwareTrigger
}

fn default_integration_time() -> f64 {
    0.1
}

impl AdlinkAiDriverConfig {
    fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        if !(1..=MAX_DEVICE).contains(&self.channels) {
            anyhow::bail!("'channels' must be within 1..={}, got {}", MAX_DEVICE, self.channels);
        }
        if !self.synchronization.is_supported() {
            anyhow::bail!("synchronization {} is not supported by the card", self.synchronization);
        }
        if !(self.integration_time.is_finite() && self.integration_time > 0.0) {
            anyhow::bail!("'integration_time' must be positive");
        }
        Ok(())
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Data returned by [`AdlinkAiDriver::read`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Controller state after the poll
    pub state: State,
    /// New values per axis; empty while the acquisition is running
    pub data: BTreeMap<u32, Vec<f64>>,
}

impl Reading {
    /// Whether the acquisition is still in progress.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }
}

/// Capability adapter around the controller.
pub struct AdlinkAiDriver {
    controller: Mutex<AdlinkAiController>,
    params: ParameterSet,
    integration_time: Observable<f64>,
    points_per_step: Observable<u32>,
    repetitions: Observable<u32>,
    synchronization: Observable<AcqSynch>,
    armed: AtomicBool,
    in_flight: AtomicBool,
    staged: AtomicBool,
}

impl AdlinkAiDriver {
    /// Build the controller on `device` and register `channels` axes.
    pub async fn new(config: AdlinkAiDriverConfig, device: Arc<dyn AiDevice>) -> Result<Self> {
        config.validate()?;

        let mut controller = AdlinkAiController::new(config.controller.clone(), device).await?;
        for axis in TIMER_AXIS..=config.channels {
            controller.add_device(axis)?;
        }

        let integration_time = Observable::new("integration_time", config.integration_time)
            .with_description("Acquisition time per point")
            .with_units("s")
            .with_validator(|t| {
                if t.is_finite() && *t > 0.0 {
                    Ok(())
                } else {
                    Err(format!("integration time must be positive, got {}", t))
                }
            });
        let points_per_step = Observable::new("points_per_step", config.controller.points_per_step)
            .with_description("Hardware triggers expected per scan step")
            .with_validator(|p| {
                if *p >= 1 {
                    Ok(())
                } else {
                    Err("points per step must be at least 1".to_string())
                }
            });
        let repetitions = Observable::new("repetitions", 1u32)
            .with_description("Hardware triggers of a continuous acquisition")
            .with_validator(|n| {
                if *n >= 1 {
                    Ok(())
                } else {
                    Err("repetitions must be at least 1".to_string())
                }
            });
        let synchronization = Observable::new("synchronization", config.synchronization)
            .with_description("Trigger synchronization of the acquisitions")
            .with_validator(|mode: &AcqSynch| {
                if mode.is_supported() {
                    Ok(())
                } else {
                    Err(format!("{} is not supported by the card", mode))
                }
            });
        let latency_time = Observable::new("latency_time", LATENCY_TIME)
            .with_description("Dead time between hardware-synchronized points")
            .with_units("s")
            .read_only();

        let mut params = ParameterSet::new();
        params.register(integration_time.clone());
        params.register(points_per_step.clone());
        params.register(repetitions.clone());
        params.register(synchronization.clone());
        params.register(latency_time);

        Ok(Self {
            controller: Mutex::new(controller),
            params,
            integration_time,
            points_per_step,
            repetitions,
            synchronization,
            armed: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            staged: AtomicBool::new(false),
        })
    }

    /// Poll the card and collect new data for every axis.
    ///
    /// Software synchronization returns the step's single point once the
    /// card is ready; hardware synchronization returns every point acquired
    /// since the previous poll.
    pub async fn read(&self) -> Result<Reading> {
        let mut ctrl = self.controller.lock().await;
        ctrl.state_all().await?;
        let (state, _) = ctrl.state_one(TIMER_AXIS)?;
        let software = ctrl.synchronization() == Some(AcqSynch::SoftwareTrigger);

        let mut data = BTreeMap::new();
        if software && state.is_busy() {
            return Ok(Reading { state, data });
        }

        ctrl.read_all().await?;
        for axis in ctrl.axes() {
            if let Some(values) = ctrl.read_one(axis)?.into_iter().next() {
                data.insert(axis, values);
            }
        }

        if !state.is_busy() {
            self.in_flight.store(false, Ordering::SeqCst);
            if software {
                self.armed.store(false, Ordering::SeqCst);
            }
        }
        Ok(Reading { state, data })
    }

    /// Current controller state and status line.
    pub async fn state(&self) -> Result<(State, String)> {
        let mut ctrl = self.controller.lock().await;
        ctrl.state_all().await?;
        Ok(ctrl.state_one(TIMER_AXIS)?)
    }

    /// Axes registered on the controller.
    pub async fn axes(&self) -> Vec<u32> {
        self.controller.lock().await.axes()
    }

    fn split_axis_parameter(name: &str) -> Option<(u32, &str)> {
        let rest = name.strip_prefix("axis")?;
        let (axis, parameter) = rest.split_once('.')?;
        Some((axis.parse().ok()?, parameter))
    }
}

impl std::fmt::Debug for AdlinkAiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdlinkAiDriver")
            .field("params", &self.params)
            .field("armed", &self.armed.load(Ordering::SeqCst))
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Triggerable for AdlinkAiDriver {
    async fn arm(&self) -> Result<()> {
        if self.in_flight.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot arm while an acquisition is in progress");
        }

        let mode = self.synchronization.get();
        let points = self.points_per_step.get();
        let time = self.integration_time.get();

        let mut ctrl = self.controller.lock().await;
        ctrl.set_synchronization(mode);
        ctrl.set_points_per_step(points)?;
        // PointsPerStep > 1 overrides this inside load_one
        let repetitions = match mode {
            AcqSynch::HardwareTrigger => self.repetitions.get(),
            _ => 1,
        };
        ctrl.load_one(TIMER_AXIS, time, repetitions, LATENCY_TIME).await?;
        for axis in ctrl.axes() {
            ctrl.pre_start_one(axis)?;
        }

        self.armed.store(true, Ordering::SeqCst);
        debug!(%mode, time, repetitions = ctrl.repetitions(), "Armed");
        Ok(())
    }

    async fn trigger(&self) -> Result<()> {
        if !self.armed.load(Ordering::SeqCst) {
            anyhow::bail!("Device must be armed before triggering");
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            anyhow::bail!("Acquisition already in progress: only one software trigger per step");
        }

        let mut ctrl = self.controller.lock().await;
        let started = async {
            ctrl.start_all().await?;
            for axis in ctrl.axes() {
                ctrl.start_one(axis)?;
            }
            Ok::<_, crate::error::AdlinkError>(())
        }
        .await;
        if let Err(err) = started {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(err.into());
        }
        Ok(())
    }

    async fn is_armed(&self) -> Result<bool> {
        Ok(self.armed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Stageable for AdlinkAiDriver {
    async fn stage(&self) -> Result<()> {
        let mut ctrl = self.controller.lock().await;
        ctrl.state_all().await?;
        self.staged.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unstage(&self) -> Result<()> {
        let mut ctrl = self.controller.lock().await;
        ctrl.abort_one(TIMER_AXIS).await?;
        self.armed.store(false, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
        self.staged.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_staged(&self) -> Result<bool> {
        Ok(self.staged.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl Settable for AdlinkAiDriver {
    /// Accepts the registered parameters, `axis<N>.<extra>` axis parameters
    /// and the controller parameters (`PointsPerStep`, ...).
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()> {
        if let Some(param) = self.params.get(name) {
            param.set_json(value)?;
            return Ok(());
        }
        let mut ctrl = self.controller.lock().await;
        if let Some((axis, parameter)) = Self::split_axis_parameter(name) {
            ctrl.set_axis_extra_par(axis, parameter, value)?;
            return Ok(());
        }
        if name.eq_ignore_ascii_case("synchronization") {
            self.synchronization.validate(&AcqSynch::from_json(&value)?)?;
        }
        ctrl.set_par(name, value)?;
        if let Some(mode) = ctrl.synchronization() {
            self.synchronization.publish(mode);
        }
        self.points_per_step.publish(ctrl.points_per_step());
        Ok(())
    }

    async fn get_value(&self, name: &str) -> Result<serde_json::Value> {
        if let Some(param) = self.params.get(name) {
            return Ok(param.get_json()?);
        }
        let ctrl = self.controller.lock().await;
        if let Some((axis, parameter)) = Self::split_axis_parameter(name) {
            return Ok(ctrl.get_axis_extra_par(axis, parameter)?);
        }
        Ok(ctrl.get_par(name)?)
    }
}

impl Parameterized for AdlinkAiDriver {
    fn parameters(&self) -> &ParameterSet {
        &self.params
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Factory for ADLINK AI drivers.
pub struct AdlinkAiFactory;

static CAPABILITIES: &[Capability] = &[
    Capability::Triggerable,
    Capability::Settable,
    Capability::Stageable,
    Capability::Parameterized,
];

impl DriverFactory for AdlinkAiFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "ADLINK Analog Input (1D)"
    }

    fn capabilities(&self) -> &'static [Capability] {
        CAPABILITIES
    }

    fn validate(&self, config: &toml::Value) -> Result<()> {
        let cfg: AdlinkAiDriverConfig = config
            .clone()
            .try_into()
            .context("Invalid ADLINK AI config")?;
        cfg.validate()
    }

    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>> {
        Box::pin(async move {
            let cfg: AdlinkAiDriverConfig = config
                .try_into()
                .context("Invalid ADLINK AI config")?;
            cfg.validate()?;

            if !cfg.mock {
                anyhow::bail!(
                    "No remote backend available for '{}'; set mock = true to use the simulated card",
                    cfg.controller.device_name
                );
            }

            info!(device = %cfg.controller.device_name, "Creating simulated ADLINK AI driver");
            let mut mock = MockAiDevice::new(cfg.controller.device_name.clone())
                .with_channels(MAX_DEVICE - 1);
            if let Some(rate) = cfg.controller.sample_rate {
                mock = mock.with_sample_rate(rate);
            }
            let channels = cfg.channels;
            let driver = Arc::new(AdlinkAiDriver::new(cfg, Arc::new(mock)).await?);

            Ok(DeviceComponents::new()
                .with_triggerable(driver.clone())
                .with_settable(driver.clone())
                .with_stageable(driver.clone())
                .with_parameterized(driver)
                .with_metadata(DeviceMetadata {
                    measurement_units: Some("V".to_string()),
                    channel_count: Some(channels),
                    max_sample_rate: None,
                }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_axis_parameter() {
        assert_eq!(
            AdlinkAiDriver::split_axis_parameter("axis2.formula"),
            Some((2, "formula"))
        );
        assert_eq!(AdlinkAiDriver::split_axis_parameter("axis.formula"), None);
        assert_eq!(AdlinkAiDriver::split_axis_parameter("PointsPerStep"), None);
    }

    #[test]
    fn test_config_defaults() {
        let value: toml::Value = toml::from_str(
            r#"
device_name = "lab/adlink/ai-01"
mock = true
"#,
        )
        .unwrap();
        let cfg: AdlinkAiDriverConfig = value.try_into().unwrap();
        assert_eq!(cfg.channels, 5);
        assert_eq!(cfg.synchronization, AcqSynch::SoftwareTrigger);
        assert_eq!(cfg.controller.points_per_step, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_gate_modes() {
        let value: toml::Value = toml::from_str(
            r#"
device_name = "lab/adlink/ai-01"
synchronization = "hardware_gate"
"#,
        )
        .unwrap();
        assert!(AdlinkAiFactory.validate(&value).is_err());
    }
}
