//! One-dimensional experimental-channel controller for the ADLINK AI card.
//!
//! Axis 1 is the timer channel: it reports the integration time for every
//! acquired point. Axes 2..=5 read AI channels 0..=3 of the card.
//!
//! The scan engine drives the controller through the usual pool sequence:
//!
//! ```text
//! load_one(timer) -> pre_start_one(axis)* -> start_all
//!     -> loop { state_all ; read_all ; read_one(axis)* } -> abort_one / load_one
//! ```
//!
//! In software synchronization each step is a single acquisition of
//! `integration_time` seconds, read from the last-trigger statistics once the
//! card is back ON. In hardware synchronization the card accumulates one point
//! per external trigger in its buffered `MeanValues` attributes; data-ready
//! events on the master channel tell the controller how far it can read, and
//! each `read_all` fetches the points acquired since the previous one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::config::AdlinkConfig;
use crate::device::{
    channel_attribute, AiDevice, HwState, SubscriptionId, TriggerConfig, TriggerSource,
    CLEAR_BUFFER_COMMAND, MEAN_VALUES,
};
use crate::error::{AdlinkError, OperationContext, Result};
use crate::formula::{Formula, FormulaEngine};
use crate::listener::DataReadyListener;
use crate::state::State;
use crate::synchronization::AcqSynch;

/// Highest axis number.
pub const MAX_DEVICE: u32 = 5;

/// Axis reporting the integration time.
pub const TIMER_AXIS: u32 = 1;

/// Latency between consecutive hardware-synchronized acquisitions (s).
pub const LATENCY_TIME: f64 = 1e-6;

/// Per-axis state.
#[derive(Debug, Clone, Default)]
struct AxisState {
    sd: f64,
    formula: Formula,
    shared_formula: bool,
    buffer: Vec<f64>,
}

/// Controller for the analog inputs of one ADLINK card.
pub struct AdlinkAiController {
    device: Arc<dyn AiDevice>,
    config: AdlinkConfig,
    engine: FormulaEngine,
    axes: BTreeMap<u32, AxisState>,

    integration_time: f64,
    repetitions: u32,
    points_per_step: u32,
    synchronization: Option<AcqSynch>,

    master_channel: Option<u32>,
    subscription: Option<SubscriptionId>,
    listener: Option<DataReadyListener>,
    last_index_read: i64,

    hw_state: HwState,
    new_data: bool,
    state: State,
    status: String,
}

impl std::fmt::Debug for AdlinkAiController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdlinkAiController")
            .field("device", &self.device.name())
            .field("axes", &self.axes.keys().collect::<Vec<_>>())
            .field("synchronization", &self.synchronization)
            .field("hw_state", &self.hw_state)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AdlinkAiController {
    /// Connect to the device server.
    ///
    /// Fails when the server is missing `ClearBuffer` or the configuration
    /// is invalid. A configured sample rate is written to the card.
    #[instrument(level = "debug", skip(config, device), fields(device = %device.name()), err)]
    pub async fn new(config: AdlinkConfig, device: Arc<dyn AiDevice>) -> Result<Self> {
        config.validate()?;

        let commands = device.commands().await?;
        if !commands.iter().any(|c| c == CLEAR_BUFFER_COMMAND) {
            return Err(AdlinkError::DeviceServerTooOld {
                device: device.name().to_string(),
                command: CLEAR_BUFFER_COMMAND.to_string(),
            });
        }

        device.set_timeout(config.timing.default_timeout()).await?;
        if let Some(rate) = config.sample_rate {
            debug!(rate, "Applying configured sample rate");
            device.set_sample_rate(rate).await?;
        }

        Ok(Self {
            device,
            points_per_step: config.points_per_step,
            config,
            engine: FormulaEngine::new(),
            axes: BTreeMap::new(),
            integration_time: 0.0,
            repetitions: 0,
            synchronization: None,
            master_channel: None,
            subscription: None,
            listener: None,
            last_index_read: -1,
            hw_state: HwState::Unknown,
            new_data: false,
            state: State::On,
            status: "The Device is in ON.".to_string(),
        })
    }

    // =========================================================================
    // Axis management
    // =========================================================================

    /// Register an axis with default extra parameters.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn add_device(&mut self, axis: u32) -> Result<()> {
        if !(TIMER_AXIS..=MAX_DEVICE).contains(&axis) {
            return Err(AdlinkError::InvalidAxis {
                axis,
                max: MAX_DEVICE,
            });
        }
        self.axes.insert(axis, AxisState::default());
        Ok(())
    }

    /// Drop an axis and any data-ready subscription.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub async fn delete_device(&mut self, axis: u32) -> Result<()> {
        self.axes
            .remove(&axis)
            .ok_or(AdlinkError::UnknownAxis(axis))?;
        self.unsubscribe_data_ready()
            .await
            .during("DeleteDevice: Unable to unsubscribe")
    }

    /// Axes currently defined, in order.
    pub fn axes(&self) -> Vec<u32> {
        self.axes.keys().copied().collect()
    }

    fn axis(&self, axis: u32) -> Result<&AxisState> {
        self.axes.get(&axis).ok_or(AdlinkError::UnknownAxis(axis))
    }

    fn axis_mut(&mut self, axis: u32) -> Result<&mut AxisState> {
        self.axes.get_mut(&axis).ok_or(AdlinkError::UnknownAxis(axis))
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Refresh the cached card state.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub async fn state_all(&mut self) -> Result<()> {
        self.refresh_state()
            .await
            .during("StateAll: Unable to read state from the device")
    }

    async fn refresh_state(&mut self) -> Result<()> {
        self.hw_state = self.device.state().await?;
        let (state, status) = State::from_hw(self.hw_state);
        self.state = state;
        self.status = status;
        Ok(())
    }

    /// State and status computed by the last [`Self::state_all`].
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn state_one(&self, axis: u32) -> Result<(State, String)> {
        self.axis(axis)?;
        Ok((self.state, self.status.clone()))
    }

    /// Card state seen by the last refresh.
    pub fn hw_state(&self) -> HwState {
        self.hw_state
    }

    // =========================================================================
    // Acquisition
    // =========================================================================

    /// Configure the next acquisition.
    ///
    /// `repetitions` is the number of hardware triggers expected; it is
    /// replaced by `PointsPerStep` when that is larger than one.
    #[instrument(level = "debug", skip(self), fields(sync = ?self.synchronization), ret, err)]
    pub async fn load_one(
        &mut self,
        axis: u32,
        integration_time: f64,
        repetitions: u32,
        latency: f64,
    ) -> Result<()> {
        self.load(axis, integration_time, repetitions)
            .await
            .during("LoadOne: Unable to configure the device")
    }

    async fn load(&mut self, axis: u32, integration_time: f64, repetitions: u32) -> Result<()> {
        self.axis(axis)?;
        if !integration_time.is_finite() || integration_time < 0.0 {
            return Err(AdlinkError::InvalidValue {
                name: "integration_time".into(),
                message: format!("must be a non-negative number, got {}", integration_time),
            });
        }

        self.stop_device().await?;
        self.clean_acquisition().await?;

        self.integration_time = integration_time;
        self.repetitions = repetitions;

        let sample_rate = self.device.sample_rate().await?;
        let samples_per_trigger = (integration_time * sample_rate) as u64;
        let start_wait = self.config.timing.start_wait().as_secs_f64();

        let source = match self.synchronization {
            Some(AcqSynch::SoftwareTrigger) => {
                if integration_time <= start_wait {
                    return Err(AdlinkError::IntegrationTooShort {
                        requested: integration_time,
                        minimum: start_wait,
                    });
                }
                if self.points_per_step > 1 {
                    warn!(
                        points_per_step = self.points_per_step,
                        "Software synchronization acquires one point per step; ignoring PointsPerStep"
                    );
                }
                TriggerSource::Software
            }
            Some(AcqSynch::HardwareTrigger) => {
                if self.points_per_step > 1 {
                    self.repetitions = self.points_per_step;
                }
                TriggerSource::ExternalDigitalRising
            }
            Some(other) => return Err(AdlinkError::UnsupportedSynchronization(other)),
            None => return Err(AdlinkError::SynchronizationNotSet),
        };

        let trigger = TriggerConfig {
            infinite: false,
            source,
            num_triggers: self.repetitions,
            samples_per_trigger,
        };
        debug!(
            source = source.as_wire(),
            num_triggers = trigger.num_triggers,
            samples_per_trigger,
            "Writing trigger configuration"
        );
        self.device.configure_triggers(&trigger).await
    }

    /// Mark an analog axis as the master channel.
    ///
    /// The timer axis never becomes master. Always returns true.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn pre_start_one(&mut self, axis: u32) -> Result<bool> {
        self.axis(axis)?;
        if axis != TIMER_AXIS {
            self.master_channel = Some(axis);
        }
        Ok(true)
    }

    /// Start the acquisition on the card.
    #[instrument(
        level = "debug",
        skip(self),
        fields(sync = ?self.synchronization, master = ?self.master_channel),
        ret,
        err
    )]
    pub async fn start_all(&mut self) -> Result<()> {
        self.start()
            .await
            .during("StartAll: Unable to start acquisition on the device")
    }

    async fn start(&mut self) -> Result<()> {
        if self.synchronization == Some(AcqSynch::HardwareTrigger) {
            self.subscribe_data_ready().await?;
        }

        // The card sometimes goes to ON without passing through RUNNING, or
        // reaches RUNNING only after a while: retry a bounded number of times.
        let timing = self.config.timing.clone();
        let mut outcome = Ok(());
        for attempt in 1..=timing.start_attempts {
            debug!(attempt, "Trying to start the device");
            outcome = self.start_attempt(timing.start_timeout(), timing.start_wait()).await;
            if outcome.is_err() || self.hw_state == HwState::Running {
                break;
            }
            debug!(attempt, state = %self.hw_state, "Device not running, stopping it");
            outcome = self.stop_device().await;
            if outcome.is_err() {
                break;
            }
        }
        let restored = self.device.set_timeout(timing.default_timeout()).await;
        outcome?;
        restored?;

        if self.hw_state != HwState::Running {
            if self.config.skip_start {
                warn!(state = %self.hw_state, "Device did not reach RUNNING; continuing");
            } else {
                return Err(AdlinkError::StartFailed {
                    attempts: timing.start_attempts,
                    state: self.hw_state,
                });
            }
        }
        Ok(())
    }

    async fn start_attempt(&mut self, timeout: Duration, wait: Duration) -> Result<()> {
        self.device.set_timeout(timeout).await?;
        self.device.start().await?;
        tokio::time::sleep(wait).await;
        self.refresh_state().await
    }

    /// Individual axes are started by [`Self::start_all`].
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn start_one(&mut self, axis: u32) -> Result<()> {
        self.axis(axis).map(|_| ())
    }

    /// Fetch new data for every axis into the per-axis buffers.
    ///
    /// Relies on the card state cached by the preceding [`Self::state_all`].
    #[instrument(
        level = "debug",
        skip(self),
        fields(sync = ?self.synchronization, hw = %self.hw_state),
        ret,
        err
    )]
    pub async fn read_all(&mut self) -> Result<()> {
        self.read()
            .await
            .during("ReadAll: Could not read from the device")
    }

    async fn read(&mut self) -> Result<()> {
        self.new_data = true;
        match self.synchronization {
            Some(AcqSynch::SoftwareTrigger) => self.read_software().await,
            Some(AcqSynch::HardwareTrigger) => self.read_hardware().await,
            _ => {
                self.new_data = false;
                Ok(())
            }
        }
    }

    async fn read_software(&mut self) -> Result<()> {
        if self.hw_state != HwState::On {
            self.new_data = false;
            return Ok(());
        }

        let axes: Vec<u32> = self.axes.keys().copied().collect();
        for axis in axes {
            if axis == TIMER_AXIS {
                let integration_time = self.integration_time;
                self.axis_mut(axis)?.buffer = vec![integration_time];
                continue;
            }
            let channel = axis - 2;
            let mean = self.device.mean_last(channel).await?;
            let sd = self.device.std_dev_last(channel).await?;
            let state = self.axes.get(&axis).ok_or(AdlinkError::UnknownAxis(axis))?;
            let value = self.engine.apply(&state.formula, mean)?;
            let state = self.axis_mut(axis)?;
            state.sd = sd;
            state.buffer = vec![value];
        }
        Ok(())
    }

    async fn read_hardware(&mut self) -> Result<()> {
        let mut newest = self.last_index_read;
        if self.hw_state == HwState::On {
            debug!("Hardware acquisition finished");
            newest = self.repetitions as i64 - 1;
        } else if let Some(listener) = self.listener.as_mut() {
            if let Some(index) = listener.drain_latest() {
                newest = newest.max(index);
            }
        }

        if newest <= self.last_index_read {
            self.new_data = false;
            return Ok(());
        }

        let first = (self.last_index_read + 1) as u64;
        let last = newest as u64;
        debug!(first, last, "Reading buffered indexes");

        let axes: Vec<u32> = self.axes.keys().copied().collect();
        for axis in axes {
            let values = if axis == TIMER_AXIS {
                vec![self.integration_time; (last - first + 1) as usize]
            } else {
                let raw = self.device.mean_values(axis - 2, first, last).await?;
                let formula = &self.axis(axis)?.formula;
                self.engine.apply_all(formula, raw)?
            };
            self.axis_mut(axis)?.buffer = values;
        }

        self.last_index_read = newest;
        Ok(())
    }

    /// Values fetched by the last [`Self::read_all`] for one axis.
    ///
    /// Software synchronization yields exactly one single-point spectrum and
    /// fails when the acquisition produced nothing. Hardware synchronization
    /// yields one spectrum with every new point, or nothing.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn read_one(&self, axis: u32) -> Result<Vec<Vec<f64>>> {
        let state = self.axis(axis)?;
        match self.synchronization {
            Some(AcqSynch::SoftwareTrigger) => {
                let value = match (self.new_data, state.buffer.first()) {
                    (true, Some(value)) => *value,
                    _ => return Err(AdlinkError::AcquisitionIncomplete(self.hw_state)),
                };
                Ok(vec![vec![value]])
            }
            Some(AcqSynch::HardwareTrigger) => {
                if self.new_data {
                    Ok(vec![state.buffer.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
            Some(other) => Err(AdlinkError::UnsupportedSynchronization(other)),
            None => Err(AdlinkError::SynchronizationNotSet),
        }
    }

    /// Stop the card and discard the acquisition.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub async fn abort_one(&mut self, axis: u32) -> Result<()> {
        self.abort(axis)
            .await
            .during("AbortOne: Could not stop the device")
    }

    async fn abort(&mut self, axis: u32) -> Result<()> {
        self.axis(axis)?;
        self.refresh_state().await?;
        if self.hw_state != HwState::Standby {
            self.device.stop().await?;
        }
        self.clean_acquisition().await
    }

    // =========================================================================
    // Acquisition helpers
    // =========================================================================

    async fn stop_device(&mut self) -> Result<()> {
        self.refresh_state().await?;
        if self.hw_state == HwState::Standby {
            return Ok(());
        }
        // Stopping may exceed the default timeout when acquisitions are frequent.
        self.device
            .set_timeout(self.config.timing.stop_timeout())
            .await?;
        let stopped = self.device.stop().await;
        let restored = self
            .device
            .set_timeout(self.config.timing.default_timeout())
            .await;
        stopped.and(restored)
    }

    async fn clean_acquisition(&mut self) -> Result<()> {
        self.last_index_read = -1;
        self.repetitions = 0;
        self.unsubscribe_data_ready().await?;
        self.master_channel = None;
        self.new_data = false;
        self.device.clear_buffer().await
    }

    async fn subscribe_data_ready(&mut self) -> Result<()> {
        let axis = self.master_channel.ok_or(AdlinkError::NoMasterChannel)?;
        let channel = axis - 2;
        let attribute = channel_attribute(channel, MEAN_VALUES);
        let (id, receiver) = self.device.subscribe_data_ready(channel).await?;
        debug!(%attribute, id = id.0, "Subscribed to data-ready events");
        self.subscription = Some(id);
        self.listener = Some(DataReadyListener::new(attribute, receiver));
        Ok(())
    }

    async fn unsubscribe_data_ready(&mut self) -> Result<()> {
        // Queued indices belong to the previous acquisition.
        self.listener = None;
        if let Some(id) = self.subscription.take() {
            self.device.unsubscribe(id).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Read an axis extra parameter (`SD`, `Formula`, `SharedFormula`).
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn get_axis_extra_par(&self, axis: u32, name: &str) -> Result<Value> {
        let state = self.axis(axis)?;
        match name.to_lowercase().as_str() {
            "sd" => Ok(json!(state.sd)),
            "formula" => Ok(json!(state.formula.source())),
            "sharedformula" => Ok(json!(state.shared_formula)),
            _ => Err(AdlinkError::UnknownParameter(name.to_string())),
        }
    }

    /// Write an axis extra parameter.
    ///
    /// Enabling `SharedFormula` copies this axis's formula to every axis.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn set_axis_extra_par(&mut self, axis: u32, name: &str, value: Value) -> Result<()> {
        self.axis(axis)?;
        match name.to_lowercase().as_str() {
            "sd" => Err(AdlinkError::ReadOnlyParameter(name.to_string())),
            "formula" => {
                let source = value.as_str().ok_or_else(|| AdlinkError::InvalidValue {
                    name: name.to_string(),
                    message: format!("expected a string, got {}", value),
                })?;
                let formula = self.engine.compile(source)?;
                debug!(axis, formula = formula.source(), applied = formula.is_applied(), "Formula set");
                self.axis_mut(axis)?.formula = formula;
                Ok(())
            }
            "sharedformula" => {
                let shared = value.as_bool().ok_or_else(|| AdlinkError::InvalidValue {
                    name: name.to_string(),
                    message: format!("expected a boolean, got {}", value),
                })?;
                let state = self.axis_mut(axis)?;
                state.shared_formula = shared;
                if shared {
                    let formula = state.formula.clone();
                    for other in self.axes.values_mut() {
                        other.formula = formula.clone();
                    }
                }
                Ok(())
            }
            _ => Err(AdlinkError::UnknownParameter(name.to_string())),
        }
    }

    /// Read a controller parameter.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn get_par(&self, name: &str) -> Result<Value> {
        match name.to_lowercase().as_str() {
            "pointsperstep" | "pointspertrigger" => Ok(json!(self.points_per_step)),
            "synchronization" => Ok(match self.synchronization {
                Some(mode) => json!(mode),
                None => Value::Null,
            }),
            "latencytime" => Ok(json!(LATENCY_TIME)),
            _ => Err(AdlinkError::UnknownParameter(name.to_string())),
        }
    }

    /// Write a controller parameter.
    #[instrument(level = "debug", skip(self), ret, err)]
    pub fn set_par(&mut self, name: &str, value: Value) -> Result<()> {
        match name.to_lowercase().as_str() {
            "pointsperstep" | "pointspertrigger" => {
                let points = value
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| AdlinkError::InvalidValue {
                        name: name.to_string(),
                        message: format!("expected a positive integer, got {}", value),
                    })?;
                self.set_points_per_step(points)
            }
            "synchronization" => {
                self.set_synchronization(AcqSynch::from_json(&value)?);
                Ok(())
            }
            "latencytime" => Err(AdlinkError::ReadOnlyParameter(name.to_string())),
            _ => Err(AdlinkError::UnknownParameter(name.to_string())),
        }
    }

    /// Hardware triggers expected per scan step (>= 1).
    pub fn set_points_per_step(&mut self, points: u32) -> Result<()> {
        if points == 0 {
            return Err(AdlinkError::InvalidValue {
                name: "PointsPerStep".into(),
                message: "must be at least 1".into(),
            });
        }
        self.points_per_step = points;
        Ok(())
    }

    /// Current `PointsPerStep`.
    pub fn points_per_step(&self) -> u32 {
        self.points_per_step
    }

    /// Select the synchronization of the next acquisitions.
    ///
    /// Unsupported modes are accepted here and rejected by [`Self::load_one`].
    pub fn set_synchronization(&mut self, mode: AcqSynch) {
        debug!(%mode, "Synchronization set");
        self.synchronization = Some(mode);
    }

    /// Selected synchronization, if any.
    pub fn synchronization(&self) -> Option<AcqSynch> {
        self.synchronization
    }

    /// Integration time of the loaded acquisition (s).
    pub fn integration_time(&self) -> f64 {
        self.integration_time
    }

    /// Triggers the card expects for the loaded acquisition.
    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Index of the newest point already handed out, -1 when none.
    pub fn last_index_read(&self) -> i64 {
        self.last_index_read
    }

    /// Whether the last read produced new data.
    pub fn has_new_data(&self) -> bool {
        self.new_data
    }

    /// Controller properties.
    pub fn config(&self) -> &AdlinkConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAiDevice;
    use tracing_test::traced_test;

    async fn controller(mock: Arc<MockAiDevice>) -> AdlinkAiController {
        let mut ctrl = AdlinkAiController::new(AdlinkConfig::new("mock/ai/1"), mock)
            .await
            .unwrap();
        for axis in 1..=3 {
            ctrl.add_device(axis).unwrap();
        }
        ctrl
    }

    #[tokio::test]
    async fn test_old_device_server_is_rejected() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/old").with_commands(&["Start", "Stop"]));
        let err = AdlinkAiController::new(AdlinkConfig::new("mock/ai/old"), mock)
            .await
            .unwrap_err();
        assert!(matches!(err, AdlinkError::DeviceServerTooOld { .. }));
        assert!(err.to_string().contains("upgrade"));
    }

    #[tokio::test]
    async fn test_sample_rate_is_applied() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut config = AdlinkConfig::new("mock/ai/1");
        config.sample_rate = Some(20_000.0);
        AdlinkAiController::new(config, mock.clone()).await.unwrap();
        assert_eq!(mock.sample_rate().await.unwrap(), 20_000.0);
    }

    #[tokio::test]
    async fn test_axis_bounds() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;
        assert!(matches!(
            ctrl.add_device(0),
            Err(AdlinkError::InvalidAxis { axis: 0, .. })
        ));
        assert!(ctrl.add_device(MAX_DEVICE + 1).is_err());
        assert!(ctrl.add_device(MAX_DEVICE).is_ok());
        assert_eq!(ctrl.axes(), vec![1, 2, 3, 5]);

        ctrl.delete_device(5).await.unwrap();
        assert!(matches!(
            ctrl.delete_device(5).await,
            Err(AdlinkError::UnknownAxis(5))
        ));
    }

    #[tokio::test]
    async fn test_pre_start_ignores_timer() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;
        assert!(ctrl.pre_start_one(TIMER_AXIS).unwrap());
        assert_eq!(ctrl.master_channel, None);
        assert!(ctrl.pre_start_one(3).unwrap());
        assert_eq!(ctrl.master_channel, Some(3));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_operations_log_entry_and_exit() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;

        assert!(ctrl.pre_start_one(3).unwrap());
        assert!(logs_contain("pre_start_one{axis=3}"));
        assert!(logs_contain("return=true"));

        ctrl.state_all().await.unwrap();
        assert!(logs_contain("state_all"));

        assert!(ctrl.state_one(4).is_err());
        assert!(logs_contain("state_one{axis=4}"));
        assert!(logs_contain("Axis 4 is not defined on this controller"));
    }

    #[tokio::test]
    async fn test_load_requires_supported_synchronization() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;

        let err = ctrl.load_one(1, 0.1, 1, 0.0).await.unwrap_err();
        assert!(matches!(err.root(), AdlinkError::SynchronizationNotSet));

        ctrl.set_synchronization(AcqSynch::HardwareGate);
        let err = ctrl.load_one(1, 0.1, 1, 0.0).await.unwrap_err();
        assert!(err.to_string().starts_with("LoadOne: Unable to configure the device"));
        assert!(matches!(
            err.root(),
            AdlinkError::UnsupportedSynchronization(AcqSynch::HardwareGate)
        ));
    }

    #[tokio::test]
    async fn test_software_integration_must_exceed_start_wait() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;
        ctrl.set_synchronization(AcqSynch::SoftwareTrigger);
        let err = ctrl.load_one(1, 0.05, 1, 0.0).await.unwrap_err();
        assert!(matches!(err.root(), AdlinkError::IntegrationTooShort { .. }));
        assert!(ctrl.load_one(1, 0.051, 1, 0.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_hardware_load_uses_points_per_step() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1").with_sample_rate(1000.0));
        let mut ctrl = controller(mock.clone()).await;
        ctrl.set_synchronization(AcqSynch::HardwareTrigger);

        ctrl.load_one(1, 0.5, 7, 0.0).await.unwrap();
        let trigger = mock.trigger_config().unwrap();
        assert_eq!(trigger.source, TriggerSource::ExternalDigitalRising);
        assert_eq!(trigger.num_triggers, 7);
        assert_eq!(trigger.samples_per_trigger, 500);
        assert!(!trigger.infinite);

        ctrl.set_par("PointsPerTrigger", json!(4)).unwrap();
        ctrl.load_one(1, 0.5, 7, 0.0).await.unwrap();
        assert_eq!(mock.trigger_config().unwrap().num_triggers, 4);
        assert_eq!(ctrl.repetitions(), 4);
    }

    #[tokio::test]
    async fn test_start_all_hardware_needs_master() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;
        ctrl.set_synchronization(AcqSynch::HardwareTrigger);
        ctrl.load_one(1, 0.01, 2, 0.0).await.unwrap();
        let err = ctrl.start_all().await.unwrap_err();
        assert!(matches!(err.root(), AdlinkError::NoMasterChannel));
    }

    #[tokio::test]
    async fn test_extra_parameters() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;

        assert_eq!(ctrl.get_axis_extra_par(2, "SD").unwrap(), json!(0.0));
        assert_eq!(ctrl.get_axis_extra_par(2, "Formula").unwrap(), json!("value"));
        assert_eq!(ctrl.get_axis_extra_par(2, "sharedFormula").unwrap(), json!(false));
        assert!(matches!(
            ctrl.set_axis_extra_par(2, "sd", json!(1.0)),
            Err(AdlinkError::ReadOnlyParameter(_))
        ));
        assert!(matches!(
            ctrl.get_axis_extra_par(2, "gain"),
            Err(AdlinkError::UnknownParameter(_))
        ));

        ctrl.set_axis_extra_par(2, "FORMULA", json!("VALUE * 2.0")).unwrap();
        assert_eq!(ctrl.get_axis_extra_par(2, "formula").unwrap(), json!("value * 2.0"));
        assert_eq!(ctrl.get_axis_extra_par(3, "formula").unwrap(), json!("value"));

        ctrl.set_axis_extra_par(2, "SharedFormula", json!(true)).unwrap();
        for axis in [1, 3] {
            assert_eq!(
                ctrl.get_axis_extra_par(axis, "formula").unwrap(),
                json!("value * 2.0")
            );
        }
        assert!(ctrl.set_axis_extra_par(2, "formula", json!(3)).is_err());
    }

    #[tokio::test]
    async fn test_controller_parameters() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let mut ctrl = controller(mock).await;

        assert_eq!(ctrl.get_par("PointsPerStep").unwrap(), json!(1));
        ctrl.set_par("pointsperstep", json!(10)).unwrap();
        assert_eq!(ctrl.get_par("PointsPerTrigger").unwrap(), json!(10));
        assert!(ctrl.set_par("PointsPerStep", json!(0)).is_err());
        assert!(ctrl.set_par("PointsPerStep", json!(-3)).is_err());

        assert_eq!(ctrl.get_par("Synchronization").unwrap(), Value::Null);
        ctrl.set_par("Synchronization", json!(0)).unwrap();
        assert_eq!(ctrl.synchronization(), Some(AcqSynch::SoftwareTrigger));
        assert_eq!(ctrl.get_par("synchronization").unwrap(), json!("software_trigger"));

        assert_eq!(ctrl.get_par("LatencyTime").unwrap(), json!(1e-6));
        assert!(matches!(
            ctrl.set_par("LatencyTime", json!(1.0)),
            Err(AdlinkError::ReadOnlyParameter(_))
        ));
        assert!(ctrl.get_par("Gain").is_err());
    }

    #[tokio::test]
    async fn test_read_one_without_synchronization() {
        let mock = Arc::new(MockAiDevice::new("mock/ai/1"));
        let ctrl = controller(mock).await;
        assert!(matches!(
            ctrl.read_one(2),
            Err(AdlinkError::SynchronizationNotSet)
        ));
    }
}
