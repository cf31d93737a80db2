//! Simulated ADLINK AI device server.
//!
//! The mock follows the card's state machine closely enough to exercise the
//! controller end to end:
//!
//! - STANDBY after `Stop`, RUNNING while acquiring, ON when done
//! - software source: RUNNING until `ChannelSamplesPerTrigger / SampleRate`
//!   seconds have elapsed on the tokio clock, then ON with a fresh point
//! - external source: one point per [`MockAiDevice::fire_trigger`], a
//!   data-ready event per point, ON after `NumOfTriggers` points
//!
//! Point `k` of AI channel `ch` reads `0.5 + 0.1 * ch + 0.01 * k` with a
//! standard deviation of `0.001 * (ch + 1)`, so tests can predict values.
//!
//! Fault injection covers the start glitches seen on real servers (state
//! jumps to ON without passing through RUNNING), legacy servers without
//! `ClearBuffer`, and failed event deliveries.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::device::{
    channel_attribute, AiDevice, DataReadyEvent, DataReadyReceiver, HwState, SubscriptionId,
    TriggerConfig, TriggerSource, CLEAR_BUFFER_COMMAND, MEAN_VALUES,
};
use crate::error::{AdlinkError, Result};

/// Commands exposed by a current device server.
const DEFAULT_COMMANDS: [&str; 5] = ["Init", "State", "Start", "Stop", CLEAR_BUFFER_COMMAND];

struct Subscription {
    id: SubscriptionId,
    channel: u32,
    sender: mpsc::UnboundedSender<DataReadyEvent>,
}

struct MockState {
    commands: Vec<String>,
    state: HwState,
    n_channels: u32,
    sample_rate: f64,
    trigger: Option<TriggerConfig>,
    timeout: Duration,
    timeout_history: Vec<Duration>,
    software_deadline: Option<Instant>,
    points: u64,
    failing_starts: u32,
    start_count: u32,
    stop_count: u32,
    clear_count: u32,
    subscriptions: Vec<Subscription>,
    next_subscription: u64,
}

impl MockState {
    /// Complete a software acquisition whose integration time has elapsed.
    fn advance(&mut self) {
        if let Some(deadline) = self.software_deadline {
            if self.state == HwState::Running && Instant::now() >= deadline {
                self.software_deadline = None;
                self.points += 1;
                self.state = HwState::On;
                debug!(points = self.points, "Mock software acquisition finished");
            }
        }
    }

    fn check_channel(&self, device: &str, channel: u32) -> Result<()> {
        if channel >= self.n_channels {
            return Err(AdlinkError::Communication {
                device: device.to_string(),
                message: format!(
                    "channel {} out of range (card has {} channels)",
                    channel, self.n_channels
                ),
            });
        }
        Ok(())
    }
}

/// Deterministic in-memory AI device server.
pub struct MockAiDevice {
    name: String,
    inner: Mutex<MockState>,
}

impl MockAiDevice {
    /// Four-channel card at 100 kHz, in STANDBY.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MockState {
                commands: DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect(),
                state: HwState::Standby,
                n_channels: 4,
                sample_rate: 100_000.0,
                trigger: None,
                timeout: Duration::from_secs(3),
                timeout_history: Vec::new(),
                software_deadline: None,
                points: 0,
                failing_starts: 0,
                start_count: 0,
                stop_count: 0,
                clear_count: 0,
                subscriptions: Vec::new(),
                next_subscription: 1,
            }),
        }
    }

    /// Number of AI channels on the card.
    pub fn with_channels(self, n_channels: u32) -> Self {
        self.inner.lock().n_channels = n_channels;
        self
    }

    /// Initial `SampleRate` (Hz).
    pub fn with_sample_rate(self, rate: f64) -> Self {
        self.inner.lock().sample_rate = rate;
        self
    }

    /// Replace the command list, e.g. to emulate a legacy server.
    pub fn with_commands(self, commands: &[&str]) -> Self {
        self.inner.lock().commands = commands.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Make the next `count` starts jump to ON without acquiring.
    pub fn fail_next_starts(&self, count: u32) {
        self.inner.lock().failing_starts = count;
    }

    /// Signal value of a point.
    pub fn signal(channel: u32, point: u64) -> f64 {
        0.5 + 0.1 * channel as f64 + 0.01 * point as f64
    }

    /// Standard deviation reported for a channel.
    pub fn noise(channel: u32) -> f64 {
        0.001 * (channel as f64 + 1.0)
    }

    /// Deliver one external trigger pulse.
    ///
    /// Returns the index of the acquired point.
    pub fn fire_trigger(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let armed = inner.state == HwState::Running
            && matches!(
                inner.trigger.as_ref().map(|t| t.source),
                Some(TriggerSource::ExternalDigitalRising)
            );
        if !armed {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: format!("trigger ignored in state {}", inner.state),
            });
        }

        let index = inner.points;
        inner.points += 1;
        let counter = inner.points;
        inner
            .subscriptions
            .retain(|sub| sub.sender.send(DataReadyEvent::ready(counter)).is_ok());

        let expected = inner.trigger.as_ref().map_or(1, |t| t.num_triggers as u64);
        let infinite = inner.trigger.as_ref().is_some_and(|t| t.infinite);
        if !infinite && counter >= expected {
            inner.state = HwState::On;
        }
        debug!(index, counter, "Mock external trigger");
        Ok(index)
    }

    /// Push a failed event to every subscriber.
    pub fn inject_event_error(&self, reason: &str, description: &str) {
        let mut inner = self.inner.lock();
        inner
            .subscriptions
            .retain(|sub| sub.sender.send(DataReadyEvent::failed(reason, description)).is_ok());
    }

    /// Every timeout set by the client, in order.
    pub fn timeout_history(&self) -> Vec<Duration> {
        self.inner.lock().timeout_history.clone()
    }

    /// Timeout currently in effect.
    pub fn current_timeout(&self) -> Duration {
        self.inner.lock().timeout
    }

    /// `Start` calls received.
    pub fn start_count(&self) -> u32 {
        self.inner.lock().start_count
    }

    /// `Stop` calls received.
    pub fn stop_count(&self) -> u32 {
        self.inner.lock().stop_count
    }

    /// Successful `ClearBuffer` calls.
    pub fn clear_count(&self) -> u32 {
        self.inner.lock().clear_count
    }

    /// Last written trigger configuration.
    pub fn trigger_config(&self) -> Option<TriggerConfig> {
        self.inner.lock().trigger.clone()
    }

    /// Points stored in the buffer.
    pub fn points(&self) -> u64 {
        self.inner.lock().points
    }

    /// Active data-ready subscriptions as `(id, channel)`.
    pub fn subscriptions(&self) -> Vec<(SubscriptionId, u32)> {
        self.inner
            .lock()
            .subscriptions
            .iter()
            .map(|s| (s.id, s.channel))
            .collect()
    }
}

impl std::fmt::Debug for MockAiDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MockAiDevice")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("points", &inner.points)
            .finish()
    }
}

#[async_trait]
impl AiDevice for MockAiDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn commands(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().commands.clone())
    }

    async fn state(&self) -> Result<HwState> {
        let mut inner = self.inner.lock();
        inner.advance();
        Ok(inner.state)
    }

    async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.advance();
        inner.start_count += 1;

        if inner.state == HwState::Running {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: "acquisition already running".to_string(),
            });
        }
        let Some(trigger) = inner.trigger.clone() else {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: "trigger configuration missing".to_string(),
            });
        };

        if inner.failing_starts > 0 {
            inner.failing_starts -= 1;
            inner.state = HwState::On;
            debug!("Mock start glitch: ON without RUNNING");
            return Ok(());
        }

        inner.state = HwState::Running;
        if trigger.source == TriggerSource::Software {
            let seconds = trigger.samples_per_trigger as f64 / inner.sample_rate;
            inner.software_deadline = Some(Instant::now() + Duration::from_secs_f64(seconds));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.stop_count += 1;
        inner.software_deadline = None;
        inner.state = HwState::Standby;
        Ok(())
    }

    async fn clear_buffer(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.commands.iter().any(|c| c == CLEAR_BUFFER_COMMAND) {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: format!("command {} not found", CLEAR_BUFFER_COMMAND),
            });
        }
        inner.clear_count += 1;
        inner.points = 0;
        Ok(())
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.timeout = timeout;
        inner.timeout_history.push(timeout);
        Ok(())
    }

    async fn sample_rate(&self) -> Result<f64> {
        Ok(self.inner.lock().sample_rate)
    }

    async fn set_sample_rate(&self, rate: f64) -> Result<()> {
        self.inner.lock().sample_rate = rate;
        Ok(())
    }

    async fn configure_triggers(&self, config: &TriggerConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.advance();
        if inner.state == HwState::Running {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: "cannot write trigger attributes while running".to_string(),
            });
        }
        inner.trigger = Some(config.clone());
        Ok(())
    }

    async fn mean_last(&self, channel: u32) -> Result<f64> {
        let mut inner = self.inner.lock();
        inner.advance();
        inner.check_channel(&self.name, channel)?;
        match inner.points {
            0 => Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: "no data acquired".to_string(),
            }),
            n => Ok(Self::signal(channel, n - 1)),
        }
    }

    async fn std_dev_last(&self, channel: u32) -> Result<f64> {
        let inner = self.inner.lock();
        inner.check_channel(&self.name, channel)?;
        Ok(Self::noise(channel))
    }

    async fn mean_values(&self, channel: u32, first: u64, last: u64) -> Result<Vec<f64>> {
        let inner = self.inner.lock();
        inner.check_channel(&self.name, channel)?;
        if first > last || last >= inner.points {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: format!(
                    "index range [{}, {}] outside buffer of {} points",
                    first, last, inner.points
                ),
            });
        }
        Ok((first..=last).map(|k| Self::signal(channel, k)).collect())
    }

    async fn subscribe_data_ready(
        &self,
        channel: u32,
    ) -> Result<(SubscriptionId, DataReadyReceiver)> {
        let mut inner = self.inner.lock();
        inner.check_channel(&self.name, channel)?;
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.subscriptions.push(Subscription {
            id,
            channel,
            sender,
        });
        debug!(
            attribute = %channel_attribute(channel, MEAN_VALUES),
            id = id.0,
            "Mock data-ready subscription"
        );
        Ok((id, receiver))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        if inner.subscriptions.len() == before {
            return Err(AdlinkError::Communication {
                device: self.name.clone(),
                message: format!("unknown subscription {}", id.0),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn software(samples: u64) -> TriggerConfig {
        TriggerConfig {
            infinite: false,
            source: TriggerSource::Software,
            num_triggers: 1,
            samples_per_trigger: samples,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_software_acquisition_completes_after_integration() {
        let device = MockAiDevice::new("mock/ai/1").with_sample_rate(1000.0);
        device.configure_triggers(&software(100)).await.unwrap();
        device.start().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Running);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(device.state().await.unwrap(), HwState::Running);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(device.state().await.unwrap(), HwState::On);
        assert_eq!(device.mean_last(1).await.unwrap(), MockAiDevice::signal(1, 0));
    }

    #[tokio::test]
    async fn test_external_triggers_emit_events() {
        let device = MockAiDevice::new("mock/ai/1");
        device
            .configure_triggers(&TriggerConfig {
                infinite: false,
                source: TriggerSource::ExternalDigitalRising,
                num_triggers: 2,
                samples_per_trigger: 10,
            })
            .await
            .unwrap();
        let (_id, mut rx) = device.subscribe_data_ready(0).await.unwrap();

        assert!(device.fire_trigger().is_err(), "not started yet");
        device.start().await.unwrap();
        assert_eq!(device.fire_trigger().unwrap(), 0);
        assert_eq!(device.fire_trigger().unwrap(), 1);
        assert_eq!(device.state().await.unwrap(), HwState::On);

        assert_eq!(rx.recv().await.unwrap().counter, 1);
        assert_eq!(rx.recv().await.unwrap().counter, 2);
        assert_eq!(
            device.mean_values(2, 0, 1).await.unwrap(),
            vec![MockAiDevice::signal(2, 0), MockAiDevice::signal(2, 1)]
        );
        assert!(device.mean_values(2, 0, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_start_glitch_and_recovery() {
        let device = MockAiDevice::new("mock/ai/1");
        device.configure_triggers(&software(10_000)).await.unwrap();
        device.fail_next_starts(1);

        device.start().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::On);
        device.stop().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Standby);
        device.start().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Running);
        assert_eq!(device.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_lifecycle() {
        let device = MockAiDevice::new("mock/ai/1").with_sample_rate(1000.0);
        assert_eq!(device.state().await.unwrap(), HwState::Standby);

        device.configure_triggers(&software(10)).await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Standby);

        device.start().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Running);
        device.stop().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Standby);

        device.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(device.state().await.unwrap(), HwState::On);
        device.stop().await.unwrap();
        assert_eq!(device.state().await.unwrap(), HwState::Standby);
        assert_eq!(device.stop_count(), 2);
    }

    #[tokio::test]
    async fn test_legacy_server_has_no_clear_buffer() {
        let device = MockAiDevice::new("mock/ai/old").with_commands(&["Init", "Start", "Stop"]);
        assert!(device.clear_buffer().await.is_err());
        assert!(!device
            .commands()
            .await
            .unwrap()
            .iter()
            .any(|c| c == CLEAR_BUFFER_COMMAND));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_id() {
        let device = MockAiDevice::new("mock/ai/1");
        let (id, _rx) = device.subscribe_data_ready(0).await.unwrap();
        device.unsubscribe(id).await.unwrap();
        assert!(device.unsubscribe(id).await.is_err());
        assert!(device.subscribe_data_ready(9).await.is_err());
    }
}
