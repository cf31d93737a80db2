//! Analog-input device server abstraction.
//!
//! The ADLINK card is not driven directly: a device server owns the board and
//! exposes commands (`Start`, `Stop`, `ClearBuffer`), configuration
//! attributes (`TriggerSources`, `NumOfTriggers`, ...), per-channel statistics
//! (`C00_MeanLast`, `C00_StdDevLast`) and a buffered per-trigger history
//! (`C00_MeanValues`) that emits data-ready events.
//!
//! [`AiDevice`] is the client-side view of that server. The controller only
//! talks to hardware through this trait, so tests and the demo binary run
//! against [`crate::mock::MockAiDevice`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Command that newer device servers expose and the controller depends on.
pub const CLEAR_BUFFER_COMMAND: &str = "ClearBuffer";

/// Attribute suffix of the last-trigger mean.
pub const MEAN_LAST: &str = "MeanLast";
/// Attribute suffix of the last-trigger standard deviation.
pub const STD_DEV_LAST: &str = "StdDevLast";
/// Attribute suffix of the buffered per-trigger means.
pub const MEAN_VALUES: &str = "MeanValues";

/// Build the device-server attribute name for an AI channel, e.g. `C02_MeanLast`.
pub fn channel_attribute(channel: u32, suffix: &str) -> String {
    format!("C{:02}_{}", channel, suffix)
}

/// State reported by the device server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HwState {
    /// Ready, acquisition finished
    On,
    /// Switched off
    Off,
    /// Closed
    Close,
    /// Open
    Open,
    /// Inserted
    Insert,
    /// Extracted
    Extract,
    /// Moving
    Moving,
    /// Idle, no acquisition configured or after `Stop`
    Standby,
    /// Device fault
    Fault,
    /// Initializing
    Init,
    /// Acquiring
    Running,
    /// Alarm raised
    Alarm,
    /// Disabled
    Disable,
    /// State could not be determined
    Unknown,
}

impl fmt::Display for HwState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Close => "CLOSE",
            Self::Open => "OPEN",
            Self::Insert => "INSERT",
            Self::Extract => "EXTRACT",
            Self::Moving => "MOVING",
            Self::Standby => "STANDBY",
            Self::Fault => "FAULT",
            Self::Init => "INIT",
            Self::Running => "RUNNING",
            Self::Alarm => "ALARM",
            Self::Disable => "DISABLE",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

/// Trigger input used to start each acquisition on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Acquisition starts with the `Start` command
    Software,
    /// Rising edge on the external digital trigger input
    ExternalDigitalRising,
}

impl TriggerSource {
    /// Value written to the `TriggerSources` attribute.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Software => "SOFT",
            Self::ExternalDigitalRising => "ExtD:+",
        }
    }

    /// Parse a `TriggerSources` attribute value.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "SOFT" => Some(Self::Software),
            "ExtD:+" => Some(Self::ExternalDigitalRising),
            _ => None,
        }
    }
}

/// Trigger-related attributes written before every acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// `TriggerInfinite`: keep acquiring until stopped
    pub infinite: bool,
    /// `TriggerSources`
    pub source: TriggerSource,
    /// `NumOfTriggers`: triggers accepted before the card returns to ON
    pub num_triggers: u32,
    /// `ChannelSamplesPerTrigger`: samples averaged into one point
    pub samples_per_trigger: u64,
}

/// Handle identifying an event subscription on the device server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Error payload of a failed event delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventError {
    /// Error reason, e.g. `API_EventTimeout`
    pub reason: String,
    /// Server-side description
    pub description: String,
}

/// Data-ready event pushed when the buffered attribute gains a new point.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReadyEvent {
    /// Number of points available so far (1-based)
    pub counter: u64,
    /// Set when the server failed to deliver the event
    pub error: Option<EventError>,
}

impl DataReadyEvent {
    /// Successful event for the given counter.
    pub fn ready(counter: u64) -> Self {
        Self {
            counter,
            error: None,
        }
    }

    /// Failed event.
    pub fn failed(reason: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            counter: 0,
            error: Some(EventError {
                reason: reason.into(),
                description: description.into(),
            }),
        }
    }

    /// Zero-based index of the newest point, `None` for error events.
    pub fn index(&self) -> Option<i64> {
        match self.error {
            None => Some(self.counter as i64 - 1),
            Some(_) => None,
        }
    }
}

/// Receiving half of a data-ready subscription.
pub type DataReadyReceiver = mpsc::UnboundedReceiver<DataReadyEvent>;

/// Client view of the analog-input device server.
///
/// AI channel numbers are zero-based and refer to the card inputs, not to
/// controller axes.
#[async_trait]
pub trait AiDevice: Send + Sync {
    /// Device server name, used in logs and errors.
    fn name(&self) -> &str;

    /// Names of the commands the server supports.
    async fn commands(&self) -> Result<Vec<String>>;

    /// Current server state.
    async fn state(&self) -> Result<HwState>;

    /// `Start` command.
    async fn start(&self) -> Result<()>;

    /// `Stop` command.
    async fn stop(&self) -> Result<()>;

    /// `ClearBuffer` command; drops buffered per-trigger data.
    async fn clear_buffer(&self) -> Result<()>;

    /// Client-side timeout applied to subsequent calls.
    async fn set_timeout(&self, timeout: Duration) -> Result<()>;

    /// `SampleRate` attribute in Hz.
    async fn sample_rate(&self) -> Result<f64>;

    /// Write the `SampleRate` attribute.
    async fn set_sample_rate(&self, rate: f64) -> Result<()>;

    /// Write the trigger configuration attributes.
    async fn configure_triggers(&self, config: &TriggerConfig) -> Result<()>;

    /// `C0n_MeanLast`: mean of the last acquired point.
    async fn mean_last(&self, channel: u32) -> Result<f64>;

    /// `C0n_StdDevLast`: standard deviation of the last acquired point.
    async fn std_dev_last(&self, channel: u32) -> Result<f64>;

    /// Buffered means of `C0n_MeanValues` for the inclusive index range.
    async fn mean_values(&self, channel: u32, first: u64, last: u64) -> Result<Vec<f64>>;

    /// Subscribe to data-ready events of `C0n_MeanValues`.
    async fn subscribe_data_ready(&self, channel: u32)
        -> Result<(SubscriptionId, DataReadyReceiver)>;

    /// Cancel a subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
