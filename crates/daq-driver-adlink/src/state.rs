//! Controller-side state reported to the scan engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::HwState;

/// State of the controller as seen by the scan engine.
///
/// The card's RUNNING state is reported as `Moving` so the engine keeps
/// polling until the acquisition finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Idle and ready
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
    /// Acquisition in progress
    Moving,
    /// Stopped
    Standby,
    /// Device fault
    Fault,
    /// Initializing
    Init,
    /// Running
    Running,
    /// Alarm raised
    Alarm,
    /// Disabled
    Disable,
    /// Unknown
    Unknown,
}

impl State {
    /// Map a device-server state to the controller state and a status line.
    pub fn from_hw(hw: HwState) -> (Self, String) {
        match hw {
            HwState::Running => (Self::Moving, "The Adlink is acquiring".to_string()),
            HwState::On => (Self::On, "The Adlink is ready to acquire".to_string()),
            other => (
                Self::by_name(other),
                format!("The Adlink state is: {}", other),
            ),
        }
    }

    fn by_name(hw: HwState) -> Self {
        match hw {
            HwState::On => Self::On,
            HwState::Off => Self::Off,
            HwState::Close => Self::Close,
            HwState::Open => Self::Open,
            HwState::Insert => Self::Insert,
            HwState::Extract => Self::Extract,
            HwState::Moving => Self::Moving,
            HwState::Standby => Self::Standby,
            HwState::Fault => Self::Fault,
            HwState::Init => Self::Init,
            HwState::Running => Self::Running,
            HwState::Alarm => Self::Alarm,
            HwState::Disable => Self::Disable,
            HwState::Unknown => Self::Unknown,
        }
    }

    /// Whether an acquisition is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Moving | Self::Running)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
