//! Acquisition synchronization modes.
//!
//! The scan engine tells the controller how acquisitions are paced. The
//! ADLINK card only supports the two trigger flavours: one software trigger
//! per step (step scans) or a train of external hardware triggers
//! (continuous scans). Gate and start modes are rejected at load time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdlinkError, Result};

/// How acquisitions are synchronized with the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcqSynch {
    /// One software-started acquisition per step
    SoftwareTrigger,
    /// One point per external trigger pulse
    HardwareTrigger,
    /// Software gate (unsupported by the card)
    SoftwareGate,
    /// External gate (unsupported by the card)
    HardwareGate,
    /// Software start (unsupported by the card)
    SoftwareStart,
    /// External start (unsupported by the card)
    HardwareStart,
}

impl AcqSynch {
    /// All modes, in protocol order.
    pub const ALL: [AcqSynch; 6] = [
        Self::SoftwareTrigger,
        Self::HardwareTrigger,
        Self::SoftwareGate,
        Self::HardwareGate,
        Self::SoftwareStart,
        Self::HardwareStart,
    ];

    /// Whether the card can run in this mode.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::SoftwareTrigger | Self::HardwareTrigger)
    }

    /// Parse a mode from its protocol number or its name.
    ///
    /// Names are matched case-insensitively with or without separators, so
    /// `"HardwareTrigger"`, `"hardware_trigger"` and `1` are equivalent.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let invalid = || AdlinkError::InvalidValue {
            name: "synchronization".into(),
            message: format!("unknown synchronization mode {}", value),
        };
        match value {
            serde_json::Value::Number(n) => {
                let index = n.as_u64().ok_or_else(invalid)? as usize;
                Self::ALL.get(index).copied().ok_or_else(invalid)
            }
            serde_json::Value::String(s) => {
                let wanted: String = s
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_ascii_lowercase();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|mode| mode.to_string().to_ascii_lowercase() == wanted)
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for AcqSynch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SoftwareTrigger => "SoftwareTrigger",
            Self::HardwareTrigger => "HardwareTrigger",
            Self::SoftwareGate => "SoftwareGate",
            Self::HardwareGate => "HardwareGate",
            Self::SoftwareStart => "SoftwareStart",
            Self::HardwareStart => "HardwareStart",
        };
        write!(f, "{}", label)
    }
}
