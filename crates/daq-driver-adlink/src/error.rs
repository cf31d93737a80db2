//! Error types for the ADLINK AI controller.
//!
//! Every public controller operation wraps failures in
//! [`AdlinkError::Operation`] so the scan engine sees which step failed
//! (`LoadOne: Unable to configure the device: ...`) while the root cause
//! remains available through [`std::error::Error::source`].

use daq_core::error::{DaqError, DriverError, DriverErrorKind};
use thiserror::Error;

use crate::device::HwState;
use crate::synchronization::AcqSynch;

/// Driver type used when converting into [`DaqError`].
pub const DRIVER_TYPE: &str = "adlink_ai";

/// Result type alias for controller operations.
pub type Result<T> = std::result::Result<T, AdlinkError>;

/// Errors raised by the controller and the device abstraction.
#[derive(Error, Debug)]
pub enum AdlinkError {
    /// The device server lacks a command this controller relies on
    #[error(
        "Device server '{device}' is too old for this controller (missing command '{command}'). Please upgrade the device server"
    )]
    DeviceServerTooOld {
        /// Device server name
        device: String,
        /// Missing command
        command: String,
    },

    /// A call to the device server failed
    #[error("Communication with '{device}' failed: {message}")]
    Communication {
        /// Device server name
        device: String,
        /// Failure detail
        message: String,
    },

    /// A call to the device server did not answer in time
    #[error("Call '{call}' on '{device}' timed out")]
    Timeout {
        /// Device server name
        device: String,
        /// Command or attribute access that timed out
        call: String,
    },

    /// Software-synchronized integration must outlast the start wait
    #[error(
        "It is not possible to integrate less than {minimum} s in software synchronization (requested {requested} s)"
    )]
    IntegrationTooShort {
        /// Requested integration time (s)
        requested: f64,
        /// Start wait that must be exceeded (s)
        minimum: f64,
    },

    /// The card only supports software and hardware triggering
    #[error("Adlink daq2005 allows only software or hardware triggering, not {0}")]
    UnsupportedSynchronization(AcqSynch),

    /// No synchronization mode was configured before loading
    #[error("Unknown synchronization mode: none was configured")]
    SynchronizationNotSet,

    /// `Start` never brought the card into RUNNING
    #[error("Could not start acquisition after {attempts} attempts (device state {state})")]
    StartFailed {
        /// Start attempts made
        attempts: u32,
        /// Card state after the last attempt
        state: HwState,
    },

    /// Hardware synchronization needs an analog channel to listen on
    #[error("No analog channel was pre-started; hardware synchronization needs a master channel")]
    NoMasterChannel,

    /// A software-synchronized read found no fresh data
    #[error("Acquisition did not finish correctly. Adlink state {0}")]
    AcquisitionIncomplete(HwState),

    /// Axis outside the controller's range
    #[error("Invalid axis {axis}: controller supports axes 1..={max}")]
    InvalidAxis {
        /// Requested axis
        axis: u32,
        /// Highest valid axis
        max: u32,
    },

    /// Axis in range but never added
    #[error("Axis {0} is not defined on this controller")]
    UnknownAxis(u32),

    /// Unknown controller or axis parameter name
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// Parameter exists but cannot be written
    #[error("Parameter '{0}' is read-only")]
    ReadOnlyParameter(String),

    /// Parameter value rejected
    #[error("Invalid value for '{name}': {message}")]
    InvalidValue {
        /// Parameter name
        name: String,
        /// Why the value was rejected
        message: String,
    },

    /// Formula failed to compile or evaluate
    #[error("Formula '{formula}' failed: {message}")]
    Formula {
        /// Formula source
        formula: String,
        /// Compiler or evaluation error
        message: String,
    },

    /// Configuration rejected during validation
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong
        message: String,
    },

    /// Failure of a named controller operation
    #[error("{operation}: {source}")]
    Operation {
        /// Operation name and failure summary
        operation: &'static str,
        /// Underlying error
        #[source]
        source: Box<AdlinkError>,
    },
}

impl AdlinkError {
    /// Root cause, skipping operation wrappers.
    pub fn root(&self) -> &AdlinkError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classification used when converting into [`DaqError`].
    pub fn kind(&self) -> DriverErrorKind {
        match self.root() {
            Self::DeviceServerTooOld { .. } => DriverErrorKind::Initialization,
            Self::Communication { .. } => DriverErrorKind::Communication,
            Self::Timeout { .. } => DriverErrorKind::Timeout,
            Self::StartFailed { .. } | Self::AcquisitionIncomplete(_) => DriverErrorKind::Hardware,
            Self::IntegrationTooShort { .. }
            | Self::UnsupportedSynchronization(_)
            | Self::SynchronizationNotSet
            | Self::NoMasterChannel
            | Self::InvalidConfig { .. } => DriverErrorKind::Configuration,
            Self::InvalidAxis { .. }
            | Self::UnknownAxis(_)
            | Self::UnknownParameter(_)
            | Self::ReadOnlyParameter(_)
            | Self::InvalidValue { .. }
            | Self::Formula { .. } => DriverErrorKind::InvalidParameter,
            Self::Operation { .. } => DriverErrorKind::Unknown,
        }
    }
}

/// Attach the failing operation to an error.
pub trait OperationContext<T> {
    /// Wrap the error as [`AdlinkError::Operation`].
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> OperationContext<T> for Result<T> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| AdlinkError::Operation {
            operation,
            source: Box::new(source),
        })
    }
}

impl From<AdlinkError> for DaqError {
    fn from(err: AdlinkError) -> Self {
        DaqError::Driver(DriverError::new(DRIVER_TYPE, err.kind(), err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_context_display() {
        let err: Result<()> = Err(AdlinkError::NoMasterChannel);
        let err = err
            .during("StartAll: Unable to start acquisition on the device")
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("StartAll: Unable to start acquisition on the device: "));
        assert!(text.contains("master channel"));
        assert!(matches!(err.root(), AdlinkError::NoMasterChannel));
    }

    #[test]
    fn test_kind_looks_through_operations() {
        let err: Result<()> = Err(AdlinkError::Timeout {
            device: "ai/1".into(),
            call: "Stop".into(),
        });
        let err = err.during("AbortOne: Unable to stop the device").unwrap_err();
        assert_eq!(err.kind(), DriverErrorKind::Timeout);
    }

    #[test]
    fn test_into_daq_error() {
        let err = AdlinkError::IntegrationTooShort {
            requested: 0.01,
            minimum: 0.05,
        };
        let daq: DaqError = err.into();
        match daq {
            DaqError::Driver(driver) => {
                assert_eq!(driver.driver_type, DRIVER_TYPE);
                assert_eq!(driver.kind, DriverErrorKind::Configuration);
                assert!(driver.message.contains("0.05"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
