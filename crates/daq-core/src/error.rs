//! Custom error types shared by the acquisition crates.
//!
//! `DaqError` is the error every driver crate converts into at its public
//! boundary. Driver-specific failures are wrapped in [`DriverError`], which
//! carries a [`DriverErrorKind`] so callers can decide between retrying,
//! reconfiguring, or aborting without matching on driver internals.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps `figment::Error` raised while loading TOML files or
//!   environment overrides.
//! - **`Configuration`**: Semantic validation failures (values that parse but
//!   make no sense, e.g. `points_per_step = 0`).
//! - **`Driver`**: A classified error coming from a hardware driver.
//! - **`Parameter*`**: Failures raised by observable parameters.

use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Coarse classification of driver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Driver could not be created or connected
    Initialization,
    /// Configuration rejected by the driver
    Configuration,
    /// Transport or protocol failure
    Communication,
    /// Failure while stopping or releasing the device
    Shutdown,
    /// Device reported a fault
    Hardware,
    /// Device did not answer in time
    Timeout,
    /// Access denied
    Permission,
    /// Parameter name or value rejected
    InvalidParameter,
    /// Unclassified
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::Permission => "permission",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a specific driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Registry name of the driver (e.g. `adlink_ai`)
    pub driver_type: String,
    /// Failure classification
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Create a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DriverErrorKind::Communication | DriverErrorKind::Timeout
        )
    }
}

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for the acquisition stack.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`
///    - Raised at startup or when a driver is (re)built
///    - Recovery: fix the configuration and rebuild the driver
///
/// 2. **Hardware/Communication Errors** - `Driver`
///    - Raised while talking to the device server
///    - Recovery: check [`DriverError::is_transient`], retry or abort the scan
///
/// 3. **Parameter Errors** - `ParameterReadOnly`, `ParameterInvalid`
///    - Raised when a caller writes a parameter it may not change
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration validation failed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use daq_core::error::DaqError;
    ///
    /// fn validate_points(points_per_step: u32) -> Result<(), DaqError> {
    ///     if points_per_step == 0 {
    ///         return Err(DaqError::Configuration(
    ///             "points_per_step must be at least 1".into()
    ///         ));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Classified driver failure.
    #[error("{0}")]
    Driver(DriverError),

    /// Attempted to write a read-only parameter.
    #[error("Parameter '{0}' is read-only")]
    ParameterReadOnly(String),

    /// Value rejected by a parameter validator.
    #[error("Invalid value for parameter '{name}': {reason}")]
    ParameterInvalid { name: String, reason: String },
}

impl From<DriverError> for DaqError {
    fn from(err: DriverError) -> Self {
        DaqError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Configuration("points_per_step must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: points_per_step must be at least 1"
        );
    }

    #[test]
    fn test_driver_error_display() {
        let err = DaqError::Driver(DriverError::new(
            "adlink_ai",
            DriverErrorKind::Initialization,
            "device server too old",
        ));
        assert!(err
            .to_string()
            .contains("Driver 'adlink_ai' initialization error"));
    }

    #[test]
    fn test_transient_kinds() {
        let timeout = DriverError::new("adlink_ai", DriverErrorKind::Timeout, "stop");
        let config = DriverError::new("adlink_ai", DriverErrorKind::Configuration, "bad");
        assert!(timeout.is_transient());
        assert!(!config.is_transient());
    }

    #[test]
    fn test_parameter_errors() {
        let err = DaqError::ParameterInvalid {
            name: "points_per_step".into(),
            reason: "must be >= 1".into(),
        };
        assert!(err.to_string().contains("points_per_step"));
        assert_eq!(
            DaqError::ParameterReadOnly("sd".into()).to_string(),
            "Parameter 'sd' is read-only"
        );
    }
}
