//! `daq-core`
//!
//! Core trait definitions and types shared by the acquisition drivers.
//!
//! ## Key Types
//!
//! - [`error::DaqError`]: Application-wide error type with driver classification
//! - [`capabilities`]: Capability traits (`Triggerable`, `Stageable`, ...)
//! - [`observable::Observable`]: Watchable parameter values
//! - [`driver::DriverFactory`]: TOML-driven driver instantiation

pub mod capabilities;
pub mod driver;
pub mod error;
pub mod observable;

// Re-export commonly used types
pub use anyhow::{anyhow, Result};
pub use error::{AppResult, DaqError, DriverError, DriverErrorKind};
