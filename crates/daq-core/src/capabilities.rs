//! Capability traits for acquisition hardware.
//!
//! Drivers expose what they can do through small, composable traits instead
//! of one monolithic device interface. A registry stores each capability as a
//! separate trait object (see [`crate::driver::DeviceComponents`]), so generic
//! scan code asks for "something stageable" or "something triggerable" and
//! never downcasts.
//!
//! # Thread Safety
//! - All methods take `&self`; drivers use interior mutability for state
//! - All traits are `Send + Sync` so components can live behind `Arc`

use anyhow::Result;
use async_trait::async_trait;

use crate::observable::ParameterSet;

// =============================================================================
// Capability Traits
// =============================================================================

/// Capability: External Triggering
///
/// Devices that can be armed and triggered (detectors, acquisition cards).
///
/// # Contract
/// - `arm()` prepares device for trigger (may configure hardware buffers)
/// - `trigger()` initiates acquisition
/// - Calling `trigger()` on an unarmed device should return Err
/// - Devices that accept a single software trigger per arm must reject
///   further triggers until the acquisition completes
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Arm device for trigger
    ///
    /// # Returns
    /// - Ok(()) if armed successfully
    /// - Err if device is busy or in error state
    async fn arm(&self) -> Result<()>;

    /// Send software trigger
    ///
    /// # Returns
    /// - Ok(()) if trigger accepted
    /// - Err if not armed, already acquiring, or hardware error
    async fn trigger(&self) -> Result<()>;

    /// Check if device is currently armed
    ///
    /// # Default Implementation
    /// Returns an error indicating state query is not supported.
    async fn is_armed(&self) -> Result<bool> {
        anyhow::bail!("Armed state query not supported by this device")
    }
}

/// Capability: Staging (Bluesky pattern)
///
/// # Usage Pattern
/// ```rust,ignore
/// // Before scan
/// device.stage().await?;
///
/// for point in scan_points {
///     detector.trigger().await?;
/// }
///
/// // After scan
/// device.unstage().await?;
/// ```
#[async_trait]
pub trait Stageable: Send + Sync {
    /// Prepare device for an acquisition sequence.
    async fn stage(&self) -> Result<()>;

    /// Clean up after an acquisition sequence.
    async fn unstage(&self) -> Result<()>;

    /// Query staging state
    ///
    /// # Default Implementation
    /// Returns an error indicating state query is not supported.
    async fn is_staged(&self) -> Result<bool> {
        anyhow::bail!("Staged state query not supported by this device")
    }
}

/// Capability: Settable (Configurable Parameters)
///
/// # Contract
/// - Values are represented as `serde_json::Value` (f64, i64, bool, string).
/// - Methods take `&self` to allow use with `Arc<dyn Settable>`.
#[async_trait]
pub trait Settable: Send + Sync {
    /// Set a named parameter to a new value.
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Get the current value of a named parameter.
    async fn get_value(&self, name: &str) -> Result<serde_json::Value> {
        anyhow::bail!("Get value for '{}' not supported by this device", name)
    }
}

/// Capability: Parameter Registry Access
///
/// Lets generic code enumerate and subscribe to a device's parameters.
///
/// ```rust,ignore
/// fn list_all_parameters<D: Parameterized>(device: &D) {
///     for name in device.parameters().names() {
///         println!("Parameter: {}", name);
///     }
/// }
/// ```
pub trait Parameterized: Send + Sync {
    /// Get device's parameter registry
    fn parameters(&self) -> &ParameterSet;
}
