//! Driver Factory and Component Types
//!
//! Drivers implement [`DriverFactory`] and hand back a [`DeviceComponents`]
//! bag holding one trait object per capability they support.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    DriverFactory::build()                       │
//! │  Parses TOML config, instantiates driver, returns capabilities │
//! └─────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       DeviceComponents                          │
//! │  stageable / triggerable / settable / parameterized            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::capabilities::{Parameterized, Settable, Stageable, Triggerable};
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Capability Enum (Runtime Introspection)
// =============================================================================

/// Runtime capability flags for device introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Can be armed and triggered.
    /// Corresponds to [`crate::capabilities::Triggerable`]
    Triggerable,

    /// Has settable named values.
    /// Corresponds to [`crate::capabilities::Settable`]
    Settable,

    /// Can be staged/unstaged for acquisition sequences.
    /// Corresponds to [`crate::capabilities::Stageable`]
    Stageable,

    /// Has observable parameters with subscriptions.
    /// Corresponds to [`crate::capabilities::Parameterized`]
    Parameterized,
}

impl Capability {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Triggerable => "Triggerable",
            Self::Settable => "Settable",
            Self::Stageable => "Stageable",
            Self::Parameterized => "Parameterized",
        }
    }
}

// =============================================================================
// Device Components (Capability Bag)
// =============================================================================

/// Container for capability trait objects returned by drivers.
///
/// ```rust,ignore
/// let driver = Arc::new(MyDriver::new().await?);
///
/// let components = DeviceComponents::new()
///     .with_triggerable(driver.clone())
///     .with_parameterized(driver);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Triggerable implementation (arm/trigger)
    pub triggerable: Option<Arc<dyn Triggerable>>,

    /// Settable implementation (named values)
    pub settable: Option<Arc<dyn Settable>>,

    /// Stageable implementation (scan lifecycle)
    pub stageable: Option<Arc<dyn Stageable>>,

    /// Parameterized implementation (parameter registry)
    pub parameterized: Option<Arc<dyn Parameterized>>,

    /// Capability-specific metadata
    pub metadata: DeviceMetadata,
}

impl DeviceComponents {
    /// Create a new empty DeviceComponents
    pub fn new() -> Self {
        Self::default()
    }

    /// Get list of capabilities this device supports
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();

        if self.triggerable.is_some() {
            caps.push(Capability::Triggerable);
        }
        if self.settable.is_some() {
            caps.push(Capability::Settable);
        }
        if self.stageable.is_some() {
            caps.push(Capability::Stageable);
        }
        if self.parameterized.is_some() {
            caps.push(Capability::Parameterized);
        }

        caps
    }

    /// Set Triggerable implementation
    pub fn with_triggerable(mut self, t: Arc<dyn Triggerable>) -> Self {
        self.triggerable = Some(t);
        self
    }

    /// Set Settable implementation
    pub fn with_settable(mut self, s: Arc<dyn Settable>) -> Self {
        self.settable = Some(s);
        self
    }

    /// Set Stageable implementation
    pub fn with_stageable(mut self, s: Arc<dyn Stageable>) -> Self {
        self.stageable = Some(s);
        self
    }

    /// Set Parameterized implementation
    pub fn with_parameterized(mut self, p: Arc<dyn Parameterized>) -> Self {
        self.parameterized = Some(p);
        self
    }

    /// Set device metadata
    pub fn with_metadata(mut self, metadata: DeviceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// =============================================================================
// Device Metadata
// =============================================================================

/// Descriptive metadata that the trait objects do not carry.
#[derive(Debug, Clone, Default)]
pub struct DeviceMetadata {
    /// Measurement units of the data channels (e.g. "V")
    pub measurement_units: Option<String>,

    /// Number of data channels the device exposes
    pub channel_count: Option<u32>,

    /// Maximum per-channel sample rate in Hz
    pub max_sample_rate: Option<f64>,
}

// =============================================================================
// Driver Factory Trait
// =============================================================================

/// Trait for driver factories that create device instances.
///
/// 1. Declare the driver type (matching the TOML `type` field)
/// 2. Validate configuration before instantiation
/// 3. Asynchronously create the driver and return its capabilities
///
/// The `build()` method takes `&self` and returns a `BoxFuture<'static, ...>`,
/// so factories must not hold mutable state across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Driver type name used in TOML config `type` field.
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for documentation and error messages.
    fn name(&self) -> &'static str;

    /// List of capabilities this driver type provides.
    fn capabilities(&self) -> &'static [Capability] {
        &[]
    }

    /// Validate configuration without instantiating.
    fn validate(&self, config: &toml::Value) -> Result<()>;

    /// Async instantiation of the driver.
    fn build(&self, config: toml::Value) -> BoxFuture<'static, Result<DeviceComponents>>;
}
