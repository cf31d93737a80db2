//! ADLINK analog-input one-dimensional controller.
//!
//! Integrates the analog inputs of an ADLINK DAQ card, served by a remote AI
//! device server, into a scan framework as one-dimensional experimental
//! channels.
//!
//! # Axes
//!
//! - Axis 1 is the **timer** channel: it reports the integration time.
//! - Axes 2..=5 read AI channels 0..=3 of the card.
//!
//! # Synchronization
//!
//! - **Software trigger** (step scans): one acquisition per step. Only one
//!   point can be acquired per step; a second software trigger is refused.
//! - **Hardware trigger** (continuous scans): the card acquires one point per
//!   external pulse. `PointsPerStep` (>= 1) is the number of pulses expected
//!   per scan step and must be set before the scan starts.
//!
//! # Architecture
//!
//! - [`device::AiDevice`] - client view of the AI device server
//! - [`mock::MockAiDevice`] - simulated card for tests and demos
//! - [`controller::AdlinkAiController`] - pool operations (`load_one`,
//!   `start_all`, `read_all`, ...)
//! - [`factory::AdlinkAiFactory`] - registry integration via
//!   [`daq_core::driver::DriverFactory`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use daq_driver_adlink::{AdlinkAiController, AdlinkConfig, AcqSynch, MockAiDevice};
//!
//! let device = Arc::new(MockAiDevice::new("lab/adlink/ai-01"));
//! let mut ctrl = AdlinkAiController::new(AdlinkConfig::new("lab/adlink/ai-01"), device).await?;
//! ctrl.add_device(1)?;
//! ctrl.add_device(2)?;
//! ctrl.set_synchronization(AcqSynch::SoftwareTrigger);
//! ctrl.load_one(1, 0.1, 1, 0.0).await?;
//! ctrl.pre_start_one(2)?;
//! ctrl.start_all().await?;
//! ```

pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod factory;
pub mod formula;
pub mod listener;
pub mod mock;
pub mod state;
pub mod synchronization;

pub use config::{AdlinkConfig, TimingConfig};
pub use controller::{AdlinkAiController, LATENCY_TIME, MAX_DEVICE, TIMER_AXIS};
pub use device::{AiDevice, HwState, TriggerConfig, TriggerSource};
pub use error::{AdlinkError, Result};
pub use factory::{AdlinkAiDriver, AdlinkAiDriverConfig, AdlinkAiFactory, Reading};
pub use mock::MockAiDevice;
pub use state::State;
pub use synchronization::AcqSynch;
