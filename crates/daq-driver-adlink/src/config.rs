//! Controller configuration.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `ADLINK_` (nested keys use `__`,
//!    e.g. `ADLINK_TIMING__START_ATTEMPTS=5`)
//!
//! ```toml
//! device_name = "lab/adlink/ai-01"
//! sample_rate = 100000.0
//! skip_start = true
//! points_per_step = 1
//!
//! [timing]
//! start_attempts = 3
//! start_wait_ms = 50
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AdlinkError, Result};

/// Controller properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdlinkConfig {
    /// Name of the AI device server the controller talks to
    pub device_name: String,

    /// Sample rate written to the device at start-up (Hz). Left untouched
    /// when absent.
    #[serde(default)]
    pub sample_rate: Option<f64>,

    /// Keep going when the card never reports RUNNING after `Start`
    #[serde(default = "default_skip_start")]
    pub skip_start: bool,

    /// Hardware triggers expected per scan step
    #[serde(default = "default_points_per_step")]
    pub points_per_step: u32,

    /// Device call timing
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Timeouts and retry policy for device calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Timeout of ordinary device calls
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Timeout while stopping; the card may take several seconds when
    /// acquisitions are frequent
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Timeout while starting
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,

    /// Wait between `Start` and the state check
    #[serde(default = "default_start_wait_ms")]
    pub start_wait_ms: u64,

    /// `Start` attempts before giving up
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
}

fn default_skip_start() -> bool {
    true
}

fn default_points_per_step() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    3_000
}

fn default_stop_timeout_ms() -> u64 {
    10_000
}

fn default_start_timeout_ms() -> u64 {
    15_000
}

fn default_start_wait_ms() -> u64 {
    50
}

fn default_start_attempts() -> u32 {
    3
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            start_timeout_ms: default_start_timeout_ms(),
            start_wait_ms: default_start_wait_ms(),
            start_attempts: default_start_attempts(),
        }
    }
}

impl TimingConfig {
    /// Client timeout outside start and stop.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Client timeout while stopping.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Client timeout for each start attempt.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Wait between `Start` and the state check.
    pub fn start_wait(&self) -> Duration {
        Duration::from_millis(self.start_wait_ms)
    }
}

impl AdlinkConfig {
    /// Configuration with defaults for the given device server.
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            sample_rate: None,
            skip_start: default_skip_start(),
            points_per_step: default_points_per_step(),
            timing: TimingConfig::default(),
        }
    }

    /// Load from a TOML file plus `ADLINK_` environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ADLINK_").split("__"))
            .extract()
    }

    /// Validate values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(AdlinkError::InvalidConfig { message });

        if self.device_name.trim().is_empty() {
            return invalid("device_name must not be empty".to_string());
        }
        if let Some(rate) = self.sample_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return invalid(format!("sample_rate must be positive, got {}", rate));
            }
        }
        if self.points_per_step == 0 {
            return invalid("points_per_step must be at least 1".to_string());
        }
        if self.timing.start_attempts == 0 {
            return invalid("timing.start_attempts must be at least 1".to_string());
        }
        if self.timing.default_timeout_ms == 0
            || self.timing.stop_timeout_ms == 0
            || self.timing.start_timeout_ms == 0
        {
            return invalid("timing timeouts must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AdlinkConfig::new("lab/adlink/ai-01");
        assert!(config.skip_start);
        assert_eq!(config.points_per_step, 1);
        assert_eq!(config.timing.start_attempts, 3);
        assert_eq!(config.timing.start_wait(), Duration::from_millis(50));
        assert_eq!(config.timing.stop_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = AdlinkConfig::new("");
        assert!(config.validate().is_err());

        config.device_name = "lab/adlink/ai-01".into();
        config.points_per_step = 0;
        assert!(config.validate().is_err());

        config.points_per_step = 2;
        config.sample_rate = Some(-1.0);
        assert!(config.validate().is_err());

        config.sample_rate = Some(1000.0);
        config.timing.start_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
device_name = "lab/adlink/ai-02"
sample_rate = 50000.0
skip_start = false

[timing]
start_attempts = 5
"#
        )
        .unwrap();

        let config = AdlinkConfig::load_from(file.path()).unwrap();
        assert_eq!(config.device_name, "lab/adlink/ai-02");
        assert_eq!(config.sample_rate, Some(50_000.0));
        assert!(!config.skip_start);
        assert_eq!(config.points_per_step, 1);
        assert_eq!(config.timing.start_attempts, 5);
        assert_eq!(config.timing.start_wait_ms, 50);
    }
}
