//! `adlink-scan` configuration.
//!
//! Loaded from a TOML file, then environment variables prefixed with
//! `ADLINK_SCAN_` (nested keys separated by `__`, e.g.
//! `ADLINK_SCAN_CONTROLLER__INTEGRATION_TIME=0.2`).

use daq_driver_adlink::AdlinkAiDriverConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::parse_log_level;

/// Default configuration path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/adlink-scan.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Controller and simulated card
    pub controller: AdlinkAiDriverConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_name() -> String {
    "adlink-scan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl ScanConfig {
    /// Load configuration from a file plus environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ADLINK_SCAN_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        parse_log_level(&self.application.log_level)?;
        self.controller
            .controller
            .validate()
            .map_err(|e| e.to_string())
    }
}
