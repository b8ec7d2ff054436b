//! Configuration System using Figment
//!
//! Strongly-typed settings for the control server. Configuration is layered:
//! 1. Built-in defaults (simulated source, three sensors, local recordings directory)
//! 2. A TOML file (`config/stand_daq.toml` unless another path is given)
//! 3. Environment variables prefixed with `STAND_DAQ_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use stand_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Acquisition mode: {:?}", settings.acquisition.mode);
//! # Ok::<(), stand_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use crate::sensor::SensorDescriptor;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/stand_daq.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Source reader settings
    pub acquisition: AcquisitionConfig,
    /// Sample queue policy
    pub queue: QueueConfig,
    /// Recording artifact and registry locations
    pub storage: StorageConfig,
    /// Live connection endpoint
    pub server: ServerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Stand DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Where readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Uniform random values, one reading per sensor per tick
    Simulated,
    /// Newline-delimited JSON frames from a serial port
    Hardware,
}

/// Source reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Simulated or hardware source
    pub mode: AcquisitionMode,
    /// Serial port path (required in hardware mode)
    pub port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Simulated tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Seed for the simulated value generator (random when absent)
    pub seed: Option<u64>,
    /// Sensor names in channel order; index in this list is the hardware id
    pub sensors: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::Simulated,
            port: None,
            baud_rate: 115_200,
            tick_interval_ms: 1000,
            seed: None,
            sensors: (0..3).map(|index| format!("Sensor {index}")).collect(),
        }
    }
}

impl AcquisitionConfig {
    /// Simulated tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Build the fixed, ordered sensor descriptor list.
    pub fn sensor_descriptors(&self) -> Vec<SensorDescriptor> {
        self.sensors
            .iter()
            .enumerate()
            .map(|(index, name)| SensorDescriptor::new(index, name.clone()))
            .collect()
    }
}

/// Behavior of the sample queue when delivery falls behind acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicyKind {
    /// Never drop; memory grows with the backlog
    Unbounded,
    /// Keep at most `capacity` items, discarding the oldest
    DropOldest,
}

/// Sample queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue policy
    pub policy: QueuePolicyKind,
    /// Capacity for the bounded policy
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicyKind::Unbounded,
            capacity: 1024,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving one CSV artifact per recording
    pub recordings_dir: PathBuf,
    /// JSON file backing the recording registry
    pub registry_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("recordings"),
            registry_file: PathBuf::from("recordings/registry.json"),
        }
    }
}

/// Live connection endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the WebSocket endpoint
    pub bind_addr: String,
    /// Outbound frames buffered per connection
    pub subscriber_buffer: usize,
    /// Per-subscriber delivery deadline in milliseconds
    pub send_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            subscriber_buffer: 64,
            send_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Per-subscriber delivery deadline
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Settings {
    /// Load settings from the default file and environment variables.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path.
    ///
    /// Environment variables override the file, e.g.
    /// `STAND_DAQ_ACQUISITION__MODE=hardware`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("STAND_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.acquisition.sensors.is_empty() {
            return Err(DaqError::Configuration(
                "At least one sensor must be configured".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for name in &self.acquisition.sensors {
            if name.trim().is_empty() {
                return Err(DaqError::Configuration(
                    "Sensor names must not be empty".to_string(),
                ));
            }
            if !names.insert(name) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate sensor name: {}",
                    name
                )));
            }
        }

        if self.acquisition.mode == AcquisitionMode::Hardware && self.acquisition.port.is_none() {
            return Err(DaqError::Configuration(
                "Hardware mode requires acquisition.port".to_string(),
            ));
        }

        if self.acquisition.tick_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }

        if self.queue.policy == QueuePolicyKind::DropOldest && self.queue.capacity == 0 {
            return Err(DaqError::Configuration(
                "Bounded queue requires a capacity greater than zero".to_string(),
            ));
        }

        if self.server.subscriber_buffer == 0 {
            return Err(DaqError::Configuration(
                "subscriber_buffer must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
