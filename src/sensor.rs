//! Sensor identity and readings.

use serde::{Deserialize, Serialize};

/// Static identity of one sensor channel.
///
/// The list of descriptors is fixed at startup; `index` doubles as the channel id
/// used on the hardware link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    /// Position in the configured sensor list
    pub index: usize,
    /// Display name, also the CSV column header
    pub name: String,
}

impl SensorDescriptor {
    /// Create a descriptor
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

/// One timestamped scalar observation from one sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Index into the sensor descriptor list
    pub sensor_index: usize,
    /// Seconds (hardware clock) or tick number (simulated)
    pub timestamp_s: f64,
    /// Observed value
    pub value: f64,
}

impl Reading {
    /// Create a reading
    pub fn new(sensor_index: usize, timestamp_s: f64, value: f64) -> Self {
        Self {
            sensor_index,
            timestamp_s,
            value,
        }
    }
}

/// Readings produced together: one simulated tick, or one hardware frame.
pub type ReadingGroup = Vec<Reading>;
