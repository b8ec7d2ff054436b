//! Source readers.
//!
//! A [`SourceReader`] produces an endless sequence of reading groups regardless of
//! where the readings come from:
//!
//! - [`HardwareSource`]: newline-delimited JSON frames from the serial channel, one
//!   reading per frame
//! - [`SimulatedSource`]: one reading per sensor on every tick of a fixed ticker
//!
//! The variant is chosen once, by [`open_source`], from the acquisition settings.
//! Opening the hardware variant also yields the write half of the serial link, which
//! the relay actuator uses for outbound frames.

pub mod hardware;
pub mod serial;
pub mod simulated;

pub use hardware::HardwareSource;
pub use simulated::SimulatedSource;

use crate::config::{AcquisitionConfig, AcquisitionMode};
use crate::error::AppResult;
use crate::sensor::{ReadingGroup, SensorDescriptor};
use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Outbound half of the hardware channel.
pub type OutboundChannel = Box<dyn AsyncWrite + Send + Unpin>;

/// Uniform interface over hardware and simulated acquisition.
#[async_trait]
pub trait SourceReader: Send {
    /// Suspend until the next group of readings is available.
    ///
    /// Bad input never ends the sequence; an error means the source itself is gone.
    async fn next_readings(&mut self) -> AppResult<ReadingGroup>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Open the configured source together with its outbound channel.
///
/// In simulated mode the outbound channel discards everything written to it.
///
/// # Errors
///
/// Fails when the serial port cannot be opened; acquisition cannot proceed
/// without its source.
pub async fn open_source(
    config: &AcquisitionConfig,
    sensors: &[SensorDescriptor],
) -> AppResult<(Box<dyn SourceReader>, OutboundChannel)> {
    match config.mode {
        AcquisitionMode::Simulated => {
            let source = SimulatedSource::new(sensors.len(), config.tick_interval(), config.seed);
            Ok((Box::new(source), Box::new(tokio::io::sink())))
        }
        AcquisitionMode::Hardware => {
            let (reader, writer) = serial::open_channel(config).await?;
            Ok((Box::new(HardwareSource::new(reader, sensors.len())), writer))
        }
    }
}
