//! Serial channel opening.
//!
//! The hardware link is a single byte stream shared by acquisition (reads) and
//! actuation (writes). It is opened once and split into independent halves so a
//! blocked read never holds up an outbound relay frame.

use super::OutboundChannel;
use crate::config::AcquisitionConfig;
use crate::error::{AppResult, DaqError};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Any byte stream usable as the hardware channel.
///
/// Satisfied by `tokio_serial::SerialStream` and by `tokio::io::DuplexStream` in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased hardware channel.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Buffered inbound half of the hardware channel.
pub type InboundChannel = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Split a byte stream into the buffered inbound half and the outbound half.
pub fn split_channel(port: DynSerial) -> (InboundChannel, OutboundChannel) {
    let (read_half, write_half) = tokio::io::split(port);
    let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
    (BufReader::new(reader), Box::new(write_half))
}

/// Open the configured serial port and split it.
pub async fn open_channel(config: &AcquisitionConfig) -> AppResult<(InboundChannel, OutboundChannel)> {
    let port_path = config
        .port
        .as_deref()
        .ok_or_else(|| DaqError::Configuration("Hardware mode requires acquisition.port".into()))?;
    let port = open_serial_async(port_path, config.baud_rate).await?;
    tracing::info!(port = %port_path, baud_rate = config.baud_rate, "Hardware channel opened");
    Ok(split_channel(port))
}

/// Open a serial port with standard settings (8N1, no flow control).
///
/// Opening runs on the blocking pool so port initialization never stalls the runtime.
#[cfg(feature = "instrument_serial")]
pub async fn open_serial_async(port_path: &str, baud_rate: u32) -> AppResult<DynSerial> {
    use anyhow::Context;
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let port_path_owned = port_path.to_string();

    let stream = spawn_blocking(move || {
        tokio_serial::new(&port_path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .context(format!("Failed to open hardware serial port: {}", port_path_owned))
    })
    .await
    .map_err(|e| DaqError::Serial(format!("spawn_blocking for serial port opening failed: {e}")))?
    .map_err(|e| DaqError::Serial(format!("{e:#}")))?;

    Ok(Box::new(stream))
}

/// Serial support compiled out: hardware mode cannot start.
#[cfg(not(feature = "instrument_serial"))]
pub async fn open_serial_async(port_path: &str, _baud_rate: u32) -> AppResult<DynSerial> {
    Err(DaqError::Serial(format!(
        "Cannot open {port_path}: serial support not enabled. Rebuild with --features instrument_serial"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (mut device, host) = tokio::io::duplex(256);
        let (mut inbound, mut outbound) = split_channel(Box::new(host));

        device.write_all(b"{\"type\":\"data\"}\n").await.unwrap();
        outbound.write_all(b"relay\n").await.unwrap();
        outbound.flush().await.unwrap();

        let mut line = String::new();
        inbound.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "{\"type\":\"data\"}");

        let mut buf = [0u8; 6];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"relay\n");
    }

    #[tokio::test]
    async fn test_missing_port_is_a_configuration_error() {
        let config = AcquisitionConfig {
            port: None,
            ..Default::default()
        };
        let Err(err) = open_channel(&config).await else {
            panic!("opening should fail");
        };
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_nonexistent_port_fails_to_open() {
        let config = AcquisitionConfig {
            port: Some("/dev/stand-daq-no-such-port".into()),
            ..Default::default()
        };
        let Err(err) = open_channel(&config).await else {
            panic!("opening should fail");
        };
        assert!(matches!(err, DaqError::Serial(_)));
    }
}
