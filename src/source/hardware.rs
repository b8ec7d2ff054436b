//! Hardware acquisition over the serial channel.
//!
//! The device streams one JSON object per line:
//!
//! ```text
//! {"type":"data","id":0,"time":1500,"value":0.25}
//! ```
//!
//! `id` indexes the configured sensor list and `time` is the device clock in
//! milliseconds. Anything else on the line (log frames, garbage, truncated JSON,
//! unknown sensor ids) is dropped without ending the stream.

use super::SourceReader;
use crate::error::{AppResult, DaqError};
use crate::protocol::HardwareFrame;
use crate::sensor::{Reading, ReadingGroup};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Line-oriented reader of hardware data frames.
pub struct HardwareSource<R> {
    reader: R,
    sensor_count: usize,
    line: Vec<u8>,
    discarded: u64,
}

impl<R: AsyncBufRead + Unpin + Send> HardwareSource<R> {
    /// Wrap the inbound half of the hardware channel.
    pub fn new(reader: R, sensor_count: usize) -> Self {
        Self {
            reader,
            sensor_count,
            line: Vec::with_capacity(128),
            discarded: 0,
        }
    }

    /// Lines dropped so far (malformed, non-data or unknown sensor)
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Read one line and decode it; `Ok(None)` when the line carries no reading.
    async fn read_frame(&mut self) -> AppResult<Option<Reading>> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line).await?;
        if n == 0 {
            return Err(DaqError::SerialUnexpectedEof);
        }

        let trimmed = trim_line(&self.line);
        if trimmed.is_empty() {
            return Ok(None);
        }

        match serde_json::from_slice::<HardwareFrame>(trimmed) {
            Ok(frame) => Ok(frame.into_reading(self.sensor_count)),
            Err(e) => {
                tracing::debug!(error = %e, "Discarding malformed hardware frame");
                Ok(None)
            }
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> SourceReader for HardwareSource<R> {
    async fn next_readings(&mut self) -> AppResult<ReadingGroup> {
        loop {
            match self.read_frame().await? {
                Some(reading) => return Ok(vec![reading]),
                None => self.discarded += 1,
            }
        }
    }

    fn describe(&self) -> String {
        format!("hardware serial ({} sensors)", self.sensor_count)
    }
}
