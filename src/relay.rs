//! Relay actuation over the outbound hardware channel.
//!
//! Frames are written whole behind an async mutex, so toggles issued concurrently
//! by different connections never interleave on the wire. Nothing is read back.

use crate::error::{AppResult, DaqError};
use crate::protocol::RelayFrame;
use crate::source::OutboundChannel;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Writer of `toggle-relay` frames.
pub struct RelayActuator {
    channel: Mutex<OutboundChannel>,
}

impl RelayActuator {
    /// Take ownership of the outbound channel.
    pub fn new(channel: OutboundChannel) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// Send one toggle frame. Fire-and-forget: no acknowledgment, no retry.
    pub async fn toggle(&self, id: u32, state: bool) -> AppResult<()> {
        let line = RelayFrame::toggle(id, state).to_line()?;

        let mut channel = self.channel.lock().await;
        channel
            .write_all(&line)
            .await
            .map_err(|e| DaqError::Relay(e.to_string()))?;
        channel
            .flush()
            .await
            .map_err(|e| DaqError::Relay(e.to_string()))?;

        tracing::debug!(relay_id = id, state, "Relay frame sent");
        Ok(())
    }
}
