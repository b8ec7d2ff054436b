//! Per-connection command dispatcher.
//!
//! Each live connection gets its own dispatcher that consumes the connection's
//! inbound text frames strictly in arrival order. A failing command is answered
//! with an `error` message to that connection alone and the connection stays open.
//! The loop ends when the inbound stream ends or errors, and the connection is then
//! removed from the broadcast hub.

use crate::error::{AppResult, DaqError};
use crate::hub::{BroadcastHub, ConnectionId, LiveConnection};
use crate::protocol::{command_label, ClientCommand, ServerMessage};
use crate::recording::{RecordingController, StartOutcome, StopOutcome};
use crate::relay::RelayActuator;
use futures::{Stream, StreamExt};
use std::sync::Arc;

/// Routes one connection's commands to the shared components.
pub struct CommandDispatcher {
    conn: Arc<dyn LiveConnection>,
    hub: Arc<BroadcastHub>,
    recorder: Arc<RecordingController>,
    relay: Arc<RelayActuator>,
}

impl CommandDispatcher {
    /// Dispatcher for an already registered connection.
    pub fn new(
        conn: Arc<dyn LiveConnection>,
        hub: Arc<BroadcastHub>,
        recorder: Arc<RecordingController>,
        relay: Arc<RelayActuator>,
    ) -> Self {
        Self {
            conn,
            hub,
            recorder,
            relay,
        }
    }

    /// Connection served by this dispatcher
    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Execute one decoded command.
    pub async fn dispatch(&self, command: ClientCommand) -> AppResult<()> {
        match command {
            ClientCommand::StartRecording { name } => {
                match self.recorder.start_recording(name).await? {
                    StartOutcome::Started(entry) => {
                        tracing::debug!(connection_id = %self.conn.id(), recording_id = %entry.id, "start-recording handled")
                    }
                    StartOutcome::AlreadyActive => {
                        tracing::debug!(connection_id = %self.conn.id(), "start-recording ignored, already active")
                    }
                }
                Ok(())
            }
            ClientCommand::StopRecording => {
                if let StopOutcome::NotRecording = self.recorder.stop_recording().await? {
                    tracing::debug!(connection_id = %self.conn.id(), "stop-recording ignored, not recording");
                }
                Ok(())
            }
            ClientCommand::ToggleRelay { id, state } => self.relay.toggle(id, state).await,
            ClientCommand::Ignite => Err(DaqError::Unimplemented("ignite".into())),
        }
    }

    /// Decode and execute one inbound frame, replying with an `error` message on failure.
    ///
    /// Only a failure to deliver that reply is returned; it means the connection is gone.
    pub async fn handle_frame(&self, text: &str) -> AppResult<()> {
        let (label, result) = match ClientCommand::parse(text) {
            Ok(command) => (command.label().to_string(), self.dispatch(command).await),
            Err(e) => (command_label(text), Err(e)),
        };

        if let Err(e) = result {
            tracing::warn!(connection_id = %self.conn.id(), cmd = %label, error = %e, "Command failed");
            let reply = ServerMessage::command_error(label, &e).to_frame()?;
            self.conn.send(reply).await?;
        }
        Ok(())
    }

    /// Serve the connection until its inbound stream ends, then disconnect it.
    pub async fn run<S>(self, mut inbound: S)
    where
        S: Stream<Item = AppResult<String>> + Unpin,
    {
        let id = self.conn.id();
        while let Some(item) = inbound.next().await {
            match item {
                Ok(text) => {
                    if let Err(e) = self.handle_frame(&text).await {
                        tracing::debug!(connection_id = %id, error = %e, "Reply failed, closing connection");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(connection_id = %id, error = %e, "Inbound stream failed");
                    break;
                }
            }
        }
        self.hub.disconnect(id);
    }
}
