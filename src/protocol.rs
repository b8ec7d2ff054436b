//! Wire formats.
//!
//! Two links carry JSON:
//!
//! - **Live connections** (WebSocket text frames). The server sends `setup`, `data`,
//!   `update-status` and `error` messages tagged by `type`; clients send commands
//!   tagged by `cmd`.
//! - **Hardware channel** (newline-delimited JSON over serial). The device sends
//!   `{"type":"data","id":0,"time":1500,"value":0.25}` frames; the server sends
//!   `{"cmd":"toggle-relay","id":0,"state":true}` frames.

use crate::error::{AppResult, DaqError};
use crate::sensor::{Reading, SensorDescriptor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;

/// A serialized server→client message, shared by every subscriber of one publish.
pub type Frame = Arc<str>;

/// Server→client messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent once per connection, before any data
    Setup {
        /// Configured sensors, in order
        sensors: Vec<SetupSensor>,
    },
    /// One same-tick group of readings
    Data {
        /// Readings keyed by sensor name
        data: DataPayload,
    },
    /// Recording state changed
    UpdateStatus {
        /// Changed status fields
        changes: StatusChanges,
    },
    /// A command issued by this connection failed
    Error {
        /// Command that failed (`cmd` field of the request, or `unknown`)
        cmd: String,
        /// Human-readable reason
        message: String,
    },
}

/// Sensor entry of the `setup` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupSensor {
    /// Sensor name
    pub id: String,
}

/// Fields carried by `update-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusChanges {
    /// Whether a recording session is active
    #[serde(rename = "recordingStatus")]
    pub recording_status: bool,
}

/// Readings of one group, serialized as `{"<sensor name>": [timestamp, value], ...}`
/// in configured sensor order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataPayload {
    entries: Vec<(String, f64, f64)>,
}

impl DataPayload {
    /// Build the payload, dropping readings whose sensor index is unknown.
    pub fn from_readings(readings: &[Reading], sensors: &[SensorDescriptor]) -> Self {
        let entries = readings
            .iter()
            .filter_map(|r| {
                sensors
                    .get(r.sensor_index)
                    .map(|s| (s.name.clone(), r.timestamp_s, r.value))
            })
            .collect();
        Self { entries }
    }

    /// Number of readings carried
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the payload carries no readings
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for DataPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, timestamp, value) in &self.entries {
            map.serialize_entry(name, &(timestamp, value))?;
        }
        map.end()
    }
}

impl ServerMessage {
    /// `setup` message listing every sensor.
    pub fn setup(sensors: &[SensorDescriptor]) -> Self {
        ServerMessage::Setup {
            sensors: sensors
                .iter()
                .map(|s| SetupSensor { id: s.name.clone() })
                .collect(),
        }
    }

    /// `data` message for one reading group.
    pub fn data(readings: &[Reading], sensors: &[SensorDescriptor]) -> Self {
        ServerMessage::Data {
            data: DataPayload::from_readings(readings, sensors),
        }
    }

    /// `update-status` message for the recording flag.
    pub fn recording_status(active: bool) -> Self {
        ServerMessage::UpdateStatus {
            changes: StatusChanges {
                recording_status: active,
            },
        }
    }

    /// `error` message for a failed command.
    pub fn command_error(cmd: impl Into<String>, err: &DaqError) -> Self {
        ServerMessage::Error {
            cmd: cmd.into(),
            message: err.to_string(),
        }
    }

    /// Serialize into a text frame.
    pub fn to_frame(&self) -> AppResult<Frame> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

/// Client→server commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Begin a recording session (no-op if one is active)
    StartRecording {
        /// Optional label stored in the registry
        #[serde(default)]
        name: Option<String>,
    },
    /// End the active recording session (no-op if idle)
    StopRecording,
    /// Switch a relay on the hardware channel
    ToggleRelay {
        /// Relay channel
        id: u32,
        /// Desired state
        state: bool,
    },
    /// Ignition request; not supported
    Ignite,
}

impl ClientCommand {
    /// Decode one text frame.
    pub fn parse(text: &str) -> AppResult<Self> {
        serde_json::from_str(text).map_err(|e| DaqError::Protocol(e.to_string()))
    }

    /// Wire name of the command
    pub fn label(&self) -> &'static str {
        match self {
            ClientCommand::StartRecording { .. } => "start-recording",
            ClientCommand::StopRecording => "stop-recording",
            ClientCommand::ToggleRelay { .. } => "toggle-relay",
            ClientCommand::Ignite => "ignite",
        }
    }
}

/// Best-effort `cmd` field of a frame that failed to decode.
pub fn command_label(text: &str) -> String {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("cmd").and_then(|c| c.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Inbound hardware frame. Only `type == "data"` frames carry readings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HardwareFrame {
    /// Frame type
    #[serde(rename = "type")]
    pub kind: String,
    /// Sensor channel
    #[serde(default)]
    pub id: Option<i64>,
    /// Device clock in milliseconds
    #[serde(default)]
    pub time: Option<f64>,
    /// Measured value
    #[serde(default)]
    pub value: Option<f64>,
}

impl HardwareFrame {
    /// Convert a data frame into a reading.
    ///
    /// Returns `None` for non-data frames, incomplete frames, and ids outside the
    /// configured sensor list.
    pub fn into_reading(self, sensor_count: usize) -> Option<Reading> {
        if self.kind != "data" {
            return None;
        }
        let id = usize::try_from(self.id?).ok()?;
        if id >= sensor_count {
            return None;
        }
        let time_ms = self.time?;
        let value = self.value?;
        if !time_ms.is_finite() || !value.is_finite() {
            return None;
        }
        Some(Reading::new(id, time_ms / 1000.0, value))
    }
}

/// Outbound actuation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayFrame {
    cmd: &'static str,
    /// Relay channel
    pub id: u32,
    /// Desired state
    pub state: bool,
}

impl RelayFrame {
    /// `toggle-relay` frame
    pub fn toggle(id: u32, state: bool) -> Self {
        Self {
            cmd: "toggle-relay",
            id,
            state,
        }
    }

    /// Newline-terminated bytes for the serial link.
    pub fn to_line(&self) -> AppResult<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sensors() -> Vec<SensorDescriptor> {
        vec![
            SensorDescriptor::new(0, "Sensor 0"),
            SensorDescriptor::new(1, "Sensor 1"),
            SensorDescriptor::new(2, "Sensor 2"),
        ]
    }

    fn as_json(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_frame().unwrap()).unwrap()
    }

    #[test]
    fn test_setup_lists_sensor_names_as_ids() {
        assert_eq!(
            as_json(&ServerMessage::setup(&sensors())),
            json!({"type": "setup", "sensors": [{"id": "Sensor 0"}, {"id": "Sensor 1"}, {"id": "Sensor 2"}]})
        );
    }

    #[test]
    fn test_data_keys_readings_by_sensor_name_in_order() {
        let readings = vec![
            Reading::new(0, 4.0, 0.5),
            Reading::new(1, 4.0, 0.25),
            Reading::new(2, 4.0, 0.125),
        ];
        let frame = ServerMessage::data(&readings, &sensors()).to_frame().unwrap();
        assert_eq!(
            &*frame,
            r#"{"type":"data","data":{"Sensor 0":[4.0,0.5],"Sensor 1":[4.0,0.25],"Sensor 2":[4.0,0.125]}}"#
        );
    }

    #[test]
    fn test_data_skips_unknown_sensor_index() {
        let payload = DataPayload::from_readings(&[Reading::new(7, 0.0, 1.0)], &sensors());
        assert!(payload.is_empty());
    }

    #[test]
    fn test_status_uses_camel_case_flag() {
        assert_eq!(
            as_json(&ServerMessage::recording_status(true)),
            json!({"type": "update-status", "changes": {"recordingStatus": true}})
        );
    }

    #[test]
    fn test_error_message_carries_command_and_reason() {
        let msg = ServerMessage::command_error("ignite", &DaqError::Unimplemented("ignite".into()));
        assert_eq!(
            as_json(&msg),
            json!({"type": "error", "cmd": "ignite", "message": "Operation not implemented: ignite"})
        );
    }

    #[test]
    fn test_parses_every_client_command() {
        assert_eq!(
            ClientCommand::parse(r#"{"cmd":"start-recording","name":"trial1"}"#).unwrap(),
            ClientCommand::StartRecording {
                name: Some("trial1".into())
            }
        );
        assert_eq!(
            ClientCommand::parse(r#"{"cmd":"start-recording"}"#).unwrap(),
            ClientCommand::StartRecording { name: None }
        );
        assert_eq!(
            ClientCommand::parse(r#"{"cmd":"stop-recording"}"#).unwrap(),
            ClientCommand::StopRecording
        );
        assert_eq!(
            ClientCommand::parse(r#"{"cmd":"toggle-relay","id":0,"state":true}"#).unwrap(),
            ClientCommand::ToggleRelay { id: 0, state: true }
        );
        assert_eq!(
            ClientCommand::parse(r#"{"cmd":"ignite"}"#).unwrap(),
            ClientCommand::Ignite
        );
    }

    #[test]
    fn test_unknown_command_is_a_protocol_error() {
        let err = ClientCommand::parse(r#"{"cmd":"self-destruct"}"#).unwrap_err();
        assert!(matches!(err, DaqError::Protocol(_)));
        assert_eq!(command_label(r#"{"cmd":"self-destruct"}"#), "self-destruct");
        assert_eq!(command_label("not json"), "unknown");
    }

    #[test]
    fn test_hardware_data_frame_converts_ms_to_seconds() {
        let frame: HardwareFrame =
            serde_json::from_str(r#"{"type":"data","id":1,"time":1500,"value":2.5}"#).unwrap();
        assert_eq!(frame.into_reading(3), Some(Reading::new(1, 1.5, 2.5)));
    }

    #[test]
    fn test_hardware_frames_without_readings_are_rejected() {
        let cases = [
            r#"{"type":"log","id":1,"time":1500,"value":2.5}"#,
            r#"{"type":"data","id":3,"time":1500,"value":2.5}"#,
            r#"{"type":"data","id":-1,"time":1500,"value":2.5}"#,
            r#"{"type":"data","id":1,"value":2.5}"#,
        ];
        for case in cases {
            let frame: HardwareFrame = serde_json::from_str(case).unwrap();
            assert_eq!(frame.into_reading(3), None, "{case}");
        }
    }

    #[test]
    fn test_relay_frame_is_a_json_line() {
        let line = RelayFrame::toggle(0, true).to_line().unwrap();
        assert_eq!(line, b"{\"cmd\":\"toggle-relay\",\"id\":0,\"state\":true}\n");
    }
}
