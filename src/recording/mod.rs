//! Recording controller.
//!
//! An exclusive two-state machine:
//!
//! ```text
//!            start_recording            stop_recording / shutdown
//!   Idle ──────────────────────▶ Active ─────────────────────────▶ Idle
//!    ▲  stop_recording: no-op      │  start_recording: no-op
//! ```
//!
//! The open CSV writer lives inside [`RecorderState::Active`], so an open artifact
//! exists exactly when a session is active. All transitions and every ingested group
//! go through one async mutex; the matching broadcast is published before the lock
//! is released. Subscribers therefore see status changes and data in the same order
//! the artifact does: the data messages between `recordingStatus: true` and
//! `recordingStatus: false` are exactly the rows of the file.

pub mod registry;

pub use registry::{InMemoryRegistry, JsonFileRegistry, RecordingEntry, RecordingRegistry};

use crate::error::{AppResult, DaqError};
use crate::hub::{BroadcastHub, PublishReport};
use crate::protocol::ServerMessage;
use crate::sensor::{Reading, SensorDescriptor};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Shortest accepted recording name
pub const MIN_NAME_LEN: usize = 3;

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session was opened
    Started(RecordingEntry),
    /// A session was already active; nothing changed
    AlreadyActive,
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// The active session was closed
    Stopped(SessionInfo),
    /// No session was active; nothing changed
    NotRecording,
}

/// Snapshot of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Registry id
    pub id: Uuid,
    /// Optional label
    pub name: Option<String>,
    /// Session start
    pub created_at: DateTime<Utc>,
    /// Rows written so far
    pub samples: u64,
    /// Artifact location
    pub path: PathBuf,
}

struct RecordingSession {
    entry: RecordingEntry,
    sample_counter: u64,
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl RecordingSession {
    fn create(entry: RecordingEntry, dir: &Path, sensors: &[SensorDescriptor]) -> AppResult<Self> {
        let path = dir.join(entry.file_name());
        let file = File::create(&path)
            .map_err(|e| DaqError::Storage(format!("Failed to create {}: {e}", path.display())))?;

        let mut writer = csv::Writer::from_writer(file);
        let mut header = Vec::with_capacity(sensors.len() + 1);
        header.push("time");
        header.extend(sensors.iter().map(|s| s.name.as_str()));
        writer.write_record(&header)?;
        writer.flush()?;

        Ok(Self {
            entry,
            sample_counter: 0,
            path,
            writer,
        })
    }

    /// Append one row: counter, then one cell per sensor (empty when absent).
    fn append(&mut self, readings: &[Reading], sensor_count: usize) -> AppResult<()> {
        let mut cells = vec![String::new(); sensor_count + 1];
        cells[0] = self.sample_counter.to_string();
        for reading in readings {
            if let Some(cell) = cells.get_mut(reading.sensor_index + 1) {
                *cell = reading.value.to_string();
            }
        }
        self.writer.write_record(&cells)?;
        self.writer.flush()?;
        self.sample_counter += 1;
        Ok(())
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.entry.id,
            name: self.entry.name.clone(),
            created_at: self.entry.created_at,
            samples: self.sample_counter,
            path: self.path.clone(),
        }
    }

    /// Flush, fsync and close the artifact. The fsync runs on the blocking pool.
    async fn finish(mut self) -> AppResult<SessionInfo> {
        let info = self.info();
        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| DaqError::Storage(format!("Failed to finalize {}: {e}", info.path.display())))?;

        let path = info.path.clone();
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DaqError::Storage(format!("fsync task for {} failed: {e}", path.display())))?
            .map_err(|e| DaqError::Storage(format!("Failed to sync {}: {e}", path.display())))?;
        Ok(info)
    }
}

enum RecorderState {
    Idle,
    Active(RecordingSession),
    /// Shut down; no session can be opened again
    Closed,
}

/// Trim a requested name; blank means unnamed, short names are rejected.
pub fn normalize_name(name: Option<String>) -> AppResult<Option<String>> {
    let Some(raw) = name else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(DaqError::InvalidRecordingName(trimmed.to_string()));
    }
    Ok(Some(trimmed.to_string()))
}

/// Owner of the single recording session.
pub struct RecordingController {
    state: Mutex<RecorderState>,
    registry: Arc<dyn RecordingRegistry>,
    hub: Arc<BroadcastHub>,
    recordings_dir: PathBuf,
}

impl RecordingController {
    /// Controller writing artifacts into `recordings_dir`, which must exist.
    pub fn new(
        registry: Arc<dyn RecordingRegistry>,
        hub: Arc<BroadcastHub>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: Mutex::new(RecorderState::Idle),
            registry,
            hub,
            recordings_dir: recordings_dir.into(),
        }
    }

    /// Open a new session unless one is already active.
    ///
    /// # Errors
    ///
    /// `InvalidRecordingName` for names shorter than three characters; `Registry` or
    /// `Storage` when the entry or artifact cannot be created. The state stays Idle
    /// in every error case. `Transport` once the controller has been shut down.
    pub async fn start_recording(&self, name: Option<String>) -> AppResult<StartOutcome> {
        let mut state = self.state.lock().await;
        match &*state {
            RecorderState::Active(session) => {
                tracing::debug!(recording_id = %session.entry.id, "Recording already active");
                return Ok(StartOutcome::AlreadyActive);
            }
            RecorderState::Closed => {
                return Err(DaqError::Transport("server is shutting down".into()));
            }
            RecorderState::Idle => {}
        }

        let name = normalize_name(name)?;
        let entry = self.registry.create(name).await?;
        let session = RecordingSession::create(entry.clone(), &self.recordings_dir, self.hub.sensors())?;

        tracing::info!(
            recording_id = %entry.id,
            name = entry.name.as_deref().unwrap_or(""),
            path = %session.path.display(),
            "Recording started"
        );
        *state = RecorderState::Active(session);
        self.hub.publish(&ServerMessage::recording_status(true)).await;

        Ok(StartOutcome::Started(entry))
    }

    /// Close the active session, if any.
    pub async fn stop_recording(&self) -> AppResult<StopOutcome> {
        let mut state = self.state.lock().await;
        self.end_session(&mut state, RecorderState::Idle).await
    }

    /// Leave the current state for `next`, closing the active session if there is one.
    async fn end_session(&self, state: &mut RecorderState, next: RecorderState) -> AppResult<StopOutcome> {
        let session = match std::mem::replace(state, next) {
            RecorderState::Active(session) => session,
            RecorderState::Idle => return Ok(StopOutcome::NotRecording),
            RecorderState::Closed => {
                *state = RecorderState::Closed;
                return Ok(StopOutcome::NotRecording);
            }
        };

        let result = session.finish().await;
        match &result {
            Ok(info) => {
                tracing::info!(recording_id = %info.id, samples = info.samples, "Recording stopped")
            }
            Err(e) => tracing::error!(error = %e, "Recording closed with errors"),
        }
        self.hub.publish(&ServerMessage::recording_status(false)).await;

        result.map(StopOutcome::Stopped)
    }

    /// Record one group if active, then broadcast it.
    ///
    /// The broadcast happens even when the row write fails; the write error is
    /// returned afterwards and the session stays active.
    pub async fn ingest(&self, readings: &[Reading]) -> AppResult<PublishReport> {
        let mut state = self.state.lock().await;
        let sensors = self.hub.sensors();

        let written = match &mut *state {
            RecorderState::Active(session) => session.append(readings, sensors.len()),
            RecorderState::Idle | RecorderState::Closed => Ok(()),
        };
        if let Err(e) = &written {
            tracing::error!(error = %e, "Failed to append recording row");
        }

        let report = self.hub.publish(&ServerMessage::data(readings, sensors)).await;
        written.map(|()| report)
    }

    /// Stop an active session and refuse any later start.
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        self.end_session(&mut state, RecorderState::Closed).await.map(|_| ())
    }

    /// Whether a session is active
    pub async fn is_recording(&self) -> bool {
        matches!(*self.state.lock().await, RecorderState::Active(_))
    }

    /// Snapshot of the active session
    pub async fn current_session(&self) -> Option<SessionInfo> {
        match &*self.state.lock().await {
            RecorderState::Active(session) => Some(session.info()),
            RecorderState::Idle | RecorderState::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ChannelConnection, LiveConnection};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;

    struct Fixture {
        _dir: TempDir,
        controller: RecordingController,
        registry: Arc<InMemoryRegistry>,
        rx: mpsc::Receiver<crate::protocol::Frame>,
    }

    async fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let sensors: Arc<[SensorDescriptor]> = vec![
            SensorDescriptor::new(0, "Sensor 0"),
            SensorDescriptor::new(1, "Sensor 1"),
        ]
        .into();
        let hub = Arc::new(BroadcastHub::new(sensors, Duration::from_secs(1)));
        let (conn, mut rx) = ChannelConnection::new(64);
        hub.connect(conn as Arc<dyn LiveConnection>).await.unwrap();
        rx.recv().await.unwrap();

        let registry = Arc::new(InMemoryRegistry::new());
        let controller = RecordingController::new(registry.clone(), hub, dir.path());
        Fixture {
            _dir: dir,
            controller,
            registry,
            rx,
        }
    }

    fn group(t: f64) -> Vec<Reading> {
        vec![Reading::new(0, t, t * 10.0), Reading::new(1, t, t * 20.0)]
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(normalize_name(None).unwrap(), None);
        assert_eq!(normalize_name(Some("   ".into())).unwrap(), None);
        assert_eq!(normalize_name(Some("  run-1 ".into())).unwrap(), Some("run-1".into()));
        assert!(matches!(
            normalize_name(Some(" ab ".into())),
            Err(DaqError::InvalidRecordingName(n)) if n == "ab"
        ));
    }

    #[tokio::test]
    async fn test_start_writes_header_and_publishes_status() {
        let mut f = fixture().await;
        let outcome = f.controller.start_recording(Some("bench".into())).await.unwrap();
        let StartOutcome::Started(entry) = outcome else {
            panic!("expected a new session");
        };
        assert_eq!(entry.name.as_deref(), Some("bench"));
        assert!(f.controller.is_recording().await);
        assert!(f.rx.recv().await.unwrap().contains(r#""recordingStatus":true"#));

        let info = f.controller.current_session().await.unwrap();
        let contents = std::fs::read_to_string(&info.path).unwrap();
        assert_eq!(contents, "time,Sensor 0,Sensor 1\n");
    }

    #[tokio::test]
    async fn test_start_while_active_keeps_session() {
        let mut f = fixture().await;
        f.controller.start_recording(None).await.unwrap();
        let first = f.controller.current_session().await.unwrap();
        f.rx.recv().await.unwrap();

        let outcome = f.controller.start_recording(Some("other".into())).await.unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyActive);
        assert_eq!(f.controller.current_session().await.unwrap().id, first.id);
        assert_eq!(f.registry.list().await.unwrap().len(), 1);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_short_name_is_rejected_and_state_stays_idle() {
        let f = fixture().await;
        let err = f.controller.start_recording(Some("ab".into())).await.unwrap_err();
        assert!(matches!(err, DaqError::InvalidRecordingName(_)));
        assert!(!f.controller.is_recording().await);
        assert!(f.registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rows_match_ingested_groups() {
        let mut f = fixture().await;

        // Not recording yet: broadcast only
        f.controller.ingest(&group(0.0)).await.unwrap();
        f.controller.start_recording(None).await.unwrap();
        f.controller.ingest(&group(1.0)).await.unwrap();
        f.controller.ingest(&[Reading::new(1, 2.0, 0.5)]).await.unwrap();
        let StopOutcome::Stopped(info) = f.controller.stop_recording().await.unwrap() else {
            panic!("expected stop");
        };
        f.controller.ingest(&group(3.0)).await.unwrap();

        assert_eq!(info.samples, 2);
        let contents = std::fs::read_to_string(&info.path).unwrap();
        assert_eq!(contents, "time,Sensor 0,Sensor 1\n0,10,20\n1,,0.5\n");

        let mut kinds = Vec::new();
        while let Ok(frame) = f.rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            ["data", "update-status", "data", "data", "update-status", "data"]
        );
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_a_no_op() {
        let mut f = fixture().await;
        assert_eq!(f.controller.stop_recording().await.unwrap(), StopOutcome::NotRecording);
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_active_session() {
        let f = fixture().await;
        f.controller.start_recording(None).await.unwrap();
        f.controller.ingest(&group(1.0)).await.unwrap();
        f.controller.shutdown().await.unwrap();
        assert!(!f.controller.is_recording().await);
        f.controller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_refused() {
        let f = fixture().await;
        f.controller.shutdown().await.unwrap();

        let err = f.controller.start_recording(Some("late".into())).await.unwrap_err();
        assert!(matches!(err, DaqError::Transport(_)));
        assert!(!f.controller.is_recording().await);
        assert!(f.registry.list().await.unwrap().is_empty());

        // Stopping does not reopen the controller
        assert_eq!(f.controller.stop_recording().await.unwrap(), StopOutcome::NotRecording);
        assert!(f.controller.start_recording(None).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_directory_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let sensors: Arc<[SensorDescriptor]> = vec![SensorDescriptor::new(0, "Sensor 0")].into();
        let hub = Arc::new(BroadcastHub::new(sensors, Duration::from_secs(1)));
        let controller = RecordingController::new(
            Arc::new(InMemoryRegistry::new()),
            hub,
            dir.path().join("absent"),
        );

        let err = controller.start_recording(None).await.unwrap_err();
        assert!(matches!(err, DaqError::Storage(_)));
        assert!(!controller.is_recording().await);
    }
}
