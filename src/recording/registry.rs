//! Recording registry.
//!
//! The controller only needs to create an entry per session; how entries are
//! persisted is up to the implementation. Two are provided:
//!
//! - [`InMemoryRegistry`] for tests and embedders
//! - [`JsonFileRegistry`], a single JSON array rewritten on every create

use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Registered recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingEntry {
    /// Unique id; also names the artifact file
    pub id: Uuid,
    /// Optional user label
    pub name: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl RecordingEntry {
    fn new(name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        }
    }

    /// Artifact file name, `<uuid-simple>.csv`
    pub fn file_name(&self) -> String {
        format!("{}.csv", self.id.simple())
    }
}

/// Create/query collaborator of the recording controller.
#[async_trait]
pub trait RecordingRegistry: Send + Sync {
    /// Create a new entry with a fresh id.
    async fn create(&self, name: Option<String>) -> AppResult<RecordingEntry>;

    /// All entries, oldest first.
    async fn list(&self) -> AppResult<Vec<RecordingEntry>>;
}

/// Registry that lives only as long as the process.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: Mutex<Vec<RecordingEntry>>,
}

impl InMemoryRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordingRegistry for InMemoryRegistry {
    async fn create(&self, name: Option<String>) -> AppResult<RecordingEntry> {
        let entry = RecordingEntry::new(name);
        self.entries.lock().await.push(entry.clone());
        Ok(entry)
    }

    async fn list(&self) -> AppResult<Vec<RecordingEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Registry persisted as a JSON array in one file.
pub struct JsonFileRegistry {
    path: PathBuf,
    entries: Mutex<Vec<RecordingEntry>>,
}

impl JsonFileRegistry {
    /// Open the registry file, starting empty if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DaqError::Registry(format!("Corrupt registry file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "Recording registry opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &[RecordingEntry]) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let body = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| DaqError::Registry(format!("Failed to write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl RecordingRegistry for JsonFileRegistry {
    async fn create(&self, name: Option<String>) -> AppResult<RecordingEntry> {
        let mut entries = self.entries.lock().await;
        let entry = RecordingEntry::new(name);
        entries.push(entry.clone());

        if let Err(e) = self.persist(&entries).await {
            entries.pop();
            return Err(e);
        }
        Ok(entry)
    }

    async fn list(&self) -> AppResult<Vec<RecordingEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}
