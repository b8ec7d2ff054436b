//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole control server.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur, from configuration and I/O issues to
//! hardware channel failures and rejected client commands.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parse failures from `figment` and semantic
//!   validation failures of the loaded settings.
//! - **`Io`**, **`Serial`**, **`SerialUnexpectedEof`**: hardware channel and filesystem
//!   problems. A `Serial` error while opening the channel is fatal at startup.
//! - **`Storage`**, **`Registry`**: failures while persisting a recording artifact or
//!   creating its registry entry.
//! - **`InvalidRecordingName`**, **`Protocol`**, **`Unimplemented`**, **`Relay`**:
//!   command-level failures. These are reported back to the connection that issued
//!   the command and never change system state.
//! - **`ConnectionClosed`**, **`Transport`**: a live connection went away.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types,
//! which keeps the `?` operator usable throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Application-wide error type.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial channel error: {0}")]
    Serial(String),

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Recording registry error: {0}")]
    Registry(String),

    #[error("Invalid recording name '{0}': must be at least 3 characters")]
    InvalidRecordingName(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed command: {0}")]
    Protocol(String),

    #[error("Operation not implemented: {0}")]
    Unimplemented(String),

    #[error("Relay write failed: {0}")]
    Relay(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl From<csv::Error> for DaqError {
    fn from(value: csv::Error) -> Self {
        DaqError::Storage(value.to_string())
    }
}

impl DaqError {
    /// Whether the error only concerns the command that produced it.
    ///
    /// Command-scoped errors are reported to the issuing connection and the
    /// connection stays open; everything else indicates a broken resource.
    pub fn is_command_scoped(&self) -> bool {
        matches!(
            self,
            DaqError::InvalidRecordingName(_)
                | DaqError::Protocol(_)
                | DaqError::Unimplemented(_)
                | DaqError::Relay(_)
                | DaqError::Registry(_)
                | DaqError::Storage(_)
        )
    }
}
