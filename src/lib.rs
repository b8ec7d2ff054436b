//! # Stand DAQ Core Library
//!
//! This crate is the control core of a sensor test stand. It reads readings from a
//! hardware serial channel (or a simulated stand-in), streams them to every connected
//! viewer in real time, lets any viewer start or stop a durable recording of the
//! stream, and forwards relay commands back to the hardware.
//!
//! ## Crate Structure
//!
//! - **`config`**: layered settings (`figment`: defaults, TOML file, environment).
//! - **`error`**: the `DaqError` enum and `AppResult` alias used everywhere.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`sensor`**: sensor descriptors and readings.
//! - **`protocol`**: JSON wire formats for live connections and the hardware link.
//! - **`source`**: the `SourceReader` trait with hardware and simulated variants.
//! - **`queue`**: the FIFO between acquisition and delivery.
//! - **`hub`**: the live subscriber set and concurrent broadcast.
//! - **`recording`**: the exclusive recording state machine, CSV artifacts, and the
//!   recording registry.
//! - **`relay`**: serialized relay frames on the outbound hardware channel.
//! - **`dispatcher`**: per-connection command handling.
//! - **`service`**: `ControlServer`, which wires everything and owns the long-lived tasks.
//! - **`server`**: the axum WebSocket endpoint.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod queue;
pub mod recording;
pub mod relay;
pub mod sensor;
pub mod server;
pub mod service;
pub mod source;

pub use config::Settings;
pub use error::{AppResult, DaqError};
pub use service::{ControlServer, ServerParts};
