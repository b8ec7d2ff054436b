//! Control server lifecycle.
//!
//! [`ControlServer`] wires the components together and owns the two long-lived
//! tasks:
//!
//! ```text
//! SourceReader ──acquisition loop──▶ SampleQueue ──drain loop──▶ RecordingController
//!                                                                  ├─▶ CSV artifact
//!                                                                  └─▶ BroadcastHub
//! ```
//!
//! Live connections are attached with [`ControlServer::attach`], which sends the
//! setup message and hands back the connection's [`CommandDispatcher`].

use crate::config::Settings;
use crate::dispatcher::CommandDispatcher;
use crate::error::{AppResult, DaqError};
use crate::hub::{BroadcastHub, LiveConnection};
use crate::queue::{sample_queue, QueuePolicy, SampleReceiver, SampleSender};
use crate::recording::{JsonFileRegistry, RecordingController, RecordingRegistry};
use crate::relay::RelayActuator;
use crate::sensor::{ReadingGroup, SensorDescriptor};
use crate::source::{open_source, OutboundChannel, SourceReader};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Externally supplied collaborators for [`ControlServer::launch`].
pub struct ServerParts {
    /// Acquisition source
    pub source: Box<dyn SourceReader>,
    /// Outbound hardware channel for relay frames
    pub relay_channel: OutboundChannel,
    /// Recording registry
    pub registry: Arc<dyn RecordingRegistry>,
}

/// The running acquisition, broadcast and recording service.
pub struct ControlServer {
    hub: Arc<BroadcastHub>,
    recorder: Arc<RecordingController>,
    relay: Arc<RelayActuator>,
    subscriber_buffer: usize,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ControlServer {
    /// Open the configured source and registry, then launch.
    ///
    /// # Errors
    ///
    /// Fails when the settings are invalid, the hardware channel cannot be opened,
    /// or the registry file is unreadable.
    pub async fn start(settings: &Settings) -> AppResult<Arc<Self>> {
        settings.validate()?;
        let sensors = settings.acquisition.sensor_descriptors();
        let (source, relay_channel) = open_source(&settings.acquisition, &sensors).await?;
        let registry = JsonFileRegistry::open(&settings.storage.registry_file).await?;

        Self::launch(
            settings,
            ServerParts {
                source,
                relay_channel,
                registry: Arc::new(registry),
            },
        )
        .await
    }

    /// Launch with injected collaborators.
    pub async fn launch(settings: &Settings, parts: ServerParts) -> AppResult<Arc<Self>> {
        let recordings_dir = &settings.storage.recordings_dir;
        tokio::fs::create_dir_all(recordings_dir).await.map_err(|e| {
            DaqError::Storage(format!("Failed to create {}: {e}", recordings_dir.display()))
        })?;

        let sensors: Arc<[SensorDescriptor]> = settings.acquisition.sensor_descriptors().into();
        let hub = Arc::new(BroadcastHub::new(sensors, settings.server.send_timeout()));
        let recorder = Arc::new(RecordingController::new(
            parts.registry,
            hub.clone(),
            recordings_dir.clone(),
        ));
        let relay = Arc::new(RelayActuator::new(parts.relay_channel));

        let (queue_tx, queue_rx) = sample_queue(QueuePolicy::from(&settings.queue));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            source = %parts.source.describe(),
            sensors = hub.sensors().len(),
            recordings_dir = %recordings_dir.display(),
            "Control server starting"
        );

        let acquisition = tokio::spawn(acquisition_loop(parts.source, queue_tx, shutdown_rx.clone()));
        let drain = tokio::spawn(drain_loop(queue_rx, recorder.clone(), shutdown_rx));

        Ok(Arc::new(Self {
            hub,
            recorder,
            relay,
            subscriber_buffer: settings.server.subscriber_buffer,
            shutdown_tx,
            tasks: Mutex::new(vec![acquisition, drain]),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Register a live connection and return its dispatcher.
    ///
    /// The setup message is delivered before this returns.
    pub async fn attach(&self, conn: Arc<dyn LiveConnection>) -> AppResult<CommandDispatcher> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DaqError::Transport("server is shutting down".into()));
        }
        self.hub.connect(conn.clone()).await?;
        Ok(CommandDispatcher::new(
            conn,
            self.hub.clone(),
            self.recorder.clone(),
            self.relay.clone(),
        ))
    }

    /// Broadcast hub
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Recording controller
    pub fn recorder(&self) -> &Arc<RecordingController> {
        &self.recorder
    }

    /// Relay actuator
    pub fn relay(&self) -> &Arc<RelayActuator> {
        &self.relay
    }

    /// Per-connection frame buffer for transports
    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    /// Stop acquisition, close any active recording, then close every connection.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) -> AppResult<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("Control server shutting down");

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Service task ended abnormally");
            }
        }

        let mut errors = Vec::new();
        if let Err(e) = self.recorder.shutdown().await {
            errors.push(e);
        }
        self.hub.shutdown();

        if errors.is_empty() {
            tracing::info!("Control server stopped");
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

async fn acquisition_loop(
    mut source: Box<dyn SourceReader>,
    queue: SampleSender<ReadingGroup>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = source.next_readings() => match next {
                Ok(group) if group.is_empty() => continue,
                Ok(group) => {
                    queue.push(group);
                }
                Err(e) => {
                    tracing::error!(source = %source.describe(), error = %e, "Acquisition stopped");
                    break;
                }
            },
        }
    }
    tracing::debug!(dropped = queue.dropped(), "Acquisition loop exited");
}

async fn drain_loop(
    mut queue: SampleReceiver<ReadingGroup>,
    recorder: Arc<RecordingController>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(group) => {
                    if let Err(e) = recorder.ingest(&group).await {
                        tracing::warn!(error = %e, "Group not recorded");
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!("Drain loop exited");
}
