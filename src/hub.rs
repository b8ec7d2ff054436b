//! Broadcast hub: the live subscriber set and concurrent fan-out.
//!
//! ```text
//! drain loop ──publish──▶ BroadcastHub ──┬──▶ connection A (own channel)
//!                                        ├──▶ connection B (own channel)
//!                                        └──▶ connection C (own channel)
//! ```
//!
//! Every publish takes a snapshot of the subscriber set, releases the lock, and
//! issues all sends concurrently. A subscriber whose send fails or exceeds the
//! delivery deadline is disconnected; the others are unaffected and the caller
//! never sees the failure.

use crate::error::{AppResult, DaqError};
use crate::protocol::{Frame, ServerMessage};
use crate::sensor::SensorDescriptor;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one live connection.
pub type ConnectionId = Uuid;

/// One connected subscriber.
#[async_trait]
pub trait LiveConnection: Send + Sync {
    /// Stable identity for the lifetime of the connection
    fn id(&self) -> ConnectionId;

    /// Deliver one text frame; may suspend while the transport is busy.
    async fn send(&self, frame: Frame) -> AppResult<()>;

    /// Stop accepting frames and let the transport close.
    fn close(&self);
}

/// Connection backed by a bounded channel of frames.
///
/// A transport task (the WebSocket writer, or a test) owns the receiver. Dropping
/// the receiver makes further sends fail; [`LiveConnection::close`] drops the
/// sender so the receiver sees end of stream.
pub struct ChannelConnection {
    id: ConnectionId,
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
}

impl ChannelConnection {
    /// Create a connection buffering up to `capacity` frames.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            sender: Mutex::new(Some(tx)),
        });
        (conn, rx)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

#[async_trait]
impl LiveConnection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: Frame) -> AppResult<()> {
        let sender = self.sender.lock().clone().ok_or(DaqError::ConnectionClosed)?;
        sender
            .send(frame)
            .await
            .map_err(|_| DaqError::ConnectionClosed)
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers in the snapshot
    pub attempted: usize,
    /// Successful deliveries
    pub delivered: usize,
    /// Subscribers disconnected because delivery failed
    pub dropped: usize,
}

/// The live subscriber set.
pub struct BroadcastHub {
    sensors: Arc<[SensorDescriptor]>,
    subscribers: RwLock<HashMap<ConnectionId, Arc<dyn LiveConnection>>>,
    send_timeout: Duration,
}

impl BroadcastHub {
    /// Create a hub announcing `sensors` to each new connection.
    pub fn new(sensors: Arc<[SensorDescriptor]>, send_timeout: Duration) -> Self {
        Self {
            sensors,
            subscribers: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Configured sensors
    pub fn sensors(&self) -> &[SensorDescriptor] {
        &self.sensors
    }

    /// Send the setup message, then register the connection.
    ///
    /// Registration happens only after setup was delivered, so no data message can
    /// reach the connection first. If setup fails the connection is not registered.
    pub async fn connect(&self, conn: Arc<dyn LiveConnection>) -> AppResult<()> {
        let setup = ServerMessage::setup(&self.sensors).to_frame()?;
        self.deliver(conn.as_ref(), setup).await?;

        let id = conn.id();
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, conn);
            subscribers.len()
        };
        tracing::info!(connection_id = %id, subscribers = count, "Live connection registered");
        Ok(())
    }

    /// Remove and close a connection. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.subscribers.write().remove(&id);
        match removed {
            Some(conn) => {
                conn.close();
                tracing::info!(connection_id = %id, "Live connection removed");
                true
            }
            None => false,
        }
    }

    /// Serialize once and fan out to every current subscriber.
    pub async fn publish(&self, message: &ServerMessage) -> PublishReport {
        match message.to_frame() {
            Ok(frame) => self.publish_frame(frame).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast message");
                PublishReport::default()
            }
        }
    }

    /// Fan out an already serialized frame.
    pub async fn publish_frame(&self, frame: Frame) -> PublishReport {
        let snapshot: Vec<Arc<dyn LiveConnection>> =
            self.subscribers.read().values().cloned().collect();
        if snapshot.is_empty() {
            return PublishReport::default();
        }

        let sends = snapshot.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn.id(), self.deliver(conn.as_ref(), frame).await) }
        });
        let results = join_all(sends).await;

        let mut report = PublishReport {
            attempted: results.len(),
            ..Default::default()
        };
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %id, error = %e, "Delivery failed, dropping subscriber");
                    self.disconnect(id);
                    report.dropped += 1;
                }
            }
        }
        report
    }

    async fn deliver(&self, conn: &dyn LiveConnection, frame: Frame) -> AppResult<()> {
        match tokio::time::timeout(self.send_timeout, conn.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(DaqError::Transport(format!(
                "delivery exceeded {:?}",
                self.send_timeout
            ))),
        }
    }

    /// Close every connection and clear the set.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.subscribers.write().drain().map(|(_, c)| c).collect();
        let count = drained.len();
        for conn in drained {
            conn.close();
        }
        tracing::info!(closed = count, "Broadcast hub shut down");
    }

    /// Number of registered connections
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Reading;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hub() -> BroadcastHub {
        let sensors: Arc<[SensorDescriptor]> = vec![
            SensorDescriptor::new(0, "Sensor 0"),
            SensorDescriptor::new(1, "Sensor 1"),
        ]
        .into();
        BroadcastHub::new(sensors, Duration::from_millis(200))
    }

    /// Connection whose sends always fail, counting attempts.
    struct BrokenConnection {
        id: ConnectionId,
        attempts: AtomicUsize,
        fail_setup: bool,
    }

    impl BrokenConnection {
        fn new(fail_setup: bool) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                attempts: AtomicUsize::new(0),
                fail_setup,
            })
        }
    }

    #[async_trait]
    impl LiveConnection for BrokenConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send(&self, _frame: Frame) -> AppResult<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 && !self.fail_setup {
                return Ok(());
            }
            Err(DaqError::ConnectionClosed)
        }

        fn close(&self) {}
    }

    /// Connection that accepts setup, then holds every later send until released.
    struct GatedConnection {
        id: ConnectionId,
        frames: Mutex<Vec<Frame>>,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedConnection {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                frames: Mutex::new(Vec::new()),
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl LiveConnection for GatedConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn send(&self, frame: Frame) -> AppResult<()> {
            let is_setup = self.frames.lock().is_empty();
            self.frames.lock().push(frame);
            if !is_setup {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }

        fn close(&self) {}
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| serde_json::from_str(&frame).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_membership_changes_during_publish_use_the_snapshot() {
        let hub = Arc::new(hub());
        let gated = GatedConnection::new();
        let (steady, mut steady_rx) = ChannelConnection::new(8);
        let (leaving, mut leaving_rx) = ChannelConnection::new(8);
        hub.connect(gated.clone()).await.unwrap();
        hub.connect(steady).await.unwrap();
        hub.connect(leaving.clone()).await.unwrap();
        drain(&mut steady_rx);
        drain(&mut leaving_rx);

        let publisher = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.publish(&ServerMessage::recording_status(true)).await })
        };
        gated.entered.notified().await;

        // Publish is suspended inside the gated send
        let (joining, mut joining_rx) = ChannelConnection::new(8);
        hub.connect(joining).await.unwrap();
        assert!(hub.disconnect(leaving.id()));

        gated.release.notify_one();
        let report = publisher.await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.dropped, 0);

        assert_eq!(gated.frames.lock().len(), 2);
        let steady_frames = drain(&mut steady_rx);
        assert_eq!(steady_frames.len(), 1);
        assert_eq!(steady_frames[0]["type"], "update-status");

        let joining_frames = drain(&mut joining_rx);
        assert_eq!(joining_frames.len(), 1);
        assert_eq!(joining_frames[0]["type"], "setup");

        assert!(drain(&mut leaving_rx).len() <= 1);
        assert_eq!(hub.subscriber_count(), 3);
    }

    #[tokio::test]
    async fn test_setup_is_the_first_frame() {
        let hub = hub();
        let (conn, mut rx) = ChannelConnection::new(8);
        hub.connect(conn).await.unwrap();

        let setup: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(setup["type"], "setup");
        assert_eq!(setup["sensors"].as_array().unwrap().len(), 2);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_setup_does_not_register() {
        let hub = hub();
        let conn = BrokenConnection::new(true);
        assert!(hub.connect(conn).await.is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = hub();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, mut rx) = ChannelConnection::new(8);
            hub.connect(conn).await.unwrap();
            rx.recv().await.unwrap();
            receivers.push(rx);
        }

        let msg = ServerMessage::data(&[Reading::new(0, 1.0, 0.5)], hub.sensors());
        let report = hub.publish(&msg).await;
        assert_eq!(
            report,
            PublishReport {
                attempted: 3,
                delivered: 3,
                dropped: 0
            }
        );

        for rx in receivers.iter_mut() {
            let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["type"], "data");
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_is_isolated_and_removed() {
        let hub = hub();
        let (good_a, mut rx_a) = ChannelConnection::new(8);
        let (good_b, mut rx_b) = ChannelConnection::new(8);
        let broken = BrokenConnection::new(false);
        hub.connect(good_a).await.unwrap();
        hub.connect(broken.clone()).await.unwrap();
        hub.connect(good_b).await.unwrap();
        rx_a.recv().await.unwrap();
        rx_b.recv().await.unwrap();

        let report = hub.publish(&ServerMessage::recording_status(true)).await;
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(hub.subscriber_count(), 2);

        assert!(rx_a.recv().await.unwrap().contains("update-status"));
        assert!(rx_b.recv().await.unwrap().contains("update-status"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_times_out_without_blocking_others() {
        let hub = hub();
        // Capacity 1: the setup frame fills it and nobody drains
        let (stalled, _stalled_rx) = ChannelConnection::new(1);
        let (live, mut live_rx) = ChannelConnection::new(8);
        hub.connect(stalled.clone()).await.unwrap();
        hub.connect(live).await.unwrap();
        live_rx.recv().await.unwrap();

        let report = hub.publish(&ServerMessage::recording_status(false)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert!(stalled.is_closed());
        assert!(live_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_transport_is_disconnected_on_next_publish() {
        let hub = hub();
        let (conn, rx) = ChannelConnection::new(8);
        hub.connect(conn).await.unwrap();
        drop(rx);

        let report = hub.publish(&ServerMessage::recording_status(true)).await;
        assert_eq!(report.dropped, 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let hub = hub();
        let (conn, _rx) = ChannelConnection::new(8);
        let id = conn.id();
        hub.connect(conn.clone()).await.unwrap();

        assert!(hub.disconnect(id));
        assert!(!hub.disconnect(id));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_connections() {
        let hub = hub();
        let (a, mut rx_a) = ChannelConnection::new(8);
        let (b, _rx_b) = ChannelConnection::new(8);
        hub.connect(a.clone()).await.unwrap();
        hub.connect(b.clone()).await.unwrap();

        hub.shutdown();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(a.is_closed() && b.is_closed());

        // The setup frame is still readable, then the stream ends
        assert!(rx_a.recv().await.is_some());
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_a_no_op() {
        let hub = hub();
        let report = hub.publish(&ServerMessage::recording_status(true)).await;
        assert_eq!(report, PublishReport::default());
    }
}
