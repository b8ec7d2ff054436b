//! Sample queue between acquisition and delivery.
//!
//! A single-producer, single-consumer FIFO of reading groups. The acquisition loop
//! pushes without ever waiting; the drain loop suspends until the next item. The
//! drain loop is the only consumer and feeds both the recorder and the broadcast hub,
//! so both observe one total order.
//!
//! Two policies are available:
//!
//! - [`QueuePolicy::Unbounded`]: an unbounded `mpsc` channel, nothing is ever dropped
//! - [`QueuePolicy::DropOldest`]: a `broadcast` ring with one receiver; at capacity
//!   the oldest item is overwritten, bounding memory when delivery cannot keep up
//!   with acquisition. The capacity is rounded up to a power of two.
//!
//! Dropping the [`SampleSender`] closes the queue; the receiver still drains what is
//! left before reporting end of stream.

use crate::config::{QueueConfig, QueuePolicyKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

/// Queue overflow policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Never drop
    Unbounded,
    /// Keep at most `capacity` items
    DropOldest {
        /// Maximum queued items
        capacity: usize,
    },
}

impl From<&QueueConfig> for QueuePolicy {
    fn from(config: &QueueConfig) -> Self {
        match config.policy {
            QueuePolicyKind::Unbounded => QueuePolicy::Unbounded,
            QueuePolicyKind::DropOldest => QueuePolicy::DropOldest {
                capacity: config.capacity.max(1),
            },
        }
    }
}

enum Tx<T> {
    Unbounded(mpsc::UnboundedSender<T>),
    Ring {
        tx: broadcast::Sender<T>,
        capacity: usize,
    },
}

enum Rx<T> {
    Unbounded(mpsc::UnboundedReceiver<T>),
    Ring {
        rx: broadcast::Receiver<T>,
        capacity: usize,
    },
}

/// Producer half
pub struct SampleSender<T> {
    inner: Tx<T>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half
pub struct SampleReceiver<T> {
    inner: Rx<T>,
    dropped: Arc<AtomicU64>,
}

/// Create a connected sender/receiver pair.
pub fn sample_queue<T: Clone>(policy: QueuePolicy) -> (SampleSender<T>, SampleReceiver<T>) {
    let dropped = Arc::new(AtomicU64::new(0));
    let (tx, rx) = match policy {
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
        QueuePolicy::DropOldest { capacity } => {
            let capacity = capacity.max(1).next_power_of_two();
            let (tx, rx) = broadcast::channel(capacity);
            (Tx::Ring { tx, capacity }, Rx::Ring { rx, capacity })
        }
    };
    (
        SampleSender {
            inner: tx,
            dropped: dropped.clone(),
        },
        SampleReceiver { inner: rx, dropped },
    )
}

impl<T> SampleSender<T> {
    /// Enqueue an item. Never waits.
    ///
    /// Returns `false` if the bounded policy had to discard the oldest item. An item
    /// pushed after the receiver is gone is discarded silently.
    pub fn push(&self, item: T) -> bool {
        match &self.inner {
            Tx::Unbounded(tx) => {
                let _ = tx.send(item);
                true
            }
            Tx::Ring { tx, capacity } => {
                let evicted = tx.len() >= *capacity;
                let _ = tx.send(item);
                if evicted {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(dropped_total = total, "Sample queue full, dropped oldest sample");
                }
                !evicted
            }
        }
    }

    /// Items discarded by the bounded policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T: Clone> SampleReceiver<T> {
    /// Wait for the next item; `None` once the sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<T> {
        match &mut self.inner {
            Rx::Unbounded(rx) => rx.recv().await,
            Rx::Ring { rx, .. } => loop {
                match rx.recv().await {
                    Ok(item) => return Some(item),
                    // Already counted by the sender when it overwrote them
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Sample queue receiver lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Items currently waiting
    pub fn len(&self) -> usize {
        match &self.inner {
            Rx::Unbounded(rx) => rx.len(),
            // The receiver counts overwritten items until it observes the lag
            Rx::Ring { rx, capacity } => rx.len().min(*capacity),
        }
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items discarded by the bounded policy so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
