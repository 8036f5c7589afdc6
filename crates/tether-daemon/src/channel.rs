//! Relay channel primitives.
//!
//! Two disciplines share the transport:
//!
//! - **Latest-only** ([`telemetry_channel`]): a single-slot overwrite
//!   mailbox. The writer never blocks; a newer sample replaces any older
//!   undelivered one. Used for telemetry fan-out.
//! - **Ordered** ([`ordered_channel`]): a bounded FIFO with a write-side
//!   timeout. An elapsed enqueue budget fails the message, never the
//!   session. Used for action envelopes and in-session replies.
//!
//! There is no unbounded buffering anywhere on the relay path.

use std::time::Duration;

use tether_proto::envelope::envelope::Payload;
use tether_proto::TelemetryFrame;
use thiserror::Error;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};

/// Creates a latest-only telemetry channel.
#[must_use]
pub fn telemetry_channel() -> (TelemetryWriter, TelemetryReader) {
    let (tx, rx) = watch::channel(None);
    (TelemetryWriter { tx }, TelemetryReader { rx })
}

/// Write half of a latest-only channel. Cloned into the registry so any
/// game-client session can publish toward this destination.
#[derive(Debug, Clone)]
pub struct TelemetryWriter {
    tx: watch::Sender<Option<TelemetryFrame>>,
}

impl TelemetryWriter {
    /// Replaces whatever sample is in the slot. Never blocks.
    pub fn publish(&self, frame: TelemetryFrame) {
        self.tx.send_replace(Some(frame));
    }
}

/// Read half of a latest-only channel, owned by the destination session's
/// outbound task.
#[derive(Debug)]
pub struct TelemetryReader {
    rx: watch::Receiver<Option<TelemetryFrame>>,
}

impl TelemetryReader {
    /// Waits for a sample newer than the last one taken. Returns `None`
    /// once every writer is gone.
    pub async fn next(&mut self) -> Option<TelemetryFrame> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

/// Creates an ordered channel of the given depth.
///
/// # Panics
///
/// Panics if `depth` is zero; depth comes from validated configuration.
#[must_use]
pub fn ordered_channel(depth: usize) -> (OrderedSender, OrderedReceiver) {
    let (tx, rx) = mpsc::channel(depth);
    (OrderedSender { tx }, OrderedReceiver { rx })
}

/// Why an ordered enqueue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue stayed full past the enqueue budget.
    #[error("ordered channel stayed full past the enqueue budget")]
    Congested,
    /// The destination session is gone.
    #[error("ordered channel is closed")]
    Closed,
}

/// Write half of an ordered channel. Cloned into the registry so routers
/// and the correlator can enqueue toward this destination.
#[derive(Debug, Clone)]
pub struct OrderedSender {
    tx: mpsc::Sender<Payload>,
}

impl OrderedSender {
    /// Enqueues a payload, waiting up to `budget` for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Congested`] when the budget elapses and
    /// [`EnqueueError::Closed`] when the receiver is gone.
    pub async fn send_timeout(&self, payload: Payload, budget: Duration) -> Result<(), EnqueueError> {
        self.tx
            .send_timeout(payload, budget)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EnqueueError::Congested,
                SendTimeoutError::Closed(_) => EnqueueError::Closed,
            })
    }

    /// Enqueues a payload without waiting. Used on emergency paths that
    /// must not suspend the caller.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Congested`] when the queue is full and
    /// [`EnqueueError::Closed`] when the receiver is gone.
    pub fn try_send(&self, payload: Payload) -> Result<(), EnqueueError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Congested,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Read half of an ordered channel, owned by the destination session's
/// outbound task.
#[derive(Debug)]
pub struct OrderedReceiver {
    rx: mpsc::Receiver<Payload>,
}

impl OrderedReceiver {
    /// Receives the next payload in FIFO order. Returns `None` once every
    /// sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }

    /// Takes an already-queued payload without waiting. Used to drain
    /// pending frames while a session is closing.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.rx.try_recv().ok()
    }
}
