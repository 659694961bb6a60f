//! Per-partition flush queue and the shared clean queue (§3, §6).
//!
//! Both are single-producer (the applier) / single-consumer (the flush
//! worker, or the clean/compaction consumer) hand-offs, out of scope for
//! this crate to *drain* — only to accept entries from, in order.

use crate::types::OpMessage;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use thiserror::Error;

/// One entry handed to the downstream flush worker for a given partition
/// (§4.C step 4). `is_flush_point` tells the flush worker this entry is
/// worth considering for action (a foreign flush happened, this client's
/// own flush cadence was hit, or this is simply the last record of the
/// batch).
#[derive(Debug, Clone)]
pub struct FlushQueueEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub ops_offset: i64,
    pub updated: bool,
    pub is_flush_point: bool,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("flush queue closed: no receiver left")]
    Closed,
}

/// Per-partition ordered hand-off to the flush worker. Entries must be
/// accepted in the order given (§4.C ordering contract) — a single producer
/// feeding a bounded channel gets this for free regardless of whether a
/// full queue blocks or drops.
pub trait FlushQueue: Send + Sync {
    fn add(&self, entry: FlushQueueEntry) -> Result<(), QueueError>;
}

/// Bounded MPSC-backed flush queue (§3: "bounded ordered buffer"). `add`
/// never blocks the applier: a full queue is backpressure the downstream
/// flush worker isn't keeping up with, surfaced as a metric rather than
/// stalling the ops poll loop (and with it, steady detection) indefinitely
/// (§6).
pub struct BoundedFlushQueue {
    sender: SyncSender<FlushQueueEntry>,
}

impl BoundedFlushQueue {
    pub fn new(capacity: usize) -> (Self, Receiver<FlushQueueEntry>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl FlushQueue for BoundedFlushQueue {
    fn add(&self, entry: FlushQueueEntry) -> Result<(), QueueError> {
        match self.sender.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::counter!("replicamap_flush_queue_full_total").increment(1);
                tracing::warn!("flush queue full, dropping entry");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }
}

/// Forwards foreign flush notifications (§4.C step 6) to the clean/compaction
/// consumer. Shared across every partition's applier on this worker.
pub trait CleanQueue: Send + Sync {
    fn push(&self, notification: OpMessage) -> Result<(), QueueError>;
}

pub struct BoundedCleanQueue {
    sender: SyncSender<OpMessage>,
}

impl BoundedCleanQueue {
    pub fn new(capacity: usize) -> (Self, Receiver<OpMessage>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl CleanQueue for BoundedCleanQueue {
    fn push(&self, notification: OpMessage) -> Result<(), QueueError> {
        match self.sender.try_send(notification) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                metrics::counter!("replicamap_clean_queue_full_total").increment(1);
                tracing::warn!("clean queue full, dropping foreign flush notification");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(QueueError::Closed),
        }
    }
}
