//! Error taxonomy (§7). `UnknownOpType` and `StaleFlushNotification` are
//! deliberately not variants here — the spec treats both as "logged and
//! dropped", never surfaced to a caller.

use crate::log::LogError;
use crate::types::TopicPartition;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ReplicaMapError {
    /// The data partition's end offset is at or below a flush boundary it
    /// was supposed to contain. Fatal: recovery cannot proceed safely.
    #[error(
        "recovery corrupted on {partition}: end offset {data_end_offset} <= flush boundary {flush_offset_data}"
    )]
    RecoveryCorrupted {
        partition: TopicPartition,
        flush_offset_data: i64,
        data_end_offset: i64,
    },

    /// Any other log-client failure, wrapped and surfaced through `steady`.
    #[error("transport error: {0}")]
    Transport(#[from] LogError),

    /// A handler invoked by the applier failed. Propagated as-is per §7
    /// ("the applier never throws past the driver").
    #[error("update handler error: {0}")]
    Handler(String),
}

impl ReplicaMapError {
    /// True for cancellation, which unwinds the driver's loop cleanly
    /// without failing the `steady` latch (§7, §5 "Cancellation").
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplicaMapError::Transport(LogError::Cancelled))
    }
}
