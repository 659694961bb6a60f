//! 4.A Offset Probe — `findLastFlushRecord` / `tryFindLastFlushRecord`.

use crate::error::ReplicaMapError;
use crate::log::LogConsumer;
use crate::types::{OpMessage, OpType, TopicPartition};
use std::time::Duration;

const PROBE_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// A flush notification found on `opsPart`, together with the ops offset
/// it was read at (used by the driver to compute the recovery anchor).
#[derive(Debug, Clone)]
pub struct FoundFlush {
    pub notification: OpMessage,
    pub ops_offset: i64,
}

enum ProbeStep {
    /// Searched from offset 0 and found nothing: no flush has ever
    /// published for this partition.
    NotExist,
    /// This window held nothing; the caller should widen the search.
    NotFound,
    Found(OpMessage, i64),
}

/// Returns the most recent valid `FLUSH_NOTIFICATION` on `ops_tp`, or
/// `None` if no flush has ever been published for this partition.
/// Tolerates an `ops` end offset that transiently under-reports what is
/// really committed on `data_tp` (§9).
pub fn find_last_flush_record(
    ops: &mut dyn LogConsumer,
    data: &dyn LogConsumer,
    ops_tp: &TopicPartition,
    data_tp: &TopicPartition,
    flush_period_ops: i64,
) -> Result<Option<FoundFlush>, ReplicaMapError> {
    let ops_ends = ops.end_offsets(std::slice::from_ref(ops_tp))?;
    let mut max = *ops_ends.get(ops_tp).unwrap_or(&0);

    loop {
        match try_find_last_flush_record(ops, ops_tp, max, flush_period_ops)? {
            ProbeStep::NotExist => {
                // Resolved Open Question (§9 / SPEC_FULL §9): a non-empty
                // data partition with no matching flush notification
                // cannot be trusted to be "just pre-flush writes" — treat
                // it as corruption rather than silently loading nothing.
                let data_end = *data
                    .end_offsets(std::slice::from_ref(data_tp))?
                    .get(data_tp)
                    .unwrap_or(&0);
                if data_end != 0 {
                    return Err(ReplicaMapError::RecoveryCorrupted {
                        partition: data_tp.clone(),
                        flush_offset_data: 0,
                        data_end_offset: data_end,
                    });
                }
                return Ok(None);
            }
            ProbeStep::NotFound => {
                max -= flush_period_ops;
                continue;
            }
            ProbeStep::Found(notification, ops_offset) => {
                let data_end = *data
                    .end_offsets(std::slice::from_ref(data_tp))?
                    .get(data_tp)
                    .unwrap_or(&0);
                if data_end > notification.flush_offset_data {
                    return Ok(Some(FoundFlush {
                        notification,
                        ops_offset,
                    }));
                }
                tracing::warn!(
                    partition = %data_tp,
                    flush_offset_data = notification.flush_offset_data,
                    data_end_offset = data_end,
                    "flush notification references data not yet visible on the data partition; retrying with an earlier window"
                );
                max -= flush_period_ops;
            }
        }
    }
}

/// Seeks to `max(max - flush_period_ops, 0)` and scans forward in offset
/// order for the first `FLUSH_NOTIFICATION`, aborting once a record's
/// offset exceeds `max`.
fn try_find_last_flush_record(
    ops: &mut dyn LogConsumer,
    ops_tp: &TopicPartition,
    max: i64,
    flush_period_ops: i64,
) -> Result<ProbeStep, ReplicaMapError> {
    let off = (max - flush_period_ops).max(0);
    ops.assign(std::slice::from_ref(ops_tp))?;
    ops.seek(ops_tp, off)?;

    loop {
        let batch = ops.poll(PROBE_POLL_TIMEOUT)?;
        if batch.is_empty() {
            return Ok(if off == 0 {
                ProbeStep::NotExist
            } else {
                ProbeStep::NotFound
            });
        }
        for rec in &batch {
            if rec.offset > max {
                return Ok(if off == 0 {
                    ProbeStep::NotExist
                } else {
                    ProbeStep::NotFound
                });
            }
            if rec.key.is_none() {
                if let Some(value) = &rec.value {
                    if let Ok(msg) = OpMessage::decode(value) {
                        if msg.op_type() == OpType::FlushNotification {
                            return Ok(ProbeStep::Found(msg, rec.offset));
                        }
                    }
                }
            }
        }
    }
}
