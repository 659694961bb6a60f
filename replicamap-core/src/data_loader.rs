//! 4.B Data Loader — `loadDataForPartition`.

use crate::error::ReplicaMapError;
use crate::handler::DataSink;
use crate::log::LogConsumer;
use crate::types::TopicPartition;
use std::time::Duration;

const LOAD_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Replays `data_tp` from the beginning up to (and including)
/// `flush_offset_data`, applying each record to `sink`. `None` means no
/// flush has ever happened for this partition (§4.A "none") — nothing to
/// replay, map starts empty.
///
/// Invariant (§3 #2): after this returns, `sink` reflects every `data`
/// record with offset ≤ `flush_offset_data` and no later one.
pub fn load_data_for_partition(
    data: &mut dyn LogConsumer,
    data_tp: &TopicPartition,
    flush_offset_data: Option<i64>,
    sink: &dyn DataSink,
) -> Result<(), ReplicaMapError> {
    let Some(boundary) = flush_offset_data else {
        return Ok(());
    };

    data.assign(std::slice::from_ref(data_tp))?;
    data.seek_to_beginning(data_tp)?;

    loop {
        let batch = data.poll(LOAD_POLL_TIMEOUT)?;

        for rec in &batch {
            if rec.offset > boundary {
                return Ok(());
            }
            sink.apply_data_record(rec.key.as_deref().unwrap_or_default(), rec.value.as_deref());
            if rec.offset == boundary {
                return Ok(());
            }
        }

        // A batch (empty or not) that didn't reach `boundary` is not by
        // itself proof of end-of-partition (poll's contract, log.rs) — a
        // compacted topic can also skip the exact boundary offset (§4.B).
        // Only trust `position` caught up with `end_offsets`.
        let pos = data.position(data_tp)?;
        let end = *data
            .end_offsets(std::slice::from_ref(data_tp))?
            .get(data_tp)
            .unwrap_or(&0);
        if pos >= end {
            if end <= boundary {
                return Err(ReplicaMapError::RecoveryCorrupted {
                    partition: data_tp.clone(),
                    flush_offset_data: boundary,
                    data_end_offset: end,
                });
            }
            // Reached the tail without ever observing `boundary` itself —
            // a compacted data topic may have dropped that exact record;
            // the true end lies past it, which is all §3 #2 requires.
            return Ok(());
        }
    }
}
