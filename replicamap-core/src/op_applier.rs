//! 4.C Op Applier — `applyOpsTopicRecords`.

use crate::error::ReplicaMapError;
use crate::handler::{OpsUpdateHandler, UpdateOutcome};
use crate::log::{LogError, LogProducer, LogRecord};
use crate::queue::{CleanQueue, FlushQueue, FlushQueueEntry};
use crate::types::{OpMessage, OpType, TopicPartition};
use std::collections::HashMap;

pub struct OpApplier {
    client_id: u64,
    flush_period_ops: i64,
    flush_topic: String,
}

impl OpApplier {
    pub fn new(client_id: u64, flush_period_ops: i64, flush_topic: impl Into<String>) -> Self {
        assert!(flush_period_ops > 0, "flush_period_ops must be positive");
        Self {
            client_id,
            flush_period_ops,
            flush_topic: flush_topic.into(),
        }
    }

    /// Applies a consecutive, same-partition slice of `ops` records in
    /// order (§4.C). `last_flush_notifications` is the caller-owned,
    /// worker-wide map this batch may update.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_batch(
        &self,
        ops_tp: &TopicPartition,
        recs: &[LogRecord],
        handler: &dyn OpsUpdateHandler,
        flush_queue: &dyn FlushQueue,
        clean_queue: &dyn CleanQueue,
        producer: &dyn LogProducer,
        last_flush_notifications: &mut HashMap<TopicPartition, OpMessage>,
    ) -> Result<(), ReplicaMapError> {
        let last_index = recs.len().saturating_sub(1);

        for (i, rec) in recs.iter().enumerate() {
            let msg = OpMessage::decode(rec.value.as_deref().unwrap_or_default())
                .map_err(|e| ReplicaMapError::Transport(LogError::Other(e.to_string())))?;

            let need_flush = msg.client_id == self.client_id
                && rec.offset > 0
                && rec.offset % self.flush_period_ops == 0;
            let mut need_clean = false;
            let mut out = UpdateOutcome::default();
            let mut updated = false;

            match &rec.key {
                None => {
                    self.handle_control_record(ops_tp, rec.offset, &msg, last_flush_notifications, &mut need_clean);
                }
                Some(key) => {
                    updated = handler.apply_received_update(
                        msg.client_id,
                        msg.op_id,
                        msg.op_type(),
                        key,
                        msg.expected_value.as_deref(),
                        msg.updated_value.as_deref(),
                        msg.function.as_deref(),
                        &mut out,
                    );
                }
            }

            let is_flush_point = need_clean || need_flush || i == last_index;
            flush_queue
                .add(FlushQueueEntry {
                    key: rec.key.clone().unwrap_or_default(),
                    value: out.value,
                    ops_offset: rec.offset,
                    updated,
                    is_flush_point,
                })
                .map_err(|e| ReplicaMapError::Transport(LogError::Other(e.to_string())))?;

            if need_flush {
                let last_clean_offset_ops = last_flush_notifications
                    .get(ops_tp)
                    .map(|m| m.flush_offset_ops)
                    .unwrap_or(-1);
                let request = OpMessage::flush_request(self.client_id, rec.offset, last_clean_offset_ops);
                producer
                    .send(&self.flush_topic, ops_tp.partition, None, request.encode())
                    .map_err(ReplicaMapError::from)?;
            } else if need_clean {
                clean_queue
                    .push(msg.clone())
                    .map_err(|e| ReplicaMapError::Transport(LogError::Other(e.to_string())))?;
            }
        }

        Ok(())
    }

    fn handle_control_record(
        &self,
        ops_tp: &TopicPartition,
        offset: i64,
        msg: &OpMessage,
        last_flush_notifications: &mut HashMap<TopicPartition, OpMessage>,
        need_clean: &mut bool,
    ) {
        match msg.op_type() {
            OpType::FlushNotification => {
                let is_newer = match last_flush_notifications.get(ops_tp) {
                    None => true,
                    Some(existing) => msg.flush_offset_ops > existing.flush_offset_ops,
                };
                if is_newer {
                    last_flush_notifications.insert(ops_tp.clone(), msg.clone());
                    if msg.client_id != self.client_id {
                        *need_clean = true;
                    }
                } else {
                    tracing::debug!(
                        partition = %ops_tp,
                        offset,
                        flush_offset_ops = msg.flush_offset_ops,
                        "stale flush notification dropped"
                    );
                }
            }
            OpType::Unknown(byte) => {
                tracing::warn!(partition = %ops_tp, offset, op_type = byte, "unknown op type, skipping");
            }
            other => {
                tracing::warn!(partition = %ops_tp, offset, op_type = ?other, "unexpected control record with null key");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MapHandler;
    use crate::log::mock::MockProducer;
    use crate::queue::BoundedFlushQueue;

    fn put(client_id: u64, op_id: u64, offset: i64, key: &str, value: &str) -> LogRecord {
        let msg = OpMessage {
            op_type_raw: OpType::Put.into(),
            client_id,
            op_id,
            flush_offset_ops: 0,
            flush_offset_data: 0,
            expected_value: None,
            updated_value: Some(value.as_bytes().to_vec()),
            function: None,
        };
        LogRecord {
            tp: TopicPartition::new("ops", 0),
            offset,
            key: Some(key.as_bytes().to_vec()),
            value: Some(msg.encode()),
        }
    }

    fn flush_notification_record(client_id: u64, offset: i64, flush_offset_ops: i64) -> LogRecord {
        let msg = OpMessage {
            op_type_raw: OpType::FlushNotification.into(),
            client_id,
            op_id: 0,
            flush_offset_ops,
            flush_offset_data: 0,
            expected_value: None,
            updated_value: None,
            function: None,
        };
        LogRecord {
            tp: TopicPartition::new("ops", 0),
            offset,
            key: None,
            value: Some(msg.encode()),
        }
    }

    struct Harness {
        applier: OpApplier,
        handler: MapHandler,
        flush_queue: crate::queue::BoundedFlushQueue,
        flush_rx: std::sync::mpsc::Receiver<FlushQueueEntry>,
        clean_queue: crate::queue::BoundedCleanQueue,
        clean_rx: std::sync::mpsc::Receiver<OpMessage>,
        producer: MockProducer,
        state: HashMap<TopicPartition, OpMessage>,
    }

    impl Harness {
        fn new(client_id: u64, flush_period_ops: i64) -> Self {
            let (flush_queue, flush_rx) = BoundedFlushQueue::new(64);
            let (clean_queue, clean_rx) = crate::queue::BoundedCleanQueue::new(64);
            Self {
                applier: OpApplier::new(client_id, flush_period_ops, "flush"),
                handler: MapHandler::new(),
                flush_queue,
                flush_rx,
                clean_queue,
                clean_rx,
                producer: MockProducer::new(),
                state: HashMap::new(),
            }
        }

        fn apply(&mut self, tp: &TopicPartition, recs: &[LogRecord]) {
            self.applier
                .apply_batch(
                    tp,
                    recs,
                    &self.handler,
                    &self.flush_queue,
                    &self.clean_queue,
                    &self.producer,
                    &mut self.state,
                )
                .unwrap();
        }
    }

    #[test]
    fn own_flush_cadence_emits_flush_requests_at_every_batch_record() {
        // S4: flushPeriodOps=3, clientId=C, offsets [3,4,5,6] all from C.
        let tp = TopicPartition::new("ops", 0);
        let mut h = Harness::new(42, 3);
        let recs = vec![
            put(42, 1, 3, "a", "v"),
            put(42, 2, 4, "b", "v"),
            put(42, 3, 5, "c", "v"),
            put(42, 4, 6, "d", "v"),
        ];
        h.apply(&tp, &recs);

        let entries: Vec<_> = h.flush_rx.try_iter().collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries.iter().map(|e| e.ops_offset).collect::<Vec<_>>(), vec![3, 4, 5, 6]);
        // Flush points: offset 3, offset 6 (own cadence) and offset 6 (last of batch).
        assert!(entries[0].is_flush_point);
        assert!(!entries[1].is_flush_point);
        assert!(!entries[2].is_flush_point);
        assert!(entries[3].is_flush_point);

        let sent = h.producer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "flush");
        assert_eq!(sent[1].0, "flush");
    }

    #[test]
    fn foreign_flush_notification_updates_state_and_pushes_clean_queue() {
        // S5: worker C1 receives a notification from C2 with higher flushOffsetOps.
        let tp = TopicPartition::new("ops", 0);
        let mut h = Harness::new(1 /* C1 */, 3);
        let recs = vec![flush_notification_record(2 /* C2 */, 10, 7)];
        h.apply(&tp, &recs);

        assert_eq!(h.state.get(&tp).unwrap().flush_offset_ops, 7);
        let cleaned: Vec<_> = h.clean_rx.try_iter().collect();
        assert_eq!(cleaned.len(), 1);
        assert!(h.producer.sent().is_empty());
        assert!(h.handler.is_empty());
    }

    #[test]
    fn stale_notification_is_dropped_silently() {
        let tp = TopicPartition::new("ops", 0);
        let mut h = Harness::new(1, 3);
        h.apply(&tp, &[flush_notification_record(2, 10, 7)]);
        h.apply(&tp, &[flush_notification_record(2, 11, 5)]); // stale: 5 < 7

        assert_eq!(h.state.get(&tp).unwrap().flush_offset_ops, 7);
    }

    #[test]
    fn every_record_produces_exactly_one_flush_queue_entry_in_order() {
        let tp = TopicPartition::new("ops", 0);
        let mut h = Harness::new(9, 100);
        let recs = vec![put(9, 1, 0, "a", "1"), put(9, 2, 1, "b", "2"), put(9, 3, 2, "a", "3")];
        h.apply(&tp, &recs);

        let entries: Vec<_> = h.flush_rx.try_iter().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().map(|e| e.ops_offset).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(entries.iter().take(2).all(|e| !e.is_flush_point));
        assert!(entries[2].is_flush_point); // last of batch
    }
}
