//! 4.E Worker Driver — `doRun`. Owns the sequencing; every other module in
//! this crate is a pure function or a stateless collaborator invoked here.

use crate::data_loader::load_data_for_partition;
use crate::error::ReplicaMapError;
use crate::handler::{DataSink, OpsUpdateHandler};
use crate::log::{LogConsumer, LogProducer};
use crate::offset_probe::find_last_flush_record;
use crate::op_applier::OpApplier;
use crate::queue::{CleanQueue, FlushQueue};
use crate::steady::{SteadyDetector, SteadyLatch};
use crate::types::{OpMessage, TopicPartition};
use std::collections::HashMap;
use std::time::Duration;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

pub struct OpsWorkerConfig {
    pub client_id: u64,
    pub assigned_partitions: Vec<i32>,
    pub flush_period_ops: i64,
    pub data_topic: String,
    pub ops_topic: String,
    pub flush_topic: String,
}

/// One worker per §5: owns `lastFlushNotifications`, the steady detector,
/// and the sequencing described in §4.E. Runs entirely on the calling
/// thread — callers spawn it on its own `std::thread` (SPEC_FULL §4.G).
pub struct OpsWorker {
    config: OpsWorkerConfig,
    applier: OpApplier,
}

impl OpsWorker {
    pub fn new(config: OpsWorkerConfig) -> Self {
        let applier = OpApplier::new(
            config.client_id,
            config.flush_period_ops,
            config.flush_topic.clone(),
        );
        Self { config, applier }
    }

    fn ops_tp(&self, partition: i32) -> TopicPartition {
        TopicPartition::new(self.config.ops_topic.clone(), partition)
    }

    fn data_tp(&self, partition: i32) -> TopicPartition {
        TopicPartition::new(self.config.data_topic.clone(), partition)
    }

    /// Runs to completion (which, barring cancellation or a fatal error,
    /// never happens — the ops poll loop runs for the life of the worker).
    /// `latch` is transitioned to `ok` the first time §4.D confirms the
    /// worker is caught up, and to `failed` on any non-cancellation error.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        data: Box<dyn LogConsumer>,
        ops: Box<dyn LogConsumer>,
        handler: &dyn OpsUpdateHandler,
        sink: &dyn DataSink,
        flush_queues: &HashMap<i32, Box<dyn FlushQueue>>,
        clean_queue: &dyn CleanQueue,
        producer: &dyn LogProducer,
        latch: &SteadyLatch,
    ) -> Result<(), ReplicaMapError> {
        let result = self.try_run(data, ops, handler, sink, flush_queues, clean_queue, producer, latch);
        if let Err(err) = &result {
            if !err.is_cancelled() {
                latch.mark_failed(err.clone());
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn try_run(
        &self,
        mut data: Box<dyn LogConsumer>,
        mut ops: Box<dyn LogConsumer>,
        handler: &dyn OpsUpdateHandler,
        sink: &dyn DataSink,
        flush_queues: &HashMap<i32, Box<dyn FlushQueue>>,
        clean_queue: &dyn CleanQueue,
        producer: &dyn LogProducer,
        latch: &SteadyLatch,
    ) -> Result<(), ReplicaMapError> {
        let mut last_flush_notifications: HashMap<TopicPartition, OpMessage> = HashMap::new();

        // Step 1: loadData(). The data consumer is closed on every exit
        // path, success or failure (§4.E, §5 "Resource discipline").
        let load_result = self.load_data(&mut *data, &mut *ops, sink, &mut last_flush_notifications);
        drop(data);
        let start_offsets = load_result?;

        // Step 2: seekOpsOffsets().
        let ops_tps: Vec<TopicPartition> = self
            .config
            .assigned_partitions
            .iter()
            .map(|p| self.ops_tp(*p))
            .collect();
        ops.assign(&ops_tps)?;
        for tp in &ops_tps {
            let offset = *start_offsets.get(tp).unwrap_or(&0);
            ops.seek(tp, offset)?;
        }

        // Step 3: processOps().
        self.process_ops(
            &mut *ops,
            &ops_tps,
            handler,
            flush_queues,
            clean_queue,
            producer,
            &mut last_flush_notifications,
            latch,
        )
    }

    /// Runs the Offset Probe and Data Loader for every assigned partition,
    /// returning the ops offset each partition's poll loop must resume from.
    fn load_data(
        &self,
        data: &mut dyn LogConsumer,
        ops: &mut dyn LogConsumer,
        sink: &dyn DataSink,
        last_flush_notifications: &mut HashMap<TopicPartition, OpMessage>,
    ) -> Result<HashMap<TopicPartition, i64>, ReplicaMapError> {
        let mut start_offsets = HashMap::new();

        for &partition in &self.config.assigned_partitions {
            let ops_tp = self.ops_tp(partition);
            let data_tp = self.data_tp(partition);

            let found = find_last_flush_record(
                ops,
                data,
                &ops_tp,
                &data_tp,
                self.config.flush_period_ops,
            )?;

            let (start_offset, flush_offset_data) = match &found {
                Some(f) => (f.notification.flush_offset_ops + 1, Some(f.notification.flush_offset_data)),
                None => (0, None),
            };

            load_data_for_partition(data, &data_tp, flush_offset_data, sink)?;

            if let Some(f) = found {
                last_flush_notifications.insert(ops_tp.clone(), f.notification);
            }
            start_offsets.insert(ops_tp, start_offset);
        }

        Ok(start_offsets)
    }

    /// The ops poll loop (§4.E step 3, §5 "Suspension points"). Runs until
    /// cancelled or a fatal error; once §4.D first confirms steady state,
    /// the detector is no longer consulted (`steady` is one-shot).
    #[allow(clippy::too_many_arguments)]
    fn process_ops(
        &self,
        ops: &mut dyn LogConsumer,
        ops_tps: &[TopicPartition],
        handler: &dyn OpsUpdateHandler,
        flush_queues: &HashMap<i32, Box<dyn FlushQueue>>,
        clean_queue: &dyn CleanQueue,
        producer: &dyn LogProducer,
        last_flush_notifications: &mut HashMap<TopicPartition, OpMessage>,
        latch: &SteadyLatch,
    ) -> Result<(), ReplicaMapError> {
        let mut detector = SteadyDetector::new(self.config.flush_period_ops);
        let mut became_steady = false;

        loop {
            let batch = ops.poll(POLL_TIMEOUT)?;

            let mut by_partition: HashMap<TopicPartition, Vec<crate::log::LogRecord>> = HashMap::new();
            for rec in batch {
                by_partition.entry(rec.tp.clone()).or_default().push(rec);
            }

            for (tp, recs) in &by_partition {
                let flush_queue = flush_queues.get(&tp.partition).ok_or_else(|| {
                    ReplicaMapError::Handler(format!("no flush queue registered for partition {tp}"))
                })?;
                self.applier.apply_batch(
                    tp,
                    recs,
                    handler,
                    flush_queue.as_ref(),
                    clean_queue,
                    producer,
                    last_flush_notifications,
                )?;
            }

            if !became_steady && detector.check(ops, ops_tps)? {
                became_steady = true;
                latch.mark_ok();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MapHandler;
    use crate::log::mock::{InMemoryTopic, MockConsumer, MockProducer};
    use crate::queue::{BoundedCleanQueue, BoundedFlushQueue};
    use crate::steady::steady_latch;
    use crate::types::OpType;
    use std::sync::mpsc::Receiver;

    fn append_put(topic: &InMemoryTopic, client_id: u64, op_id: u64, key: &str, value: &str) -> i64 {
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
        topic.append(0, Some(key.as_bytes().to_vec()), Some(msg.encode()))
    }

    struct Harness {
        worker: OpsWorker,
        handler: MapHandler,
        flush_queues: HashMap<i32, Box<dyn FlushQueue>>,
        #[allow(dead_code)]
        flush_rx: HashMap<i32, Receiver<crate::queue::FlushQueueEntry>>,
        clean_queue: BoundedCleanQueue,
        producer: MockProducer,
        latch: SteadyLatch,
    }

    impl Harness {
        fn new(client_id: u64, flush_period_ops: i64, partitions: Vec<i32>) -> Self {
            let (clean_queue, _clean_rx) = BoundedCleanQueue::new(64);
            let mut flush_queues: HashMap<i32, Box<dyn FlushQueue>> = HashMap::new();
            let mut flush_rx = HashMap::new();
            for &p in &partitions {
                let (q, rx) = BoundedFlushQueue::new(64);
                flush_queues.insert(p, Box::new(q));
                flush_rx.insert(p, rx);
            }
            let (latch, _steady_rx) = steady_latch();
            let worker = OpsWorker::new(OpsWorkerConfig {
                client_id,
                assigned_partitions: partitions,
                flush_period_ops,
                data_topic: "data".to_string(),
                ops_topic: "ops".to_string(),
                flush_topic: "flush".to_string(),
            });
            Self {
                worker,
                handler: MapHandler::new(),
                flush_queues,
                flush_rx,
                clean_queue,
                producer: MockProducer::new(),
                latch,
            }
        }
    }

    /// The ops loop runs for the worker's whole life (§4.E), so tests
    /// trigger the mock consumer's `wakeup()` shortly after launch and
    /// assert on the resulting clean cancellation plus whatever state was
    /// reached first.
    #[test]
    fn s1_empty_bootstrap_becomes_steady_with_an_empty_map() {
        let data_topic = InMemoryTopic::new("data");
        let ops_topic = InMemoryTopic::new("ops");
        let h = Harness::new(1, 3, vec![0]);

        let data = MockConsumer::new(data_topic);
        let ops = MockConsumer::new(ops_topic);
        let ops_cancel = ops.cancel_flag();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                ops_cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            let result = h.worker.run(
                Box::new(data),
                Box::new(ops),
                &h.handler,
                &h.handler,
                &h.flush_queues,
                &h.clean_queue,
                &h.producer,
                &h.latch,
            );
            assert!(result.unwrap_err().is_cancelled());
        });

        assert!(h.handler.is_empty());
    }

    #[test]
    fn s6_corrupted_data_partition_fails_steady_without_panicking() {
        let data_topic = InMemoryTopic::new("data");
        let ops_topic = InMemoryTopic::new("ops");
        // Data partition has content but no matching flush notification:
        // the resolved Open Question (SPEC_FULL §9) treats this as corrupt.
        data_topic.append(0, Some(b"a".to_vec()), Some(b"1".to_vec()));
        let h = Harness::new(1, 3, vec![0]);

        let data = MockConsumer::new(data_topic);
        let ops = MockConsumer::new(ops_topic);

        let result = h.worker.run(
            Box::new(data),
            Box::new(ops),
            &h.handler,
            &h.handler,
            &h.flush_queues,
            &h.clean_queue,
            &h.producer,
            &h.latch,
        );
        assert!(matches!(result.unwrap_err(), ReplicaMapError::RecoveryCorrupted { .. }));
    }

    #[test]
    fn recovers_from_a_prior_flush_then_applies_new_ops_and_becomes_steady() {
        // S2-style: a flush notification already exists; the worker must
        // replay data up to its boundary, resume ops past it, and apply a
        // new op before reaching steady.
        let data_topic = InMemoryTopic::new("data");
        let ops_topic = InMemoryTopic::new("ops");

        data_topic.append(0, Some(b"a".to_vec()), Some(b"1".to_vec())); // offset 0, covered by the flush
        let notification = OpMessage {
            op_type_raw: OpType::FlushNotification.into(),
            client_id: 1,
            op_id: 0,
            flush_offset_ops: 0,
            flush_offset_data: 0,
            expected_value: None,
            updated_value: None,
            function: None,
        };
        ops_topic.append(0, None, Some(notification.encode())); // ops offset 0
        append_put(&ops_topic, 1, 1, "b", "2"); // ops offset 1, must be applied after recovery

        let h = Harness::new(1, 3, vec![0]);
        let data = MockConsumer::new(data_topic);
        let ops = MockConsumer::new(ops_topic);
        let ops_cancel = ops.cancel_flag();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                ops_cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            });
            let result = h.worker.run(
                Box::new(data),
                Box::new(ops),
                &h.handler,
                &h.handler,
                &h.flush_queues,
                &h.clean_queue,
                &h.producer,
                &h.latch,
            );
            assert!(result.unwrap_err().is_cancelled());
        });

        assert_eq!(h.handler.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(h.handler.get(b"b"), Some(b"2".to_vec()));
    }

    /// A worker that stops and a fresh one that recovers from the same
    /// underlying logs must land on the same map: offset recovery is
    /// deterministic, not a function of which process happens to run it.
    #[test]
    fn a_restarted_worker_recovers_the_same_state_as_the_one_that_stopped() {
        let data_topic = InMemoryTopic::new("data");
        let ops_topic = InMemoryTopic::new("ops");
        for (i, key) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            append_put(&ops_topic, 1, i as u64, key, "v");
        }

        let run_once = || {
            let h = Harness::new(1, 1000, vec![0]);
            let data = MockConsumer::new(data_topic.clone());
            let ops = MockConsumer::new(ops_topic.clone());
            let ops_cancel = ops.cancel_flag();

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    ops_cancel.store(true, std::sync::atomic::Ordering::SeqCst);
                });
                let result = h.worker.run(
                    Box::new(data),
                    Box::new(ops),
                    &h.handler,
                    &h.handler,
                    &h.flush_queues,
                    &h.clean_queue,
                    &h.producer,
                    &h.latch,
                );
                assert!(result.unwrap_err().is_cancelled());
            });

            let mut entries: Vec<_> = ["a", "b", "c", "d", "e"]
                .iter()
                .map(|k| (*k, h.handler.get(k.as_bytes())))
                .collect();
            entries.sort();
            entries
        };

        let first = run_once();
        let second = run_once();
        assert_eq!(first, second);
        assert!(first.iter().all(|(_, v)| v.as_deref() == Some(b"v".as_slice())));
    }
}
