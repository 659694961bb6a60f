//! Abstract log-client surface (§6). The core never names `rdkafka` —
//! `replicamap-kafka` is the only crate that implements these traits against
//! a real broker; [`mock`] implements them in-memory for the tests in §8.

use crate::types::TopicPartition;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LogError {
    /// Raised by `poll` when a `wakeup()` (or equivalent cancellation) was
    /// observed. Not a failure: the driver unwinds cleanly without failing
    /// `steady` (§7).
    #[error("operation cancelled")]
    Cancelled,
    #[error("log client error: {0}")]
    Other(String),
}

/// One record returned from `poll`, tagged with its partition and offset.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub tp: TopicPartition,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
}

/// Consumer-side primitives used by the Offset Probe, Data Loader, and
/// Worker Driver (§6). A single implementation instance is reassigned
/// across phases (probe → load → steady-state tailing), mirroring how a
/// real Kafka consumer is reused rather than recreated per phase.
pub trait LogConsumer: Send {
    fn assign(&mut self, tps: &[TopicPartition]) -> Result<(), LogError>;
    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), LogError>;
    fn seek_to_beginning(&mut self, tp: &TopicPartition) -> Result<(), LogError>;
    /// Poll once. An empty result is legal and does not imply end-of-partition.
    fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, LogError>;
    fn position(&self, tp: &TopicPartition) -> Result<i64, LogError>;
    /// May transiently under-report relative to what is actually committed
    /// (§4.A, §9) — callers that depend on a strict upper bound must
    /// validate against a companion partition rather than trust this alone.
    fn end_offsets(&self, tps: &[TopicPartition]) -> Result<HashMap<TopicPartition, i64>, LogError>;
    /// Cancels an in-progress or future `poll` with `LogError::Cancelled`.
    fn wakeup(&self);
}

/// Producer-side primitive (§6). Fire-and-forget from the core's
/// perspective — acknowledgement is the caller's concern, not this
/// trait's (Design Notes: "must not block the applier on send").
pub trait LogProducer: Send + Sync {
    fn send(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<(), LogError>;
}

/// Deterministic in-memory fakes used by the test suites in §8. Not
/// exposed outside `cfg(test)`/dev-dependencies — there is no production
/// use for an in-memory "log".
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct PartitionLog {
        records: Vec<(Option<Vec<u8>>, Option<Vec<u8>>)>,
        reported_end_offset: Option<i64>,
    }

    /// A shared, append-only, partitioned in-memory log. Clone to hand the
    /// same backing store to multiple consumer/producer instances.
    #[derive(Clone)]
    pub struct InMemoryTopic {
        name: String,
        inner: Arc<Mutex<HashMap<i32, PartitionLog>>>,
    }

    impl InMemoryTopic {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                inner: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        /// Appends a record, returning its offset.
        pub fn append(&self, partition: i32, key: Option<Vec<u8>>, value: Option<Vec<u8>>) -> i64 {
            let mut guard = self.inner.lock().unwrap();
            let log = guard.entry(partition).or_default();
            log.records.push((key, value));
            (log.records.len() - 1) as i64
        }

        /// Overrides what `end_offsets` reports for this partition,
        /// independent of how many records are actually stored — used to
        /// simulate the transient under-reporting in §9/S3.
        pub fn set_reported_end_offset(&self, partition: i32, offset: i64) {
            let mut guard = self.inner.lock().unwrap();
            guard.entry(partition).or_default().reported_end_offset = Some(offset);
        }

        /// The true number of committed records (the "real" end offset).
        pub fn committed_len(&self, partition: i32) -> i64 {
            let guard = self.inner.lock().unwrap();
            guard.get(&partition).map(|l| l.records.len() as i64).unwrap_or(0)
        }

        fn reported_end_offset(&self, partition: i32) -> i64 {
            let guard = self.inner.lock().unwrap();
            match guard.get(&partition) {
                Some(log) => log.reported_end_offset.unwrap_or(log.records.len() as i64),
                None => 0,
            }
        }

        fn records_from(&self, partition: i32, from: i64) -> Vec<(i64, Option<Vec<u8>>, Option<Vec<u8>>)> {
            let guard = self.inner.lock().unwrap();
            match guard.get(&partition) {
                Some(log) => log
                    .records
                    .iter()
                    .enumerate()
                    .skip(from.max(0) as usize)
                    .map(|(i, (k, v))| (i as i64, k.clone(), v.clone()))
                    .collect(),
                None => Vec::new(),
            }
        }
    }

    /// Single-topic, single-threaded fake consumer. `poll` returns
    /// everything currently available from each assigned partition's
    /// cursor; there is no real blocking, so tests never need to sleep.
    pub struct MockConsumer {
        topic: InMemoryTopic,
        assigned: Vec<TopicPartition>,
        positions: HashMap<i32, i64>,
        cancelled: Arc<AtomicBool>,
    }

    impl MockConsumer {
        pub fn new(topic: InMemoryTopic) -> Self {
            Self {
                topic,
                assigned: Vec::new(),
                positions: HashMap::new(),
                cancelled: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn cancel_flag(&self) -> Arc<AtomicBool> {
            self.cancelled.clone()
        }
    }

    impl LogConsumer for MockConsumer {
        fn assign(&mut self, tps: &[TopicPartition]) -> Result<(), LogError> {
            for tp in tps {
                self.positions.entry(tp.partition).or_insert(0);
            }
            self.assigned = tps.to_vec();
            Ok(())
        }

        fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), LogError> {
            self.positions.insert(tp.partition, offset);
            Ok(())
        }

        fn seek_to_beginning(&mut self, tp: &TopicPartition) -> Result<(), LogError> {
            self.positions.insert(tp.partition, 0);
            Ok(())
        }

        fn poll(&mut self, _timeout: Duration) -> Result<Vec<LogRecord>, LogError> {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(LogError::Cancelled);
            }
            let mut out = Vec::new();
            for tp in self.assigned.clone() {
                let pos = *self.positions.get(&tp.partition).unwrap_or(&0);
                let recs = self.topic.records_from(tp.partition, pos);
                if let Some((last_offset, _, _)) = recs.last() {
                    self.positions.insert(tp.partition, last_offset + 1);
                }
                for (offset, key, value) in recs {
                    out.push(LogRecord {
                        tp: tp.clone(),
                        offset,
                        key,
                        value,
                    });
                }
            }
            Ok(out)
        }

        fn position(&self, tp: &TopicPartition) -> Result<i64, LogError> {
            Ok(*self.positions.get(&tp.partition).unwrap_or(&0))
        }

        fn end_offsets(
            &self,
            tps: &[TopicPartition],
        ) -> Result<HashMap<TopicPartition, i64>, LogError> {
            Ok(tps
                .iter()
                .map(|tp| (tp.clone(), self.topic.reported_end_offset(tp.partition)))
                .collect())
        }

        fn wakeup(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Fake producer recording every send, optionally mirroring it into a
    /// registered [`InMemoryTopic`] so downstream assertions can read it
    /// back as records rather than raw tuples.
    #[derive(Default)]
    pub struct MockProducer {
        topics: Mutex<HashMap<String, InMemoryTopic>>,
        sent: Mutex<Vec<(String, i32, Option<Vec<u8>>, Vec<u8>)>>,
    }

    impl MockProducer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register_topic(&self, topic: InMemoryTopic) {
            self.topics.lock().unwrap().insert(topic.name().to_string(), topic);
        }

        pub fn sent(&self) -> Vec<(String, i32, Option<Vec<u8>>, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl LogProducer for MockProducer {
        fn send(
            &self,
            topic: &str,
            partition: i32,
            key: Option<Vec<u8>>,
            value: Vec<u8>,
        ) -> Result<(), LogError> {
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), partition, key.clone(), value.clone()));
            if let Some(t) = self.topics.lock().unwrap().get(topic) {
                t.append(partition, key, Some(value));
            }
            Ok(())
        }
    }
}
