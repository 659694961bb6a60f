use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, Consumer, DefaultConsumerContext};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::{ClientConfig, Message};

use replicamap_core::log::{LogConsumer, LogError, LogRecord};
use replicamap_core::TopicPartition;

use crate::config::KafkaConfig;

const WATERMARK_TIMEOUT: Duration = Duration::from_secs(5);
const INTERNAL_POLL_SLICE: Duration = Duration::from_millis(100);

/// `replicamap_core::log::LogConsumer` over a plain `BaseConsumer` (§4.F):
/// synchronous `poll`, manual `assign`/`seek`, matching the thread-per-worker
/// blocking model this crate's caller runs under — not `StreamConsumer`,
/// which is for `async`/`tokio` callers.
pub struct KafkaLogConsumer {
    inner: BaseConsumer<DefaultConsumerContext>,
    cancelled: Arc<AtomicBool>,
}

impl KafkaLogConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", "false")
            .set("statistics.interval.ms", "10000");

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        tracing::debug!("rdkafka consumer configuration: {:?}", client_config);
        let inner: BaseConsumer<DefaultConsumerContext> = client_config.create()?;

        Ok(Self {
            inner,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A clone of the cancellation flag `wakeup()` sets, for a shutdown
    /// coordinator that wants to flip it directly instead of round-tripping
    /// through the trait object.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

fn kafka_tp(tp: &TopicPartition) -> (String, i32) {
    (tp.topic.clone(), tp.partition)
}

impl LogConsumer for KafkaLogConsumer {
    fn assign(&mut self, tps: &[TopicPartition]) -> Result<(), LogError> {
        let mut list = TopicPartitionList::new();
        for tp in tps {
            list.add_partition(&tp.topic, tp.partition);
        }
        self.inner
            .assign(&list)
            .map_err(|e| LogError::Other(e.to_string()))
    }

    fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<(), LogError> {
        let (topic, partition) = kafka_tp(tp);
        self.inner
            .seek(&topic, partition, Offset::Offset(offset), WATERMARK_TIMEOUT)
            .map_err(|e| LogError::Other(e.to_string()))
    }

    fn seek_to_beginning(&mut self, tp: &TopicPartition) -> Result<(), LogError> {
        let (topic, partition) = kafka_tp(tp);
        self.inner
            .seek(&topic, partition, Offset::Beginning, WATERMARK_TIMEOUT)
            .map_err(|e| LogError::Other(e.to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, LogError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut out = Vec::new();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(LogError::Cancelled);
            }

            let slice = INTERNAL_POLL_SLICE.min(deadline.saturating_duration_since(std::time::Instant::now()));
            match self.inner.poll(slice) {
                Some(Ok(msg)) => {
                    out.push(LogRecord {
                        tp: TopicPartition::new(msg.topic().to_string(), msg.partition()),
                        offset: msg.offset(),
                        key: msg.key().map(|k| k.to_vec()),
                        value: msg.payload().map(|v| v.to_vec()),
                    });
                    // Drain whatever else is immediately available without
                    // blocking again, so one poll() call returns a real batch.
                    while let Some(Ok(msg)) = self.inner.poll(Duration::ZERO) {
                        out.push(LogRecord {
                            tp: TopicPartition::new(msg.topic().to_string(), msg.partition()),
                            offset: msg.offset(),
                            key: msg.key().map(|k| k.to_vec()),
                            value: msg.payload().map(|v| v.to_vec()),
                        });
                    }
                    return Ok(out);
                }
                Some(Err(e)) => return Err(LogError::Other(e.to_string())),
                None => {
                    if std::time::Instant::now() >= deadline {
                        return Ok(out);
                    }
                }
            }
        }
    }

    fn position(&self, tp: &TopicPartition) -> Result<i64, LogError> {
        let positions = self
            .inner
            .position()
            .map_err(|e| LogError::Other(e.to_string()))?;
        let entry = positions
            .find_partition(&tp.topic, tp.partition)
            .ok_or_else(|| LogError::Other(format!("partition {tp} not assigned")))?;
        match entry.offset() {
            Offset::Offset(o) => Ok(o),
            Offset::Beginning | Offset::Invalid => Ok(0),
            other => Err(LogError::Other(format!("unexpected offset state: {other:?}"))),
        }
    }

    fn end_offsets(
        &self,
        tps: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, LogError> {
        let mut out = HashMap::with_capacity(tps.len());
        for tp in tps {
            let (_low, high) = self
                .inner
                .fetch_watermarks(&tp.topic, tp.partition, WATERMARK_TIMEOUT)
                .map_err(|e| LogError::Other(e.to_string()))?;
            out.insert(tp.clone(), high);
        }
        Ok(out)
    }

    fn wakeup(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
