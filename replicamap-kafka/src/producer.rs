use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use rdkafka::ClientConfig;

use replicamap_core::log::{LogError, LogProducer};

use crate::config::KafkaConfig;

/// `replicamap_core::log::LogProducer` over a `ThreadedProducer` (§4.F):
/// `send` enqueues and returns immediately — delivery is driven by the
/// producer's background poll thread, matching "fire-and-forget from this
/// core's perspective" (§6). Mirrors `common-kafka::kafka_producer`'s client
/// config assembly (linger, queue size, compression, TLS, startup metadata
/// ping), adapted to a synchronous producer since the core has no executor
/// to await a `FutureProducer` delivery future from.
pub struct KafkaLogProducer {
    inner: ThreadedProducer<DefaultProducerContext>,
}

impl KafkaLogProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, rdkafka::error::KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", config.kafka_compression_codec.clone())
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        tracing::debug!("rdkafka producer configuration: {:?}", client_config);
        let inner: ThreadedProducer<DefaultProducerContext> = client_config.create()?;

        match inner.client().fetch_metadata(None, std::time::Duration::from_secs(2)) {
            Ok(metadata) => {
                tracing::info!(
                    topics = metadata.topics().len(),
                    "connected to Kafka brokers"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to fetch metadata from Kafka brokers");
                return Err(e);
            }
        }

        Ok(Self { inner })
    }
}

impl LogProducer for KafkaLogProducer {
    fn send(
        &self,
        topic: &str,
        partition: i32,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
    ) -> Result<(), LogError> {
        let mut record = BaseRecord::to(topic).partition(partition).payload(&value);
        if let Some(k) = &key {
            record = record.key(k);
        }
        self.inner
            .send(record)
            .map_err(|(e, _)| LogError::Other(e.to_string()))
    }
}
