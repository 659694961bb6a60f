use envconfig::Envconfig;

/// Mirrors `common-kafka::config::KafkaConfig`'s client-tuning knobs. The
/// Ops Worker never subscribes (it assigns partitions explicitly, §6), but
/// `group.id` is still required by librdkafka to construct a consumer.
#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "replicamap-ops-worker")]
    pub kafka_consumer_group: String,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,
}
