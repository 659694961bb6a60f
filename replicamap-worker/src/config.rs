use envconfig::Envconfig;
use replicamap_kafka::KafkaConfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3303")]
    pub port: u16,

    /// Unique per process (spec §3 `clientId`). Deliberately has no
    /// default: the deployment layer (e.g. a stateful set ordinal) owns
    /// assigning a distinct value to every running worker.
    pub client_id: u64,

    /// Comma-separated partition indices this process owns, e.g. "0,1,2".
    pub assigned_partitions: String,

    #[envconfig(default = "1000")]
    pub flush_period_ops: i64,

    #[envconfig(default = "data")]
    pub data_topic: String,

    #[envconfig(default = "ops")]
    pub ops_topic: String,

    #[envconfig(default = "flush")]
    pub flush_topic: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn parsed_assigned_partitions(&self) -> anyhow::Result<Vec<i32>> {
        self.assigned_partitions
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i32>().map_err(anyhow::Error::from))
            .collect()
    }
}
