//! Concrete `rdkafka`-backed implementation of `replicamap_core`'s abstract
//! log-client traits (§4.F). The only crate in this workspace that names
//! `rdkafka` types, matching the teacher's layering where `common-kafka` is
//! the sole Kafka-aware dependency for most other crates.

pub mod config;
pub mod consumer;
pub mod producer;

pub use config::KafkaConfig;
pub use consumer::KafkaLogConsumer;
pub use producer::KafkaLogProducer;
