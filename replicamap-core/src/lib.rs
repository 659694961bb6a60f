//! Transport-agnostic core of the Ops Worker: offset recovery, data replay,
//! op application, steady detection, and the driver that sequences them
//! (spec §2 components A-E). Nothing here names `rdkafka` — see
//! `replicamap-kafka` for the concrete log client and `replicamap-worker`
//! for the runnable binary.

pub mod data_loader;
pub mod driver;
pub mod error;
pub mod handler;
pub mod log;
pub mod offset_probe;
pub mod op_applier;
pub mod queue;
pub mod steady;
pub mod types;

pub use driver::{OpsWorker, OpsWorkerConfig};
pub use error::ReplicaMapError;
pub use handler::{DataSink, MapHandler, OpsUpdateHandler, UpdateOutcome};
pub use log::{LogConsumer, LogError, LogProducer, LogRecord};
pub use queue::{BoundedCleanQueue, BoundedFlushQueue, CleanQueue, FlushQueue, FlushQueueEntry, QueueError};
pub use steady::{steady_latch, SteadyDetector, SteadyLatch, SteadyReceiver};
pub use types::{OpMessage, OpType, TopicPartition};
