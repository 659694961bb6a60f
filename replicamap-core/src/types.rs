//! Wire types shared by every component: the `OpMessage` payload carried on
//! `ops`/`flush`, and the partition-identity types used throughout the
//! abstract log-client surface (see [`crate::log`]).

use serde::{Deserialize, Serialize};

/// A `(topic, partition index)` pair. Cheap to clone; used as a map key
/// wherever per-partition state is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// One byte on the wire. Unrecognized values round-trip as `Unknown` rather
/// than failing deserialization, so a newer producer's op type never breaks
/// an older consumer (§3, §7 `UnknownOpType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Put,
    RemoveAny,
    FlushNotification,
    FlushRequest,
    Unknown(u8),
}

impl From<OpType> for u8 {
    fn from(t: OpType) -> u8 {
        match t {
            OpType::Put => 0,
            OpType::RemoveAny => 1,
            OpType::FlushNotification => 2,
            OpType::FlushRequest => 3,
            OpType::Unknown(b) => b,
        }
    }
}

impl From<u8> for OpType {
    fn from(b: u8) -> OpType {
        match b {
            0 => OpType::Put,
            1 => OpType::RemoveAny,
            2 => OpType::FlushNotification,
            3 => OpType::FlushRequest,
            other => OpType::Unknown(other),
        }
    }
}

/// The `OpMessage` record (§3). `op_type` is serialized as a raw `u8` so an
/// unrecognized variant still deserializes; callers convert via `op_type()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpMessage {
    pub op_type_raw: u8,
    pub client_id: u64,
    pub op_id: u64,
    pub flush_offset_ops: i64,
    pub flush_offset_data: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expected_value: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_value: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub function: Option<String>,
}

impl OpMessage {
    pub fn op_type(&self) -> OpType {
        OpType::from(self.op_type_raw)
    }

    pub fn flush_request(client_id: u64, flush_offset_ops: i64, flush_offset_data: i64) -> Self {
        Self {
            op_type_raw: OpType::FlushRequest.into(),
            client_id,
            op_id: 0,
            flush_offset_ops,
            flush_offset_data,
            expected_value: None,
            updated_value: None,
            function: None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("OpMessage always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
