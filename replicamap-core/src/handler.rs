//! `OpsUpdateHandler` (§6) and a minimal default implementation.
//!
//! The spec explicitly puts "user-facing map API and value merging policy"
//! out of scope (§1 Non-goals). `MapHandler` below is the smallest thing
//! that lets the rest of the crate be independently runnable and testable:
//! last-writer-wins `PUT`/`REMOVE_ANY` over a `DashMap`. A real deployment
//! is expected to bring its own `OpsUpdateHandler` for richer merge
//! semantics (CAS via `expected_value`, custom `function`s, etc).

use crate::types::OpType;
use dashmap::DashMap;
use std::sync::Arc;

/// Receives the post-apply value (or `None` for a tombstone) so the
/// applier can forward it to the flush queue without a second map lookup.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub value: Option<Vec<u8>>,
}

/// Injected collaborator (§6). Not `async` — the core runs on a blocking
/// OS thread per worker (§5), so there is no executor to suspend into.
pub trait OpsUpdateHandler: Send + Sync {
    /// Mutates the local map per op semantics; returns `true` iff the
    /// state changed. `out` receives the post-apply value for forwarding
    /// to the flush queue.
    #[allow(clippy::too_many_arguments)]
    fn apply_received_update(
        &self,
        client_id: u64,
        op_id: u64,
        op_type: OpType,
        key: &[u8],
        expected_value: Option<&[u8]>,
        updated_value: Option<&[u8]>,
        function: Option<&str>,
        out: &mut UpdateOutcome,
    ) -> bool;
}

/// Last-writer-wins `PUT`/`REMOVE_ANY` over a `DashMap<Vec<u8>, Vec<u8>>`.
#[derive(Clone, Default)]
pub struct MapHandler {
    map: Arc<DashMap<Vec<u8>, Vec<u8>>>,
}

impl MapHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.get(key).map(|v| v.clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Sink for `data`-topic records during recovery (§4.B). Distinct from
/// [`OpsUpdateHandler`] because `data` records are plain materialized
/// key/value pairs, not `OpMessage`s.
pub trait DataSink: Send + Sync {
    /// `None` value is a tombstone, any other value is the materialized state.
    fn apply_data_record(&self, key: &[u8], value: Option<&[u8]>);
}

impl DataSink for MapHandler {
    fn apply_data_record(&self, key: &[u8], value: Option<&[u8]>) {
        match value {
            Some(v) => {
                self.map.insert(key.to_vec(), v.to_vec());
            }
            None => {
                self.map.remove(key);
            }
        }
    }
}

impl OpsUpdateHandler for MapHandler {
    fn apply_received_update(
        &self,
        _client_id: u64,
        _op_id: u64,
        op_type: OpType,
        key: &[u8],
        _expected_value: Option<&[u8]>,
        updated_value: Option<&[u8]>,
        _function: Option<&str>,
        out: &mut UpdateOutcome,
    ) -> bool {
        match op_type {
            OpType::Put => {
                let value = updated_value.unwrap_or_default().to_vec();
                self.map.insert(key.to_vec(), value.clone());
                out.value = Some(value);
                true
            }
            OpType::RemoveAny => {
                let existed = self.map.remove(key).is_some();
                out.value = None;
                existed
            }
            _ => {
                out.value = self.get(key);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_remove() {
        let h = MapHandler::new();
        let mut out = UpdateOutcome::default();
        assert!(h.apply_received_update(1, 1, OpType::Put, b"a", None, Some(b"1"), None, &mut out));
        assert_eq!(out.value, Some(b"1".to_vec()));
        assert_eq!(h.get(b"a"), Some(b"1".to_vec()));

        let mut out = UpdateOutcome::default();
        assert!(h.apply_received_update(1, 2, OpType::RemoveAny, b"a", None, None, None, &mut out));
        assert_eq!(out.value, None);
        assert_eq!(h.get(b"a"), None);
    }

    #[test]
    fn remove_of_absent_key_is_a_no_op() {
        let h = MapHandler::new();
        let mut out = UpdateOutcome::default();
        assert!(!h.apply_received_update(1, 1, OpType::RemoveAny, b"missing", None, None, None, &mut out));
    }
}
