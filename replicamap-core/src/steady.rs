//! 4.D Steady Detector and the one-shot `steady` latch observable across
//! threads (§3, §6 `steadyFuture`).

use crate::error::ReplicaMapError;
use crate::log::LogConsumer;
use crate::types::TopicPartition;
use std::collections::HashMap;
use tokio::sync::watch;

/// Two-shot lag check (§4.D). Owned exclusively by the worker thread; the
/// only externally-visible effect is through [`SteadyLatch`].
pub struct SteadyDetector {
    flush_period_ops: i64,
    max_allowed_steady_lag: i64,
    end_offsets_ops: Option<HashMap<TopicPartition, i64>>,
}

impl SteadyDetector {
    pub fn new(flush_period_ops: i64) -> Self {
        Self {
            flush_period_ops,
            max_allowed_steady_lag: 0,
            end_offsets_ops: None,
        }
    }

    /// Runs the §4.D pseudocode to completion for this call. Returns `true`
    /// exactly on the poll that newly closes the lag against a freshly
    /// observed tail snapshot.
    pub fn check(
        &mut self,
        ops: &dyn LogConsumer,
        assigned: &[TopicPartition],
    ) -> Result<bool, ReplicaMapError> {
        loop {
            let mut freshly_fetched = false;
            if self.end_offsets_ops.is_none() {
                self.end_offsets_ops = Some(ops.end_offsets(assigned)?);
                freshly_fetched = true;
            }
            let ends = self.end_offsets_ops.as_ref().expect("just populated");

            let mut total_lag: i64 = 0;
            for tp in assigned {
                let end = *ends.get(tp).unwrap_or(&0);
                let pos = ops.position(tp)?;
                total_lag += end - pos;
            }

            if total_lag <= self.max_allowed_steady_lag {
                self.end_offsets_ops = None;
                if freshly_fetched {
                    return Ok(true);
                }
                self.max_allowed_steady_lag = self.flush_period_ops;
                continue;
            }
            return Ok(false);
        }
    }
}

/// Pending/Ok/Failed, matching §3's one-shot latch (invariant #4: never
/// reverses, transitions at most once in either terminal direction).
#[derive(Debug, Clone)]
enum SteadyState {
    Pending,
    Ok,
    Failed(ReplicaMapError),
}

/// Driver-side handle: flips the latch. Lives on the worker thread.
#[derive(Clone)]
pub struct SteadyLatch {
    sender: watch::Sender<SteadyState>,
}

/// Caller-side handle: awaits the latch. `watch::Receiver::changed` is
/// async but the sender lives on a plain `std::thread` — `watch::Sender`'s
/// `send`/`send_if_modified` are synchronous, so no executor is needed to
/// drive the worker thread itself (§5, SPEC_FULL §4.G).
#[derive(Clone)]
pub struct SteadyReceiver {
    receiver: watch::Receiver<SteadyState>,
}

pub fn steady_latch() -> (SteadyLatch, SteadyReceiver) {
    let (sender, receiver) = watch::channel(SteadyState::Pending);
    (SteadyLatch { sender }, SteadyReceiver { receiver })
}

impl SteadyLatch {
    /// Transitions `pending -> ok`. No-op if already complete. Returns
    /// `true` only on the transition itself.
    pub fn mark_ok(&self) -> bool {
        let mut did_transition = false;
        self.sender.send_if_modified(|state| {
            if matches!(state, SteadyState::Pending) {
                *state = SteadyState::Ok;
                did_transition = true;
                true
            } else {
                false
            }
        });
        did_transition
    }

    /// Transitions `pending -> failed(e)`. No-op (including for
    /// cancellation) if already complete.
    pub fn mark_failed(&self, err: ReplicaMapError) {
        self.sender.send_if_modified(|state| {
            if matches!(state, SteadyState::Pending) {
                *state = SteadyState::Failed(err.clone());
                true
            } else {
                false
            }
        });
    }
}

impl SteadyReceiver {
    /// Awaits the terminal state. Multiple callers may await independently.
    pub async fn wait(&mut self) -> Result<(), ReplicaMapError> {
        loop {
            {
                let state = self.receiver.borrow();
                match &*state {
                    SteadyState::Ok => return Ok(()),
                    SteadyState::Failed(err) => return Err(err.clone()),
                    SteadyState::Pending => {}
                }
            }
            if self.receiver.changed().await.is_err() {
                return Err(ReplicaMapError::Transport(crate::log::LogError::Other(
                    "steady latch dropped before resolving".to_string(),
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::mock::{InMemoryTopic, MockConsumer};
    use crate::log::LogConsumer;

    #[test]
    fn catches_up_immediately_when_fully_caught_up_on_first_snapshot() {
        let topic = InMemoryTopic::new("ops");
        let mut consumer = MockConsumer::new(topic);
        let tp = TopicPartition::new("ops", 0);
        consumer.assign(&[tp.clone()]).unwrap();
        // position 0, end offset 0: S1's empty-bootstrap case.
        let mut detector = SteadyDetector::new(10);
        assert!(detector.check(&consumer, &[tp]).unwrap());
    }

    #[test]
    fn requires_two_confirmations_after_initially_lagging() {
        let topic = InMemoryTopic::new("ops");
        topic.set_reported_end_offset(0, 5);
        let mut consumer = MockConsumer::new(topic.clone());
        let tp = TopicPartition::new("ops", 0);
        consumer.assign(&[tp.clone()]).unwrap();
        consumer.seek(&tp, 3).unwrap(); // behind by 2

        let mut detector = SteadyDetector::new(10);
        assert!(!detector.check(&consumer, &[tp.clone()]).unwrap());

        // Catch up to the tail the detector already snapshotted.
        consumer.seek(&tp, 5).unwrap();
        assert!(detector.check(&consumer, &[tp]).unwrap());
    }

    #[tokio::test]
    async fn latch_transitions_once_and_is_observable_across_threads() {
        let (latch, mut rx) = steady_latch();
        assert!(latch.mark_ok());
        assert!(!latch.mark_ok()); // second call is a no-op
        rx.wait().await.unwrap();

        // A failed-after-ok attempt never reverses the latch.
        latch.mark_failed(ReplicaMapError::Transport(crate::log::LogError::Cancelled));
        rx.wait().await.unwrap();
    }
}
