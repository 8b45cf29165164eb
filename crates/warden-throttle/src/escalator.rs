use std::collections::HashMap;
use warden_core::{ActionType, ActorId, EventSink, Timestamp, WardenEvent, WardenEventKind};

use crate::error::{ThrottleError, ThrottleResult};

fn emit(sink: &dyn EventSink, now: Timestamp, kind: WardenEventKind) {
    let event = WardenEvent::new(now, kind);
    if let Err(e) = sink.emit(&event) {
        tracing::warn!(event = event.kind.name(), error = %e, "failed to emit throttle event");
    }
}

/// Counter state after one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub count: u64,
    pub threshold_exceeded: bool,
}

/// Counts throttle failures per (actor, action type).
///
/// Counts never decay; they only go away on reset or erasure. Once a count
/// reaches the threshold every further failure raises `threshold-exceeded`
/// again.
#[derive(Debug)]
pub struct RateViolationEscalator {
    threshold: u64,
    counts: HashMap<(ActorId, ActionType), u64>,
}

impl Default for RateViolationEscalator {
    fn default() -> Self {
        Self {
            threshold: 5,
            counts: HashMap::new(),
        }
    }
}

impl RateViolationEscalator {
    pub fn new(threshold: u64) -> ThrottleResult<Self> {
        if threshold == 0 {
            return Err(ThrottleError::InvalidPolicy(
                "escalation threshold must be positive".into(),
            ));
        }
        Ok(Self {
            threshold,
            counts: HashMap::new(),
        })
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn record_failure(
        &mut self,
        actor: &ActorId,
        action_type: &ActionType,
        reason: &str,
        now: Timestamp,
        sink: &dyn EventSink,
    ) -> Escalation {
        let count = self
            .counts
            .entry((actor.clone(), action_type.clone()))
            .or_insert(0);
        *count += 1;
        let count = *count;

        emit(
            sink,
            now,
            WardenEventKind::RateViolation {
                actor_id: actor.clone(),
                action_type: action_type.clone(),
                count,
                reason: reason.to_string(),
            },
        );

        let threshold_exceeded = count >= self.threshold;
        if threshold_exceeded {
            tracing::warn!(
                actor_id = %actor,
                action_type = %action_type,
                count,
                threshold = self.threshold,
                "rate violation threshold exceeded"
            );
            emit(
                sink,
                now,
                WardenEventKind::ThresholdExceeded {
                    actor_id: actor.clone(),
                    action_type: action_type.clone(),
                    count,
                    threshold: self.threshold,
                },
            );
        }

        Escalation {
            count,
            threshold_exceeded,
        }
    }

    pub fn count(&self, actor: &ActorId, action_type: &ActionType) -> u64 {
        self.counts
            .get(&(actor.clone(), action_type.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&mut self, actor: &ActorId, action_type: &ActionType) -> bool {
        self.counts
            .remove(&(actor.clone(), action_type.clone()))
            .is_some()
    }

    pub fn erase_actor(&mut self, actor: &ActorId) -> bool {
        let before = self.counts.len();
        self.counts.retain(|(a, _), _| a != actor);
        before != self.counts.len()
    }
}
