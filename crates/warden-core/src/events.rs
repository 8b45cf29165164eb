//! Engine event model and the observer list that fans events out.
//!
//! Events are advisory: emission failures are logged and swallowed so that
//! telemetry problems never block an access or usage decision.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

use crate::traits::EventSink;
use crate::types::{ActionType, ActorId, RegionId, Timestamp, ViolationSeverity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum WardenEventKind {
    RegionRegistered {
        region_id: RegionId,
        name: String,
        kind: String,
        auto_detected: bool,
    },
    RegionRemoved {
        region_id: RegionId,
    },
    ViolationDetected {
        actor_id: ActorId,
        region_id: RegionId,
        count: usize,
        severity: ViolationSeverity,
    },
    RateViolation {
        actor_id: ActorId,
        action_type: ActionType,
        count: u64,
        reason: String,
    },
    ThresholdExceeded {
        actor_id: ActorId,
        action_type: ActionType,
        count: u64,
        threshold: u64,
    },
    RateLimitConfigured {
        action_type: ActionType,
        limit: u32,
        window_ms: u64,
        adaptive: bool,
    },
    RateLimitAdjusted {
        action_type: ActionType,
        multiplier: f64,
        limit: u32,
    },
    RateLimitReset {
        actor_id: ActorId,
        action_type: ActionType,
    },
    ActorRemoved {
        actor_id: ActorId,
    },
}

impl WardenEventKind {
    /// Stable event name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            WardenEventKind::RegionRegistered { .. } => "region-registered",
            WardenEventKind::RegionRemoved { .. } => "region-removed",
            WardenEventKind::ViolationDetected { .. } => "violation-detected",
            WardenEventKind::RateViolation { .. } => "rate-violation",
            WardenEventKind::ThresholdExceeded { .. } => "threshold-exceeded",
            WardenEventKind::RateLimitConfigured { .. } => "rate-limit-configured",
            WardenEventKind::RateLimitAdjusted { .. } => "rate-limit-adjusted",
            WardenEventKind::RateLimitReset { .. } => "rate-limit-reset",
            WardenEventKind::ActorRemoved { .. } => "actor-removed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardenEvent {
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub kind: WardenEventKind,
}

impl WardenEvent {
    pub fn new(timestamp: Timestamp, kind: WardenEventKind) -> Self {
        Self { timestamp, kind }
    }
}

// ---------------------------------------------------------------------------
// EventBus: explicit subscriber list
// ---------------------------------------------------------------------------

/// Fans each event out to every subscribed sink.
///
/// A failing sink is logged and skipped; the remaining sinks still receive
/// the event, and `emit` on the bus itself always succeeds.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        match self.sinks.write() {
            Ok(mut sinks) => sinks.push(sink),
            Err(_) => tracing::error!("event bus lock poisoned; subscription dropped"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn publish(&self, timestamp: Timestamp, kind: WardenEventKind) {
        let event = WardenEvent::new(timestamp, kind);
        let _ = self.emit(&event);
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &WardenEvent) -> Result<(), String> {
        let sinks = match self.sinks.read() {
            Ok(sinks) => sinks.clone(),
            Err(_) => {
                tracing::error!(event = event.kind.name(), "event bus lock poisoned");
                return Ok(());
            }
        };
        for sink in sinks {
            if let Err(e) = sink.emit(event) {
                tracing::warn!(event = event.kind.name(), error = %e, "event sink failed");
            }
        }
        Ok(())
    }
}

/// In-memory sink that keeps every event, for tests and diagnostics.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<WardenEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WardenEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind.name() == name)
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: &WardenEvent) -> Result<(), String> {
        self.events
            .lock()
            .map_err(|_| "event sink lock poisoned".to_string())?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn emit(&self, _event: &WardenEvent) -> Result<(), String> {
            Err("downstream unavailable".into())
        }
    }

    fn removed(id: &str) -> WardenEventKind {
        WardenEventKind::RegionRemoved {
            region_id: RegionId::new(id),
        }
    }

    #[test]
    fn test_bus_fans_out_to_all_sinks() {
        let bus = EventBus::new();
        let a = Arc::new(InMemoryEventSink::new());
        let b = Arc::new(InMemoryEventSink::new());
        bus.subscribe(a.clone());
        bus.subscribe(b.clone());

        bus.publish(Timestamp::from_millis(1), removed("r1"));

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_failing_sink_is_isolated() {
        let bus = EventBus::new();
        let good = Arc::new(InMemoryEventSink::new());
        bus.subscribe(Arc::new(FailingSink));
        bus.subscribe(good.clone());

        let event = WardenEvent::new(Timestamp::from_millis(1), removed("r1"));
        assert!(bus.emit(&event).is_ok());
        assert_eq!(good.names(), vec!["region-removed"]);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = WardenEvent::new(
            Timestamp::from_millis(42),
            WardenEventKind::ActorRemoved {
                actor_id: ActorId::new("bob"),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "actor-removed");
        assert_eq!(json["actor_id"], "bob");
        assert_eq!(json["timestamp"]["millis_since_epoch"], 42);
    }

    #[test]
    fn test_in_memory_sink_count_and_clear() {
        let sink = InMemoryEventSink::new();
        let event = WardenEvent::new(Timestamp::from_millis(1), removed("r"));
        sink.emit(&event).unwrap();
        sink.emit(&event).unwrap();
        assert_eq!(sink.count("region-removed"), 2);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
