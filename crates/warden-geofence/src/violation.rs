//! Denied-attempt history per (actor, region).
//!
//! The tracker is advisory: it never turns a decision into a stricter one.
//! It records, decays and reports, and consumers act on the emitted
//! `violation-detected` events.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use warden_core::{
    ActorId, EventSink, RegionId, Timestamp, ViolationSeverity, WardenEvent, WardenEventKind,
};

use crate::error::{GeofenceError, GeofenceResult};

fn default_window_ms() -> u64 {
    3_600_000
}

fn default_high_threshold() -> usize {
    3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationConfig {
    /// Trailing window a denial counts toward severity.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// Pruned count at which severity becomes high.
    #[serde(default = "default_high_threshold")]
    pub high_severity_threshold: usize,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            high_severity_threshold: default_high_threshold(),
        }
    }
}

impl ViolationConfig {
    pub fn validate(&self) -> GeofenceResult<()> {
        if self.window_ms == 0 {
            return Err(GeofenceError::InvalidRegion(
                "violation window must be positive".into(),
            ));
        }
        if self.high_severity_threshold == 0 {
            return Err(GeofenceError::InvalidRegion(
                "high severity threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn severity_for(&self, count: usize) -> ViolationSeverity {
        if count >= self.high_severity_threshold {
            ViolationSeverity::High
        } else {
            ViolationSeverity::Low
        }
    }
}

/// Result of recording one denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub actor_id: ActorId,
    pub region_id: RegionId,
    pub count: usize,
    pub severity: ViolationSeverity,
}

/// Current standing for one (actor, region) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSummary {
    pub region_id: RegionId,
    pub count: usize,
    pub severity: ViolationSeverity,
    pub last_denied_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub struct ViolationTracker {
    config: ViolationConfig,
    records: HashMap<(ActorId, RegionId), VecDeque<Timestamp>>,
}

impl ViolationTracker {
    pub fn new(config: ViolationConfig) -> GeofenceResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            records: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ViolationConfig {
        &self.config
    }

    /// Append a denial at `now`, prune the window and emit the resulting
    /// count and severity.
    pub fn record_denial(
        &mut self,
        actor: &ActorId,
        region: &RegionId,
        now: Timestamp,
        sink: &dyn EventSink,
    ) -> ViolationReport {
        let window_ms = self.config.window_ms;
        let history = self
            .records
            .entry((actor.clone(), region.clone()))
            .or_default();
        history.push_back(now);
        prune(history, now, window_ms);

        let count = history.len();
        let severity = self.config.severity_for(count);

        tracing::warn!(
            actor_id = %actor,
            region_id = %region,
            count,
            ?severity,
            "access violation recorded"
        );

        let event = WardenEvent::new(
            now,
            WardenEventKind::ViolationDetected {
                actor_id: actor.clone(),
                region_id: region.clone(),
                count,
                severity,
            },
        );
        if let Err(e) = sink.emit(&event) {
            tracing::warn!(error = %e, "failed to emit violation event");
        }

        ViolationReport {
            actor_id: actor.clone(),
            region_id: region.clone(),
            count,
            severity,
        }
    }

    /// Denials within the window as of `now`; read-only, nothing is pruned.
    pub fn count(&self, actor: &ActorId, region: &RegionId, now: Timestamp) -> usize {
        self.records
            .get(&(actor.clone(), region.clone()))
            .map(|h| live(h, now, self.config.window_ms).count())
            .unwrap_or(0)
    }

    pub fn severity(&self, actor: &ActorId, region: &RegionId, now: Timestamp) -> ViolationSeverity {
        self.config.severity_for(self.count(actor, region, now))
    }

    /// Every region the actor has live violations in, ordered by region id.
    pub fn violations_for(&self, actor: &ActorId, now: Timestamp) -> Vec<ViolationSummary> {
        let mut out: Vec<ViolationSummary> = self
            .records
            .iter()
            .filter(|((a, _), _)| a == actor)
            .filter_map(|((_, region), history)| {
                let live: Vec<Timestamp> = live(history, now, self.config.window_ms).collect();
                if live.is_empty() {
                    return None;
                }
                Some(ViolationSummary {
                    region_id: region.clone(),
                    count: live.len(),
                    severity: self.config.severity_for(live.len()),
                    last_denied_at: live.last().copied(),
                })
            })
            .collect();
        out.sort_by(|a, b| a.region_id.cmp(&b.region_id));
        out
    }

    /// Drop every record for the actor. Returns whether anything was held.
    pub fn erase_actor(&mut self, actor: &ActorId) -> bool {
        let before = self.records.len();
        self.records.retain(|(a, _), _| a != actor);
        before != self.records.len()
    }

    /// Number of (actor, region) keys held, including ones not yet pruned.
    pub fn tracked_pairs(&self) -> usize {
        self.records.len()
    }
}

fn prune(history: &mut VecDeque<Timestamp>, now: Timestamp, window_ms: u64) {
    while let Some(front) = history.front() {
        if now.millis_since(*front) >= window_ms {
            history.pop_front();
        } else {
            break;
        }
    }
}

fn live(
    history: &VecDeque<Timestamp>,
    now: Timestamp,
    window_ms: u64,
) -> impl Iterator<Item = Timestamp> + '_ {
    history
        .iter()
        .copied()
        .filter(move |t| now.millis_since(*t) < window_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::InMemoryEventSink;

    fn ids() -> (ActorId, RegionId) {
        (ActorId::new("bob"), RegionId::new("home"))
    }

    #[test]
    fn test_severity_escalates_at_threshold() {
        let mut tracker = ViolationTracker::default();
        let sink = InMemoryEventSink::new();
        let (actor, region) = ids();
        let t0 = Timestamp::from_seconds(1_000);

        let r1 = tracker.record_denial(&actor, &region, t0, &sink);
        let r2 = tracker.record_denial(&actor, &region, t0.plus_millis(1_000), &sink);
        let r3 = tracker.record_denial(&actor, &region, t0.plus_millis(2_000), &sink);

        assert_eq!((r1.count, r1.severity), (1, ViolationSeverity::Low));
        assert_eq!((r2.count, r2.severity), (2, ViolationSeverity::Low));
        assert_eq!((r3.count, r3.severity), (3, ViolationSeverity::High));
        assert_eq!(sink.count("violation-detected"), 3);
    }

    #[test]
    fn test_old_denials_decay_out_of_window() {
        let mut tracker = ViolationTracker::default();
        let sink = InMemoryEventSink::new();
        let (actor, region) = ids();
        let t0 = Timestamp::from_seconds(10_000);

        tracker.record_denial(&actor, &region, t0, &sink);
        tracker.record_denial(&actor, &region, t0.plus_millis(10), &sink);
        // Both earlier denials are exactly one window old or more
        let later = t0.plus_millis(3_600_000 + 10);
        let report = tracker.record_denial(&actor, &region, later, &sink);
        assert_eq!(report.count, 1);
        assert_eq!(report.severity, ViolationSeverity::Low);
    }

    #[test]
    fn test_count_is_read_only_view_of_window() {
        let mut tracker = ViolationTracker::new(ViolationConfig {
            window_ms: 1_000,
            high_severity_threshold: 2,
        })
        .unwrap();
        let sink = InMemoryEventSink::new();
        let (actor, region) = ids();
        let t0 = Timestamp::from_millis(5_000);
        tracker.record_denial(&actor, &region, t0, &sink);
        tracker.record_denial(&actor, &region, t0.plus_millis(500), &sink);

        assert_eq!(tracker.count(&actor, &region, t0.plus_millis(600)), 2);
        assert_eq!(
            tracker.severity(&actor, &region, t0.plus_millis(600)),
            ViolationSeverity::High
        );
        assert_eq!(tracker.count(&actor, &region, t0.plus_millis(1_200)), 1);
        assert_eq!(tracker.count(&actor, &region, t0.plus_millis(5_000)), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let mut tracker = ViolationTracker::default();
        let sink = InMemoryEventSink::new();
        let now = Timestamp::from_seconds(1);
        let bob = ActorId::new("bob");
        let carol = ActorId::new("carol");
        let home = RegionId::new("home");
        let mine = RegionId::new("mine");

        tracker.record_denial(&bob, &home, now, &sink);
        tracker.record_denial(&bob, &mine, now, &sink);
        tracker.record_denial(&carol, &home, now, &sink);

        let bob_summary = tracker.violations_for(&bob, now);
        assert_eq!(bob_summary.len(), 2);
        assert_eq!(bob_summary[0].region_id, home);
        assert_eq!(bob_summary[1].region_id, mine);
        assert_eq!(tracker.count(&carol, &home, now), 1);
    }

    #[test]
    fn test_erase_actor() {
        let mut tracker = ViolationTracker::default();
        let sink = InMemoryEventSink::new();
        let (actor, region) = ids();
        let now = Timestamp::from_seconds(1);

        assert!(!tracker.erase_actor(&actor));
        tracker.record_denial(&actor, &region, now, &sink);
        assert!(tracker.erase_actor(&actor));
        assert!(tracker.violations_for(&actor, now).is_empty());
        assert_eq!(tracker.tracked_pairs(), 0);
    }

    #[test]
    fn test_event_payload() {
        let mut tracker = ViolationTracker::default();
        let sink = InMemoryEventSink::new();
        let (actor, region) = ids();
        tracker.record_denial(&actor, &region, Timestamp::from_seconds(2), &sink);

        let events = sink.events();
        match &events[0].kind {
            WardenEventKind::ViolationDetected {
                actor_id,
                region_id,
                count,
                severity,
            } => {
                assert_eq!(actor_id, &actor);
                assert_eq!(region_id, &region);
                assert_eq!(*count, 1);
                assert_eq!(*severity, ViolationSeverity::Low);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ViolationTracker::new(ViolationConfig {
            window_ms: 0,
            high_severity_threshold: 3,
        })
        .is_err());
    }
}
