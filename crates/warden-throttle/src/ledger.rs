//! Thread-safe store of per (actor, action type) trackers.
//!
//! The outer map lock is held only long enough to find or create a
//! tracker; the tracker itself sits behind its own mutex so different
//! actors never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use warden_core::{ActionType, ActorId, Timestamp};

use crate::error::{ThrottleError, ThrottleResult};
use crate::policy::RateLimitPolicy;
use crate::tracker::{ActionTracker, UsageDecision, UsageSnapshot};

type TrackerKey = (ActorId, ActionType);

#[derive(Default)]
pub struct UsageLedger {
    policies: RwLock<HashMap<ActionType, RateLimitPolicy>>,
    trackers: RwLock<HashMap<TrackerKey, Arc<Mutex<ActionTracker>>>>,
}

fn poisoned<T>(what: &str) -> impl FnOnce(T) -> ThrottleError + '_ {
    move |_| ThrottleError::LockPoisoned(what.to_string())
}

fn lock_tracker(tracker: &Mutex<ActionTracker>) -> ThrottleResult<MutexGuard<'_, ActionTracker>> {
    tracker.lock().map_err(poisoned("action tracker"))
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite the policy for its action type. Existing trackers
    /// for that type pick it up with their history intact. Returns the
    /// policy it replaced.
    pub fn configure(
        &self,
        policy: RateLimitPolicy,
        now: Timestamp,
    ) -> ThrottleResult<Option<RateLimitPolicy>> {
        policy.validate()?;
        let action_type = policy.action_type.clone();

        let previous = self
            .policies
            .write()
            .map_err(poisoned("policy table"))?
            .insert(action_type.clone(), policy.clone());

        let affected: Vec<Arc<Mutex<ActionTracker>>> = self
            .trackers
            .read()
            .map_err(poisoned("tracker table"))?
            .iter()
            .filter(|((_, a), _)| a == &action_type)
            .map(|(_, t)| Arc::clone(t))
            .collect();
        for tracker in &affected {
            lock_tracker(tracker)?.reconfigure(policy.clone(), now);
        }

        tracing::debug!(
            action_type = %action_type,
            limit = policy.limit,
            window_ms = policy.window_ms,
            trackers = affected.len(),
            "rate limit policy applied"
        );
        Ok(previous)
    }

    pub fn policy(&self, action_type: &ActionType) -> ThrottleResult<Option<RateLimitPolicy>> {
        Ok(self
            .policies
            .read()
            .map_err(poisoned("policy table"))?
            .get(action_type)
            .cloned())
    }

    /// All configured policies, ordered by action type.
    pub fn policies(&self) -> ThrottleResult<Vec<RateLimitPolicy>> {
        let mut out: Vec<RateLimitPolicy> = self
            .policies
            .read()
            .map_err(poisoned("policy table"))?
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        Ok(out)
    }

    fn existing(&self, key: &TrackerKey) -> ThrottleResult<Option<Arc<Mutex<ActionTracker>>>> {
        Ok(self
            .trackers
            .read()
            .map_err(poisoned("tracker table"))?
            .get(key)
            .cloned())
    }

    // The policy is read and the tracker inserted under the policy read lock,
    // so a concurrent `configure` either sees the new tracker or is seen by it.
    fn get_or_create(
        &self,
        key: TrackerKey,
        now: Timestamp,
    ) -> ThrottleResult<Option<Arc<Mutex<ActionTracker>>>> {
        if let Some(tracker) = self.existing(&key)? {
            return Ok(Some(tracker));
        }
        let policies = self.policies.read().map_err(poisoned("policy table"))?;
        let Some(policy) = policies.get(&key.1) else {
            return Ok(None);
        };
        let mut trackers = self.trackers.write().map_err(poisoned("tracker table"))?;
        Ok(Some(Arc::clone(trackers.entry(key).or_insert_with(|| {
            Arc::new(Mutex::new(ActionTracker::new(policy.clone(), now)))
        }))))
    }

    /// Would the actor be admitted right now? Unconfigured action types are
    /// unthrottled. An actor with no history is checked against a fresh
    /// tracker without creating one.
    pub fn check(
        &self,
        actor: &ActorId,
        action_type: &ActionType,
        now: Timestamp,
    ) -> ThrottleResult<UsageDecision> {
        let Some(policy) = self.policy(action_type)? else {
            return Ok(UsageDecision::unthrottled());
        };
        match self.existing(&(actor.clone(), action_type.clone()))? {
            Some(tracker) => Ok(lock_tracker(&tracker)?.check(now)),
            None => Ok(ActionTracker::new(policy, now).check(now)),
        }
    }

    /// Admit and record one action.
    pub fn record(
        &self,
        actor: &ActorId,
        action_type: &ActionType,
        now: Timestamp,
    ) -> ThrottleResult<UsageDecision> {
        if self.policy(action_type)?.is_none() {
            return Ok(UsageDecision::unthrottled());
        }
        let Some(tracker) = self.get_or_create((actor.clone(), action_type.clone()), now)? else {
            return Ok(UsageDecision::unthrottled());
        };
        let decision = lock_tracker(&tracker)?.record(now);
        if !decision.allowed {
            tracing::debug!(
                actor_id = %actor,
                action_type = %action_type,
                reason = ?decision.reason,
                retry_after_ms = ?decision.retry_after_ms,
                "action throttled"
            );
        }
        Ok(decision)
    }

    /// Drop one tracker. Returns whether it existed.
    pub fn reset(&self, actor: &ActorId, action_type: &ActionType) -> ThrottleResult<bool> {
        Ok(self
            .trackers
            .write()
            .map_err(poisoned("tracker table"))?
            .remove(&(actor.clone(), action_type.clone()))
            .is_some())
    }

    /// Drop every tracker the actor owns. Returns whether any existed.
    pub fn erase_actor(&self, actor: &ActorId) -> ThrottleResult<bool> {
        let mut trackers = self.trackers.write().map_err(poisoned("tracker table"))?;
        let before = trackers.len();
        trackers.retain(|(a, _), _| a != actor);
        Ok(trackers.len() != before)
    }

    pub fn snapshot(
        &self,
        actor: &ActorId,
        action_type: &ActionType,
        now: Timestamp,
    ) -> ThrottleResult<Option<UsageSnapshot>> {
        match self.existing(&(actor.clone(), action_type.clone()))? {
            Some(tracker) => Ok(Some(lock_tracker(&tracker)?.snapshot(now))),
            None => Ok(None),
        }
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.read().map(|t| t.len()).unwrap_or(0)
    }
}
