use serde::{Deserialize, Serialize};
use std::fmt;
use warden_core::Timestamp;

use crate::bucket::TokenBucket;
use crate::policy::RateLimitPolicy;
use crate::window::SlidingWindow;

/// Which gate rejected an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    Cooldown,
    BurstExhausted,
    RateLimited,
}

impl fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleReason::Cooldown => write!(f, "cooldown active"),
            ThrottleReason::BurstExhausted => write!(f, "burst capacity exhausted"),
            ThrottleReason::RateLimited => write!(f, "rate limit exceeded"),
        }
    }
}

/// Outcome of a usage check or record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDecision {
    pub allowed: bool,
    /// Actions still admissible right now; `None` when unthrottled.
    pub remaining_quota: Option<u32>,
    /// Soonest point at which quota is replenished, if anything is pending.
    pub reset_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ThrottleReason>,
}

impl UsageDecision {
    /// Decision for an action type with no configured policy.
    pub fn unthrottled() -> Self {
        Self {
            allowed: true,
            remaining_quota: None,
            reset_at: None,
            retry_after_ms: None,
            reason: None,
        }
    }

    pub fn is_throttled(&self) -> bool {
        !self.allowed
    }
}

/// Point-in-time view of a tracker, for introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub policy: RateLimitPolicy,
    pub in_window: usize,
    pub tokens: Option<u32>,
    pub last_action: Option<Timestamp>,
    pub total_actions: u64,
    pub rejected_actions: u64,
}

/// Per (actor, action type) limiter state.
///
/// Gates are applied in order cooldown, token bucket, sliding window; the
/// first that rejects names the reason.
#[derive(Debug, Clone)]
pub struct ActionTracker {
    policy: RateLimitPolicy,
    window: SlidingWindow,
    bucket: Option<TokenBucket>,
    last_action: Option<Timestamp>,
    total_actions: u64,
    rejected_actions: u64,
}

impl ActionTracker {
    pub fn new(policy: RateLimitPolicy, now: Timestamp) -> Self {
        let window = SlidingWindow::new(policy.limit, policy.window_ms);
        let bucket = policy
            .burst_capacity
            .map(|capacity| TokenBucket::new(capacity, policy.refill_per_ms(), now));
        Self {
            policy,
            window,
            bucket,
            last_action: None,
            total_actions: 0,
            rejected_actions: 0,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Swap in a new policy. Window history, bucket fill and the cooldown
    /// reference survive.
    pub fn reconfigure(&mut self, policy: RateLimitPolicy, now: Timestamp) {
        self.window.set_limits(policy.limit, policy.window_ms);
        self.bucket = match (self.bucket.take(), policy.burst_capacity) {
            (Some(mut bucket), Some(capacity)) => {
                bucket.reconfigure(capacity, policy.refill_per_ms(), now);
                Some(bucket)
            }
            (None, Some(capacity)) => Some(TokenBucket::new(capacity, policy.refill_per_ms(), now)),
            (_, None) => None,
        };
        self.policy = policy;
    }

    fn cooldown_remaining_ms(&self, now: Timestamp) -> u64 {
        match (self.policy.cooldown_ms, self.last_action) {
            (Some(cooldown), Some(last)) => cooldown.saturating_sub(now.millis_since(last)),
            _ => 0,
        }
    }

    fn gate(&mut self, now: Timestamp) -> Option<(ThrottleReason, u64)> {
        let cooldown = self.cooldown_remaining_ms(now);
        if cooldown > 0 {
            return Some((ThrottleReason::Cooldown, cooldown));
        }
        if let Some(bucket) = self.bucket.as_mut() {
            if !bucket.check(now) {
                return Some((ThrottleReason::BurstExhausted, bucket.time_until_token_ms(now)));
            }
        }
        if !self.window.check(now) {
            return Some((ThrottleReason::RateLimited, self.window.retry_after_ms(now)));
        }
        None
    }

    fn decision(&mut self, now: Timestamp, rejection: Option<(ThrottleReason, u64)>) -> UsageDecision {
        let mut remaining = self.window.remaining(now);
        let mut reset_at = self.window.next_expiry(now);
        if let Some(bucket) = self.bucket.as_mut() {
            remaining = remaining.min(bucket.available(now));
            reset_at = match (reset_at, bucket.next_refill(now)) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        if self.cooldown_remaining_ms(now) > 0 {
            remaining = 0;
        }

        match rejection {
            Some((reason, retry_after)) => UsageDecision {
                allowed: false,
                remaining_quota: Some(0),
                reset_at,
                retry_after_ms: Some(retry_after.max(1)),
                reason: Some(reason),
            },
            None => UsageDecision {
                allowed: true,
                remaining_quota: Some(remaining),
                reset_at,
                retry_after_ms: None,
                reason: None,
            },
        }
    }

    /// Would an action at `now` be admitted? Nothing is recorded.
    pub fn check(&mut self, now: Timestamp) -> UsageDecision {
        let rejection = self.gate(now);
        self.decision(now, rejection)
    }

    /// Admit and record an action at `now`, or reject it untouched.
    pub fn record(&mut self, now: Timestamp) -> UsageDecision {
        if let Some(rejection) = self.gate(now) {
            self.rejected_actions += 1;
            return self.decision(now, Some(rejection));
        }
        if let Some(bucket) = self.bucket.as_mut() {
            bucket.try_consume(now);
        }
        self.window.record(now);
        self.last_action = Some(now);
        self.total_actions += 1;
        self.decision(now, None)
    }

    pub fn snapshot(&mut self, now: Timestamp) -> UsageSnapshot {
        UsageSnapshot {
            policy: self.policy.clone(),
            in_window: self.window.count(now),
            tokens: self.bucket.as_mut().map(|b| b.available(now)),
            last_action: self.last_action,
            total_actions: self.total_actions,
            rejected_actions: self.rejected_actions,
        }
    }
}
