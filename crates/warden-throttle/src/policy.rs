use serde::{Deserialize, Serialize};
use warden_core::ActionType;

use crate::error::{ThrottleError, ThrottleResult};

/// Throttling rules for one action type.
///
/// `limit` actions per `window_ms` bounds the sustained rate. When
/// `burst_capacity` is set a token bucket of that size, refilled at
/// `limit / window_ms` tokens per millisecond, also gates each action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub action_type: ActionType,
    pub limit: u32,
    pub window_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_capacity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub adaptive: bool,
}

impl RateLimitPolicy {
    pub fn new(action_type: impl Into<ActionType>, limit: u32, window_ms: u64) -> Self {
        Self {
            action_type: action_type.into(),
            limit,
            window_ms,
            burst_capacity: None,
            cooldown_ms: None,
            adaptive: false,
        }
    }

    pub fn with_burst(mut self, capacity: u32) -> Self {
        self.burst_capacity = Some(capacity);
        self
    }

    pub fn with_cooldown(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    pub fn adaptive(mut self) -> Self {
        self.adaptive = true;
        self
    }

    pub fn validate(&self) -> ThrottleResult<()> {
        if self.action_type.is_empty() {
            return Err(ThrottleError::InvalidPolicy(
                "action type must not be empty".into(),
            ));
        }
        if self.limit == 0 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "{}: limit must be positive",
                self.action_type
            )));
        }
        if self.window_ms == 0 {
            return Err(ThrottleError::InvalidPolicy(format!(
                "{}: window must be positive",
                self.action_type
            )));
        }
        if self.burst_capacity == Some(0) {
            return Err(ThrottleError::InvalidPolicy(format!(
                "{}: burst capacity must be positive",
                self.action_type
            )));
        }
        Ok(())
    }

    /// Bucket refill rate in tokens per millisecond.
    pub fn refill_per_ms(&self) -> f64 {
        self.limit as f64 / self.window_ms as f64
    }

    /// Copy with limit and burst capacity scaled by `multiplier`, floored,
    /// never below one.
    ///
    /// The multiplier is fixed to millionths first so the product is exact
    /// integer arithmetic; `90 * 0.7` must give 63, not 62.
    pub fn scaled(&self, multiplier: f64) -> Self {
        let millionths = (multiplier.max(0.0) * SCALE_UNITS as f64).round() as u64;
        let scale = |v: u32| {
            let product = u64::from(v) * millionths / SCALE_UNITS;
            u32::try_from(product).unwrap_or(u32::MAX).max(1)
        };
        Self {
            limit: scale(self.limit),
            burst_capacity: self.burst_capacity.map(scale),
            ..self.clone()
        }
    }
}

const SCALE_UNITS: u64 = 1_000_000;
