use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use warden_core::ActionType;

use crate::error::{ThrottleError, ThrottleResult};
use crate::policy::RateLimitPolicy;

pub const MIN_MULTIPLIER: f64 = 0.5;
pub const MAX_MULTIPLIER: f64 = 2.0;
const STEP: f64 = 0.1;
const HIGH_LOAD: f64 = 0.8;
const LOW_LOAD: f64 = 0.4;

fn default_history() -> usize {
    10
}

/// System load reading fed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSignal {
    /// Normalized load in `[0, 1]`.
    pub load: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_count: Option<u32>,
    /// Normalized health in `[0, 1]`, 1 being healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_score: Option<f64>,
}

impl LoadSignal {
    pub fn new(load: f64) -> Self {
        Self {
            load,
            actor_count: None,
            performance_score: None,
        }
    }

    pub fn validate(&self) -> ThrottleResult<()> {
        if !(self.load.is_finite() && (0.0..=1.0).contains(&self.load)) {
            return Err(ThrottleError::InvalidLoadSignal(format!(
                "load must be within [0, 1], got {}",
                self.load
            )));
        }
        if let Some(score) = self.performance_score {
            if !(score.is_finite() && (0.0..=1.0).contains(&score)) {
                return Err(ThrottleError::InvalidLoadSignal(format!(
                    "performance score must be within [0, 1], got {score}"
                )));
            }
        }
        Ok(())
    }

    /// Sample recorded into history. A degraded performance score counts
    /// as load.
    pub fn effective_load(&self) -> f64 {
        match self.performance_score {
            Some(score) => self.load.max(1.0 - score),
            None => self.load,
        }
    }
}

#[derive(Debug, Clone)]
struct AdaptiveState {
    base: RateLimitPolicy,
    multiplier: f64,
    samples: VecDeque<f64>,
}

/// A policy whose multiplier moved on the latest signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub previous_multiplier: f64,
    pub multiplier: f64,
    /// Base policy rescaled by `multiplier`, ready to apply.
    pub policy: RateLimitPolicy,
}

/// Scales adaptive policies up or down with a rolling mean of system load.
///
/// Each policy keeps its own sample history and multiplier. A mean above
/// 0.8 steps the multiplier down by 0.1, below 0.4 steps it up; anything in
/// between holds.
#[derive(Debug)]
pub struct AdaptiveController {
    history: usize,
    states: BTreeMap<ActionType, AdaptiveState>,
}

impl Default for AdaptiveController {
    fn default() -> Self {
        Self {
            history: default_history(),
            states: BTreeMap::new(),
        }
    }
}

impl AdaptiveController {
    pub fn new(history: usize) -> ThrottleResult<Self> {
        if history == 0 {
            return Err(ThrottleError::InvalidPolicy(
                "load history must hold at least one sample".into(),
            ));
        }
        Ok(Self {
            history,
            states: BTreeMap::new(),
        })
    }

    /// Track an adaptive policy, or replace its base if already tracked.
    /// Returns the effective policy under the current multiplier.
    pub fn register(&mut self, base: RateLimitPolicy) -> RateLimitPolicy {
        let state = self
            .states
            .entry(base.action_type.clone())
            .or_insert_with(|| AdaptiveState {
                base: base.clone(),
                multiplier: 1.0,
                samples: VecDeque::new(),
            });
        state.base = base;
        state.base.scaled(state.multiplier)
    }

    pub fn unregister(&mut self, action_type: &ActionType) -> bool {
        self.states.remove(action_type).is_some()
    }

    pub fn is_tracked(&self, action_type: &ActionType) -> bool {
        self.states.contains_key(action_type)
    }

    pub fn multiplier(&self, action_type: &ActionType) -> Option<f64> {
        self.states.get(action_type).map(|s| s.multiplier)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Feed one load reading to every tracked policy and return those whose
    /// multiplier changed, ordered by action type.
    pub fn observe(&mut self, signal: &LoadSignal) -> ThrottleResult<Vec<Adjustment>> {
        signal.validate()?;
        let sample = signal.effective_load();
        let mut adjustments = Vec::new();

        for (action_type, state) in self.states.iter_mut() {
            state.samples.push_back(sample);
            while state.samples.len() > self.history {
                state.samples.pop_front();
            }
            let mean = state.samples.iter().sum::<f64>() / state.samples.len() as f64;

            let previous = state.multiplier;
            let next = if mean > HIGH_LOAD {
                step(previous, -STEP)
            } else if mean < LOW_LOAD {
                step(previous, STEP)
            } else {
                previous
            };
            if next == previous {
                continue;
            }
            state.multiplier = next;

            tracing::info!(
                action_type = %action_type,
                mean_load = mean,
                actor_count = ?signal.actor_count,
                multiplier = next,
                "adaptive rate limit adjusted"
            );
            adjustments.push(Adjustment {
                previous_multiplier: previous,
                multiplier: next,
                policy: state.base.scaled(next),
            });
        }
        Ok(adjustments)
    }
}

// Rounded to one decimal so repeated steps land on exact tenths.
fn step(multiplier: f64, delta: f64) -> f64 {
    let next = ((multiplier + delta) * 10.0).round() / 10.0;
    next.clamp(MIN_MULTIPLIER, MAX_MULTIPLIER)
}
