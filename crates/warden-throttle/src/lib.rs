//! Per-actor usage throttling.
//!
//! Every (actor, action type) pair gets its own [`ActionTracker`] combining
//! an optional cooldown, an optional token bucket for bursts and a sliding
//! window for the sustained rate. The [`UsageLedger`] owns the trackers,
//! [`AdaptiveController`] rescales adaptive policies from load readings and
//! [`RateViolationEscalator`] counts repeated throttling per actor.
//!
//! All operations take the current time as an argument; nothing in this
//! crate reads the wall clock.

pub mod adaptive;
pub mod bucket;
pub mod error;
pub mod escalator;
pub mod ledger;
pub mod policy;
pub mod tracker;
pub mod window;

pub use adaptive::{AdaptiveController, Adjustment, LoadSignal, MAX_MULTIPLIER, MIN_MULTIPLIER};
pub use bucket::TokenBucket;
pub use error::{ThrottleError, ThrottleResult};
pub use escalator::{Escalation, RateViolationEscalator};
pub use ledger::UsageLedger;
pub use policy::RateLimitPolicy;
pub use tracker::{ActionTracker, ThrottleReason, UsageDecision, UsageSnapshot};
pub use window::SlidingWindow;
