use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::WardenEvent;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Clock: injectable time source
//
// Every limiter and tracker takes `now` explicitly; the orchestrator reads it
// from a Clock so tests can drive time without sleeping.
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(start.millis_since_epoch),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, at: Timestamp) {
        self.millis.store(at.millis_since_epoch, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// EventSink: structured event emission
// ---------------------------------------------------------------------------

/// Receiver of engine events (registration, violations, configuration,
/// erasure). Implementations must not block; failures are reported back as
/// strings and never affect the decision that produced the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &WardenEvent) -> Result<(), String>;
}
