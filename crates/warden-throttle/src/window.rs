use std::collections::VecDeque;
use warden_core::Timestamp;

/// Counts actions inside a trailing window of fixed length.
///
/// Timestamps are appended in order, so pruning only ever removes a
/// prefix. An entry expires once `window_ms` has fully elapsed since it.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    limit: u32,
    window_ms: u64,
    entries: VecDeque<Timestamp>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            entries: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Change limits; recorded history is kept.
    pub fn set_limits(&mut self, limit: u32, window_ms: u64) {
        self.limit = limit;
        self.window_ms = window_ms;
    }

    fn prune(&mut self, now: Timestamp) {
        while let Some(front) = self.entries.front() {
            if now.millis_since(*front) >= self.window_ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn check(&mut self, now: Timestamp) -> bool {
        self.prune(now);
        self.entries.len() < self.limit as usize
    }

    /// Append `now` if the window admits it.
    pub fn record(&mut self, now: Timestamp) -> bool {
        if !self.check(now) {
            return false;
        }
        self.entries.push_back(now);
        true
    }

    pub fn count(&mut self, now: Timestamp) -> usize {
        self.prune(now);
        self.entries.len()
    }

    pub fn remaining(&mut self, now: Timestamp) -> u32 {
        self.prune(now);
        (self.limit as usize).saturating_sub(self.entries.len()) as u32
    }

    /// When the oldest live entry expires, if any.
    pub fn next_expiry(&mut self, now: Timestamp) -> Option<Timestamp> {
        self.prune(now);
        self.entries
            .front()
            .map(|front| front.plus_millis(self.window_ms))
    }

    /// Milliseconds until enough entries expire to admit one more action.
    pub fn retry_after_ms(&mut self, now: Timestamp) -> u64 {
        self.prune(now);
        let excess = self.entries.len() + 1;
        let limit = self.limit as usize;
        if excess <= limit {
            return 0;
        }
        // The entry whose expiry frees a slot
        self.entries
            .get(excess - limit - 1)
            .map(|t| t.plus_millis(self.window_ms).millis_since(now))
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
