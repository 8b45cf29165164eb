use warden_core::Timestamp;

// Tolerance for accumulated float error when testing for a whole token.
const TOKEN_EPSILON: f64 = 1e-9;

/// Continuously refilled token bucket for burst control.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_ms: f64,
    tokens: f64,
    last_refill: Timestamp,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(capacity: u32, refill_per_ms: f64, now: Timestamp) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_ms,
            tokens: capacity as f64,
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_ms(&self) -> f64 {
        self.refill_per_ms
    }

    fn refill(&mut self, now: Timestamp) {
        let elapsed = now.millis_since(self.last_refill);
        if elapsed == 0 {
            return;
        }
        self.tokens = (self.tokens + elapsed as f64 * self.refill_per_ms).min(self.capacity);
        self.last_refill = now;
    }

    pub fn check(&mut self, now: Timestamp) -> bool {
        self.refill(now);
        self.tokens + TOKEN_EPSILON >= 1.0
    }

    pub fn try_consume(&mut self, now: Timestamp) -> bool {
        if !self.check(now) {
            return false;
        }
        self.tokens = (self.tokens - 1.0).max(0.0);
        true
    }

    /// Whole tokens currently available.
    pub fn available(&mut self, now: Timestamp) -> u32 {
        self.refill(now);
        (self.tokens + TOKEN_EPSILON).floor() as u32
    }

    /// Milliseconds until at least one token is available.
    pub fn time_until_token_ms(&mut self, now: Timestamp) -> u64 {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            return 0;
        }
        ((1.0 - self.tokens) / self.refill_per_ms - TOKEN_EPSILON)
            .ceil()
            .max(1.0) as u64
    }

    /// When the next token lands, or `None` if the bucket is already full.
    pub fn next_refill(&mut self, now: Timestamp) -> Option<Timestamp> {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= self.capacity {
            return None;
        }
        let fraction = self.tokens - self.tokens.floor();
        let ms = ((1.0 - fraction) / self.refill_per_ms - TOKEN_EPSILON)
            .ceil()
            .max(1.0) as u64;
        Some(now.plus_millis(ms))
    }

    /// Apply new limits, keeping the current fill (clamped to the new
    /// capacity).
    pub fn reconfigure(&mut self, capacity: u32, refill_per_ms: f64, now: Timestamp) {
        self.refill(now);
        self.capacity = capacity as f64;
        self.refill_per_ms = refill_per_ms;
        self.tokens = self.tokens.min(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bucket_drains_then_refills_one() {
        // 3 tokens, one token per 250ms
        let t0 = Timestamp::from_seconds(1_000);
        let mut bucket = TokenBucket::new(3, 1.0 / 250.0, t0);

        for _ in 0..3 {
            assert!(bucket.try_consume(t0));
        }
        assert!(!bucket.try_consume(t0));
        assert_eq!(bucket.time_until_token_ms(t0), 250);

        assert!(!bucket.try_consume(t0.plus_millis(249)));
        let later = t0.plus_millis(250);
        assert!(bucket.try_consume(later));
        assert!(!bucket.try_consume(later));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let t0 = Timestamp::from_seconds(1);
        let mut bucket = TokenBucket::new(2, 0.01, t0);
        bucket.try_consume(t0);
        assert_eq!(bucket.available(t0.plus_millis(1_000_000)), 2);
        assert_eq!(bucket.next_refill(t0.plus_millis(1_000_000)), None);
    }

    #[test]
    fn test_non_terminating_refill_rate() {
        // 10 per 60s: 1/6000 tokens per ms, not exact in binary
        let t0 = Timestamp::from_seconds(0);
        let mut bucket = TokenBucket::new(1, 10.0 / 60_000.0, t0);
        assert!(bucket.try_consume(t0));
        assert!(!bucket.check(t0.plus_millis(5_999)));
        assert!(bucket.try_consume(t0.plus_millis(6_000)));
    }

    #[test]
    fn test_clock_going_backwards_does_not_refill() {
        let t0 = Timestamp::from_seconds(100);
        let mut bucket = TokenBucket::new(1, 1.0, t0);
        bucket.try_consume(t0);
        assert!(!bucket.check(Timestamp::from_seconds(50)));
    }

    #[test]
    fn test_reconfigure_clamps_tokens() {
        let t0 = Timestamp::from_seconds(1);
        let mut bucket = TokenBucket::new(10, 0.001, t0);
        bucket.reconfigure(4, 0.002, t0);
        assert_eq!(bucket.available(t0), 4);
        assert_eq!(bucket.capacity(), 4);
    }
}
