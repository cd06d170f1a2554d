use std::time::Duration;

// Doubling past this many attempts would overflow; the ceiling has long
// since taken over by then.
const MAX_EXPONENT: u32 = 20;

/// Exponential backoff: `base * 2^attempt`, capped at a ceiling.
#[derive(Debug)]
pub struct BackoffCounter {
    base: Duration,
    ceiling: Duration,
    attempt: u32,
}

impl BackoffCounter {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling,
            attempt: 0,
        }
    }

    /// Delay to use for the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(MAX_EXPONENT);
        let delay = self
            .base
            .saturating_mul(1 << exponent)
            .min(self.ceiling);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
