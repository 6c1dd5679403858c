use std::time::Duration;

/// Exponential backoff for connect attempts.
///
/// The level is shared across the whole pool: every consecutive failed
/// attempt, on any slot, doubles the delay applied to the next attempt, and
/// any successful connect resets it. Each backing-off slot still runs its
/// own expiry timer with the delay it was handed.
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    level: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Backoff {
        Backoff {
            base,
            max,
            level: 0,
        }
    }

    /// The delay to apply after a failed attempt; advances the level.
    pub(crate) fn next_delay(&mut self) -> Duration {
        // 2^16 * base already exceeds any sane max; avoid shift overflow.
        let exp = self.level.min(16);
        let delay = self.base.saturating_mul(1u32 << exp).min(self.max);
        self.level = self.level.saturating_add(1);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.level = 0;
    }
}
