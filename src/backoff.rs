use std::time::Duration;

use rand::Rng;

/// Exponential reconnect schedule with additive jitter and an attempt cap.
///
/// The nominal delay for attempt `n` (1-based) is `base * 2^(n-1)`, capped at
/// `max_delay`. Up to a quarter of the nominal delay is added as jitter on top
/// of a floor kept that far below `max_delay`, so delays never exceed the cap
/// and retries stay spread out once the cap is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before reconnect attempt `attempt`, or `None` once the attempt
    /// budget is spent.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let nominal = self.nominal_delay(attempt);
        let spread = u64::try_from(nominal.as_millis() / 4).unwrap_or(u64::MAX);
        let jitter = if spread == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..=spread))
        };

        let floor = nominal.min(self.max_delay.saturating_sub(Duration::from_millis(spread)));
        Some(floor + jitter)
    }
}
