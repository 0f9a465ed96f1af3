use chrono::{DateTime, Utc};
use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with symmetric jitter.
///
/// The anchor for attempt `n` is `base × 2^(n−1)` capped at the max
/// backoff; jitter spreads it by `±jitter_ratio` and the result is capped
/// again so no retry is ever scheduled past the max.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }

        let exp = attempt.saturating_sub(1).min(62) as i32;
        let base_ms = self.config.backoff_base_secs.saturating_mul(1_000) as f64;
        let max_ms = self.max_ms() as f64;
        (base_ms * 2f64.powi(exp)).min(max_ms).max(0.0) as u64
    }

    pub fn jittered_delay_ms(&self, attempt: u32, rng: &mut impl Rng) -> u64 {
        let anchor = self.base_delay_ms(attempt);
        if anchor == 0 {
            return 0;
        }

        let ratio = self.config.jitter_ratio.clamp(0.0, 1.0);
        let span = anchor as f64 * ratio;
        let lower = (anchor as f64 - span).max(0.0);
        let upper = (anchor as f64 + span).min(self.max_ms() as f64);
        if upper <= lower {
            return lower.round() as u64;
        }

        rng.random_range(lower..=upper).round() as u64
    }

    /// When a failure at `attempt` may be retried.
    pub fn earliest_retry_at(
        &self,
        attempt: u32,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> DateTime<Utc> {
        let delay_ms = self.jittered_delay_ms(attempt, rng);
        let delay = chrono::Duration::milliseconds(
            i64::try_from(delay_ms).unwrap_or(i64::MAX / 1_000),
        );
        now.checked_add_signed(delay).unwrap_or(now)
    }

    fn max_ms(&self) -> u64 {
        self.config.max_backoff_secs.saturating_mul(1_000)
    }
}
