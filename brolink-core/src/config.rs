use std::time::Duration;

use brolink_model::QualityRegime;
use serde::{Deserialize, Serialize};

/// Knobs that tune the delivery state machine.
///
/// All fields carry defaults so a host can start from `Default` and override
/// only what its deployment needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per chain before a retryable failure is abandoned. Zero
    /// disables submission entirely.
    pub max_attempts: u32,
    /// Retry/backoff policy for failed attempts.
    pub retry: RetryConfig,
    /// Hard deadlines for individual registry calls.
    pub deadlines: DeadlineConfig,
    /// Deliver observations that are still `voorlopig` and open-ended.
    pub allow_provisional_additions: bool,
    /// Regime used when neither the dossier nor the well carries one.
    pub quality_regime_default: QualityRegime,
    /// Which slice of the dossier space this worker owns.
    pub shard: ShardConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry: RetryConfig::default(),
            deadlines: DeadlineConfig::default(),
            allow_provisional_additions: false,
            quality_regime_default: QualityRegime::Imbro,
            shard: ShardConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the second attempt; doubles per attempt.
    pub backoff_base_secs: u64,
    /// Upper bound on any single backoff.
    pub max_backoff_secs: u64,
    /// Symmetric jitter applied to the computed delay (0.2 = ±20%).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_secs: 30,
            max_backoff_secs: 900,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeadlineConfig {
    pub submit_secs: u64,
    pub poll_secs: u64,
    /// How long a log may stay `pending` before it is failed and retried.
    pub pending_secs: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            submit_secs: 30,
            poll_secs: 15,
            pending_secs: 24 * 60 * 60,
        }
    }
}

impl DeadlineConfig {
    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn pending(&self) -> chrono::Duration {
        i64::try_from(self.pending_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    pub index: u32,
    pub count: u32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self { index: 0, count: 1 }
    }
}
