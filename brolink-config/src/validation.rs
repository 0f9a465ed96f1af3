use thiserror::Error;

use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("SHARD_COUNT must be at least 1")]
    ZeroShardCount,
    #[error("SHARD_INDEX {index} is out of range for SHARD_COUNT {count}")]
    ShardIndexOutOfRange { index: u32, count: u32 },
    #[error("BACKOFF_JITTER_RATIO {ratio} must be within [0, 1)")]
    InvalidJitter { ratio: f64 },
    #[error("registry URL {url} must use http or https")]
    UnsupportedRegistryScheme { url: String },
    #[error("{field} must be greater than zero")]
    ZeroDeadline { field: &'static str },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|w| w.message.contains(needle))
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let delivery = &config.delivery;

    let shard = delivery.shard;
    if shard.count == 0 {
        return Err(ConfigGuardRailError::ZeroShardCount);
    }
    if shard.index >= shard.count {
        return Err(ConfigGuardRailError::ShardIndexOutOfRange {
            index: shard.index,
            count: shard.count,
        });
    }

    let ratio = delivery.retry.jitter_ratio;
    if !(0.0..1.0).contains(&ratio) {
        return Err(ConfigGuardRailError::InvalidJitter { ratio });
    }

    match config.registry.base_url.scheme() {
        "https" => {}
        "http" => warnings.push_with_hint(
            format!(
                "registry URL {} is plain http; tokens travel unencrypted",
                config.registry.base_url
            ),
            "Use an https REGISTRY_BASE_URL outside local testing",
        ),
        _ => {
            return Err(ConfigGuardRailError::UnsupportedRegistryScheme {
                url: config.registry.base_url.to_string(),
            });
        }
    }

    let deadlines = delivery.deadlines;
    for (field, value) in [
        ("SUBMIT_DEADLINE_SECONDS", deadlines.submit_secs),
        ("POLL_DEADLINE_SECONDS", deadlines.poll_secs),
        ("PENDING_DEADLINE_SECONDS", deadlines.pending_secs),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroDeadline { field });
        }
    }

    if delivery.max_attempts == 0 {
        warnings.push_with_hint(
            "MAX_ATTEMPTS is 0; delivery is disabled and candidates are abandoned",
            "Set MAX_ATTEMPTS to 1 or more to submit messages",
        );
    }

    if delivery.retry.backoff_base_secs > delivery.retry.max_backoff_secs {
        warnings.push(format!(
            "BACKOFF_BASE_SECONDS ({}) exceeds MAX_BACKOFF_SECONDS ({}); every retry waits the maximum",
            delivery.retry.backoff_base_secs, delivery.retry.max_backoff_secs
        ));
    }

    Ok(warnings)
}
