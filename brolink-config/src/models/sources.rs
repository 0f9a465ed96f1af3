use std::path::PathBuf;

use brolink_model::QualityRegime;
use serde::{Deserialize, Serialize};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub delivery: FileDeliveryConfig,
    #[serde(default)]
    pub registry: FileRegistryConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub shard: FileShardConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDeliveryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_deadline_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_provisional_additions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_regime_default: Option<QualityRegime>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRegistryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_deadline_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_deadline_seconds: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileShardConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Environment-derived configuration values.
///
/// Unparseable numbers are dropped so the file or default value applies.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub max_backoff_seconds: Option<u64>,
    pub backoff_base_seconds: Option<u64>,
    pub jitter_ratio: Option<f64>,
    pub pending_deadline_seconds: Option<u64>,
    pub allow_provisional_additions: Option<bool>,
    pub quality_regime_default: Option<QualityRegime>,
    pub submit_deadline_seconds: Option<u64>,
    pub poll_deadline_seconds: Option<u64>,
    pub registry_base_url: Option<String>,
    pub registry_credentials_ref: Option<String>,
    pub database_url: Option<String>,
    pub shard_index: Option<u32>,
    pub shard_count: Option<u32>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut env_config = Self::default();

        env_config.config_path = non_empty_var("BROLINK_CONFIG_PATH").map(PathBuf::from);

        env_config.max_attempts = parse_var("MAX_ATTEMPTS");
        env_config.max_backoff_seconds = parse_var("MAX_BACKOFF_SECONDS");
        env_config.backoff_base_seconds = parse_var("BACKOFF_BASE_SECONDS");
        env_config.jitter_ratio = parse_var("BACKOFF_JITTER_RATIO");
        env_config.pending_deadline_seconds = parse_var("PENDING_DEADLINE_SECONDS");
        env_config.allow_provisional_additions = parse_bool_var("ALLOW_PROVISIONAL_ADDITIONS");
        env_config.quality_regime_default =
            non_empty_var("QUALITY_REGIME_DEFAULT").and_then(|raw| parse_regime(&raw));

        env_config.submit_deadline_seconds = parse_var("SUBMIT_DEADLINE_SECONDS");
        env_config.poll_deadline_seconds = parse_var("POLL_DEADLINE_SECONDS");
        env_config.registry_base_url = non_empty_var("REGISTRY_BASE_URL");
        env_config.registry_credentials_ref = non_empty_var("REGISTRY_CREDENTIALS_REF");

        env_config.database_url = non_empty_var("DATABASE_URL");

        env_config.shard_index = parse_var("SHARD_INDEX");
        env_config.shard_count = parse_var("SHARD_COUNT");

        env_config
    }
}

pub(crate) fn parse_regime(raw: &str) -> Option<QualityRegime> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "IMBRO" => Some(QualityRegime::Imbro),
        "IMBRO/A" | "IMBRO_A" => Some(QualityRegime::ImbroA),
        _ => None,
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    non_empty_var(name).and_then(|raw| raw.parse().ok())
}

fn parse_bool_var(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|raw| {
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    })
}
