pub mod sources;

use std::path::PathBuf;

use brolink_core::DeliveryConfig;
use brolink_model::RegistryCredentials;
use url::Url;

use crate::credentials::CredentialsRef;

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub delivery: DeliveryConfig,
    pub registry: RegistryConfig,
    pub database: DatabaseConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub base_url: Url,
    pub credentials_ref: CredentialsRef,
    /// Default credentials read through `credentials_ref` at load time.
    pub credentials: RegistryCredentials,
}

impl RegistryConfig {
    pub fn is_plain_http(&self) -> bool {
        self.base_url.scheme() == "http"
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://brolink.db";

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
