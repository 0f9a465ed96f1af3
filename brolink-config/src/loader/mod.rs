pub mod error;

use std::{fs, path::PathBuf};

use brolink_core::{DeadlineConfig, DeliveryConfig, RetryConfig, ShardConfig};
use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use crate::{
    credentials::CredentialsRef,
    models::{
        Config, ConfigMetadata, DEFAULT_DATABASE_URL, DatabaseConfig, RegistryConfig,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigWarnings},
};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("brolink.toml"),
        PathBuf::from("config/brolink.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Loaded configuration plus any non-fatal findings.
#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Resolves configuration with precedence env > file > default.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| true)
                .or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        debug!(env_file_loaded, "environment seeded");

        let env_config = EnvConfig::gather();
        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let (config, warnings) =
            self.compose_config(file_config, env_config, config_path, env_file_loaded)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            debug!("no configuration file found in default locations");
            return Ok((None, None));
        };
        debug!(path = %path.display(), ?provenance, "configuration file resolved");

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
        env_file_loaded: bool,
    ) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No brolink.toml detected; falling back to environment variables",
                "Pass --config or set BROLINK_CONFIG_PATH to use a configuration file",
            );
        }

        let FileConfig {
            delivery: file_delivery,
            registry: file_registry,
            database: file_database,
            shard: file_shard,
        } = file_config.unwrap_or_default();

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            backoff_base_secs: env
                .backoff_base_seconds
                .or(file_delivery.backoff_base_seconds)
                .unwrap_or(retry_defaults.backoff_base_secs),
            max_backoff_secs: env
                .max_backoff_seconds
                .or(file_delivery.max_backoff_seconds)
                .unwrap_or(retry_defaults.max_backoff_secs),
            jitter_ratio: env
                .jitter_ratio
                .or(file_delivery.jitter_ratio)
                .unwrap_or(retry_defaults.jitter_ratio),
        };

        let deadline_defaults = DeadlineConfig::default();
        let deadlines = DeadlineConfig {
            submit_secs: env
                .submit_deadline_seconds
                .or(file_registry.submit_deadline_seconds)
                .unwrap_or(deadline_defaults.submit_secs),
            poll_secs: env
                .poll_deadline_seconds
                .or(file_registry.poll_deadline_seconds)
                .unwrap_or(deadline_defaults.poll_secs),
            pending_secs: env
                .pending_deadline_seconds
                .or(file_delivery.pending_deadline_seconds)
                .unwrap_or(deadline_defaults.pending_secs),
        };

        let shard_defaults = ShardConfig::default();
        let shard = ShardConfig {
            index: env
                .shard_index
                .or(file_shard.index)
                .unwrap_or(shard_defaults.index),
            count: env
                .shard_count
                .or(file_shard.count)
                .unwrap_or(shard_defaults.count),
        };

        let delivery_defaults = DeliveryConfig::default();
        let delivery = DeliveryConfig {
            max_attempts: env
                .max_attempts
                .or(file_delivery.max_attempts)
                .unwrap_or(delivery_defaults.max_attempts),
            retry,
            deadlines,
            allow_provisional_additions: env
                .allow_provisional_additions
                .or(file_delivery.allow_provisional_additions)
                .unwrap_or(delivery_defaults.allow_provisional_additions),
            quality_regime_default: env
                .quality_regime_default
                .or(file_delivery.quality_regime_default)
                .unwrap_or(delivery_defaults.quality_regime_default),
            shard,
        };

        let raw_url = env
            .registry_base_url
            .clone()
            .or(file_registry.base_url)
            .ok_or_else(|| ConfigLoadError::MissingValue {
                key: "REGISTRY_BASE_URL".into(),
            })?;
        let base_url =
            Url::parse(&raw_url).map_err(|source| ConfigLoadError::InvalidRegistryUrl {
                value: raw_url.clone(),
                source,
            })?;

        let credentials_ref: CredentialsRef = env
            .registry_credentials_ref
            .clone()
            .or(file_registry.credentials_ref)
            .ok_or_else(|| ConfigLoadError::MissingValue {
                key: "REGISTRY_CREDENTIALS_REF".into(),
            })?
            .parse()?;
        let credentials = credentials_ref.resolve()?;

        let database = DatabaseConfig {
            url: env
                .database_url
                .clone()
                .or(file_database.url)
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
        };

        let config = Config {
            delivery,
            registry: RegistryConfig {
                base_url,
                credentials_ref,
                credentials,
            },
            database,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok((config, warnings))
    }
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(self, ConfigPathProvenance::Explicit | ConfigPathProvenance::Env)
    }
}
