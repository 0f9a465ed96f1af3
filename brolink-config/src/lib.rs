//! Configuration loading for brolink.
//!
//! Settings come from the process environment (optionally seeded from a
//! `.env` file), a TOML file and built-in defaults, in that order of
//! precedence. Guard rails reject configurations the delivery engine cannot
//! run with and collect warnings for ones it can run with but probably
//! should not.

#![allow(missing_docs)]

pub mod credentials;
pub mod loader;
pub mod models;
pub mod validation;

pub use credentials::CredentialsRef;
pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{Config, ConfigMetadata, DatabaseConfig, RegistryConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
