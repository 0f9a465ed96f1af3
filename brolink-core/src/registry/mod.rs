//! Remote registry protocol.
//!
//! The client makes exactly one HTTP call per operation and never sleeps or
//! retries; retry policy lives in the coordinator.

mod http;

use std::fmt;

use async_trait::async_trait;
use brolink_model::{RegistryCredentials, RegistryId, RemoteStatus};

use crate::error::Result;

pub use http::HttpRegistryClient;

#[async_trait]
pub trait RegistryClient: Send + Sync + fmt::Debug {
    /// Posts an envelope and returns the registry's tracking reference.
    async fn submit(&self, envelope: &[u8], credentials: &RegistryCredentials)
    -> Result<String>;

    async fn status(
        &self,
        reference: &str,
        credentials: &RegistryCredentials,
    ) -> Result<RemoteStatus>;

    /// The durable identifier issued for an accepted delivery; `None` while
    /// the registry has not issued one yet.
    async fn fetch_registry_id(
        &self,
        reference: &str,
        credentials: &RegistryCredentials,
    ) -> Result<Option<RegistryId>>;
}
