//! # Brolink Core
//!
//! Delivery state machine for groundwater level dossiers in the Dutch
//! subsurface registry (BRO).
//!
//! ## Overview
//!
//! A [`Coordinator`] tick drives every live delivery log one step further
//! and turns the [`Selector`]'s candidates into new logs:
//!
//! - **Envelopes**: deterministic XML documents for start registrations,
//!   observation additions and corrections, and closures
//! - **Registry client**: one HTTP call per operation, no retries
//! - **Delivery journal**: append-only log of attempts with compare-and-swap
//!   phase changes, in memory or SQLite
//! - **Reconciliation**: accepted deliveries are written back to dossiers and
//!   observations
//! - **Ingest**: measurements and tube-top revisions with calculated values
//!
//! ## Architecture
//!
//! - [`envelope`]: builders for every message kind
//! - [`registry`]: [`RegistryClient`] and its reqwest implementation
//! - [`store`]: [`DeliveryLogStore`] implementations
//! - [`repository`]: [`DossierRepository`] implementations
//! - [`coordinator`]: the state machine
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use brolink_core::{
//!     Coordinator, DeliveryConfig, HttpRegistryClient, SqliteLogStore, SqliteRepository,
//!     TickScope, open_database,
//! };
//!
//! async fn run_once() -> brolink_core::Result<()> {
//!     let pool = open_database("sqlite://brolink.db").await?;
//!     let config = DeliveryConfig::default();
//!     let registry = HttpRegistryClient::new(
//!         &"https://registry.example.org/api/".parse().unwrap(),
//!         config.deadlines,
//!     )?;
//!     let coordinator = Coordinator::new(
//!         Arc::new(SqliteLogStore::new(pool.clone())),
//!         Arc::new(SqliteRepository::new(pool)),
//!         Arc::new(registry),
//!         config,
//!         None,
//!     );
//!     let report = coordinator.tick(TickScope::All).await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]

pub mod backoff;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod envelope;
pub mod error;
pub mod ingest;
pub mod locks;
pub mod measurement;
pub mod reconciler;
pub mod registry;
pub mod repository;
pub mod selector;
pub mod shard;
pub mod store;
pub mod validation;

use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub use backoff::RetryPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DeadlineConfig, DeliveryConfig, RetryConfig, ShardConfig};
pub use coordinator::{Coordinator, TickReport, TickScope};
pub use credentials::CredentialResolver;
pub use envelope::{DossierContext, Envelope, EnvelopeBuilder, ObservationBundle};
pub use error::{DeliveryError, ErrorClass, Result};
pub use ingest::{ImportReport, Ingestor};
pub use reconciler::Reconciler;
pub use registry::{HttpRegistryClient, RegistryClient};
pub use repository::{
    DossierRepository, MemoryRepository, ObservationFilter, Snapshot, SqliteRepository,
};
pub use selector::{Candidate, Selection, Selector};
pub use store::{DeliveryLogStore, LogFilter, LogUpdate, MemoryLogStore, SqliteLogStore};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connects to (creating if needed) the SQLite database at `url` and runs
/// the embedded migrations.
pub async fn open_database(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|err| DeliveryError::Configuration(format!("database url '{url}': {err}")))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|err| DeliveryError::Configuration(format!("opening database '{url}': {err}")))?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
