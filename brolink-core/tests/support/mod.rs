//! Shared harness for core integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod registry;

use std::sync::Arc;

use brolink_core::{
    Coordinator, DeliveryConfig, ManualClock, MemoryLogStore, MemoryRepository, RetryConfig,
};
use brolink_model::RegistryCredentials;
use chrono::{DateTime, Utc};

use registry::ScriptedRegistry;

/// Config with jitter disabled so retry times are exact.
pub fn config() -> DeliveryConfig {
    DeliveryConfig {
        retry: RetryConfig {
            backoff_base_secs: 30,
            max_backoff_secs: 900,
            jitter_ratio: 0.0,
        },
        ..DeliveryConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryLogStore>,
    pub repository: Arc<MemoryRepository>,
    pub registry: Arc<ScriptedRegistry>,
    pub clock: ManualClock,
    pub coordinator: Coordinator,
}

impl Harness {
    pub fn new(config: DeliveryConfig) -> Self {
        let store = Arc::new(MemoryLogStore::new());
        let repository = Arc::new(MemoryRepository::new());
        let registry = Arc::new(ScriptedRegistry::default());
        let clock = ManualClock::new(fixtures::at(2024, 3, 1));
        let coordinator = Coordinator::new(
            store.clone(),
            repository.clone(),
            registry.clone(),
            config,
            Some(RegistryCredentials::new("12345678", "test-token")),
        )
        .with_clock(Arc::new(clock.clone()));
        Self {
            store,
            repository,
            registry,
            clock,
            coordinator,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use brolink_core::Clock;
        self.clock.now()
    }
}
