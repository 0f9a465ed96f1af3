//! Delivery journal.
//!
//! One row per attempt. Rows are append-only apart from their phase,
//! `last_error`, `earliest_retry_at`, the `superseded` flag, and the
//! write-once submission fields (checksum, submission time, reference).

mod memory;
mod sqlite;

use std::fmt;

use async_trait::async_trait;
use brolink_model::{
    DeliveredObservation, DeliveryLog, DeliveryLogId, DeliveryPhase, DossierId,
    EnvelopeChecksum, MessageKind,
};
use chrono::{DateTime, Utc};

use crate::error::{DeliveryError, Result};

pub use memory::MemoryLogStore;
pub use sqlite::SqliteLogStore;

/// Query over the journal; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub dossier: Option<DossierId>,
    pub kind: Option<MessageKind>,
    pub phase: Option<DeliveryPhase>,
}

impl LogFilter {
    pub fn for_dossier(dossier: DossierId) -> Self {
        Self {
            dossier: Some(dossier),
            ..Self::default()
        }
    }

    pub fn matches(&self, log: &DeliveryLog) -> bool {
        self.dossier.is_none_or(|d| d == log.dossier)
            && self.kind.is_none_or(|k| k == log.kind)
            && self.phase.is_none_or(|p| p == log.phase)
    }
}

/// A compare-and-swap phase change.
///
/// `envelope_checksum`, `submission_time` and `remote_reference` are
/// write-once: a value is only stored if the row has none yet.
/// `observations` replaces the carried set when present; `last_error` is
/// kept when `None`. `earliest_retry_at` is always overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct LogUpdate {
    pub phase: DeliveryPhase,
    pub envelope_checksum: Option<EnvelopeChecksum>,
    pub observations: Option<Vec<DeliveredObservation>>,
    pub submission_time: Option<DateTime<Utc>>,
    pub remote_reference: Option<String>,
    pub last_error: Option<String>,
    pub earliest_retry_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl LogUpdate {
    pub fn to(phase: DeliveryPhase, at: DateTime<Utc>) -> Self {
        Self {
            phase,
            envelope_checksum: None,
            observations: None,
            submission_time: None,
            remote_reference: None,
            last_error: None,
            earliest_retry_at: None,
            at,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.earliest_retry_at = Some(at);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.remote_reference = Some(reference.into());
        self
    }

    pub(crate) fn apply(&self, log: &mut DeliveryLog) {
        log.phase = self.phase;
        if log.envelope_checksum.is_none() {
            log.envelope_checksum = self.envelope_checksum.clone();
        }
        if let Some(observations) = &self.observations {
            log.observations = observations.clone();
        }
        if log.submission_time.is_none() {
            log.submission_time = self.submission_time;
        }
        if log.remote_reference.is_none() {
            log.remote_reference = self.remote_reference.clone();
        }
        if let Some(error) = &self.last_error {
            log.last_error = Some(error.clone());
        }
        log.earliest_retry_at = self.earliest_retry_at;
        log.updated_at = self.at;
    }
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync + fmt::Debug {
    async fn get(&self, id: DeliveryLogId) -> Result<Option<DeliveryLog>>;

    /// Most recently inserted log of `(dossier, kind)`.
    async fn head(&self, dossier: DossierId, kind: MessageKind) -> Result<Option<DeliveryLog>>;

    /// Matching logs in insertion order.
    async fn list(&self, filter: &LogFilter) -> Result<Vec<DeliveryLog>>;

    async fn list_for_dossier(&self, dossier: DossierId) -> Result<Vec<DeliveryLog>> {
        self.list(&LogFilter::for_dossier(dossier)).await
    }

    /// Queued, submitted and pending logs plus failed heads that have not
    /// been superseded, in insertion order.
    async fn list_non_terminal(&self) -> Result<Vec<DeliveryLog>>;

    /// Appends a log. Fails with `Conflict` when it would create a second
    /// live log for `(dossier, kind)` or a second pending log for the
    /// dossier.
    async fn insert_attempt(&self, log: &DeliveryLog) -> Result<()>;

    /// Atomically marks the failed head `prior` superseded and appends
    /// `next`.
    async fn retry_attempt(&self, prior: DeliveryLogId, next: &DeliveryLog) -> Result<()>;

    /// Moves a log from `expected` to `update.phase`, returning the stored
    /// row. `Conflict` when the row is no longer in `expected`.
    async fn transition(
        &self,
        id: DeliveryLogId,
        expected: DeliveryPhase,
        update: LogUpdate,
    ) -> Result<DeliveryLog>;
}

/// Builds a fresh journal row.
pub fn new_log(
    dossier: DossierId,
    kind: MessageKind,
    attempt: u32,
    phase: DeliveryPhase,
    now: DateTime<Utc>,
) -> DeliveryLog {
    DeliveryLog {
        id: DeliveryLogId::new(),
        dossier,
        kind,
        attempt,
        phase,
        envelope_checksum: None,
        observations: Vec::new(),
        submission_time: None,
        remote_reference: None,
        last_error: None,
        earliest_retry_at: None,
        superseded: false,
        created_at: now,
        updated_at: now,
    }
}

/// Uniqueness rules shared by the in-memory store; SQLite enforces the same
/// rules with partial unique indexes.
pub(crate) fn check_uniqueness<'a>(
    existing: impl IntoIterator<Item = &'a DeliveryLog>,
    candidate: &DeliveryLog,
) -> Result<()> {
    for log in existing {
        if log.id == candidate.id {
            return Err(DeliveryError::Conflict(format!("log {} already exists", log.id)));
        }
        if log.dossier != candidate.dossier {
            continue;
        }
        if candidate.is_live() && log.is_live() && log.kind == candidate.kind {
            return Err(DeliveryError::Conflict(format!(
                "dossier {} already has live {} log {}",
                log.dossier, log.kind, log.id
            )));
        }
        if candidate.phase == DeliveryPhase::Pending && log.phase == DeliveryPhase::Pending {
            return Err(DeliveryError::Conflict(format!(
                "dossier {} already has pending log {}",
                log.dossier, log.id
            )));
        }
    }
    Ok(())
}
