use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    ids::{DeliveryLogId, DossierId, ObservationId},
};

/// Message kinds that move a dossier through the registry.
///
/// The discriminant doubles as processing priority: lower values are
/// handled first within a tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MessageKind {
    Start = 0,
    Addition = 1,
    Correction = 2,
    Close = 3,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Start => "start",
            MessageKind::Addition => "addition",
            MessageKind::Correction => "correction",
            MessageKind::Close => "close",
        }
    }

    pub fn all_kinds() -> [MessageKind; 4] {
        [
            MessageKind::Start,
            MessageKind::Addition,
            MessageKind::Correction,
            MessageKind::Close,
        ]
    }

    /// Kinds that may only be delivered once the start registration is
    /// accepted.
    pub fn requires_registration(&self) -> bool {
        !matches!(self, MessageKind::Start)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::all_kinds()
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::unknown("message kind", s))
    }
}

/// Phase of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPhase {
    /// Waiting to be built and submitted.
    Queued,
    /// Envelope built and recorded; the registry call is in flight.
    Submitted,
    /// Registry holds the payload under a tracking reference.
    Pending,
    Accepted,
    Rejected,
    /// Retryable failure; becomes a new attempt or is abandoned.
    Failed,
    Abandoned,
}

impl DeliveryPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryPhase::Queued => "queued",
            DeliveryPhase::Submitted => "submitted",
            DeliveryPhase::Pending => "pending",
            DeliveryPhase::Accepted => "accepted",
            DeliveryPhase::Rejected => "rejected",
            DeliveryPhase::Failed => "failed",
            DeliveryPhase::Abandoned => "abandoned",
        }
    }

    pub fn all_phases() -> [DeliveryPhase; 7] {
        [
            DeliveryPhase::Queued,
            DeliveryPhase::Submitted,
            DeliveryPhase::Pending,
            DeliveryPhase::Accepted,
            DeliveryPhase::Rejected,
            DeliveryPhase::Failed,
            DeliveryPhase::Abandoned,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryPhase::Accepted
                | DeliveryPhase::Rejected
                | DeliveryPhase::Abandoned
        )
    }

    /// Phases in which the registry may be holding (or about to hold) the
    /// payload.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeliveryPhase::Submitted | DeliveryPhase::Pending)
    }

    /// Terminal phases that quarantine a chain until an operator requeues.
    pub fn is_quarantine(&self) -> bool {
        matches!(self, DeliveryPhase::Rejected | DeliveryPhase::Abandoned)
    }
}

impl fmt::Display for DeliveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryPhase {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryPhase::all_phases()
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::unknown("delivery phase", s))
    }
}

/// Lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeChecksum(pub String);

impl EnvelopeChecksum {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve characters, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for EnvelopeChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observation carried by an addition or correction, with the content
/// checksum it had when the envelope was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredObservation {
    pub id: ObservationId,
    pub checksum: EnvelopeChecksum,
}

/// One row of the delivery journal: a single attempt of `(dossier, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: DeliveryLogId,
    pub dossier: DossierId,
    pub kind: MessageKind,
    pub attempt: u32,
    pub phase: DeliveryPhase,
    pub envelope_checksum: Option<EnvelopeChecksum>,
    #[serde(default)]
    pub observations: Vec<DeliveredObservation>,
    pub submission_time: Option<DateTime<Utc>>,
    pub remote_reference: Option<String>,
    pub last_error: Option<String>,
    pub earliest_retry_at: Option<DateTime<Utc>>,
    /// Set when a later attempt of the same chain has taken over.
    #[serde(default)]
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryLog {
    /// Counts toward the "one non-terminal log per (dossier, kind)" rule.
    pub fn is_live(&self) -> bool {
        match self.phase {
            DeliveryPhase::Failed => !self.superseded,
            phase => !phase.is_terminal(),
        }
    }

    /// A failed head whose backoff has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.phase == DeliveryPhase::Failed
            && !self.superseded
            && self.earliest_retry_at.is_none_or(|at| at <= now)
    }

    pub fn observation_ids(&self) -> Vec<ObservationId> {
        self.observations.iter().map(|o| o.id).collect()
    }
}

/// Remote processing state reported by the registry for a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Pending,
    Accepted,
    Rejected(String),
    Failed(String),
}

impl RemoteStatus {
    /// Maps both the neutral vocabulary and the registry's native delivery
    /// statuses. Unknown values are `None`.
    pub fn from_wire(status: &str, reason: Option<String>) -> Option<Self> {
        let describe = || reason.clone().unwrap_or_else(|| status.to_string());
        match status.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "AANGELEVERD" | "GEVALIDEERD" | "OPGENOMEN" => {
                Some(RemoteStatus::Pending)
            }
            "ACCEPTED" | "DOORGELEVERD" | "OPGENOMEN_LVBRO" => {
                Some(RemoteStatus::Accepted)
            }
            "REJECTED" | "AFGEKEURD" => Some(RemoteStatus::Rejected(describe())),
            "FAILED" => Some(RemoteStatus::Failed(describe())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(phase: DeliveryPhase) -> DeliveryLog {
        let now = Utc::now();
        DeliveryLog {
            id: DeliveryLogId::new(),
            dossier: DossierId::new(),
            kind: MessageKind::Start,
            attempt: 1,
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

    #[test]
    fn failed_head_is_live_until_superseded() {
        let mut failed = log(DeliveryPhase::Failed);
        assert!(failed.is_live());
        failed.superseded = true;
        assert!(!failed.is_live());
        assert!(!log(DeliveryPhase::Accepted).is_live());
        assert!(log(DeliveryPhase::Submitted).is_live());
    }

    #[test]
    fn due_respects_earliest_retry() {
        let now = Utc::now();
        let mut failed = log(DeliveryPhase::Failed);
        failed.earliest_retry_at = Some(now + chrono::Duration::seconds(30));
        assert!(!failed.is_due(now));
        assert!(failed.is_due(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn native_registry_statuses_map_onto_remote_status() {
        assert_eq!(
            RemoteStatus::from_wire("OPGENOMEN_LVBRO", None),
            Some(RemoteStatus::Accepted)
        );
        assert_eq!(
            RemoteStatus::from_wire("afgekeurd", Some("schema".into())),
            Some(RemoteStatus::Rejected("schema".into()))
        );
        assert_eq!(RemoteStatus::from_wire("pending", None), Some(RemoteStatus::Pending));
        assert_eq!(RemoteStatus::from_wire("whatever", None), None);
    }

    #[test]
    fn kinds_order_by_priority() {
        let mut kinds = vec![MessageKind::Close, MessageKind::Start, MessageKind::Addition];
        kinds.sort();
        assert_eq!(kinds, vec![MessageKind::Start, MessageKind::Addition, MessageKind::Close]);
    }
}
