use std::sync::Arc;

use brolink_model::{DeliveryLog, DossierId, MessageKind, RegistryId};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    error::{DeliveryError, Result},
    locks::KeyedLocks,
    repository::{DossierRepository, ObservationFilter},
};

/// Applies authoritative remote outcomes to local dossiers.
///
/// Every write happens under the dossier's lock. Operations are idempotent
/// so a reconciliation interrupted before the log is marked accepted can be
/// replayed on the next poll.
#[derive(Debug)]
pub struct Reconciler {
    repository: Arc<dyn DossierRepository>,
    locks: KeyedLocks<DossierId>,
}

impl Reconciler {
    pub fn new(repository: Arc<dyn DossierRepository>) -> Self {
        Self {
            repository,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn on_accepted(
        &self,
        log: &DeliveryLog,
        registry_id: Option<&RegistryId>,
        accepted_at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.locks.lock(&log.dossier).await;
        match log.kind {
            MessageKind::Start => {
                let registry_id = registry_id.ok_or_else(|| {
                    DeliveryError::Consistency(format!(
                        "accepted start {} carries no registry id",
                        log.id
                    ))
                })?;
                self.repository.set_registry_id(log.dossier, registry_id).await?;

                // Closed observations never accepted become addition candidates.
                let eligible: Vec<_> = self
                    .repository
                    .list_observations(log.dossier, ObservationFilter::Closed)
                    .await?
                    .into_iter()
                    .filter(|o| o.accepted_checksum.is_none() && o.up_to_date_in_bro)
                    .map(|o| o.id)
                    .collect();
                self.repository.mark_stale(&eligible).await?;

                info!(
                    dossier = %log.dossier,
                    registry_id = %registry_id,
                    eligible = eligible.len(),
                    "start registration reconciled"
                );
            }
            MessageKind::Addition | MessageKind::Correction => {
                self.repository
                    .mark_up_to_date(&log.observations, accepted_at)
                    .await?;
                info!(
                    dossier = %log.dossier,
                    kind = %log.kind,
                    observations = log.observations.len(),
                    "observations marked up to date"
                );
            }
            MessageKind::Close => {
                info!(dossier = %log.dossier, "dossier closed in registry");
            }
        }
        Ok(())
    }

    /// Rejected and abandoned chains leave business fields untouched; the
    /// reason stays on the log for the operator.
    pub fn on_quarantined(&self, log: &DeliveryLog) {
        warn!(
            dossier = %log.dossier,
            kind = %log.kind,
            attempt = log.attempt,
            log_id = %log.id,
            phase = %log.phase,
            reason = log.last_error.as_deref().unwrap_or("unknown"),
            "delivery quarantined until requeued"
        );
    }
}
