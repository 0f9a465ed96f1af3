use std::sync::Arc;

use async_trait::async_trait;
use brolink_model::{DeliveryLog, DeliveryLogId, DeliveryPhase, DossierId, MessageKind};
use tokio::sync::Mutex;

use super::{DeliveryLogStore, LogFilter, LogUpdate, check_uniqueness};
use crate::error::{DeliveryError, Result};

/// Journal kept in a vector, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    logs: Arc<Mutex<Vec<DeliveryLog>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<DeliveryLog> {
        self.logs.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryLogStore {
    async fn get(&self, id: DeliveryLogId) -> Result<Option<DeliveryLog>> {
        let logs = self.logs.lock().await;
        Ok(logs.iter().find(|log| log.id == id).cloned())
    }

    async fn head(&self, dossier: DossierId, kind: MessageKind) -> Result<Option<DeliveryLog>> {
        let logs = self.logs.lock().await;
        Ok(logs
            .iter()
            .rev()
            .find(|log| log.dossier == dossier && log.kind == kind)
            .cloned())
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<DeliveryLog>> {
        let logs = self.logs.lock().await;
        Ok(logs.iter().filter(|log| filter.matches(log)).cloned().collect())
    }

    async fn list_non_terminal(&self) -> Result<Vec<DeliveryLog>> {
        let logs = self.logs.lock().await;
        Ok(logs.iter().filter(|log| log.is_live()).cloned().collect())
    }

    async fn insert_attempt(&self, log: &DeliveryLog) -> Result<()> {
        let mut logs = self.logs.lock().await;
        check_uniqueness(logs.iter(), log)?;
        logs.push(log.clone());
        Ok(())
    }

    async fn retry_attempt(&self, prior: DeliveryLogId, next: &DeliveryLog) -> Result<()> {
        let mut logs = self.logs.lock().await;
        let index = logs
            .iter()
            .position(|log| {
                log.id == prior && log.phase == DeliveryPhase::Failed && !log.superseded
            })
            .ok_or_else(|| {
                DeliveryError::Conflict(format!("log {prior} is not a retryable failed head"))
            })?;

        let mut superseded = logs[index].clone();
        superseded.superseded = true;
        superseded.updated_at = next.created_at;
        check_uniqueness(
            logs.iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, log)| log)
                .chain(std::iter::once(&superseded)),
            next,
        )?;

        logs[index] = superseded;
        logs.push(next.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: DeliveryLogId,
        expected: DeliveryPhase,
        update: LogUpdate,
    ) -> Result<DeliveryLog> {
        let mut logs = self.logs.lock().await;
        let index = logs
            .iter()
            .position(|log| log.id == id)
            .ok_or_else(|| DeliveryError::Conflict(format!("log {id} does not exist")))?;
        if logs[index].phase != expected {
            return Err(DeliveryError::Conflict(format!(
                "log {id} is {} not {expected}",
                logs[index].phase
            )));
        }

        let mut updated = logs[index].clone();
        update.apply(&mut updated);
        if updated.phase != expected {
            check_uniqueness(
                logs.iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, log)| log),
                &updated,
            )?;
        }
        logs[index] = updated.clone();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::new_log;
    use chrono::Utc;

    #[tokio::test]
    async fn second_live_log_for_same_kind_conflicts() {
        let store = MemoryLogStore::new();
        let dossier = DossierId::new();
        let now = Utc::now();
        store
            .insert_attempt(&new_log(dossier, MessageKind::Start, 1, DeliveryPhase::Queued, now))
            .await
            .unwrap();
        let err = store
            .insert_attempt(&new_log(dossier, MessageKind::Start, 1, DeliveryPhase::Queued, now))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Conflict(_)));

        store
            .insert_attempt(&new_log(dossier, MessageKind::Addition, 1, DeliveryPhase::Queued, now))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retry_supersedes_failed_head() {
        let store = MemoryLogStore::new();
        let dossier = DossierId::new();
        let now = Utc::now();
        let failed = new_log(dossier, MessageKind::Start, 1, DeliveryPhase::Failed, now);
        store.insert_attempt(&failed).await.unwrap();

        let next = new_log(dossier, MessageKind::Start, 2, DeliveryPhase::Queued, now);
        store.retry_attempt(failed.id, &next).await.unwrap();

        let prior = store.get(failed.id).await.unwrap().unwrap();
        assert!(prior.superseded);
        let live = store.list_non_terminal().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, next.id);
        assert_eq!(store.head(dossier, MessageKind::Start).await.unwrap().unwrap().attempt, 2);

        let err = store.retry_attempt(failed.id, &next).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Conflict(_)));
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap_with_write_once_fields() {
        let store = MemoryLogStore::new();
        let now = Utc::now();
        let log = new_log(DossierId::new(), MessageKind::Start, 1, DeliveryPhase::Submitted, now);
        store.insert_attempt(&log).await.unwrap();

        let pending = store
            .transition(
                log.id,
                DeliveryPhase::Submitted,
                LogUpdate::to(DeliveryPhase::Pending, now).with_reference("r1"),
            )
            .await
            .unwrap();
        assert_eq!(pending.remote_reference.as_deref(), Some("r1"));

        let again = store
            .transition(
                log.id,
                DeliveryPhase::Pending,
                LogUpdate::to(DeliveryPhase::Pending, now).with_reference("r2"),
            )
            .await
            .unwrap();
        assert_eq!(again.remote_reference.as_deref(), Some("r1"));

        let err = store
            .transition(log.id, DeliveryPhase::Queued, LogUpdate::to(DeliveryPhase::Failed, now))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Conflict(_)));
    }

    #[tokio::test]
    async fn one_pending_log_per_dossier() {
        let store = MemoryLogStore::new();
        let dossier = DossierId::new();
        let now = Utc::now();
        store
            .insert_attempt(&new_log(dossier, MessageKind::Start, 1, DeliveryPhase::Pending, now))
            .await
            .unwrap();
        let addition = new_log(dossier, MessageKind::Addition, 1, DeliveryPhase::Submitted, now);
        store.insert_attempt(&addition).await.unwrap();
        let err = store
            .transition(
                addition.id,
                DeliveryPhase::Submitted,
                LogUpdate::to(DeliveryPhase::Pending, now),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Conflict(_)));
    }
}
