use async_trait::async_trait;
use brolink_model::{
    DeliveryLog, DeliveryLogId, DeliveryPhase, DossierId, EnvelopeChecksum, MessageKind,
};
use sqlx::{
    Row, Sqlite, SqlitePool,
    query::Query,
    sqlite::{SqliteArguments, SqliteRow},
};

use super::{DeliveryLogStore, LogFilter, LogUpdate};
use crate::error::{DeliveryError, Result};

const SELECT_LOG: &str = r#"
    SELECT log_id, dossier_id, kind, attempt, phase, envelope_checksum, observations,
           submission_time, remote_reference, last_error, earliest_retry_at,
           superseded, created_at, updated_at
    FROM delivery_logs
"#;

/// Journal backed by the `delivery_logs` table.
///
/// The partial unique indexes from the migrations enforce the one-live and
/// one-pending rules; violations surface as `DeliveryError::Conflict`.
#[derive(Debug, Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, id: DeliveryLogId) -> Result<Option<DeliveryLog>> {
        let row = sqlx::query(&format!("{SELECT_LOG} WHERE log_id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_log).transpose()
    }
}

#[async_trait]
impl DeliveryLogStore for SqliteLogStore {
    async fn get(&self, id: DeliveryLogId) -> Result<Option<DeliveryLog>> {
        self.fetch(id).await
    }

    async fn head(&self, dossier: DossierId, kind: MessageKind) -> Result<Option<DeliveryLog>> {
        let row = sqlx::query(&format!(
            "{SELECT_LOG} WHERE dossier_id = ?1 AND kind = ?2 ORDER BY seq DESC LIMIT 1"
        ))
        .bind(dossier.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_log).transpose()
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<DeliveryLog>> {
        let rows = sqlx::query(&format!(
            r#"{SELECT_LOG}
            WHERE (?1 IS NULL OR dossier_id = ?1)
              AND (?2 IS NULL OR kind = ?2)
              AND (?3 IS NULL OR phase = ?3)
            ORDER BY seq"#
        ))
        .bind(filter.dossier.map(|d| d.to_string()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.phase.map(|p| p.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_log).collect()
    }

    async fn list_non_terminal(&self) -> Result<Vec<DeliveryLog>> {
        let rows = sqlx::query(&format!(
            r#"{SELECT_LOG}
            WHERE phase IN ('queued', 'submitted', 'pending')
               OR (phase = 'failed' AND superseded = 0)
            ORDER BY seq"#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_log).collect()
    }

    async fn insert_attempt(&self, log: &DeliveryLog) -> Result<()> {
        insert_query(log)?
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(err, log.id))?;
        Ok(())
    }

    async fn retry_attempt(&self, prior: DeliveryLogId, next: &DeliveryLog) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query(
            r#"
            UPDATE delivery_logs
            SET superseded = 1, updated_at = ?2
            WHERE log_id = ?1 AND phase = 'failed' AND superseded = 0
            "#,
        )
        .bind(prior.to_string())
        .bind(next.created_at)
        .execute(&mut *tx)
        .await?;
        if superseded.rows_affected() == 0 {
            return Err(DeliveryError::Conflict(format!(
                "log {prior} is not a retryable failed head"
            )));
        }

        insert_query(next)?
            .execute(&mut *tx)
            .await
            .map_err(|err| write_error(err, next.id))?;

        tx.commit().await?;
        Ok(())
    }

    async fn transition(
        &self,
        id: DeliveryLogId,
        expected: DeliveryPhase,
        update: LogUpdate,
    ) -> Result<DeliveryLog> {
        let observations = update
            .observations
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE delivery_logs
            SET phase = ?1,
                envelope_checksum = COALESCE(envelope_checksum, ?2),
                observations = COALESCE(?3, observations),
                submission_time = COALESCE(submission_time, ?4),
                remote_reference = COALESCE(remote_reference, ?5),
                last_error = COALESCE(?6, last_error),
                earliest_retry_at = ?7,
                updated_at = ?8
            WHERE log_id = ?9 AND phase = ?10
            "#,
        )
        .bind(update.phase.as_str())
        .bind(update.envelope_checksum.as_ref().map(|c| c.as_str().to_string()))
        .bind(observations)
        .bind(update.submission_time)
        .bind(update.remote_reference.clone())
        .bind(update.last_error.clone())
        .bind(update.earliest_retry_at)
        .bind(update.at)
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(|err| write_error(err, id))?;

        if result.rows_affected() == 0 {
            return Err(match self.fetch(id).await? {
                Some(current) => DeliveryError::Conflict(format!(
                    "log {id} is {} not {expected}",
                    current.phase
                )),
                None => DeliveryError::Conflict(format!("log {id} does not exist")),
            });
        }

        self.fetch(id)
            .await?
            .ok_or_else(|| DeliveryError::Conflict(format!("log {id} vanished after update")))
    }
}

fn insert_query(log: &DeliveryLog) -> Result<Query<'static, Sqlite, SqliteArguments<'static>>> {
    let observations = serde_json::to_string(&log.observations)?;
    Ok(sqlx::query(
        r#"
        INSERT INTO delivery_logs (
            log_id, dossier_id, kind, attempt, phase, envelope_checksum, observations,
            submission_time, remote_reference, last_error, earliest_retry_at,
            superseded, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(log.id.to_string())
    .bind(log.dossier.to_string())
    .bind(log.kind.as_str())
    .bind(i64::from(log.attempt))
    .bind(log.phase.as_str())
    .bind(log.envelope_checksum.as_ref().map(|c| c.as_str().to_string()))
    .bind(observations)
    .bind(log.submission_time)
    .bind(log.remote_reference.clone())
    .bind(log.last_error.clone())
    .bind(log.earliest_retry_at)
    .bind(log.superseded)
    .bind(log.created_at)
    .bind(log.updated_at))
}

fn write_error(err: sqlx::Error, id: DeliveryLogId) -> DeliveryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DeliveryError::Conflict(format!("log {id} violates journal uniqueness: {db}"))
        }
        _ => DeliveryError::Database(err),
    }
}

fn row_to_log(row: &SqliteRow) -> Result<DeliveryLog> {
    let id: String = row.try_get("log_id")?;
    let dossier: String = row.try_get("dossier_id")?;
    let kind: String = row.try_get("kind")?;
    let phase: String = row.try_get("phase")?;
    let attempt: i64 = row.try_get("attempt")?;
    let observations: String = row.try_get("observations")?;
    let checksum: Option<String> = row.try_get("envelope_checksum")?;

    Ok(DeliveryLog {
        id: id.parse()?,
        dossier: dossier.parse()?,
        kind: kind.parse()?,
        attempt: u32::try_from(attempt).map_err(|_| {
            DeliveryError::Consistency(format!("log {id} has invalid attempt {attempt}"))
        })?,
        phase: phase.parse()?,
        envelope_checksum: checksum.map(EnvelopeChecksum),
        observations: serde_json::from_str(&observations)?,
        submission_time: row.try_get("submission_time")?,
        remote_reference: row.try_get("remote_reference")?,
        last_error: row.try_get("last_error")?,
        earliest_retry_at: row.try_get("earliest_retry_at")?,
        superseded: row.try_get("superseded")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
