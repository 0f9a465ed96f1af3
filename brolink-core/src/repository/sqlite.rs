use async_trait::async_trait;
use brolink_model::{
    DeliveredObservation, Dossier, DossierId, MeasurementTvp, MonitoringNet, Observation,
    ObservationId, Organisation, RegistryId, TubeRef, Well, WellId,
};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{Row, SqlitePool};

use super::{DossierRepository, ObservationFilter, missing};
use crate::error::Result;

/// Repository over the document tables created by the migrations.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn documents<T: DeserializeOwned>(&self, sql: &str, key: Option<String>) -> Result<Vec<T>> {
        let mut query = sqlx::query(sql);
        if let Some(key) = key {
            query = query.bind(key);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<T> {
                let document: String = row.try_get("document")?;
                Ok(serde_json::from_str(&document)?)
            })
            .collect()
    }

    async fn document<T: DeserializeOwned>(&self, sql: &str, key: String) -> Result<Option<T>> {
        Ok(self.documents(sql, Some(key)).await?.into_iter().next())
    }

    async fn save_observation(&self, observation: &Observation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO observations (id, dossier_id, starttime, document)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET
                dossier_id = excluded.dossier_id,
                starttime = excluded.starttime,
                document = excluded.document
            "#,
        )
        .bind(observation.id.to_string())
        .bind(observation.dossier.to_string())
        .bind(observation.starttime)
        .bind(to_json(observation)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

#[async_trait]
impl DossierRepository for SqliteRepository {
    async fn list_dossiers(&self) -> Result<Vec<Dossier>> {
        self.documents("SELECT document FROM dossiers ORDER BY rowid", None)
            .await
    }

    async fn get_dossier(&self, id: DossierId) -> Result<Option<Dossier>> {
        self.document("SELECT document FROM dossiers WHERE id = ?1", id.to_string())
            .await
    }

    async fn put_dossier(&self, dossier: &Dossier) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dossiers (id, well_id, tube_number, document)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET
                well_id = excluded.well_id,
                tube_number = excluded.tube_number,
                document = excluded.document
            "#,
        )
        .bind(dossier.id.to_string())
        .bind(dossier.tube.well.to_string())
        .bind(i64::from(dossier.tube.tube_number))
        .bind(to_json(dossier)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_well(&self, id: WellId) -> Result<Option<Well>> {
        self.document("SELECT document FROM wells WHERE id = ?1", id.to_string())
            .await
    }

    async fn put_well(&self, well: &Well) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wells (id, document) VALUES (?1, ?2)
            ON CONFLICT (id) DO UPDATE SET document = excluded.document
            "#,
        )
        .bind(well.id.to_string())
        .bind(to_json(well)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_net(&self, net: &MonitoringNet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nets (id, document) VALUES (?1, ?2)
            ON CONFLICT (id) DO UPDATE SET document = excluded.document
            "#,
        )
        .bind(net.id.to_string())
        .bind(to_json(net)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_nets_for_tube(&self, tube: TubeRef) -> Result<Vec<MonitoringNet>> {
        let nets: Vec<MonitoringNet> = self
            .documents("SELECT document FROM nets ORDER BY rowid", None)
            .await?;
        Ok(nets
            .into_iter()
            .filter(|net| net.measuring_points.iter().any(|p| p.tube == tube))
            .collect())
    }

    async fn put_organisation(&self, organisation: &Organisation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organisations (id, company_number, document) VALUES (?1, ?2, ?3)
            ON CONFLICT (company_number) DO UPDATE SET
                id = excluded.id,
                document = excluded.document
            "#,
        )
        .bind(organisation.id.to_string())
        .bind(organisation.company_number.clone())
        .bind(to_json(organisation)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_organisation_by_company(
        &self,
        company_number: &str,
    ) -> Result<Option<Organisation>> {
        self.document(
            "SELECT document FROM organisations WHERE company_number = ?1",
            company_number.to_string(),
        )
        .await
    }

    async fn put_observation(&self, observation: &Observation) -> Result<()> {
        self.save_observation(observation).await
    }

    async fn get_observation(&self, id: ObservationId) -> Result<Option<Observation>> {
        self.document("SELECT document FROM observations WHERE id = ?1", id.to_string())
            .await
    }

    async fn list_observations(
        &self,
        dossier: DossierId,
        filter: ObservationFilter,
    ) -> Result<Vec<Observation>> {
        let mut observations: Vec<Observation> = self
            .documents(
                "SELECT document FROM observations WHERE dossier_id = ?1",
                Some(dossier.to_string()),
            )
            .await?;
        observations.retain(|o| filter.matches(o));
        observations.sort_by_key(|o| (o.starttime, o.id));
        Ok(observations)
    }

    async fn list_measurements(&self, observation: ObservationId) -> Result<Vec<MeasurementTvp>> {
        self.documents(
            "SELECT document FROM measurements WHERE observation_id = ?1 ORDER BY seq",
            Some(observation.to_string()),
        )
        .await
    }

    async fn insert_measurement(&self, measurement: &MeasurementTvp) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO measurements (observation_id, measurement_time, document)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(measurement.observation.to_string())
        .bind(measurement.measurement_time)
        .bind(to_json(measurement)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_measurements(
        &self,
        observation: ObservationId,
        measurements: &[MeasurementTvp],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM measurements WHERE observation_id = ?1")
            .bind(observation.to_string())
            .execute(&mut *tx)
            .await?;
        for measurement in measurements {
            sqlx::query(
                r#"
                INSERT INTO measurements (observation_id, measurement_time, document)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(observation.to_string())
            .bind(measurement.measurement_time)
            .bind(to_json(measurement)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_registry_id(&self, dossier: DossierId, registry_id: &RegistryId) -> Result<()> {
        let mut current = self
            .get_dossier(dossier)
            .await?
            .ok_or_else(|| missing("dossier", dossier))?;
        current.registry_id = Some(registry_id.clone());
        self.put_dossier(&current).await
    }

    async fn mark_up_to_date(
        &self,
        observations: &[DeliveredObservation],
        accepted_at: DateTime<Utc>,
    ) -> Result<()> {
        for delivered in observations {
            let mut observation = self
                .get_observation(delivered.id)
                .await?
                .ok_or_else(|| missing("observation", delivered.id))?;
            observation.up_to_date_in_bro = true;
            observation.accepted_checksum = Some(delivered.checksum.clone());
            observation.accepted_at = Some(accepted_at);
            self.save_observation(&observation).await?;
        }
        Ok(())
    }

    async fn mark_stale(&self, observations: &[ObservationId]) -> Result<()> {
        for id in observations {
            if let Some(mut observation) = self.get_observation(*id).await? {
                observation.up_to_date_in_bro = false;
                self.save_observation(&observation).await?;
            }
        }
        Ok(())
    }
}
