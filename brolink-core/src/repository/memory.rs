use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use brolink_model::{
    DeliveredObservation, Dossier, DossierId, MeasurementTvp, MonitoringNet, Observation,
    ObservationId, Organisation, RegistryId, TubeRef, Well, WellId,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DossierRepository, ObservationFilter, missing};
use crate::error::Result;

#[derive(Debug, Default)]
struct State {
    dossiers: Vec<Dossier>,
    wells: HashMap<WellId, Well>,
    nets: Vec<MonitoringNet>,
    organisations: Vec<Organisation>,
    observations: HashMap<ObservationId, Observation>,
    measurements: HashMap<ObservationId, Vec<MeasurementTvp>>,
}

/// Repository held entirely in memory; dossiers and nets keep insertion
/// order so listings are stable.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RwLock<State>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert_by<T: Clone, K: PartialEq>(items: &mut Vec<T>, item: &T, key: impl Fn(&T) -> K) {
    let wanted = key(item);
    match items.iter_mut().find(|existing| key(existing) == wanted) {
        Some(slot) => *slot = item.clone(),
        None => items.push(item.clone()),
    }
}

#[async_trait]
impl DossierRepository for MemoryRepository {
    async fn list_dossiers(&self) -> Result<Vec<Dossier>> {
        Ok(self.state.read().await.dossiers.clone())
    }

    async fn get_dossier(&self, id: DossierId) -> Result<Option<Dossier>> {
        let state = self.state.read().await;
        Ok(state.dossiers.iter().find(|d| d.id == id).cloned())
    }

    async fn put_dossier(&self, dossier: &Dossier) -> Result<()> {
        let mut state = self.state.write().await;
        upsert_by(&mut state.dossiers, dossier, |d| d.id);
        Ok(())
    }

    async fn get_well(&self, id: WellId) -> Result<Option<Well>> {
        Ok(self.state.read().await.wells.get(&id).cloned())
    }

    async fn put_well(&self, well: &Well) -> Result<()> {
        self.state.write().await.wells.insert(well.id, well.clone());
        Ok(())
    }

    async fn put_net(&self, net: &MonitoringNet) -> Result<()> {
        let mut state = self.state.write().await;
        upsert_by(&mut state.nets, net, |n| n.id);
        Ok(())
    }

    async fn list_nets_for_tube(&self, tube: TubeRef) -> Result<Vec<MonitoringNet>> {
        let state = self.state.read().await;
        Ok(state
            .nets
            .iter()
            .filter(|net| net.measuring_points.iter().any(|p| p.tube == tube))
            .cloned()
            .collect())
    }

    async fn put_organisation(&self, organisation: &Organisation) -> Result<()> {
        let mut state = self.state.write().await;
        upsert_by(&mut state.organisations, organisation, |o| {
            o.company_number.clone()
        });
        Ok(())
    }

    async fn get_organisation_by_company(
        &self,
        company_number: &str,
    ) -> Result<Option<Organisation>> {
        let state = self.state.read().await;
        Ok(state
            .organisations
            .iter()
            .find(|o| o.company_number == company_number)
            .cloned())
    }

    async fn put_observation(&self, observation: &Observation) -> Result<()> {
        self.state
            .write()
            .await
            .observations
            .insert(observation.id, observation.clone());
        Ok(())
    }

    async fn get_observation(&self, id: ObservationId) -> Result<Option<Observation>> {
        Ok(self.state.read().await.observations.get(&id).cloned())
    }

    async fn list_observations(
        &self,
        dossier: DossierId,
        filter: ObservationFilter,
    ) -> Result<Vec<Observation>> {
        let state = self.state.read().await;
        let mut observations: Vec<Observation> = state
            .observations
            .values()
            .filter(|o| o.dossier == dossier && filter.matches(o))
            .cloned()
            .collect();
        observations.sort_by_key(|o| (o.starttime, o.id));
        Ok(observations)
    }

    async fn list_measurements(&self, observation: ObservationId) -> Result<Vec<MeasurementTvp>> {
        let state = self.state.read().await;
        Ok(state
            .measurements
            .get(&observation)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_measurement(&self, measurement: &MeasurementTvp) -> Result<()> {
        self.state
            .write()
            .await
            .measurements
            .entry(measurement.observation)
            .or_default()
            .push(measurement.clone());
        Ok(())
    }

    async fn replace_measurements(
        &self,
        observation: ObservationId,
        measurements: &[MeasurementTvp],
    ) -> Result<()> {
        self.state
            .write()
            .await
            .measurements
            .insert(observation, measurements.to_vec());
        Ok(())
    }

    async fn set_registry_id(&self, dossier: DossierId, registry_id: &RegistryId) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .dossiers
            .iter_mut()
            .find(|d| d.id == dossier)
            .ok_or_else(|| missing("dossier", dossier))?;
        entry.registry_id = Some(registry_id.clone());
        Ok(())
    }

    async fn mark_up_to_date(
        &self,
        observations: &[DeliveredObservation],
        accepted_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for delivered in observations {
            let observation = state
                .observations
                .get_mut(&delivered.id)
                .ok_or_else(|| missing("observation", delivered.id))?;
            observation.up_to_date_in_bro = true;
            observation.accepted_checksum = Some(delivered.checksum.clone());
            observation.accepted_at = Some(accepted_at);
        }
        Ok(())
    }

    async fn mark_stale(&self, observations: &[ObservationId]) -> Result<()> {
        let mut state = self.state.write().await;
        for id in observations {
            if let Some(observation) = state.observations.get_mut(id) {
                observation.up_to_date_in_bro = false;
            }
        }
        Ok(())
    }
}
