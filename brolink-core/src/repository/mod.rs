//! Read/write access to the domain data the state machine delivers.
//!
//! The coordinator never queries persistence directly; everything goes
//! through [`DossierRepository`]. Cross-entity references are identifiers.

mod memory;
mod snapshot;
mod sqlite;

use std::fmt;

use async_trait::async_trait;
use brolink_model::{
    DeliveredObservation, Dossier, DossierId, MeasurementTvp, MonitoringNet, Observation,
    ObservationId, Organisation, RegistryId, TubeRef, Well, WellId,
};
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use memory::MemoryRepository;
pub use snapshot::Snapshot;
pub use sqlite::SqliteRepository;

/// Which observations of a dossier to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObservationFilter {
    #[default]
    All,
    /// `up_to_date_in_bro = false`.
    NotUpToDate,
    /// Observations with an end time.
    Closed,
}

impl ObservationFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        match self {
            ObservationFilter::All => true,
            ObservationFilter::NotUpToDate => !observation.up_to_date_in_bro,
            ObservationFilter::Closed => observation.is_closed(),
        }
    }
}

#[async_trait]
pub trait DossierRepository: Send + Sync + fmt::Debug {
    async fn list_dossiers(&self) -> Result<Vec<Dossier>>;

    async fn get_dossier(&self, id: DossierId) -> Result<Option<Dossier>>;

    async fn put_dossier(&self, dossier: &Dossier) -> Result<()>;

    async fn get_well(&self, id: WellId) -> Result<Option<Well>>;

    async fn put_well(&self, well: &Well) -> Result<()>;

    async fn put_net(&self, net: &MonitoringNet) -> Result<()>;

    /// Nets with at least one measuring point on `tube`, regardless of dates.
    async fn list_nets_for_tube(&self, tube: TubeRef) -> Result<Vec<MonitoringNet>>;

    async fn put_organisation(&self, organisation: &Organisation) -> Result<()>;

    async fn get_organisation_by_company(
        &self,
        company_number: &str,
    ) -> Result<Option<Organisation>>;

    async fn put_observation(&self, observation: &Observation) -> Result<()>;

    async fn get_observation(&self, id: ObservationId) -> Result<Option<Observation>>;

    /// Observations ordered by start time.
    async fn list_observations(
        &self,
        dossier: DossierId,
        filter: ObservationFilter,
    ) -> Result<Vec<Observation>>;

    /// Measurements in insertion order.
    async fn list_measurements(&self, observation: ObservationId) -> Result<Vec<MeasurementTvp>>;

    async fn insert_measurement(&self, measurement: &MeasurementTvp) -> Result<()>;

    /// Rewrites the measurements of one observation, keeping their order.
    async fn replace_measurements(
        &self,
        observation: ObservationId,
        measurements: &[MeasurementTvp],
    ) -> Result<()>;

    async fn set_registry_id(&self, dossier: DossierId, registry_id: &RegistryId) -> Result<()>;

    /// Marks observations up to date and stores the accepted content
    /// checksum of each.
    async fn mark_up_to_date(
        &self,
        observations: &[DeliveredObservation],
        accepted_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Clears `up_to_date_in_bro`, leaving accepted checksums untouched.
    async fn mark_stale(&self, observations: &[ObservationId]) -> Result<()>;
}

pub(crate) fn missing(what: &str, id: impl fmt::Display) -> crate::error::DeliveryError {
    crate::error::DeliveryError::Consistency(format!("{what} {id} does not exist"))
}
