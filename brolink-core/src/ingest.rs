//! The single write path for measurements and tube-state revisions.
//!
//! Calculated values are derived here, once, from the tube-top history of
//! the dossier's tube. Nothing downstream recomputes them implicitly.

use std::{fmt, sync::Arc};

use brolink_model::{
    DeliveryPhase, MeasurementTvp, MessageKind, TubeRef, TubeState, Well,
};
use tracing::{info, warn};

use crate::{
    clock::{Clock, SystemClock},
    error::{DeliveryError, Result},
    measurement::{calculated_value, ensure_within},
    repository::{DossierRepository, ObservationFilter, Snapshot, missing},
    store::{DeliveryLogStore, new_log},
};

pub const IMPORTED_START_NOTE: &str = "imported with existing registry id";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub organisations: usize,
    pub wells: usize,
    pub nets: usize,
    pub dossiers: usize,
    pub observations: usize,
    pub measurements: usize,
    pub skipped_measurements: usize,
    pub synthetic_starts: usize,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "organisations={} wells={} nets={} dossiers={} observations={} measurements={} \
             skipped_measurements={} synthetic_starts={}",
            self.organisations,
            self.wells,
            self.nets,
            self.dossiers,
            self.observations,
            self.measurements,
            self.skipped_measurements,
            self.synthetic_starts,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    repository: Arc<dyn DossierRepository>,
    store: Arc<dyn DeliveryLogStore>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(repository: Arc<dyn DossierRepository>, store: Arc<dyn DeliveryLogStore>) -> Self {
        Self {
            repository,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validates the interval, derives the calculated value and stores the
    /// measurement. Any calculated value on the input is ignored.
    pub async fn record_measurement(&self, mut measurement: MeasurementTvp) -> Result<MeasurementTvp> {
        let observation = self
            .repository
            .get_observation(measurement.observation)
            .await?
            .ok_or_else(|| missing("observation", measurement.observation))?;
        ensure_within(&observation, &measurement)?;

        let dossier = self
            .repository
            .get_dossier(observation.dossier)
            .await?
            .ok_or_else(|| missing("dossier", observation.dossier))?;
        let well = self.well(dossier.tube).await?;
        let tube_top = well
            .tube(dossier.tube.tube_number)
            .and_then(|tube| tube.tube_top_at(measurement.measurement_time));

        measurement.calculated_value = calculated_value(
            measurement.field_value,
            measurement.field_value_unit,
            tube_top,
        )?;
        self.repository.insert_measurement(&measurement).await?;
        Ok(measurement)
    }

    /// Appends a tube state and recomputes every measurement of that tube
    /// taken on or after its `date_from`. Returns how many changed.
    ///
    /// Nothing is written unless every affected measurement recomputes.
    pub async fn revise_tube_state(&self, tube_ref: TubeRef, state: TubeState) -> Result<usize> {
        let mut well = self.well(tube_ref).await?;
        let from = state.date_from;
        let tube = well
            .tube_mut(tube_ref.tube_number)
            .ok_or_else(|| missing("tube", tube_ref))?;
        tube.push_state(state);
        let tube = tube.clone();

        let mut rewrites = Vec::new();
        let mut changed = 0;
        for dossier in self.repository.list_dossiers().await? {
            if dossier.tube != tube_ref {
                continue;
            }
            for observation in self
                .repository
                .list_observations(dossier.id, ObservationFilter::All)
                .await?
            {
                let mut measurements = self.repository.list_measurements(observation.id).await?;
                let mut touched = 0;
                for measurement in measurements
                    .iter_mut()
                    .filter(|m| m.measurement_time >= from)
                {
                    let value = calculated_value(
                        measurement.field_value,
                        measurement.field_value_unit,
                        tube.tube_top_at(measurement.measurement_time),
                    )?;
                    if value != measurement.calculated_value {
                        measurement.calculated_value = value;
                        touched += 1;
                    }
                }
                if touched > 0 {
                    rewrites.push((observation.id, measurements));
                    changed += touched;
                }
            }
        }

        self.repository.put_well(&well).await?;
        for (observation, measurements) in &rewrites {
            self.repository
                .replace_measurements(*observation, measurements)
                .await?;
        }

        info!(tube = %tube_ref, from = %from, changed, "tube state revised");
        Ok(changed)
    }

    /// Loads a snapshot through the ingest path.
    ///
    /// Measurements outside their observation or without a usable tube top
    /// are skipped and counted. Dossiers that already carry a registry id
    /// get an accepted start log so later messages are not held back.
    pub async fn import_snapshot(&self, snapshot: Snapshot) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for organisation in &snapshot.organisations {
            self.repository.put_organisation(organisation).await?;
            report.organisations += 1;
        }
        for well in &snapshot.wells {
            self.repository.put_well(well).await?;
            report.wells += 1;
        }
        for net in &snapshot.nets {
            self.repository.put_net(net).await?;
            report.nets += 1;
        }
        for dossier in &snapshot.dossiers {
            self.repository.put_dossier(dossier).await?;
            report.dossiers += 1;
        }
        for observation in &snapshot.observations {
            self.repository.put_observation(observation).await?;
            report.observations += 1;
        }

        for measurement in snapshot.measurements {
            let at = measurement.measurement_time;
            let observation = measurement.observation;
            match self.record_measurement(measurement).await {
                Ok(_) => report.measurements += 1,
                Err(err @ (DeliveryError::InvalidInterval(_) | DeliveryError::Consistency(_))) => {
                    warn!(observation = %observation, at = %at, error = %err, "measurement skipped");
                    report.skipped_measurements += 1;
                }
                Err(err) => return Err(err),
            }
        }

        for dossier in &snapshot.dossiers {
            if dossier.registry_id.is_none()
                || self.store.head(dossier.id, MessageKind::Start).await?.is_some()
            {
                continue;
            }
            let mut log = new_log(
                dossier.id,
                MessageKind::Start,
                1,
                DeliveryPhase::Accepted,
                self.clock.now(),
            );
            log.last_error = Some(IMPORTED_START_NOTE.to_string());
            self.store.insert_attempt(&log).await?;
            report.synthetic_starts += 1;
        }

        info!(report = %report, "snapshot imported");
        Ok(report)
    }

    async fn well(&self, tube: TubeRef) -> Result<Well> {
        self.repository
            .get_well(tube.well)
            .await?
            .ok_or_else(|| missing("well", tube.well))
    }
}
