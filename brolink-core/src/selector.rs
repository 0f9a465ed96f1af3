//! Work-list construction for a tick.

use std::sync::Arc;

use brolink_model::{
    DeliveryLog, DeliveryPhase, Dossier, DossierId, MessageKind, Observation, ObservationId,
};
use tracing::{debug, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::DeliveryConfig,
    envelope::{DossierContext, ObservationBundle, observation_checksum},
    error::{DeliveryError, ErrorClass, Result},
    repository::{DossierRepository, ObservationFilter, missing},
    store::DeliveryLogStore,
    validation::validate_well,
};

/// One `(dossier, kind)` unit of work. Additions and corrections carry the
/// observations they deliver, one per candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub dossier: DossierId,
    pub kind: MessageKind,
    pub observations: Vec<ObservationId>,
}

impl Candidate {
    fn new(dossier: DossierId, kind: MessageKind) -> Self {
        Self {
            dossier,
            kind,
            observations: Vec::new(),
        }
    }

    fn for_observation(dossier: DossierId, kind: MessageKind, observation: ObservationId) -> Self {
        Self {
            dossier,
            kind,
            observations: vec![observation],
        }
    }
}

#[derive(Debug, Default)]
pub struct Selection {
    /// Sorted by kind priority, then dossier listing order.
    pub candidates: Vec<Candidate>,
    /// Dossiers skipped this tick because they violate an invariant.
    pub consistency_errors: Vec<(DossierId, DeliveryError)>,
}

#[derive(Debug, Clone)]
pub struct Selector {
    store: Arc<dyn DeliveryLogStore>,
    repository: Arc<dyn DossierRepository>,
    config: DeliveryConfig,
    clock: Arc<dyn Clock>,
}

impl Selector {
    pub fn new(
        store: Arc<dyn DeliveryLogStore>,
        repository: Arc<dyn DossierRepository>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            store,
            repository,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the work list for every dossier owned by this shard.
    ///
    /// Per-dossier failures are collected and the dossier skipped;
    /// configuration errors abort the selection.
    pub async fn select(&self) -> Result<Selection> {
        let mut selection = Selection::default();
        for dossier in self.repository.list_dossiers().await? {
            if !self.config.shard.owns(dossier.id) {
                continue;
            }
            let id = dossier.id;
            match self.candidates_for(dossier).await {
                Ok(mut found) => selection.candidates.append(&mut found),
                Err(err) if err.classification() == ErrorClass::Configuration => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(dossier = %id, error = %err, "dossier skipped by selector");
                    selection.consistency_errors.push((id, err));
                }
            }
        }
        selection.candidates.sort_by_key(|candidate| candidate.kind);
        Ok(selection)
    }

    async fn candidates_for(&self, dossier: Dossier) -> Result<Vec<Candidate>> {
        let well = self
            .repository
            .get_well(dossier.tube.well)
            .await?
            .ok_or_else(|| missing("well", dossier.tube.well))?;
        let tube = well
            .tube(dossier.tube.tube_number)
            .ok_or_else(|| missing("tube", dossier.tube))?;
        if !tube.deliver_gld_to_bro {
            debug!(dossier = %dossier.id, tube = %dossier.tube, "tube excluded from delivery");
            return Ok(Vec::new());
        }
        let regime = dossier.effective_regime(&well, self.config.quality_regime_default);
        let logs = self.store.list_for_dossier(dossier.id).await?;
        let mut found = Vec::new();

        if dossier.registry_id.is_none()
            && head(&logs, MessageKind::Start).is_none_or(|h| h.phase == DeliveryPhase::Failed)
        {
            let report = validate_well(&well, regime, self.clock.now());
            if !report.is_complete() {
                debug!(dossier = %dossier.id, report = %report, "well not BRO-complete");
            } else if well.registry_id.is_none() {
                debug!(
                    dossier = %dossier.id,
                    well = %well.internal_id,
                    "well has no registry id yet"
                );
            } else {
                found.push(Candidate::new(dossier.id, MessageKind::Start));
            }
        }

        let mut all_up_to_date = true;
        for observation in self
            .repository
            .list_observations(dossier.id, ObservationFilter::All)
            .await?
        {
            if !observation.up_to_date_in_bro {
                all_up_to_date = false;
            }
            if is_quarantined(&logs, observation.id) {
                debug!(dossier = %dossier.id, observation = %observation.id, "observation quarantined");
                continue;
            }

            match observation.accepted_checksum.clone() {
                None => {
                    if observation.up_to_date_in_bro || !self.is_deliverable(&observation) {
                        continue;
                    }
                    let bundle = self.bundle(observation).await?;
                    if bundle.deliverable_count() == 0 {
                        debug!(
                            dossier = %dossier.id,
                            observation = %bundle.observation.id,
                            "addition skipped: no deliverable measurements"
                        );
                        continue;
                    }
                    found.push(Candidate::for_observation(
                        dossier.id,
                        MessageKind::Addition,
                        bundle.observation.id,
                    ));
                }
                Some(accepted) => {
                    let bundle = self.bundle(observation).await?;
                    let diverged = observation_checksum(&bundle, regime)
                        .map_or(true, |current| current != accepted);
                    if diverged {
                        all_up_to_date = false;
                        found.push(Candidate::for_observation(
                            dossier.id,
                            MessageKind::Correction,
                            bundle.observation.id,
                        ));
                    }
                }
            }
        }

        if dossier.registry_id.is_some()
            && dossier.research_last_date.is_some()
            && all_up_to_date
            && head(&logs, MessageKind::Close).is_none()
        {
            found.push(Candidate::new(dossier.id, MessageKind::Close));
        }

        Ok(found)
    }

    fn is_deliverable(&self, observation: &Observation) -> bool {
        observation.is_closed()
            || (observation.is_provisional() && self.config.allow_provisional_additions)
    }

    async fn bundle(&self, observation: Observation) -> Result<ObservationBundle> {
        let measurements = self.repository.list_measurements(observation.id).await?;
        Ok(ObservationBundle {
            observation,
            measurements,
        })
    }
}

/// Latest log of `kind`; `logs` is in insertion order.
fn head(logs: &[DeliveryLog], kind: MessageKind) -> Option<&DeliveryLog> {
    logs.iter().rev().find(|log| log.kind == kind)
}

/// An observation stays out of the work list while the latest addition or
/// correction carrying it is rejected or abandoned.
fn is_quarantined(logs: &[DeliveryLog], observation: ObservationId) -> bool {
    logs.iter()
        .rev()
        .filter(|log| matches!(log.kind, MessageKind::Addition | MessageKind::Correction))
        .find(|log| log.observations.iter().any(|o| o.id == observation))
        .is_some_and(|log| log.phase.is_quarantine())
}

pub(crate) async fn load_context(
    repository: &dyn DossierRepository,
    dossier: DossierId,
) -> Result<DossierContext> {
    let dossier = repository
        .get_dossier(dossier)
        .await?
        .ok_or_else(|| missing("dossier", dossier))?;
    let well = repository
        .get_well(dossier.tube.well)
        .await?
        .ok_or_else(|| missing("well", dossier.tube.well))?;
    let nets = repository.list_nets_for_tube(dossier.tube).await?;
    Ok(DossierContext { dossier, well, nets })
}

pub(crate) async fn load_bundles(
    repository: &dyn DossierRepository,
    observations: impl IntoIterator<Item = ObservationId>,
) -> Result<Vec<ObservationBundle>> {
    let mut bundles = Vec::new();
    for id in observations {
        let observation = repository
            .get_observation(id)
            .await?
            .ok_or_else(|| missing("observation", id))?;
        let measurements = repository.list_measurements(id).await?;
        bundles.push(ObservationBundle {
            observation,
            measurements,
        });
    }
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::fixtures::{at, bundle, context, registered_context},
        repository::MemoryRepository,
        store::{MemoryLogStore, new_log},
    };
    use brolink_model::{DeliveredObservation, QualityRegime, StatusQualityControl};

    struct Harness {
        store: Arc<MemoryLogStore>,
        repository: Arc<MemoryRepository>,
        selector: Selector,
    }

    fn harness(config: DeliveryConfig) -> Harness {
        let store = Arc::new(MemoryLogStore::new());
        let repository = Arc::new(MemoryRepository::new());
        let selector = Selector::new(store.clone(), repository.clone(), config);
        Harness {
            store,
            repository,
            selector,
        }
    }

    async fn seed(h: &Harness, ctx: &DossierContext) {
        h.repository.put_well(&ctx.well).await.unwrap();
        h.repository.put_dossier(&ctx.dossier).await.unwrap();
    }

    async fn seed_observation(h: &Harness, ctx: &DossierContext, b: &mut ObservationBundle) {
        b.observation.dossier = ctx.dossier.id;
        h.repository.put_observation(&b.observation).await.unwrap();
        for m in &b.measurements {
            h.repository.insert_measurement(m).await.unwrap();
        }
    }

    fn kinds(selection: &Selection) -> Vec<MessageKind> {
        selection.candidates.iter().map(|c| c.kind).collect()
    }

    #[tokio::test]
    async fn unregistered_complete_dossier_yields_start_and_addition() {
        let h = harness(DeliveryConfig::default());
        let ctx = context();
        seed(&h, &ctx).await;
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        seed_observation(&h, &ctx, &mut b).await;

        let selection = h.selector.select().await.unwrap();
        assert_eq!(kinds(&selection), vec![MessageKind::Start, MessageKind::Addition]);
        assert_eq!(selection.candidates[1].observations, vec![b.observation.id]);
    }

    #[tokio::test]
    async fn well_without_registry_id_gets_no_start_yet() {
        let h = harness(DeliveryConfig::default());
        let mut ctx = context();
        ctx.well.registry_id = None;
        seed(&h, &ctx).await;
        let selection = h.selector.select().await.unwrap();
        assert!(selection.candidates.is_empty());
        assert!(selection.consistency_errors.is_empty());

        ctx.well.registry_id = Some("GMW000000000001".parse().unwrap());
        h.repository.put_well(&ctx.well).await.unwrap();
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Start]);
    }

    #[tokio::test]
    async fn tube_excluded_from_delivery_is_never_selected() {
        let h = harness(DeliveryConfig::default());
        let mut ctx = registered_context();
        ctx.well.tubes[0].deliver_gld_to_bro = false;
        seed(&h, &ctx).await;
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        seed_observation(&h, &ctx, &mut b).await;
        assert!(h.selector.select().await.unwrap().candidates.is_empty());

        ctx.well.tubes[0].deliver_gld_to_bro = true;
        h.repository.put_well(&ctx.well).await.unwrap();
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Addition]);
    }

    #[tokio::test]
    async fn incomplete_well_gets_no_start() {
        let h = harness(DeliveryConfig::default());
        let mut ctx = context();
        ctx.well.coordinates = None;
        seed(&h, &ctx).await;
        assert!(h.selector.select().await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn rejected_start_is_quarantined_but_failed_start_is_retried() {
        let h = harness(DeliveryConfig::default());
        let ctx = context();
        seed(&h, &ctx).await;

        let rejected = new_log(ctx.dossier.id, MessageKind::Start, 1, DeliveryPhase::Rejected, at(2024, 3, 1));
        h.store.insert_attempt(&rejected).await.unwrap();
        assert!(h.selector.select().await.unwrap().candidates.is_empty());

        let failed = new_log(ctx.dossier.id, MessageKind::Start, 1, DeliveryPhase::Failed, at(2024, 3, 2));
        h.store.insert_attempt(&failed).await.unwrap();
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Start]);
    }

    #[tokio::test]
    async fn observation_without_deliverable_points_is_skipped() {
        let h = harness(DeliveryConfig::default());
        let ctx = registered_context();
        seed(&h, &ctx).await;
        let mut empty = bundle(&[]);
        seed_observation(&h, &ctx, &mut empty).await;
        let mut rejected_only = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        rejected_only.measurements[0].metadata.status_quality_control =
            StatusQualityControl::Afgekeurd;
        seed_observation(&h, &ctx, &mut rejected_only).await;

        assert!(h.selector.select().await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn open_provisional_observation_needs_configuration() {
        let ctx = registered_context();
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        b.observation.endtime = None;
        b.observation.metadata.status = Some(brolink_model::ValidationStatus::Voorlopig);

        let h = harness(DeliveryConfig::default());
        seed(&h, &ctx).await;
        seed_observation(&h, &ctx, &mut b).await;
        assert!(h.selector.select().await.unwrap().candidates.is_empty());

        let h = harness(DeliveryConfig {
            allow_provisional_additions: true,
            ..DeliveryConfig::default()
        });
        seed(&h, &ctx).await;
        seed_observation(&h, &ctx, &mut b).await;
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Addition]);
    }

    #[tokio::test]
    async fn edited_accepted_observation_becomes_correction() {
        let h = harness(DeliveryConfig::default());
        let ctx = registered_context();
        seed(&h, &ctx).await;
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        b.observation.dossier = ctx.dossier.id;
        let accepted = observation_checksum(&b, QualityRegime::Imbro).unwrap();
        b.observation.accepted_checksum = Some(accepted);
        b.observation.up_to_date_in_bro = true;
        seed_observation(&h, &ctx, &mut b).await;
        assert!(h.selector.select().await.unwrap().candidates.is_empty());

        let mut edited = b.measurements.clone();
        edited[0].calculated_value = Some(1.25);
        h.repository
            .replace_measurements(b.observation.id, &edited)
            .await
            .unwrap();
        let selection = h.selector.select().await.unwrap();
        assert_eq!(kinds(&selection), vec![MessageKind::Correction]);
    }

    #[tokio::test]
    async fn rejected_addition_quarantines_its_observation() {
        let h = harness(DeliveryConfig::default());
        let ctx = registered_context();
        seed(&h, &ctx).await;
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        seed_observation(&h, &ctx, &mut b).await;

        let mut log = new_log(ctx.dossier.id, MessageKind::Addition, 1, DeliveryPhase::Rejected, at(2024, 3, 1));
        log.observations = vec![DeliveredObservation {
            id: b.observation.id,
            checksum: brolink_model::EnvelopeChecksum("x".into()),
        }];
        h.store.insert_attempt(&log).await.unwrap();
        assert!(h.selector.select().await.unwrap().candidates.is_empty());
    }

    #[tokio::test]
    async fn close_follows_research_last_date_once_everything_is_delivered() {
        let h = harness(DeliveryConfig::default());
        let mut ctx = registered_context();
        ctx.dossier.research_last_date = chrono::NaiveDate::from_ymd_opt(2024, 6, 1);
        seed(&h, &ctx).await;
        let mut b = bundle(&[(at(2024, 1, 5), Some(1.0))]);
        seed_observation(&h, &ctx, &mut b).await;
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Addition]);

        b.observation.accepted_checksum = Some(observation_checksum(&b, QualityRegime::Imbro).unwrap());
        b.observation.up_to_date_in_bro = true;
        h.repository.put_observation(&b.observation).await.unwrap();
        assert_eq!(kinds(&h.selector.select().await.unwrap()), vec![MessageKind::Close]);
    }

    #[tokio::test]
    async fn missing_well_is_reported_not_fatal() {
        let h = harness(DeliveryConfig::default());
        let ctx = context();
        h.repository.put_dossier(&ctx.dossier).await.unwrap();
        let selection = h.selector.select().await.unwrap();
        assert!(selection.candidates.is_empty());
        assert_eq!(selection.consistency_errors.len(), 1);
        assert!(matches!(selection.consistency_errors[0].1, DeliveryError::Consistency(_)));
    }
}
