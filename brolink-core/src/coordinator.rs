//! The delivery state machine.
//!
//! A tick first drives every non-terminal log this shard owns, then turns
//! the selector's candidates into new logs. Nothing sleeps: backoff is
//! expressed as `earliest_retry_at` on the failed log and honoured by the
//! next tick that finds it due.

use std::{collections::HashSet, fmt, sync::Arc};

use brolink_model::{
    DeliveredObservation, DeliveryLog, DeliveryLogId, DeliveryPhase, DossierId,
    EnvelopeChecksum, MessageKind, ObservationId, RegistryCredentials, RemoteStatus,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    backoff::RetryPolicy,
    clock::{Clock, SystemClock},
    config::DeliveryConfig,
    credentials::CredentialResolver,
    envelope::EnvelopeBuilder,
    error::{DeliveryError, ErrorClass, Result},
    locks::KeyedLocks,
    reconciler::Reconciler,
    registry::RegistryClient,
    repository::DossierRepository,
    selector::{Candidate, Selector, load_bundles, load_context},
    store::{DeliveryLogStore, LogUpdate, new_log},
};

/// Which part of the work a tick covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickScope {
    #[default]
    All,
    /// Drive and select only logs of one kind.
    Only(MessageKind),
    /// Drive existing logs; select nothing new.
    StatusOnly,
}

impl TickScope {
    pub fn includes(&self, kind: MessageKind) -> bool {
        match self {
            TickScope::All | TickScope::StatusOnly => true,
            TickScope::Only(only) => *only == kind,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub deferred: usize,
    pub polled: usize,
    pub registry_calls: usize,
    pub transient_registry_failures: usize,
    pub consistency_errors: usize,
}

impl TickReport {
    /// At least one registry call was made and every one failed transiently.
    pub fn registry_unreachable(&self) -> bool {
        self.registry_calls > 0 && self.transient_registry_failures == self.registry_calls
    }

    pub fn has_rejections(&self) -> bool {
        self.rejected > 0
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} accepted={} rejected={} failed={} abandoned={} deferred={} polled={} \
             registry_calls={} transient={} consistency_errors={}",
            self.submitted,
            self.accepted,
            self.rejected,
            self.failed,
            self.abandoned,
            self.deferred,
            self.polled,
            self.registry_calls,
            self.transient_registry_failures,
            self.consistency_errors,
        )
    }
}

#[derive(Debug)]
pub struct Coordinator {
    store: Arc<dyn DeliveryLogStore>,
    repository: Arc<dyn DossierRepository>,
    registry: Arc<dyn RegistryClient>,
    credentials: CredentialResolver,
    builder: EnvelopeBuilder,
    selector: Selector,
    reconciler: Reconciler,
    config: DeliveryConfig,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<(DossierId, MessageKind)>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn DeliveryLogStore>,
        repository: Arc<dyn DossierRepository>,
        registry: Arc<dyn RegistryClient>,
        config: DeliveryConfig,
        default_credentials: Option<RegistryCredentials>,
    ) -> Self {
        Self {
            selector: Selector::new(store.clone(), repository.clone(), config.clone()),
            reconciler: Reconciler::new(repository.clone()),
            credentials: CredentialResolver::new(repository.clone(), default_credentials),
            builder: EnvelopeBuilder::new(),
            retry: RetryPolicy::new(config.retry),
            clock: Arc::new(SystemClock),
            locks: KeyedLocks::new(),
            store,
            repository,
            registry,
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.selector = self.selector.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeliveryLogStore> {
        &self.store
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// One pass: drive live logs, then enqueue new candidates.
    ///
    /// Per-dossier failures are counted in the report; only configuration
    /// errors abort the tick.
    pub async fn tick(&self, scope: TickScope) -> Result<TickReport> {
        let mut report = TickReport::default();

        let mut live = self.store.list_non_terminal().await?;
        live.retain(|log| self.config.shard.owns(log.dossier) && scope.includes(log.kind));
        live.sort_by_key(|log| log.kind);
        for log in live {
            let outcome = self.drive(log.id, &mut report).await;
            absorb(outcome, log.dossier, &mut report)?;
        }

        if scope != TickScope::StatusOnly {
            let selection = self.selector.select().await?;
            report.consistency_errors += selection.consistency_errors.len();
            let registered = self.registered_dossiers(&selection.candidates).await?;
            for candidate in selection.candidates {
                if !scope.includes(candidate.kind) {
                    continue;
                }
                let dossier = candidate.dossier;
                let outcome = self.enqueue(candidate, &registered, &mut report).await;
                absorb(outcome, dossier, &mut report)?;
            }
        }

        info!(?scope, report = %report, "tick finished");
        Ok(report)
    }

    /// Polls every non-terminal log without selecting new work.
    pub async fn check_status(&self) -> Result<TickReport> {
        self.tick(TickScope::StatusOnly).await
    }

    /// Operator override: a rejected or abandoned log gets a fresh queued
    /// attempt carrying the same observations.
    pub async fn requeue(&self, id: DeliveryLogId) -> Result<DeliveryLog> {
        let log = self.store.get(id).await?.ok_or_else(|| {
            DeliveryError::Consistency(format!("delivery log {id} does not exist"))
        })?;
        if !log.phase.is_quarantine() {
            return Err(DeliveryError::Conflict(format!(
                "log {id} is {}; only rejected or abandoned logs can be requeued",
                log.phase
            )));
        }

        let _guard = self.locks.lock(&(log.dossier, log.kind)).await;
        let logs = self.store.list_for_dossier(log.dossier).await?;
        if let Some(live) = logs.iter().find(|l| l.kind == log.kind && l.is_live()) {
            return Err(DeliveryError::Conflict(format!(
                "{} log {} of dossier {} is still {}",
                live.kind, live.id, live.dossier, live.phase
            )));
        }
        let carried = log.observation_ids();
        if let Some(newer) = logs
            .iter()
            .rev()
            .find(|l| l.kind == log.kind && l.observation_ids() == carried)
            .filter(|l| l.id != log.id)
        {
            return Err(DeliveryError::Conflict(format!(
                "log {id} was superseded by {} ({})",
                newer.id, newer.phase
            )));
        }

        let mut fresh = new_log(log.dossier, log.kind, 1, DeliveryPhase::Queued, self.clock.now());
        fresh.observations = log.observations.clone();
        self.store.insert_attempt(&fresh).await?;
        info!(
            dossier = %fresh.dossier,
            kind = %fresh.kind,
            log_id = %fresh.id,
            requeued_from = %log.id,
            "delivery requeued by operator"
        );
        Ok(fresh)
    }

    async fn registered_dossiers(&self, candidates: &[Candidate]) -> Result<HashSet<DossierId>> {
        let mut registered = HashSet::new();
        let mut checked = HashSet::new();
        for candidate in candidates.iter().filter(|c| c.kind.requires_registration()) {
            if checked.insert(candidate.dossier) && self.start_accepted(candidate.dossier).await? {
                registered.insert(candidate.dossier);
            }
        }
        Ok(registered)
    }

    async fn start_accepted(&self, dossier: DossierId) -> Result<bool> {
        Ok(self
            .store
            .head(dossier, MessageKind::Start)
            .await?
            .is_some_and(|head| head.phase == DeliveryPhase::Accepted))
    }

    async fn enqueue(
        &self,
        candidate: Candidate,
        registered: &HashSet<DossierId>,
        report: &mut TickReport,
    ) -> Result<()> {
        if candidate.kind.requires_registration() && !registered.contains(&candidate.dossier) {
            report.deferred += 1;
            debug!(
                dossier = %candidate.dossier,
                kind = %candidate.kind,
                "deferred until the start registration is accepted"
            );
            return Ok(());
        }

        let id = {
            let _guard = self.locks.lock(&(candidate.dossier, candidate.kind)).await;
            let logs = self.store.list_for_dossier(candidate.dossier).await?;
            if logs.iter().any(|l| l.kind == candidate.kind && l.is_live()) {
                return Ok(());
            }
            if let Some(blocking) = logs.iter().find(|l| l.is_live()) {
                report.deferred += 1;
                debug!(
                    dossier = %candidate.dossier,
                    kind = %candidate.kind,
                    blocking = %blocking.id,
                    "deferred behind live {} log",
                    blocking.kind
                );
                return Ok(());
            }

            let mut log = new_log(
                candidate.dossier,
                candidate.kind,
                1,
                DeliveryPhase::Queued,
                self.clock.now(),
            );
            log.observations = unbuilt(&candidate.observations);

            if self.config.max_attempts == 0 {
                log.phase = DeliveryPhase::Abandoned;
                log.last_error = Some("delivery disabled: MAX_ATTEMPTS is 0".to_string());
                self.store.insert_attempt(&log).await?;
                report.abandoned += 1;
                self.reconciler.on_quarantined(&log);
                return Ok(());
            }

            self.store.insert_attempt(&log).await?;
            info!(
                dossier = %log.dossier,
                kind = %log.kind,
                attempt = log.attempt,
                log_id = %log.id,
                "delivery queued"
            );
            log.id
        };

        self.drive(id, report).await
    }

    /// Moves one log as far as it can go this tick, polling at most once.
    async fn drive(&self, id: DeliveryLogId, report: &mut TickReport) -> Result<()> {
        let Some(log) = self.store.get(id).await? else {
            return Ok(());
        };
        let _guard = self.locks.lock(&(log.dossier, log.kind)).await;
        // Reload under the lock.
        let Some(mut log) = self.store.get(id).await? else {
            return Ok(());
        };

        loop {
            let next = match log.phase {
                DeliveryPhase::Failed if log.superseded => None,
                DeliveryPhase::Failed => {
                    if log.is_due(self.clock.now()) {
                        self.retry(log, report).await?
                    } else {
                        debug!(log_id = %log.id, retry_at = ?log.earliest_retry_at, "backoff not elapsed");
                        None
                    }
                }
                DeliveryPhase::Queued => self.submit(log, report).await?,
                DeliveryPhase::Submitted => {
                    self.fail(&log, "lost tracking reference", report).await?;
                    None
                }
                DeliveryPhase::Pending => match log.remote_reference.clone() {
                    Some(reference) => {
                        self.poll(log, &reference, report).await?;
                        None
                    }
                    None => {
                        self.fail(&log, "lost tracking reference", report).await?;
                        None
                    }
                },
                DeliveryPhase::Accepted | DeliveryPhase::Rejected | DeliveryPhase::Abandoned => {
                    None
                }
            };
            match next {
                Some(next) => log = next,
                None => return Ok(()),
            }
        }
    }

    async fn retry(&self, log: DeliveryLog, report: &mut TickReport) -> Result<Option<DeliveryLog>> {
        let now = self.clock.now();
        if log.attempt >= self.config.max_attempts {
            let reason = format!(
                "abandoned after {} attempts: {}",
                log.attempt,
                log.last_error.as_deref().unwrap_or("no error recorded")
            );
            let abandoned = self
                .store
                .transition(
                    log.id,
                    DeliveryPhase::Failed,
                    LogUpdate::to(DeliveryPhase::Abandoned, now).with_error(reason),
                )
                .await?;
            report.abandoned += 1;
            self.reconciler.on_quarantined(&abandoned);
            return Ok(None);
        }

        // The registry may already hold the payload; ask before resubmitting.
        if let Some(reference) = log.remote_reference.clone() {
            let credentials = self.credentials_for(log.dossier).await?;
            report.registry_calls += 1;
            report.polled += 1;
            match self.registry.status(&reference, &credentials).await {
                Ok(RemoteStatus::Failed(reason)) => {
                    debug!(log_id = %log.id, reference = %reference, reason = %reason, "remote attempt failed; resubmitting");
                }
                Ok(status) => {
                    let mut next = new_log(
                        log.dossier,
                        log.kind,
                        log.attempt + 1,
                        DeliveryPhase::Pending,
                        now,
                    );
                    next.envelope_checksum = log.envelope_checksum.clone();
                    next.observations = log.observations.clone();
                    next.submission_time = log.submission_time;
                    next.remote_reference = Some(reference.clone());
                    self.store.retry_attempt(log.id, &next).await?;
                    info!(
                        dossier = %next.dossier,
                        kind = %next.kind,
                        attempt = next.attempt,
                        log_id = %next.id,
                        reference = %reference,
                        "reattached to existing remote reference"
                    );
                    self.apply_status(next, status, report).await?;
                    return Ok(None);
                }
                Err(err) if err.is_transient() => {
                    report.transient_registry_failures += 1;
                    let retry_at = self.backoff(log.attempt, now);
                    self.store
                        .transition(
                            log.id,
                            DeliveryPhase::Failed,
                            LogUpdate::to(DeliveryPhase::Failed, now)
                                .with_error(err.to_string())
                                .retry_at(retry_at),
                        )
                        .await?;
                    warn!(log_id = %log.id, reference = %reference, error = %err, "status check failed");
                    return Ok(None);
                }
                Err(err) if err.classification() == ErrorClass::Configuration => return Err(err),
                Err(err) => {
                    debug!(log_id = %log.id, reference = %reference, error = %err, "reference unknown to registry; resubmitting");
                }
            }
        }

        let mut next = new_log(log.dossier, log.kind, log.attempt + 1, DeliveryPhase::Queued, now);
        next.observations = log.observations.clone();
        self.store.retry_attempt(log.id, &next).await?;
        info!(
            dossier = %next.dossier,
            kind = %next.kind,
            attempt = next.attempt,
            log_id = %next.id,
            "retry queued"
        );
        Ok(Some(next))
    }

    async fn submit(&self, log: DeliveryLog, report: &mut TickReport) -> Result<Option<DeliveryLog>> {
        if let Some(reason) = self.ordering_block(&log).await? {
            report.deferred += 1;
            debug!(dossier = %log.dossier, kind = %log.kind, log_id = %log.id, reason = %reason, "submission deferred");
            return Ok(None);
        }

        let now = self.clock.now();
        let ctx = load_context(self.repository.as_ref(), log.dossier).await?;
        let regime = ctx
            .dossier
            .effective_regime(&ctx.well, self.config.quality_regime_default);
        let bundles = match log.kind {
            MessageKind::Addition | MessageKind::Correction => {
                load_bundles(self.repository.as_ref(), log.observation_ids()).await?
            }
            MessageKind::Start | MessageKind::Close => Vec::new(),
        };

        let envelope = match self.builder.build(&ctx, log.kind, regime, &bundles) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reject(&log, DeliveryPhase::Queued, err.to_string(), report)
                    .await?;
                return Ok(None);
            }
        };
        let credentials = self.credentials.resolve(&ctx).await?;

        let submitted = self
            .store
            .transition(
                log.id,
                DeliveryPhase::Queued,
                LogUpdate {
                    envelope_checksum: Some(envelope.checksum.clone()),
                    observations: Some(envelope.observations.clone()),
                    submission_time: Some(now),
                    ..LogUpdate::to(DeliveryPhase::Submitted, now)
                },
            )
            .await?;
        debug!(
            log_id = %submitted.id,
            checksum = envelope.checksum.short(),
            request_reference = %envelope.request_reference,
            "envelope recorded"
        );

        report.registry_calls += 1;
        match self.registry.submit(&envelope.bytes, &credentials).await {
            Ok(reference) => {
                let pending = self
                    .store
                    .transition(
                        submitted.id,
                        DeliveryPhase::Submitted,
                        LogUpdate::to(DeliveryPhase::Pending, self.clock.now())
                            .with_reference(reference.clone()),
                    )
                    .await?;
                report.submitted += 1;
                info!(
                    dossier = %pending.dossier,
                    kind = %pending.kind,
                    attempt = pending.attempt,
                    log_id = %pending.id,
                    reference = %reference,
                    "envelope submitted"
                );
                Ok(Some(pending))
            }
            Err(err) if err.is_transient() => {
                report.transient_registry_failures += 1;
                self.fail(&submitted, &err.to_string(), report).await?;
                Ok(None)
            }
            Err(err) if err.classification() == ErrorClass::Configuration => {
                self.fail(&submitted, &err.to_string(), report).await?;
                Err(err)
            }
            Err(err) => {
                self.reject(&submitted, DeliveryPhase::Submitted, err.to_string(), report)
                    .await?;
                Ok(None)
            }
        }
    }

    /// Why `log` may not be submitted yet, if anything.
    async fn ordering_block(&self, log: &DeliveryLog) -> Result<Option<String>> {
        if log.kind.requires_registration() && !self.start_accepted(log.dossier).await? {
            return Ok(Some("start registration not yet accepted".to_string()));
        }
        let logs = self.store.list_for_dossier(log.dossier).await?;
        let blocking = logs
            .iter()
            .filter(|other| other.id != log.id && other.is_live())
            .find(|other| match log.kind {
                MessageKind::Close => true,
                _ => other.phase.is_in_flight() || other.remote_reference.is_some(),
            });
        Ok(blocking.map(|b| format!("waiting for {} log {} ({})", b.kind, b.id, b.phase)))
    }

    async fn poll(&self, log: DeliveryLog, reference: &str, report: &mut TickReport) -> Result<()> {
        let credentials = self.credentials_for(log.dossier).await?;
        report.registry_calls += 1;
        report.polled += 1;
        match self.registry.status(reference, &credentials).await {
            Ok(status) => self.apply_status(log, status, report).await,
            Err(err) if err.is_transient() => {
                report.transient_registry_failures += 1;
                self.hold_pending(&log, err.to_string(), report).await
            }
            Err(err) if err.classification() == ErrorClass::Configuration => Err(err),
            Err(err) => {
                self.fail(&log, &err.to_string(), report).await?;
                Ok(())
            }
        }
    }

    /// Applies a remote status to a pending log.
    async fn apply_status(
        &self,
        log: DeliveryLog,
        status: RemoteStatus,
        report: &mut TickReport,
    ) -> Result<()> {
        match status {
            RemoteStatus::Pending => {
                if self.past_deadline(&log) {
                    self.fail(&log, "pending deadline exceeded", report).await?;
                } else {
                    debug!(log_id = %log.id, reference = ?log.remote_reference, "still pending");
                }
                Ok(())
            }
            RemoteStatus::Accepted => self.accept(log, report).await,
            RemoteStatus::Rejected(reason) => {
                self.reject(&log, DeliveryPhase::Pending, reason, report).await
            }
            RemoteStatus::Failed(reason) => {
                self.fail(&log, &reason, report).await?;
                Ok(())
            }
        }
    }

    async fn accept(&self, log: DeliveryLog, report: &mut TickReport) -> Result<()> {
        let registry_id = match log.kind {
            MessageKind::Start => {
                let reference = log.remote_reference.as_deref().ok_or_else(|| {
                    DeliveryError::Consistency(format!("pending log {} has no reference", log.id))
                })?;
                let credentials = self.credentials_for(log.dossier).await?;
                report.registry_calls += 1;
                match self.registry.fetch_registry_id(reference, &credentials).await {
                    Ok(Some(id)) => Some(id),
                    Ok(None) => {
                        let note = "accepted; registry id not issued yet".to_string();
                        return self.hold_pending(&log, note, report).await;
                    }
                    Err(err) if err.is_transient() => {
                        report.transient_registry_failures += 1;
                        return self.hold_pending(&log, err.to_string(), report).await;
                    }
                    Err(err) if err.classification() == ErrorClass::Configuration => {
                        return Err(err);
                    }
                    Err(err) => {
                        warn!(
                            dossier = %log.dossier,
                            log_id = %log.id,
                            reference,
                            error = %err,
                            "registry id lookup failed"
                        );
                        let note = format!("accepted; registry id lookup failed: {err}");
                        return self.hold_pending(&log, note, report).await;
                    }
                }
            }
            MessageKind::Addition | MessageKind::Correction | MessageKind::Close => None,
        };

        let now = self.clock.now();
        self.reconciler
            .on_accepted(&log, registry_id.as_ref(), now)
            .await?;
        let accepted = self
            .store
            .transition(
                log.id,
                DeliveryPhase::Pending,
                LogUpdate::to(DeliveryPhase::Accepted, now),
            )
            .await?;
        report.accepted += 1;
        info!(
            dossier = %accepted.dossier,
            kind = %accepted.kind,
            attempt = accepted.attempt,
            log_id = %accepted.id,
            registry_id = ?registry_id.map(|id| id.to_string()),
            "delivery accepted"
        );
        Ok(())
    }

    async fn reject(
        &self,
        log: &DeliveryLog,
        expected: DeliveryPhase,
        reason: String,
        report: &mut TickReport,
    ) -> Result<()> {
        let rejected = self
            .store
            .transition(
                log.id,
                expected,
                LogUpdate::to(DeliveryPhase::Rejected, self.clock.now()).with_error(reason),
            )
            .await?;
        report.rejected += 1;
        self.reconciler.on_quarantined(&rejected);
        Ok(())
    }

    /// Marks `log` retryable with the backoff for its attempt.
    async fn fail(&self, log: &DeliveryLog, reason: &str, report: &mut TickReport) -> Result<()> {
        let now = self.clock.now();
        let retry_at = self.backoff(log.attempt, now);
        self.store
            .transition(
                log.id,
                log.phase,
                LogUpdate::to(DeliveryPhase::Failed, now)
                    .with_error(reason)
                    .retry_at(retry_at),
            )
            .await?;
        report.failed += 1;
        warn!(
            dossier = %log.dossier,
            kind = %log.kind,
            attempt = log.attempt,
            log_id = %log.id,
            retry_at = %retry_at,
            reason,
            "delivery attempt failed"
        );
        Ok(())
    }

    /// Keeps `log` pending with `note`, or fails it once the pending deadline
    /// has passed.
    async fn hold_pending(
        &self,
        log: &DeliveryLog,
        note: String,
        report: &mut TickReport,
    ) -> Result<()> {
        if self.past_deadline(log) {
            self.fail(log, "pending deadline exceeded", report).await
        } else {
            self.annotate_pending(log, note).await
        }
    }

    async fn annotate_pending(&self, log: &DeliveryLog, note: String) -> Result<()> {
        self.store
            .transition(
                log.id,
                DeliveryPhase::Pending,
                LogUpdate::to(DeliveryPhase::Pending, self.clock.now()).with_error(note),
            )
            .await?;
        Ok(())
    }

    fn past_deadline(&self, log: &DeliveryLog) -> bool {
        let now = self.clock.now();
        log.submission_time
            .is_some_and(|at| now.signed_duration_since(at) > self.config.deadlines.pending())
    }

    fn backoff(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        self.retry.earliest_retry_at(attempt, now, &mut rand::rng())
    }

    async fn credentials_for(&self, dossier: DossierId) -> Result<RegistryCredentials> {
        let ctx = load_context(self.repository.as_ref(), dossier).await?;
        self.credentials.resolve(&ctx).await
    }
}

fn absorb(outcome: Result<()>, dossier: DossierId, report: &mut TickReport) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(err) if err.classification() == ErrorClass::Configuration => Err(err),
        Err(err) => {
            report.consistency_errors += 1;
            warn!(dossier = %dossier, error = %err, "dossier skipped for this tick");
            Ok(())
        }
    }
}

/// Observation placeholders for a log whose envelope is not built yet; the
/// checksums are filled in when it is submitted.
fn unbuilt(observations: &[ObservationId]) -> Vec<DeliveredObservation> {
    observations
        .iter()
        .map(|id| DeliveredObservation {
            id: *id,
            checksum: EnvelopeChecksum(String::new()),
        })
        .collect()
}
