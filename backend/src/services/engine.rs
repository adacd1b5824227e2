//! Coordinating loop tying ingestion, triggering, forecasting and reconciliation together
//!
//! The engine owns one instance of every component and the latest forecast
//! snapshots. Cycles can be driven individually (tests, one-shot runs) or by
//! [`ForecastEngine::run`], which schedules them on intervals and runs the
//! reasoning call as a background task.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shared::{
    batch_quality_score, validate_measurement, AccuracyRecord, EnsembleForecast, Location,
    Measurement, MethodForecast, SeverityWarning, TriggerDecision,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::error::{AppError, AppResult, FailureKind};
use crate::services::accuracy::{AccuracyTracker, ReconcileSummary};
use crate::services::ensemble::EnsembleBlender;
use crate::services::notification::{AlertPolicy, LogNotifier, Notification, Notifier};
use crate::services::physical::PhysicalForecastGenerator;
use crate::services::reasoning::ReasoningForecastGenerator;
use crate::services::sources::{MeasurementSource, NoWarnings, WarningSource};
use crate::services::store::{ForecastStore, MemoryStore};
use crate::services::trigger::TriggerEvaluator;

/// Latest published forecasts
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub ensemble: Option<EnsembleForecast>,
    pub physical: Option<MethodForecast>,
    pub reasoning: Option<MethodForecast>,
    pub warnings: Vec<SeverityWarning>,
}

/// What happened to the reasoning-based method in one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReasoningStatus {
    /// The trigger did not fire
    NotTriggered,
    /// Another reasoning call was still running
    Skipped,
    Completed { points: usize },
    Failed { kind: FailureKind, message: String },
}

/// Outcome of one full forecast cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub decision: TriggerDecision,
    pub physical_points: usize,
    pub reasoning: ReasoningStatus,
    pub ensemble: EnsembleForecast,
}

/// Inputs gathered by the first half of a cycle
#[derive(Debug, Clone)]
pub struct PreparedCycle {
    pub decision: TriggerDecision,
    pub history: Vec<Measurement>,
    pub warnings: Vec<SeverityWarning>,
    pub physical: MethodForecast,
}

pub struct ForecastEngine {
    config: Arc<Config>,
    location: Location,
    sources: Vec<Arc<dyn MeasurementSource>>,
    warning_source: Arc<dyn WarningSource>,
    store: Arc<dyn ForecastStore>,
    notifier: Arc<dyn Notifier>,
    trigger: TriggerEvaluator,
    physical: PhysicalForecastGenerator,
    reasoning: Option<Arc<ReasoningForecastGenerator>>,
    blender: EnsembleBlender,
    accuracy: RwLock<AccuracyTracker>,
    alerts: AlertPolicy,
    snapshot: RwLock<EngineSnapshot>,
}

impl ForecastEngine {
    /// Engine with an in-memory store, log delivery and no external collaborators
    pub fn new(config: Arc<Config>) -> Self {
        let location = config.location.to_location();
        let horizon = config.physical.horizon_hours;
        Self {
            trigger: TriggerEvaluator::new(&location, config.trigger.clone(), config.cache.clone()),
            physical: PhysicalForecastGenerator::new(&location, config.physical.clone()),
            blender: EnsembleBlender::new(config.ensemble.clone(), horizon),
            accuracy: RwLock::new(AccuracyTracker::new(config.accuracy.clone())),
            alerts: AlertPolicy::new(config.alerts.clone()),
            sources: Vec::new(),
            warning_source: Arc::new(NoWarnings),
            store: Arc::new(MemoryStore::new()),
            notifier: Arc::new(LogNotifier),
            reasoning: None,
            snapshot: RwLock::new(EngineSnapshot::default()),
            location,
            config,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MeasurementSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_warnings(mut self, source: Arc<dyn WarningSource>) -> Self {
        self.warning_source = source;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ForecastStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_reasoning(mut self, generator: ReasoningForecastGenerator) -> Self {
        self.reasoning = Some(Arc::new(generator));
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning.is_some()
    }

    pub fn reasoning_in_flight(&self) -> bool {
        self.reasoning.as_ref().is_some_and(|r| r.is_in_flight())
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Validate and persist a batch of measurements; returns the accepted ones
    pub async fn ingest(&self, measurements: Vec<Measurement>) -> AppResult<Vec<Measurement>> {
        let mut accepted = Vec::with_capacity(measurements.len());
        for measurement in measurements {
            if let Err(reason) = validate_measurement(&measurement) {
                tracing::warn!(
                    source = %measurement.source_id,
                    timestamp = %measurement.timestamp,
                    reason,
                    "Measurement rejected"
                );
                continue;
            }
            self.store.append_measurement(&measurement).await?;
            accepted.push(measurement);
        }

        if !accepted.is_empty() {
            tracing::info!(
                accepted = accepted.len(),
                quality = batch_quality_score(&accepted),
                "Measurements ingested"
            );
        }
        Ok(accepted)
    }

    /// Pull from every measurement source; a failing source does not stop the others
    pub async fn ingest_cycle(&self) -> AppResult<Vec<Measurement>> {
        let mut fetched = Vec::new();
        for source in &self.sources {
            match source.fetch_latest(&self.location).await {
                Ok(batch) => {
                    tracing::debug!(source = source.source_id(), count = batch.len(), "Source fetched");
                    fetched.extend(batch);
                }
                Err(e) => tracing::warn!(
                    source = source.source_id(),
                    error = %e,
                    "Measurement source failed"
                ),
            }
        }
        self.ingest(fetched).await
    }

    async fn fetch_warnings(&self) -> Vec<SeverityWarning> {
        match self.warning_source.active_warnings(&self.location).await {
            Ok(warnings) => warnings,
            Err(e) => {
                tracing::warn!(error = %e, "Warning source failed; keeping previous warnings");
                let previous = self.read_snapshot().warnings.clone();
                previous
            }
        }
    }

    // ========================================================================
    // Forecast cycle
    // ========================================================================

    /// Evaluate the trigger and produce the physical forecast
    ///
    /// The trigger decision is recorded even when the physical forecast fails,
    /// which is the only failure that aborts a cycle.
    pub async fn prepare(&self, now: DateTime<Utc>) -> AppResult<PreparedCycle> {
        let since = now - Duration::hours(self.config.physical.history_hours);
        let history = self.store.recent_history(since).await?;
        let warnings = self.fetch_warnings().await;
        self.write_snapshot().warnings = warnings.clone();

        let freshness = self.config.trigger.continuity_gap();
        let current = history
            .iter()
            .max_by_key(|m| m.timestamp)
            .filter(|m| now - m.timestamp <= freshness);

        let decision = self.trigger.evaluate_at(now, current, &warnings);
        self.store.append_decision(&decision).await?;
        if decision.fired() {
            self.deliver(Notification::TriggerFired(decision.clone())).await;
        }

        let physical = self.physical.generate(&history, now).map_err(|e| {
            tracing::error!(error = %e, "Physical forecast failed; cycle aborted");
            e
        })?;
        self.store.append_forecast(&physical).await?;
        self.write_snapshot().physical = Some(physical.clone());

        Ok(PreparedCycle {
            decision,
            history,
            warnings,
            physical,
        })
    }

    /// Run the reasoning-based generator over the prepared inputs
    pub async fn run_reasoning(
        &self,
        history: &[Measurement],
        warnings: &[SeverityWarning],
        now: DateTime<Utc>,
    ) -> AppResult<MethodForecast> {
        let generator = self
            .reasoning
            .as_ref()
            .ok_or_else(|| AppError::ReasoningService("no reasoning capability configured".into()))?;
        generator.generate(&self.location, history, warnings, now).await
    }

    /// Fold a finished reasoning call into the engine state
    pub async fn accept_reasoning(
        &self,
        result: AppResult<MethodForecast>,
        now: DateTime<Utc>,
    ) -> ReasoningStatus {
        let forecast = match result {
            Ok(forecast) => forecast,
            Err(AppError::AnalysisInFlight) => {
                tracing::info!("Reasoning analysis already in flight; cycle skipped");
                return ReasoningStatus::Skipped;
            }
            Err(e) => {
                tracing::warn!(
                    kind = ?e.kind(),
                    error = %e,
                    "Reasoning forecast failed; blending without it"
                );
                return ReasoningStatus::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                };
            }
        };

        if let Err(e) = self.store.append_forecast(&forecast).await {
            tracing::error!(error = %e, "Failed to persist reasoning forecast");
        }

        if let Some(assessment) = &forecast.assessment {
            if self.alerts.check_and_record(assessment, now) {
                self.deliver(Notification::StormAlert {
                    location: self.location.clone(),
                    assessment: assessment.clone(),
                })
                .await;
            }
        }

        let points = forecast.points.len();
        self.write_snapshot().reasoning = Some(forecast);
        ReasoningStatus::Completed { points }
    }

    /// Blend the latest method forecasts, then store and deliver the result
    pub async fn blend_and_publish(&self, now: DateTime<Utc>) -> AppResult<EnsembleForecast> {
        let inputs: Vec<MethodForecast> = {
            let snapshot = self.read_snapshot();
            snapshot
                .physical
                .iter()
                .chain(snapshot.reasoning.iter())
                .map(|f| f.remaining_after(now))
                .filter(|f| !f.points.is_empty())
                .collect()
        };
        let weights = self.accuracy_read().weights();

        let ensemble = self.blender.blend(&inputs, &weights, now)?;
        if !ensemble.missing_methods.is_empty() {
            tracing::warn!(
                contributing = ?ensemble.contributing_methods,
                missing = ?ensemble.missing_methods,
                "Ensemble blended with a reduced method set"
            );
        }

        self.store.append_forecast(&ensemble.as_method_forecast()).await?;
        self.write_snapshot().ensemble = Some(ensemble.clone());
        self.deliver(Notification::Forecast(Box::new(ensemble.clone()))).await;
        Ok(ensemble)
    }

    /// One complete cycle with the reasoning call awaited inline
    pub async fn forecast_cycle(&self, now: DateTime<Utc>) -> AppResult<CycleReport> {
        let prepared = self.prepare(now).await?;

        let reasoning = if prepared.decision.fired() && self.reasoning.is_some() {
            let result = self
                .run_reasoning(&prepared.history, &prepared.warnings, now)
                .await;
            self.accept_reasoning(result, now).await
        } else {
            ReasoningStatus::NotTriggered
        };

        let ensemble = self.blend_and_publish(now).await?;
        Ok(CycleReport {
            decision: prepared.decision,
            physical_points: prepared.physical.points.len(),
            reasoning,
            ensemble,
        })
    }

    // ========================================================================
    // Reconciliation and retention
    // ========================================================================

    /// Match stored forecasts against actuals and update the rolling accuracy
    pub async fn reconcile_cycle(&self, now: DateTime<Utc>) -> AppResult<ReconcileSummary> {
        let window = self.config.accuracy.window();
        let tolerance = self.config.accuracy.tolerance();

        let pending = self.store.pending_reconciliation(now - window, now).await?;
        if pending.is_empty() {
            return Ok(ReconcileSummary::default());
        }
        let actuals = self.store.recent_history(now - window - tolerance).await?;

        let summary = self.accuracy_write().reconcile(&pending, &actuals, now);
        self.store.mark_reconciled(&summary.reconciled).await?;

        tracing::info!(
            reconciled = summary.reconciled.len(),
            samples = summary.samples,
            pending = summary.pending,
            unmatched = summary.unmatched,
            "Accuracy reconciliation finished"
        );
        Ok(summary)
    }

    /// Drop stored records past retention and expired cache entries
    pub async fn prune(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let cutoff = now - Duration::days(self.config.schedule.retention_days);
        let removed = self.store.prune(cutoff).await?;
        let expired = self.trigger.purge_expired(now);
        tracing::debug!(removed, expired, "Retention sweep finished");
        Ok(removed)
    }

    // ========================================================================
    // Read side
    // ========================================================================

    pub fn snapshot(&self) -> EngineSnapshot {
        self.read_snapshot().clone()
    }

    pub fn recent_decisions(&self, limit: usize) -> Vec<TriggerDecision> {
        self.trigger.recent_decisions(limit)
    }

    pub fn accuracy_records(&self) -> Vec<AccuracyRecord> {
        self.accuracy_read().records()
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.trigger.last_fired_at()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Drive the periodic cycles until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let schedule = &self.config.schedule;
        let mut ingest_tick =
            tokio::time::interval(StdDuration::from_secs(schedule.ingest_interval_minutes * 60));
        ingest_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile_tick = tokio::time::interval(StdDuration::from_secs(
            schedule.reconcile_interval_minutes * 60,
        ));
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let grace = StdDuration::from_secs(schedule.shutdown_grace_seconds);

        let (tx, mut rx) = mpsc::channel::<AppResult<MethodForecast>>(1);
        let mut reasoning_task: Option<JoinHandle<()>> = None;

        tracing::info!(
            location = %self.location.name,
            sources = self.sources.len(),
            reasoning = self.reasoning_enabled(),
            store = self.store_kind(),
            "Forecast engine started"
        );

        loop {
            tokio::select! {
                _ = ingest_tick.tick() => {
                    if let Some(task) = self.tick(&tx).await {
                        reasoning_task = Some(task);
                    }
                    self.reconcile_logged(Utc::now()).await;
                }
                _ = reconcile_tick.tick() => {
                    let now = Utc::now();
                    self.reconcile_logged(now).await;
                    if let Err(e) = self.prune(now).await {
                        tracing::warn!(error = %e, "Retention sweep failed");
                    }
                }
                Some(result) = rx.recv() => {
                    let now = Utc::now();
                    let status = self.accept_reasoning(result, now).await;
                    if matches!(status, ReasoningStatus::Completed { .. }) {
                        if let Err(e) = self.blend_and_publish(now).await {
                            tracing::error!(error = %e, "Re-blend after reasoning failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(mut task) = reasoning_task.filter(|t| !t.is_finished()) {
            tracing::info!(grace = ?grace, "Waiting for in-flight reasoning call");
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
                tracing::warn!("In-flight reasoning call abandoned at shutdown");
            }
        }
        tracing::info!("Forecast engine stopped");
    }

    /// One ingest tick: ingestion, trigger, physical forecast, and a spawned
    /// reasoning call when the trigger fires
    async fn tick(
        self: &Arc<Self>,
        tx: &mpsc::Sender<AppResult<MethodForecast>>,
    ) -> Option<JoinHandle<()>> {
        if let Err(e) = self.ingest_cycle().await {
            tracing::error!(error = %e, "Ingestion failed");
        }

        let now = Utc::now();
        let prepared = match self.prepare(now).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "Forecast cycle failed");
                return None;
            }
        };

        let mut spawned = None;
        if prepared.decision.fired() && self.reasoning_enabled() {
            if self.reasoning_in_flight() {
                tracing::info!("Reasoning analysis already in flight; cycle skipped");
            } else {
                let engine = Arc::clone(self);
                let tx = tx.clone();
                spawned = Some(tokio::spawn(async move {
                    let result = engine
                        .run_reasoning(&prepared.history, &prepared.warnings, now)
                        .await;
                    if tx.send(result).await.is_err() {
                        tracing::debug!("Engine loop gone; reasoning result dropped");
                    }
                }));
            }
        }

        if let Err(e) = self.blend_and_publish(now).await {
            tracing::error!(error = %e, "Blend failed");
        }
        spawned
    }

    async fn reconcile_logged(&self, now: DateTime<Utc>) {
        if let Err(e) = self.reconcile_cycle(now).await {
            tracing::warn!(error = %e, "Accuracy reconciliation failed");
        }
    }

    async fn deliver(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(kind = notification.kind(), error = %e, "Notification delivery failed");
        }
    }

    fn read_snapshot(&self) -> RwLockReadGuard<'_, EngineSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_snapshot(&self) -> RwLockWriteGuard<'_, EngineSnapshot> {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn accuracy_read(&self) -> RwLockReadGuard<'_, AccuracyTracker> {
        self.accuracy.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn accuracy_write(&self) -> RwLockWriteGuard<'_, AccuracyTracker> {
        self.accuracy.write().unwrap_or_else(PoisonError::into_inner)
    }
}
