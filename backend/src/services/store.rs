//! Forecast persistence
//!
//! The engine never touches storage directly; it goes through the
//! [`ForecastStore`] seam so tests and deployments can choose the backend.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ForecastMethod, ForecastPoint, Measurement, MethodForecast, TriggerDecision};

use crate::error::AppResult;

/// Append-only store for measurements, forecasts and trigger decisions
#[async_trait]
pub trait ForecastStore: Send + Sync {
    async fn append_measurement(&self, measurement: &Measurement) -> AppResult<()>;

    async fn append_forecast(&self, forecast: &MethodForecast) -> AppResult<()>;

    async fn append_decision(&self, decision: &TriggerDecision) -> AppResult<()>;

    /// Measurements at or after `since`, oldest first
    async fn recent_history(&self, since: DateTime<Utc>) -> AppResult<Vec<Measurement>>;

    /// Unreconciled forecast points with targets in `[since, until]`
    async fn pending_reconciliation(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Vec<ForecastPoint>>;

    /// Flag every stored point for these (method, target) pairs as reconciled
    async fn mark_reconciled(&self, keys: &[(ForecastMethod, DateTime<Utc>)]) -> AppResult<()>;

    /// Drop records older than `cutoff`; returns how many were removed
    async fn prune(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;

    /// Short name for health reporting
    fn kind(&self) -> &'static str;
}

#[derive(Debug, Clone)]
struct StoredPoint {
    point: ForecastPoint,
    reconciled: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    measurements: Vec<Measurement>,
    points: Vec<StoredPoint>,
    decisions: Vec<TriggerDecision>,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<TriggerDecision> {
        self.read().decisions.clone()
    }

    pub fn forecast_points(&self) -> Vec<ForecastPoint> {
        self.read().points.iter().map(|p| p.point.clone()).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn append_measurement(&self, measurement: &Measurement) -> AppResult<()> {
        let mut state = self.write();
        // Keep the history sorted; sources may deliver out of order
        let index = state
            .measurements
            .partition_point(|m| m.timestamp <= measurement.timestamp);
        state.measurements.insert(index, measurement.clone());
        Ok(())
    }

    async fn append_forecast(&self, forecast: &MethodForecast) -> AppResult<()> {
        let mut state = self.write();
        state.points.extend(forecast.points.iter().map(|point| StoredPoint {
            point: point.clone(),
            reconciled: false,
        }));
        Ok(())
    }

    async fn append_decision(&self, decision: &TriggerDecision) -> AppResult<()> {
        self.write().decisions.push(decision.clone());
        Ok(())
    }

    async fn recent_history(&self, since: DateTime<Utc>) -> AppResult<Vec<Measurement>> {
        Ok(self
            .read()
            .measurements
            .iter()
            .filter(|m| m.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn pending_reconciliation(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AppResult<Vec<ForecastPoint>> {
        Ok(self
            .read()
            .points
            .iter()
            .filter(|p| !p.reconciled && p.point.target >= since && p.point.target <= until)
            .map(|p| p.point.clone())
            .collect())
    }

    async fn mark_reconciled(&self, keys: &[(ForecastMethod, DateTime<Utc>)]) -> AppResult<()> {
        let mut state = self.write();
        for stored in state.points.iter_mut() {
            if keys.contains(&(stored.point.method, stored.point.target)) {
                stored.reconciled = true;
            }
        }
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut state = self.write();
        let before = state.measurements.len() + state.points.len() + state.decisions.len();
        state.measurements.retain(|m| m.timestamp >= cutoff);
        state.points.retain(|p| p.point.target >= cutoff);
        state.decisions.retain(|d| d.evaluated_at >= cutoff);
        let after = state.measurements.len() + state.points.len() + state.decisions.len();
        Ok(before - after)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
