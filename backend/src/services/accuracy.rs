//! Accuracy tracker
//!
//! Reconciles past forecast points against the actuals that arrived near their
//! target time, keeps a rolling absolute error per method and field over a
//! trailing window, and turns it into the scores the blender weights by.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    accuracy_score, AccuracyRecord, ForecastField, ForecastMethod, ForecastPoint, Measurement,
};

use crate::config::AccuracyConfig;

/// Per method and field weighting scores handed to the blender
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyWeights {
    scores: HashMap<(ForecastMethod, ForecastField), f64>,
    prior: f64,
}

impl AccuracyWeights {
    /// Weights with no history; every method scores the prior
    pub fn uniform(prior: f64) -> Self {
        Self {
            scores: HashMap::new(),
            prior: prior.clamp(0.0, 1.0),
        }
    }

    pub fn with_score(mut self, method: ForecastMethod, field: ForecastField, score: f64) -> Self {
        self.scores.insert((method, field), score.clamp(0.0, 1.0));
        self
    }

    pub fn score(&self, method: ForecastMethod, field: ForecastField) -> f64 {
        self.scores.get(&(method, field)).copied().unwrap_or(self.prior)
    }
}

impl Default for AccuracyWeights {
    fn default() -> Self {
        Self::uniform(AccuracyConfig::default().prior_score)
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileSummary {
    /// Forecast points matched to an actual this pass
    pub reconciled: Vec<(ForecastMethod, DateTime<Utc>)>,
    /// Error samples added
    pub samples: usize,
    /// Points whose matching window has not closed yet
    pub pending: usize,
    /// Points with no actual inside the tolerance
    pub unmatched: usize,
}

#[derive(Debug, Clone)]
struct ErrorSample {
    target: DateTime<Utc>,
    abs_error: f64,
}

/// Rolling accuracy statistics
#[derive(Debug, Clone)]
pub struct AccuracyTracker {
    config: AccuracyConfig,
    samples: HashMap<(ForecastMethod, ForecastField), VecDeque<ErrorSample>>,
    updated: HashMap<(ForecastMethod, ForecastField), DateTime<Utc>>,
    reconciled: HashSet<(ForecastMethod, DateTime<Utc>)>,
}

impl AccuracyTracker {
    pub fn new(config: AccuracyConfig) -> Self {
        Self {
            config,
            samples: HashMap::new(),
            updated: HashMap::new(),
            reconciled: HashSet::new(),
        }
    }

    pub fn is_reconciled(&self, method: ForecastMethod, target: DateTime<Utc>) -> bool {
        self.reconciled.contains(&(method, target))
    }

    /// Match forecast points to actuals and fold the errors into the rolling window
    ///
    /// A point is only matched once its tolerance window has closed, and each
    /// (method, target) pair is counted at most once. Among several points for
    /// the same pair, the most recently issued one is used.
    pub fn reconcile(
        &mut self,
        forecasts: &[ForecastPoint],
        actuals: &[Measurement],
        now: DateTime<Utc>,
    ) -> ReconcileSummary {
        let tolerance = self.config.tolerance();
        let mut summary = ReconcileSummary::default();

        let mut newest: HashMap<(ForecastMethod, DateTime<Utc>), &ForecastPoint> = HashMap::new();
        for point in forecasts {
            let key = (point.method, point.target);
            if self.reconciled.contains(&key) {
                continue;
            }
            newest
                .entry(key)
                .and_modify(|current| {
                    if point.issued_at > current.issued_at {
                        *current = point;
                    }
                })
                .or_insert(point);
        }

        let mut candidates: Vec<&ForecastPoint> = newest.into_values().collect();
        candidates.sort_by_key(|p| (p.target, p.method));

        for point in candidates {
            if now < point.target + tolerance {
                summary.pending += 1;
                continue;
            }

            let nearby: Vec<&Measurement> = actuals
                .iter()
                .filter(|m| (m.timestamp - point.target).abs() <= tolerance)
                .collect();
            if nearby.is_empty() {
                summary.unmatched += 1;
                continue;
            }

            for field in point.fields().collect::<Vec<_>>() {
                let (Some(forecast), Some(actual)) =
                    (point.value(field), nearest_value(&nearby, point.target, field))
                else {
                    continue;
                };
                let error = (forecast - actual).abs();
                if !error.is_finite() {
                    continue;
                }
                self.push_sample(point.method, field, point.target, error, now);
                summary.samples += 1;
            }

            self.reconciled.insert((point.method, point.target));
            summary.reconciled.push((point.method, point.target));
        }

        self.prune_reconciled(now);

        if summary.samples > 0 {
            tracing::info!(
                points = summary.reconciled.len(),
                samples = summary.samples,
                pending = summary.pending,
                unmatched = summary.unmatched,
                "Forecast accuracy reconciled"
            );
        }
        summary
    }

    fn push_sample(
        &mut self,
        method: ForecastMethod,
        field: ForecastField,
        target: DateTime<Utc>,
        abs_error: f64,
        now: DateTime<Utc>,
    ) {
        let window = self.config.window();
        let samples = self.samples.entry((method, field)).or_default();
        samples.push_back(ErrorSample { target, abs_error });

        let newest = samples.iter().map(|s| s.target).max().unwrap_or(target);
        samples.retain(|s| s.target > newest - window);
        self.updated.insert((method, field), now);
    }

    fn prune_reconciled(&mut self, now: DateTime<Utc>) {
        let horizon = now - self.config.window() - self.config.tolerance();
        self.reconciled.retain(|(_, target)| *target > horizon);
    }

    /// Mean absolute error of the samples in the window
    pub fn mean_absolute_error(&self, method: ForecastMethod, field: ForecastField) -> Option<f64> {
        let samples = self.samples.get(&(method, field))?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().map(|s| s.abs_error).sum::<f64>() / samples.len() as f64)
    }

    /// Weighting score: raw accuracy shrunk toward the prior by sample count
    pub fn score(&self, method: ForecastMethod, field: ForecastField) -> f64 {
        let prior = self.config.prior_score.clamp(0.0, 1.0);
        let Some(mae) = self.mean_absolute_error(method, field) else {
            return prior;
        };
        let n = self.samples.get(&(method, field)).map_or(0, VecDeque::len) as f64;
        let k = self.config.prior_strength.max(0.0);
        let raw = accuracy_score(mae, field);
        let score = (n * raw + k * prior) / (n + k);
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            prior
        }
    }

    pub fn record(&self, method: ForecastMethod, field: ForecastField) -> Option<AccuracyRecord> {
        let mean_absolute_error = self.mean_absolute_error(method, field)?;
        Some(AccuracyRecord {
            method,
            field,
            mean_absolute_error,
            sample_count: self.samples.get(&(method, field)).map_or(0, VecDeque::len),
            score: self.score(method, field),
            last_updated: self.updated.get(&(method, field)).copied()?,
        })
    }

    /// Every method and field with samples, ensemble included
    pub fn records(&self) -> Vec<AccuracyRecord> {
        let mut keys: Vec<&(ForecastMethod, ForecastField)> = self.samples.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|(method, field)| self.record(*method, *field))
            .collect()
    }

    /// Scores for the blend inputs; the ensemble's own record is never fed back
    pub fn weights(&self) -> AccuracyWeights {
        let mut weights = AccuracyWeights::uniform(self.config.prior_score);
        for method in ForecastMethod::BLEND_INPUTS {
            for field in ForecastField::ALL {
                weights = weights.with_score(method, field, self.score(method, field));
            }
        }
        weights
    }
}

fn nearest_value(
    actuals: &[&Measurement],
    target: DateTime<Utc>,
    field: ForecastField,
) -> Option<f64> {
    actuals
        .iter()
        .filter_map(|m| m.value(field).map(|v| (m.timestamp, v)))
        .filter(|(_, v)| v.is_finite())
        .min_by_key(|(ts, _)| (*ts - target).abs())
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_nearest_value_prefers_closest_with_field() {
        let target = Utc.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap();
        let a = Measurement::new("a", target + Duration::minutes(2));
        let b = Measurement::new("b", target + Duration::minutes(9))
            .with(ForecastField::Temperature, 20.0);
        let c = Measurement::new("c", target - Duration::minutes(12))
            .with(ForecastField::Temperature, 18.0);
        let actuals = vec![&a, &b, &c];
        assert_eq!(nearest_value(&actuals, target, ForecastField::Temperature), Some(20.0));
        assert_eq!(nearest_value(&actuals, target, ForecastField::Pressure), None);
    }

    #[test]
    fn test_weights_default_to_prior() {
        let weights = AccuracyWeights::uniform(0.5)
            .with_score(ForecastMethod::Physical, ForecastField::Pressure, 1.3);
        assert_eq!(weights.score(ForecastMethod::Physical, ForecastField::Pressure), 1.0);
        assert_eq!(weights.score(ForecastMethod::ReasoningBased, ForecastField::Pressure), 0.5);
    }
}
