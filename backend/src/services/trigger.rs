//! Trigger evaluator
//!
//! Decides, for each new measurement, whether the expensive reasoning-based
//! analysis should run. Conditions are checked in a fixed order and the first
//! match wins. The analysis cache suppresses re-analysis of an equivalent
//! situation, and a forced check bounds how long the engine can stay idle.
//!
//! The whole check-then-act sequence of one evaluation runs under a single
//! lock so two concurrent evaluations can never both fire for the same key.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use shared::{
    CacheKind, Location, Measurement, SeverityWarning, SuppressionReason, TriggerDecision,
    TriggerOutcome, TriggerReason,
};
use uuid::Uuid;

use crate::config::{CacheConfig, TriggerConfig};
use crate::services::cache::AnalysisCache;

/// Stateful trigger evaluator for one location
pub struct TriggerEvaluator {
    config: TriggerConfig,
    state: Mutex<TriggerState>,
}

struct TriggerState {
    cache: AnalysisCache,
    last_fired_at: Option<DateTime<Utc>>,
    /// Start of the idle clock before the first fire
    idle_anchor: Option<DateTime<Utc>>,
    last_observation: Option<Observation>,
    decisions: VecDeque<TriggerDecision>,
}

/// Bucket seen by the previous evaluation
struct Observation {
    key: String,
    at: DateTime<Utc>,
    /// A measurement condition (not a warning or the idle rule) matched
    matched: bool,
}

impl TriggerEvaluator {
    pub fn new(location: &Location, config: TriggerConfig, cache_config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TriggerState {
                cache: AnalysisCache::new(location, cache_config),
                last_fired_at: None,
                idle_anchor: None,
                last_observation: None,
                decisions: VecDeque::new(),
            }),
        }
    }

    /// Evaluate the newest measurement against the current wall clock
    pub fn evaluate(
        &self,
        measurement: Option<&Measurement>,
        warnings: &[SeverityWarning],
    ) -> TriggerDecision {
        self.evaluate_at(Utc::now(), measurement, warnings)
    }

    /// Evaluate the newest measurement as of `now`
    pub fn evaluate_at(
        &self,
        now: DateTime<Utc>,
        measurement: Option<&Measurement>,
        warnings: &[SeverityWarning],
    ) -> TriggerDecision {
        let mut state = self.lock();
        state.idle_anchor.get_or_insert(now);

        let Some(measurement) = measurement.filter(|m| m.is_usable()) else {
            let decision = new_decision(now, None, suppressed(SuppressionReason::NoData, None), None);
            return self.record(&mut state, decision);
        };

        let key = state.cache.condition_key(measurement);
        let matched = self.match_measurement(measurement);
        let previous = state.last_observation.replace(Observation {
            key: key.clone(),
            at: now,
            matched: matched.is_some(),
        });

        let active: Vec<&SeverityWarning> = warnings
            .iter()
            .filter(|w| self.warning_applies(w, now))
            .collect();

        let idle_since = state.last_fired_at.or(state.idle_anchor).unwrap_or(now);
        let idle_exceeded = now - idle_since > self.config.max_idle();

        let reason = matched
            .or_else(|| (!active.is_empty()).then_some(TriggerReason::SeverityWarning))
            .or_else(|| idle_exceeded.then_some(TriggerReason::ForcedCheck));

        let Some(reason) = reason else {
            let outcome = suppressed(SuppressionReason::NoCondition, None);
            let decision = new_decision(now, Some(measurement), outcome, Some(key));
            return self.record(&mut state, decision);
        };

        let mut covered_warnings = Vec::new();
        if reason == TriggerReason::SeverityWarning {
            covered_warnings = active
                .iter()
                .map(|w| w.id.clone())
                .filter(|id| {
                    let warning_key = state.cache.warning_key(id);
                    !state.cache.contains(CacheKind::Warning, &warning_key, now)
                })
                .collect();

            if covered_warnings.is_empty() {
                let outcome = suppressed(SuppressionReason::CacheHit, Some(reason));
                let decision = new_decision(now, Some(measurement), outcome, Some(key));
                return self.record(&mut state, decision);
            }
        } else if state.cache.contains(CacheKind::Condition, &key, now) {
            let outcome = suppressed(SuppressionReason::CacheHit, Some(reason));
            let decision = new_decision(now, Some(measurement), outcome, Some(key));
            return self.record(&mut state, decision);
        } else if !idle_exceeded && self.is_sustained(previous.as_ref(), &key, now) {
            let outcome = suppressed(SuppressionReason::SustainedCondition, Some(reason));
            let decision = new_decision(now, Some(measurement), outcome, Some(key));
            return self.record(&mut state, decision);
        }

        // Fire: one write covering the condition and any warnings it answers
        state.cache.put(CacheKind::Condition, &key, now);
        for id in &covered_warnings {
            let warning_key = state.cache.warning_key(id);
            state.cache.put(CacheKind::Warning, &warning_key, now);
        }
        state.last_fired_at = Some(now);

        let outcome = TriggerOutcome::Fire { reason };
        let mut decision = new_decision(now, Some(measurement), outcome, Some(key));
        decision.warning_ids = covered_warnings;
        self.record(&mut state, decision)
    }

    /// First matching measurement condition (rules 1 to 5)
    fn match_measurement(&self, m: &Measurement) -> Option<TriggerReason> {
        let cfg = &self.config;

        if m.precipitation_probability_pct
            .is_some_and(|p| p > cfg.precipitation_probability_threshold)
        {
            return Some(TriggerReason::PrecipitationProbability);
        }
        if m.precipitation_mm.is_some_and(|p| p > cfg.precipitation_rate_threshold) {
            return Some(TriggerReason::HeavyPrecipitation);
        }
        if let (Some(humidity), Some(pressure)) = (m.humidity_pct, m.pressure_hpa) {
            if humidity > cfg.storm_humidity_threshold && pressure < cfg.storm_pressure_threshold {
                return Some(TriggerReason::StormSignature);
            }
        }
        if m.wind_speed_ms.is_some_and(|w| w >= cfg.wind_speed_gale) {
            return Some(TriggerReason::Gale);
        }
        if let Some(label) = m.condition.as_deref() {
            let label = label.to_lowercase();
            if cfg
                .storm_keywords
                .iter()
                .any(|k| !k.is_empty() && label.contains(&k.to_lowercase()))
            {
                return Some(TriggerReason::StormKeyword);
            }
        }
        None
    }

    fn warning_applies(&self, warning: &SeverityWarning, now: DateTime<Utc>) -> bool {
        warning.severity.is_actionable()
            && warning.severity >= self.config.min_warning_severity
            && warning.is_within(now, self.config.warning_lookahead())
    }

    /// The same matching bucket was observed without a break in observation
    fn is_sustained(&self, previous: Option<&Observation>, key: &str, now: DateTime<Utc>) -> bool {
        previous.is_some_and(|p| {
            p.matched && p.key == key && now - p.at <= self.config.continuity_gap()
        })
    }

    fn record(&self, state: &mut TriggerState, decision: TriggerDecision) -> TriggerDecision {
        log_decision(&decision);

        state.decisions.push_back(decision.clone());
        while state.decisions.len() > self.config.decision_log_capacity.max(1) {
            state.decisions.pop_front();
        }
        decision
    }

    /// Most recent decisions, newest first
    pub fn recent_decisions(&self, limit: usize) -> Vec<TriggerDecision> {
        self.lock().decisions.iter().rev().take(limit).cloned().collect()
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.lock().last_fired_at
    }

    /// Live cache entries, oldest first
    pub fn cache_entries(&self, now: DateTime<Utc>) -> Vec<shared::CacheEntry> {
        self.lock().cache.entries(now)
    }

    /// Bounded-memory sweep of expired cache entries
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.lock().cache.purge_expired(now)
    }

    /// Move the evaluator to another location; cached analyses do not carry over
    pub fn rescope(&self, location: &Location) {
        let mut state = self.lock();
        if state.cache.rescope(location) {
            state.last_observation = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, TriggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn suppressed(reason: SuppressionReason, matched: Option<TriggerReason>) -> TriggerOutcome {
    TriggerOutcome::Suppressed { reason, matched }
}

fn new_decision(
    now: DateTime<Utc>,
    measurement: Option<&Measurement>,
    outcome: TriggerOutcome,
    cache_key: Option<String>,
) -> TriggerDecision {
    TriggerDecision {
        id: Uuid::new_v4(),
        evaluated_at: now,
        measured_at: measurement.map(|m| m.timestamp),
        outcome,
        cache_key,
        warning_ids: Vec::new(),
    }
}

fn log_decision(decision: &TriggerDecision) {
    match &decision.outcome {
        TriggerOutcome::Fire { reason } => tracing::info!(
            decision_id = %decision.id,
            rule = reason.rule_number(),
            reason = reason.description(),
            key = decision.cache_key.as_deref().unwrap_or(""),
            warnings = ?decision.warning_ids,
            "Analysis triggered"
        ),
        TriggerOutcome::Suppressed {
            reason: SuppressionReason::NoCondition,
            ..
        } => tracing::debug!(decision_id = %decision.id, "Trigger quiet, no condition matched"),
        TriggerOutcome::Suppressed { reason, matched } => tracing::info!(
            decision_id = %decision.id,
            suppression = ?reason,
            matched = ?matched,
            key = decision.cache_key.as_deref().unwrap_or(""),
            "Analysis suppressed"
        ),
    }
}
