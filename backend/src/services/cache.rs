//! Analysis cache
//!
//! Remembers which situations were already analysed so the trigger does not
//! re-run an expensive analysis for an equivalent state. Two namespaces:
//! warnings (keyed by warning id, long TTL) and conditions (keyed by a coarse
//! bucket of the measured state, short TTL). Entries expire lazily.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use shared::{CacheEntry, CacheKind, Location, Measurement};

use crate::config::CacheConfig;

/// Location-scoped cache of analysed situations
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    scope: String,
    config: CacheConfig,
    entries: HashMap<(CacheKind, String), CacheEntry>,
}

impl AnalysisCache {
    pub fn new(location: &Location, config: CacheConfig) -> Self {
        Self {
            scope: location.scope_key(),
            config,
            entries: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Switch to another location. Entries never carry over; returns true if
    /// the scope changed.
    pub fn rescope(&mut self, location: &Location) -> bool {
        let scope = location.scope_key();
        if scope == self.scope {
            return false;
        }
        tracing::info!(from = %self.scope, to = %scope, "Analysis cache rescoped, entries dropped");
        self.scope = scope;
        self.entries.clear();
        true
    }

    pub fn warning_key(&self, warning_id: &str) -> String {
        format!("{}|warning|{}", self.scope, warning_id.trim())
    }

    /// Deterministic key of the coarse bucket a measurement falls into
    pub fn condition_key(&self, measurement: &Measurement) -> String {
        format!(
            "{}|w{}|p{}|h{}|pp{}|{}",
            self.scope,
            band(measurement.wind_speed_ms, self.config.wind_band),
            band(measurement.pressure_hpa, self.config.pressure_band),
            band(measurement.humidity_pct, self.config.humidity_band),
            band(measurement.precipitation_probability_pct, self.config.probability_band),
            describe_condition(measurement.condition.as_deref()),
        )
    }

    pub fn ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Warning => self.config.warning_ttl(),
            CacheKind::Condition => self.config.condition_ttl(),
        }
    }

    /// Live entry for a key; expired entries are invisible
    pub fn get(&self, kind: CacheKind, key: &str, now: DateTime<Utc>) -> Option<&CacheEntry> {
        self.entries
            .get(&(kind, key.to_string()))
            .filter(|entry| entry.is_live(now))
    }

    pub fn contains(&self, kind: CacheKind, key: &str, now: DateTime<Utc>) -> bool {
        self.get(kind, key, now).is_some()
    }

    /// Insert or refresh an entry, evicting anything already expired
    pub fn put(&mut self, kind: CacheKind, key: &str, now: DateTime<Utc>) -> CacheEntry {
        self.purge_expired(now);

        let entry = CacheEntry {
            kind,
            key: key.to_string(),
            first_seen: now,
            expires_at: now + self.ttl(kind),
        };
        self.entries.insert((kind, key.to_string()), entry.clone());
        entry
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Number of live entries
    pub fn len(&self, now: DateTime<Utc>) -> usize {
        self.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self, now: DateTime<Utc>) -> bool {
        self.len(now) == 0
    }

    pub fn entries(&self, now: DateTime<Utc>) -> Vec<CacheEntry> {
        let mut live: Vec<CacheEntry> = self
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .cloned()
            .collect();
        live.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.key.cmp(&b.key)));
        live
    }
}

fn band(value: Option<f64>, width: f64) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}", (v / width).floor() as i64),
        _ => "na".to_string(),
    }
}

/// Coarse class of a reported condition label
pub fn describe_condition(label: Option<&str>) -> &'static str {
    let Some(label) = label.map(str::to_lowercase) else {
        return "na";
    };
    let has = |words: &[&str]| -> bool { words.iter().any(|w| label.contains(w)) };

    if has(&["thunder", "storm", "hail", "squall", "tornado", "bouř"][..]) {
        "storm"
    } else if has(&["snow", "sleet", "sníh"][..]) {
        "snow"
    } else if has(&["rain", "drizzle", "shower", "déšť"][..]) {
        "rain"
    } else if has(&["fog", "mist", "haze", "mlha"][..]) {
        "fog"
    } else if has(&["cloud", "overcast", "oblač"][..]) {
        "cloud"
    } else if has(&["clear", "sun", "jasno"][..]) {
        "clear"
    } else {
        "other"
    }
}
