//! Common types used across the engine

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Monitored location
///
/// Everything the engine caches is scoped to one location; the scope key is
/// the prefix of every cache key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    /// Stable key identifying this location, rounded to ~100 m
    pub fn scope_key(&self) -> String {
        format!("{:.3},{:.3}", self.latitude, self.longitude)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new("Praha", 50.0755, 14.4378)
    }
}

/// Truncate a timestamp to the start of its hour
pub fn floor_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp)
}

/// Round a timestamp to the nearest whole hour
pub fn round_to_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_round(Duration::hours(1))
        .unwrap_or(timestamp)
}

/// Fractional hours between two instants (positive when `to` is later)
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}
