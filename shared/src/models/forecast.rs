//! Forecast models

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ForecastField, ModelError, StormAssessment};

/// Forecasting method; a closed set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Physical,
    ReasoningBased,
    Ensemble,
}

impl ForecastMethod {
    /// Methods the blender combines
    pub const BLEND_INPUTS: [ForecastMethod; 2] =
        [ForecastMethod::Physical, ForecastMethod::ReasoningBased];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Physical => "physical",
            ForecastMethod::ReasoningBased => "reasoning_based",
            ForecastMethod::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "physical" | "physics" => Ok(ForecastMethod::Physical),
            "reasoning_based" | "reasoning" | "ai" => Ok(ForecastMethod::ReasoningBased),
            "ensemble" => Ok(ForecastMethod::Ensemble),
            _ => Err(ModelError::UnknownMethod(s.to_string())),
        }
    }
}

/// Display bucket for a confidence score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score < 0.3 {
            ConfidenceLevel::VeryLow
        } else if score < 0.5 {
            ConfidenceLevel::Low
        } else if score < 0.7 {
            ConfidenceLevel::Medium
        } else if score < 0.9 {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::VeryHigh
        }
    }
}

/// Predicted state at one target time, produced by one method
///
/// Points are immutable once issued; a newer point for the same target
/// supersedes an older one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub method: ForecastMethod,
    pub target: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub precipitation_probability_pct: Option<f64>,
    pub condition: Option<String>,
    /// Per-field confidence in [0, 1]; present exactly for the fields with values
    pub confidence: BTreeMap<ForecastField, f64>,
}

impl ForecastPoint {
    pub fn new(method: ForecastMethod, target: DateTime<Utc>, issued_at: DateTime<Utc>) -> Self {
        Self {
            method,
            target,
            issued_at,
            temperature_c: None,
            humidity_pct: None,
            pressure_hpa: None,
            wind_speed_ms: None,
            precipitation_mm: None,
            precipitation_probability_pct: None,
            condition: None,
            confidence: BTreeMap::new(),
        }
    }

    pub fn value(&self, field: ForecastField) -> Option<f64> {
        match field {
            ForecastField::Temperature => self.temperature_c,
            ForecastField::Humidity => self.humidity_pct,
            ForecastField::Pressure => self.pressure_hpa,
            ForecastField::WindSpeed => self.wind_speed_ms,
            ForecastField::Precipitation => self.precipitation_mm,
            ForecastField::PrecipitationProbability => self.precipitation_probability_pct,
        }
    }

    pub fn confidence(&self, field: ForecastField) -> Option<f64> {
        self.confidence.get(&field).copied()
    }

    /// Set a field value together with its confidence (clipped to [0, 1])
    pub fn set(&mut self, field: ForecastField, value: f64, confidence: f64) {
        let slot = self.slot(field);
        *slot = Some(value);
        self.confidence.insert(field, confidence.clamp(0.0, 1.0));
    }

    pub fn clear(&mut self, field: ForecastField) {
        *self.slot(field) = None;
        self.confidence.remove(&field);
    }

    pub fn fields(&self) -> impl Iterator<Item = ForecastField> + '_ {
        ForecastField::ALL
            .into_iter()
            .filter(move |f| self.value(*f).is_some())
    }

    /// Mean confidence over the fields present
    pub fn mean_confidence(&self) -> Option<f64> {
        if self.confidence.is_empty() {
            return None;
        }
        Some(self.confidence.values().sum::<f64>() / self.confidence.len() as f64)
    }

    pub fn confidence_level(&self) -> Option<ConfidenceLevel> {
        self.mean_confidence().map(ConfidenceLevel::from_score)
    }

    fn slot(&mut self, field: ForecastField) -> &mut Option<f64> {
        match field {
            ForecastField::Temperature => &mut self.temperature_c,
            ForecastField::Humidity => &mut self.humidity_pct,
            ForecastField::Pressure => &mut self.pressure_hpa,
            ForecastField::WindSpeed => &mut self.wind_speed_ms,
            ForecastField::Precipitation => &mut self.precipitation_mm,
            ForecastField::PrecipitationProbability => &mut self.precipitation_probability_pct,
        }
    }
}

/// Anything that can hand out a horizon of forecast points
pub trait ForecastProducer {
    fn method(&self) -> ForecastMethod;

    /// The first `horizon` points, ordered by target time
    fn produce(&self, horizon: usize) -> Vec<ForecastPoint>;
}

/// One method's forecast for the configured horizon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodForecast {
    pub method: ForecastMethod,
    pub issued_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
    /// Measurement sources the forecast was derived from
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<StormAssessment>,
}

impl MethodForecast {
    /// Target time of the last point, if any
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.points.iter().map(|p| p.target).max()
    }

    /// Drop points whose target is at or before `now`
    pub fn remaining_after(&self, now: DateTime<Utc>) -> MethodForecast {
        MethodForecast {
            points: self.points.iter().filter(|p| p.target > now).cloned().collect(),
            ..self.clone()
        }
    }
}

impl ForecastProducer for MethodForecast {
    fn method(&self) -> ForecastMethod {
        self.method
    }

    fn produce(&self, horizon: usize) -> Vec<ForecastPoint> {
        let mut points = self.points.clone();
        points.sort_by_key(|p| p.target);
        points.truncate(horizon);
        points
    }
}

/// Normalized weight of one method in a blended field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodWeight {
    pub method: ForecastMethod,
    pub weight: f64,
}

/// How one field at one target time was blended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldBlend {
    pub target: DateTime<Utc>,
    pub field: ForecastField,
    pub weights: Vec<MethodWeight>,
    /// False when a single method passed through unchanged
    pub blended: bool,
    /// Max - min of the contributing values
    pub spread: f64,
}

impl FieldBlend {
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().map(|w| w.weight).sum()
    }
}

/// Combined forecast from all available methods
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleForecast {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub points: Vec<ForecastPoint>,
    /// Average normalized weight of each contributing method
    pub method_weights: BTreeMap<ForecastMethod, f64>,
    pub overall_confidence: f64,
    pub contributing_methods: Vec<ForecastMethod>,
    /// Blend inputs that produced nothing this cycle
    pub missing_methods: Vec<ForecastMethod>,
    pub sources: Vec<String>,
    pub field_blends: Vec<FieldBlend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<StormAssessment>,
}

impl EnsembleForecast {
    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.overall_confidence)
    }

    pub fn blend_for(&self, target: DateTime<Utc>, field: ForecastField) -> Option<&FieldBlend> {
        self.field_blends
            .iter()
            .find(|b| b.target == target && b.field == field)
    }

    /// Blended points viewed as an issued method forecast
    pub fn as_method_forecast(&self) -> MethodForecast {
        MethodForecast {
            method: ForecastMethod::Ensemble,
            issued_at: self.generated_at,
            points: self.points.clone(),
            sources: self.sources.clone(),
            assessment: self.assessment.clone(),
        }
    }
}

impl ForecastProducer for EnsembleForecast {
    fn method(&self) -> ForecastMethod {
        ForecastMethod::Ensemble
    }

    fn produce(&self, horizon: usize) -> Vec<ForecastPoint> {
        self.points.iter().take(horizon).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_confidence_levels() {
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::VeryLow);
        assert_eq!(ConfidenceLevel::from_score(0.3), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.69), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.7), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.95), ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn test_point_set_clips_confidence() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let mut point = ForecastPoint::new(ForecastMethod::Physical, now, now);
        point.set(ForecastField::Pressure, 1010.0, 1.7);
        point.set(ForecastField::Humidity, 70.0, -0.2);
        assert_eq!(point.confidence(ForecastField::Pressure), Some(1.0));
        assert_eq!(point.confidence(ForecastField::Humidity), Some(0.0));
        assert_eq!(point.fields().count(), 2);

        point.clear(ForecastField::Humidity);
        assert_eq!(point.humidity_pct, None);
        assert_eq!(point.confidence(ForecastField::Humidity), None);
    }

    #[test]
    fn test_method_forecast_produce_orders_and_truncates() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let points = [3, 1, 2]
            .iter()
            .map(|h| ForecastPoint::new(ForecastMethod::Physical, now + Duration::hours(*h), now))
            .collect();
        let forecast = MethodForecast {
            method: ForecastMethod::Physical,
            issued_at: now,
            points,
            sources: vec![],
            assessment: None,
        };
        let produced = forecast.produce(2);
        assert_eq!(produced.len(), 2);
        assert_eq!(produced[0].target, now + Duration::hours(1));
        assert_eq!(forecast.valid_until(), Some(now + Duration::hours(3)));
        assert_eq!(forecast.remaining_after(now + Duration::hours(2)).points.len(), 1);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("physics".parse::<ForecastMethod>(), Ok(ForecastMethod::Physical));
        assert_eq!("AI".parse::<ForecastMethod>(), Ok(ForecastMethod::ReasoningBased));
        assert!("statistical".parse::<ForecastMethod>().is_err());
    }
}
