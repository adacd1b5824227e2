//! Measurement models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Numeric weather quantity carried by measurements and forecasts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ForecastField {
    Temperature,
    Humidity,
    Pressure,
    WindSpeed,
    Precipitation,
    PrecipitationProbability,
}

impl ForecastField {
    pub const ALL: [ForecastField; 6] = [
        ForecastField::Temperature,
        ForecastField::Humidity,
        ForecastField::Pressure,
        ForecastField::WindSpeed,
        ForecastField::Precipitation,
        ForecastField::PrecipitationProbability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastField::Temperature => "temperature",
            ForecastField::Humidity => "humidity",
            ForecastField::Pressure => "pressure",
            ForecastField::WindSpeed => "wind_speed",
            ForecastField::Precipitation => "precipitation",
            ForecastField::PrecipitationProbability => "precipitation_probability",
        }
    }

    /// Span used to turn a mean absolute error into a 0..1 accuracy score
    pub fn normalization_span(&self) -> f64 {
        match self {
            ForecastField::Temperature => 10.0,
            ForecastField::Humidity => 25.0,
            ForecastField::Pressure => 20.0,
            ForecastField::WindSpeed => 8.0,
            ForecastField::Precipitation => 5.0,
            ForecastField::PrecipitationProbability => 40.0,
        }
    }
}

impl fmt::Display for ForecastField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForecastField {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "temperature" | "temp" | "temperature_c" => Ok(ForecastField::Temperature),
            "humidity" | "humidity_pct" => Ok(ForecastField::Humidity),
            "pressure" | "pressure_hpa" => Ok(ForecastField::Pressure),
            "wind_speed" | "wind" | "wind_speed_ms" => Ok(ForecastField::WindSpeed),
            "precipitation" | "precip" | "precipitation_mm" | "rain" => {
                Ok(ForecastField::Precipitation)
            }
            "precipitation_probability" | "precip_prob" | "pop"
            | "precipitation_probability_pct" => Ok(ForecastField::PrecipitationProbability),
            _ => Err(ModelError::UnknownField(s.to_string())),
        }
    }
}

/// A single timestamped observation from one source
///
/// Every numeric field is optional; a missing field means "no data" and is
/// never substituted with a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    /// Precipitation amount over the source's sampling interval
    pub precipitation_mm: Option<f64>,
    pub precipitation_probability_pct: Option<f64>,
    pub condition: Option<String>,
}

impl Measurement {
    /// Create an empty measurement; fields are filled with the `with_*` builders
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            temperature_c: None,
            humidity_pct: None,
            pressure_hpa: None,
            wind_speed_ms: None,
            wind_direction_deg: None,
            precipitation_mm: None,
            precipitation_probability_pct: None,
            condition: None,
        }
    }

    pub fn with(mut self, field: ForecastField, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
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

    pub fn set(&mut self, field: ForecastField, value: Option<f64>) {
        let slot = match field {
            ForecastField::Temperature => &mut self.temperature_c,
            ForecastField::Humidity => &mut self.humidity_pct,
            ForecastField::Pressure => &mut self.pressure_hpa,
            ForecastField::WindSpeed => &mut self.wind_speed_ms,
            ForecastField::Precipitation => &mut self.precipitation_mm,
            ForecastField::PrecipitationProbability => &mut self.precipitation_probability_pct,
        };
        *slot = value;
    }

    /// True when at least one numeric field is present
    pub fn has_numeric_data(&self) -> bool {
        ForecastField::ALL.iter().any(|f| self.value(*f).is_some())
            || self.wind_direction_deg.is_some()
    }

    /// True when every present numeric value is finite
    pub fn is_well_formed(&self) -> bool {
        ForecastField::ALL
            .iter()
            .filter_map(|f| self.value(*f))
            .chain(self.wind_direction_deg)
            .all(f64::is_finite)
    }

    /// Usable for trigger evaluation and forecasting
    pub fn is_usable(&self) -> bool {
        self.has_numeric_data() && self.is_well_formed()
    }

    /// Fraction of the core fields that are present (0.0 - 1.0)
    pub fn quality_score(&self) -> f64 {
        let present = ForecastField::ALL
            .iter()
            .filter(|f| self.value(**f).map(f64::is_finite).unwrap_or(false))
            .count();
        present as f64 / ForecastField::ALL.len() as f64
    }
}

/// Average data quality of a batch of measurements
pub fn batch_quality_score(measurements: &[Measurement]) -> f64 {
    if measurements.is_empty() {
        return 0.0;
    }
    measurements.iter().map(Measurement::quality_score).sum::<f64>() / measurements.len() as f64
}
