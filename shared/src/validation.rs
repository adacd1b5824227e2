//! Validation and plausibility utilities
//!
//! Forecast values are clamped to physically plausible ranges before they
//! leave a generator; measurements outside these ranges are treated as
//! sensor faults.

use crate::models::{ForecastField, ForecastPoint, Measurement};

// ============================================================================
// Plausible Ranges
// ============================================================================

/// Inclusive plausible range for a field
pub fn plausible_range(field: ForecastField) -> (f64, f64) {
    match field {
        ForecastField::Temperature => (-40.0, 50.0),
        ForecastField::Humidity => (0.0, 100.0),
        ForecastField::Pressure => (870.0, 1085.0),
        ForecastField::WindSpeed => (0.0, 60.0),
        ForecastField::Precipitation => (0.0, 100.0),
        ForecastField::PrecipitationProbability => (0.0, 100.0),
    }
}

/// Clamp a value into the field's plausible range; non-finite values yield `None`
pub fn clamp_to_range(field: ForecastField, value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let (min, max) = plausible_range(field);
    Some(value.clamp(min, max))
}

/// Validate that a measured value is physically plausible
pub fn validate_field_value(field: ForecastField, value: f64) -> Result<(), &'static str> {
    if !value.is_finite() {
        return Err("Value must be a finite number");
    }
    let (min, max) = plausible_range(field);
    if value < min || value > max {
        return Err("Value outside plausible range");
    }
    Ok(())
}

// ============================================================================
// Record Validations
// ============================================================================

/// Validate a measurement before it enters the history
pub fn validate_measurement(measurement: &Measurement) -> Result<(), &'static str> {
    if measurement.source_id.trim().is_empty() {
        return Err("Measurement source id is required");
    }
    if !measurement.has_numeric_data() {
        return Err("Measurement carries no numeric data");
    }
    for field in ForecastField::ALL {
        if let Some(value) = measurement.value(field) {
            validate_field_value(field, value)?;
        }
    }
    if let Some(direction) = measurement.wind_direction_deg {
        if !(0.0..=360.0).contains(&direction) {
            return Err("Wind direction must be between 0 and 360 degrees");
        }
    }
    Ok(())
}

/// Validate a forecast point's values and confidences
pub fn validate_forecast_point(point: &ForecastPoint) -> Result<(), &'static str> {
    for field in ForecastField::ALL {
        match (point.value(field), point.confidence(field)) {
            (Some(value), Some(confidence)) => {
                validate_field_value(field, value)?;
                if !(0.0..=1.0).contains(&confidence) {
                    return Err("Confidence must be between 0 and 1");
                }
            }
            (None, None) => {}
            _ => return Err("Every forecast value needs exactly one confidence"),
        }
    }
    Ok(())
}

/// Validate that a set of weights is normalized
pub fn validate_weights(weights: &[f64]) -> Result<(), &'static str> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err("Weights must be non-negative numbers");
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err("Weights must sum to 1");
    }
    Ok(())
}
