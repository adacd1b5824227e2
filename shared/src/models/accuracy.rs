//! Forecast accuracy models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ForecastField, ForecastMethod};

/// Rolling accuracy of one method for one field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccuracyRecord {
    pub method: ForecastMethod,
    pub field: ForecastField,
    /// Mean absolute error over the trailing window
    pub mean_absolute_error: f64,
    pub sample_count: usize,
    /// Weighting score in [0, 1]; higher is better
    pub score: f64,
    pub last_updated: DateTime<Utc>,
}

/// Map a mean absolute error onto a [0, 1] score using the field's span
pub fn accuracy_score(mean_absolute_error: f64, field: ForecastField) -> f64 {
    if !mean_absolute_error.is_finite() {
        return 0.0;
    }
    (1.0 - mean_absolute_error / field.normalization_span()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_score_spans() {
        assert_eq!(accuracy_score(0.0, ForecastField::Temperature), 1.0);
        assert!((accuracy_score(2.5, ForecastField::Temperature) - 0.75).abs() < 1e-9);
        assert!((accuracy_score(5.0, ForecastField::Pressure) - 0.75).abs() < 1e-9);
        assert_eq!(accuracy_score(50.0, ForecastField::Temperature), 0.0);
        assert_eq!(accuracy_score(f64::NAN, ForecastField::Humidity), 0.0);
    }
}
