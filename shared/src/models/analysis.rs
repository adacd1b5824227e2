//! Storm assessment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Alert level attached to a storm assessment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    /// Levels that warrant an outbound storm alert
    pub fn is_alerting(&self) -> bool {
        matches!(self, AlertLevel::High | AlertLevel::Critical)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Low => "LOW",
            AlertLevel::Medium => "MEDIUM",
            AlertLevel::High => "HIGH",
            AlertLevel::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for AlertLevel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(AlertLevel::Low),
            "MEDIUM" | "MODERATE" => Ok(AlertLevel::Medium),
            "HIGH" => Ok(AlertLevel::High),
            "CRITICAL" | "EXTREME" => Ok(AlertLevel::Critical),
            _ => Err(ModelError::UnknownAlertLevel(s.to_string())),
        }
    }
}

/// Qualitative storm judgement returned with a reasoning-based forecast
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StormAssessment {
    pub storm_detected: bool,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub alert_level: AlertLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_arrival: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_intensity: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Default for StormAssessment {
    fn default() -> Self {
        Self {
            storm_detected: false,
            confidence: 0.0,
            alert_level: AlertLevel::Low,
            predicted_arrival: None,
            predicted_intensity: None,
            summary: String::new(),
            recommendations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_parsing() {
        assert_eq!("high".parse::<AlertLevel>(), Ok(AlertLevel::High));
        assert_eq!("Critical".parse::<AlertLevel>(), Ok(AlertLevel::Critical));
        assert!("severe-ish".parse::<AlertLevel>().is_err());
        assert!(AlertLevel::High.is_alerting());
        assert!(!AlertLevel::Medium.is_alerting());
    }

    #[test]
    fn test_assessment_wire_format() {
        let json = r#"{"storm_detected":true,"confidence":0.8,"alert_level":"HIGH","summary":"cells approaching"}"#;
        let parsed: StormAssessment = serde_json::from_str(json).unwrap();
        assert!(parsed.storm_detected);
        assert_eq!(parsed.alert_level, AlertLevel::High);
        assert!(parsed.recommendations.is_empty());
    }
}
