//! Official severity warning models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Warning severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Unknown,
    Minor,
    Moderate,
    Severe,
    Extreme,
}

impl Severity {
    /// Informational severities never trigger an analysis
    pub fn is_actionable(&self) -> bool {
        matches!(self, Severity::Moderate | Severity::Severe | Severity::Extreme)
    }

    /// Traffic-light colour used by national warning services
    pub fn color(&self) -> &'static str {
        match self {
            Severity::Unknown | Severity::Minor => "green",
            Severity::Moderate => "yellow",
            Severity::Severe => "orange",
            Severity::Extreme => "red",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Unknown => "unknown",
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
            Severity::Extreme => "extreme",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    /// Accepts CAP severity names and the colour scale
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(Severity::Unknown),
            "minor" | "green" => Ok(Severity::Minor),
            "moderate" | "yellow" => Ok(Severity::Moderate),
            "severe" | "orange" => Ok(Severity::Severe),
            "extreme" | "red" => Ok(Severity::Extreme),
            _ => Err(ModelError::UnknownSeverity(s.to_string())),
        }
    }
}

/// Externally issued warning for the monitored location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityWarning {
    pub id: String,
    pub event: String,
    pub severity: Severity,
    pub window_start: DateTime<Utc>,
    pub window_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SeverityWarning {
    /// Whether the warning window overlaps `[now, now + lookahead]`
    pub fn is_within(&self, now: DateTime<Utc>, lookahead: Duration) -> bool {
        let not_ended = self.window_end.map(|end| end > now).unwrap_or(true);
        not_ended && self.window_start <= now + lookahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn warning(start_offset_h: i64, end_offset_h: Option<i64>) -> SeverityWarning {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        SeverityWarning {
            id: "w-1".to_string(),
            event: "Thunderstorms".to_string(),
            severity: Severity::Severe,
            window_start: now + Duration::hours(start_offset_h),
            window_end: end_offset_h.map(|h| now + Duration::hours(h)),
            description: None,
        }
    }

    #[test]
    fn test_severity_ordering_and_actionability() {
        assert!(Severity::Extreme > Severity::Severe);
        assert!(Severity::Moderate > Severity::Minor);
        assert!(!Severity::Minor.is_actionable());
        assert!(!Severity::Unknown.is_actionable());
        assert!(Severity::Moderate.is_actionable());
    }

    #[test]
    fn test_severity_parsing() {
        assert_eq!("Orange".parse::<Severity>(), Ok(Severity::Severe));
        assert_eq!("extreme".parse::<Severity>(), Ok(Severity::Extreme));
        assert!("purple".parse::<Severity>().is_err());
    }

    #[test]
    fn test_warning_window() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let day = Duration::hours(24);
        assert!(warning(3, Some(6)).is_within(now, day));
        assert!(warning(-2, Some(2)).is_within(now, day));
        assert!(warning(10, None).is_within(now, day));
        assert!(!warning(30, Some(36)).is_within(now, day));
        assert!(!warning(-6, Some(-1)).is_within(now, day));
    }
}
