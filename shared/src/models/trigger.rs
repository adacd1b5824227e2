//! Trigger decision and analysis cache models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an expensive analysis was started
///
/// Variants are listed in evaluation order; the first matching reason wins.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    PrecipitationProbability,
    HeavyPrecipitation,
    StormSignature,
    Gale,
    StormKeyword,
    SeverityWarning,
    ForcedCheck,
}

impl TriggerReason {
    pub fn rule_number(&self) -> u8 {
        match self {
            TriggerReason::PrecipitationProbability => 1,
            TriggerReason::HeavyPrecipitation => 2,
            TriggerReason::StormSignature => 3,
            TriggerReason::Gale => 4,
            TriggerReason::StormKeyword => 5,
            TriggerReason::SeverityWarning => 6,
            TriggerReason::ForcedCheck => 7,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            TriggerReason::PrecipitationProbability => "high precipitation probability",
            TriggerReason::HeavyPrecipitation => "heavy precipitation",
            TriggerReason::StormSignature => "humid low-pressure storm signature",
            TriggerReason::Gale => "gale-force wind",
            TriggerReason::StormKeyword => "storm keyword in reported condition",
            TriggerReason::SeverityWarning => "active severity warning",
            TriggerReason::ForcedCheck => "maximum idle period exceeded",
        }
    }
}

/// Why an evaluation did not start an analysis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// No usable measurement was available
    NoData,
    /// No firing condition matched
    NoCondition,
    /// An unexpired cache entry already covers the situation
    CacheHit,
    /// The same situation has been observed continuously since it was analysed
    SustainedCondition,
}

/// Result of one trigger evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Fire {
        reason: TriggerReason,
    },
    Suppressed {
        reason: SuppressionReason,
        /// Condition that matched but was covered, if any
        matched: Option<TriggerReason>,
    },
}

/// Auditable record of a trigger evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerDecision {
    pub id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub measured_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub outcome: TriggerOutcome,
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warning_ids: Vec<String>,
}

impl TriggerDecision {
    pub fn fired(&self) -> bool {
        matches!(self.outcome, TriggerOutcome::Fire { .. })
    }

    pub fn reason(&self) -> Option<TriggerReason> {
        match &self.outcome {
            TriggerOutcome::Fire { reason } => Some(*reason),
            TriggerOutcome::Suppressed { .. } => None,
        }
    }

    pub fn suppression(&self) -> Option<SuppressionReason> {
        match &self.outcome {
            TriggerOutcome::Fire { .. } => None,
            TriggerOutcome::Suppressed { reason, .. } => Some(*reason),
        }
    }
}

/// Cache namespace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Warning,
    Condition,
}

/// Record that a situation was already analysed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub kind: CacheKind,
    pub key: String,
    pub first_seen: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Entries are invisible from their expiry instant onward
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
