//! Outbound notifications and storm alert gating

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use shared::{AlertLevel, EnsembleForecast, Location, StormAssessment, TriggerDecision};

use crate::config::AlertConfig;
use crate::error::AppResult;

/// Events the engine publishes to the outside world
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A fresh ensemble forecast
    Forecast(Box<EnsembleForecast>),
    /// The trigger fired and analysis started
    TriggerFired(TriggerDecision),
    /// A confident, high-level storm assessment
    StormAlert {
        location: Location,
        assessment: StormAssessment,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Forecast(_) => "forecast",
            Notification::TriggerFired(_) => "trigger_fired",
            Notification::StormAlert { .. } => "storm_alert",
        }
    }
}

/// Delivery seam
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> AppResult<()>;
}

/// Notifier that writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> AppResult<()> {
        match notification {
            Notification::Forecast(forecast) => tracing::info!(
                forecast_id = %forecast.id,
                points = forecast.points.len(),
                confidence = forecast.overall_confidence,
                "Ensemble forecast published"
            ),
            Notification::TriggerFired(decision) => tracing::info!(
                decision_id = %decision.id,
                reason = ?decision.reason(),
                "Trigger fired"
            ),
            Notification::StormAlert {
                location,
                assessment,
            } => tracing::warn!(
                location = %location.name,
                alert_level = %assessment.alert_level,
                confidence = assessment.confidence,
                "Storm alert: {}",
                assessment.summary
            ),
        }
        Ok(())
    }
}

/// Decides whether a storm assessment is strong enough to alert on
///
/// Alerts need a detected storm, confidence at or above the threshold, a
/// HIGH or CRITICAL level, and enough time since the previous alert.
#[derive(Debug)]
pub struct AlertPolicy {
    config: AlertConfig,
    last_alert_at: Mutex<Option<DateTime<Utc>>>,
}

impl AlertPolicy {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            last_alert_at: Mutex::new(None),
        }
    }

    pub fn should_alert(&self, assessment: &StormAssessment, now: DateTime<Utc>) -> bool {
        if !self.qualifies(assessment) {
            return false;
        }
        match self.last_alert_at() {
            Some(last) => now - last >= Duration::minutes(self.config.min_interval_minutes),
            None => true,
        }
    }

    /// Same as [`AlertPolicy::should_alert`], recording the alert time on success
    pub fn check_and_record(&self, assessment: &StormAssessment, now: DateTime<Utc>) -> bool {
        if !self.qualifies(assessment) {
            return false;
        }
        let mut last = self
            .last_alert_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last {
            if now - previous < Duration::minutes(self.config.min_interval_minutes) {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    pub fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_alert_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn qualifies(&self, assessment: &StormAssessment) -> bool {
        assessment.storm_detected
            && assessment.confidence >= self.config.storm_confidence_threshold
            && matches!(assessment.alert_level, AlertLevel::High | AlertLevel::Critical)
    }
}
