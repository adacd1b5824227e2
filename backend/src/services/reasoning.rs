//! Reasoning-based forecast generator
//!
//! Builds a bounded prompt from the recent history and active warnings, sends
//! it to the reasoning capability under a hard timeout and turns the free-text
//! answer into forecast points. At most one call is in flight; a cycle that
//! finds one running is skipped rather than queued.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{
    floor_to_hour, round_to_hour, validate_field_value, ForecastField,
    ForecastMethod, ForecastPoint, Location, Measurement, MethodForecast, SeverityWarning,
};

use crate::config::ReasoningConfig;
use crate::error::{AppError, AppResult};
use crate::services::response_parser::{parse_response, ParsedResponse};

/// Confidence assumed when the response gives none
const DEFAULT_CONFIDENCE: f64 = 0.5;

const SYSTEM_PROMPT: &str = "You are an expert meteorologist specialising in short-range \
forecasting and convective storm detection. Analyse the observations and respond with \
JSON only.";

/// Rendered prompt sent to the reasoning capability
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Size in characters
    pub fn len(&self) -> usize {
        self.system.chars().count() + self.user.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }
}

/// External reasoning service; returns the raw text answer to a prompt
#[async_trait]
pub trait ReasoningCapability: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> AppResult<String>;
}

/// Context serialized into the prompt
#[derive(Debug, Serialize)]
struct PromptContext<'a> {
    location: &'a Location,
    generated_at: DateTime<Utc>,
    forecast_anchor: DateTime<Utc>,
    horizon_hours: usize,
    data_quality: f64,
    latest: &'a Measurement,
    history: Vec<&'a Measurement>,
    warnings: Vec<&'a SeverityWarning>,
}

/// Releases the in-flight flag when dropped
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reasoning-based forecast generator
pub struct ReasoningForecastGenerator {
    capability: Arc<dyn ReasoningCapability>,
    config: ReasoningConfig,
    horizon: usize,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl ReasoningForecastGenerator {
    pub fn new(
        capability: Arc<dyn ReasoningCapability>,
        config: ReasoningConfig,
        horizon: usize,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_seconds);
        Self {
            capability,
            config,
            horizon,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> Option<InFlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlightGuard(Arc::clone(&self.in_flight)))
    }

    /// Run one reasoning analysis over `history` (oldest first)
    pub async fn generate(
        &self,
        location: &Location,
        history: &[Measurement],
        warnings: &[SeverityWarning],
        issued_at: DateTime<Utc>,
    ) -> AppResult<MethodForecast> {
        let _guard = self.try_acquire().ok_or(AppError::AnalysisInFlight)?;

        let usable: Vec<&Measurement> = history.iter().filter(|m| m.is_usable()).collect();
        let latest = usable
            .iter()
            .max_by_key(|m| m.timestamp)
            .copied()
            .ok_or_else(|| AppError::NoData("no usable measurement for reasoning".into()))?;
        let anchor = floor_to_hour(latest.timestamp);

        let prompt = self.build_prompt(location, &usable, warnings, issued_at)?;
        tracing::info!(
            prompt_chars = prompt.len(),
            history = usable.len(),
            warnings = warnings.len(),
            "Requesting reasoning-based forecast"
        );

        let raw = match tokio::time::timeout(self.timeout, self.capability.complete(&prompt)).await
        {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Reasoning call timed out");
                return Err(AppError::ReasoningTimeout(self.timeout.as_secs()));
            }
        };

        let (parsed, strategy) = parse_response(&raw)?;
        tracing::debug!(strategy, points = parsed.points.len(), "Reasoning response parsed");

        let mut sources: BTreeSet<String> =
            usable.iter().map(|m| m.source_id.clone()).collect();
        sources.insert("reasoning".to_string());

        let points = self.to_points(&parsed, anchor, issued_at);
        if points.is_empty() {
            return Err(AppError::ParseFailure(format!(
                "{strategy} response contained no usable forecast points"
            )));
        }

        let assessment = parsed.assessment.map(|mut a| {
            a.confidence = clip_confidence(Some(a.confidence));
            a
        });

        Ok(MethodForecast {
            method: ForecastMethod::ReasoningBased,
            issued_at,
            points,
            sources: sources.into_iter().collect(),
            assessment,
        })
    }

    /// Render the prompt, shrinking the history until it fits the size ceiling
    pub fn build_prompt(
        &self,
        location: &Location,
        history: &[&Measurement],
        warnings: &[SeverityWarning],
        generated_at: DateTime<Utc>,
    ) -> AppResult<Prompt> {
        let mut ordered: Vec<&Measurement> = history.to_vec();
        ordered.sort_by_key(|m| m.timestamp);
        let latest = *ordered
            .last()
            .ok_or_else(|| AppError::NoData("no measurements for prompt".into()))?;

        let mut keep = self.config.max_history_points.max(1).min(ordered.len());
        let mut warnings: Vec<&SeverityWarning> =
            warnings.iter().take(self.config.max_warnings).collect();
        let offered_warnings = warnings.len();

        loop {
            let window = &ordered[ordered.len() - keep..];
            let context = PromptContext {
                location,
                generated_at,
                forecast_anchor: floor_to_hour(latest.timestamp),
                horizon_hours: self.horizon,
                data_quality: window.iter().map(|m| m.quality_score()).sum::<f64>()
                    / window.len() as f64,
                latest,
                history: window.to_vec(),
                warnings: warnings.clone(),
            };
            let prompt = render_prompt(&context, self.horizon)?;
            let size = prompt.len();

            if size <= self.config.max_prompt_chars {
                if keep < ordered.len() {
                    let dropped = ordered.len() - keep;
                    tracing::debug!(kept = keep, dropped, "Prompt history truncated");
                }
                if warnings.len() < offered_warnings {
                    tracing::debug!(
                        kept = warnings.len(),
                        dropped = offered_warnings - warnings.len(),
                        "Prompt warnings truncated"
                    );
                }
                return Ok(prompt);
            }
            if keep > 1 {
                keep = (keep / 2).max(1);
            } else if !warnings.is_empty() {
                warnings.truncate(warnings.len() / 2);
            } else {
                return Err(AppError::PromptTooLarge {
                    size,
                    limit: self.config.max_prompt_chars,
                });
            }
        }
    }

    fn to_points(
        &self,
        parsed: &ParsedResponse,
        anchor: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    ) -> Vec<ForecastPoint> {
        let last_target = anchor + chrono::Duration::hours(self.horizon as i64);
        let mut points: Vec<ForecastPoint> = Vec::new();

        for (index, raw) in parsed.points.iter().enumerate() {
            let target = match (raw.timestamp, raw.hour) {
                (Some(ts), _) => Some(round_to_hour(ts)),
                (None, Some(hour)) => self.hour_target(anchor, hour),
                (None, None) => self.hour_target(anchor, index as i64 + 1),
            };
            let Some(target) = target.filter(|t| *t > anchor && *t <= last_target) else {
                tracing::debug!(hour = ?raw.hour, "Dropping reasoning point outside the horizon");
                continue;
            };
            if points.iter().any(|p| p.target == target) {
                continue;
            }

            let mut point = ForecastPoint::new(ForecastMethod::ReasoningBased, target, issued_at);
            for (field, value) in &raw.values {
                if validate_field_value(*field, *value).is_err() {
                    tracing::debug!(%field, value, "Dropping implausible reasoning value");
                    continue;
                }
                let confidence = raw
                    .field_confidence
                    .get(field)
                    .copied()
                    .or(raw.confidence)
                    .or(parsed.confidence);
                point.set(*field, *value, clip_confidence(confidence));
            }
            if point.fields().next().is_none() {
                continue;
            }
            point.condition = raw.condition.clone();
            points.push(point);
        }

        points.sort_by_key(|p| p.target);
        points
    }

    /// Target `hours` after the anchor; `None` outside 1..=horizon
    fn hour_target(&self, anchor: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
        if !(1..=self.horizon as i64).contains(&hours) {
            return None;
        }
        anchor.checked_add_signed(chrono::Duration::try_hours(hours)?)
    }
}

/// Clip to [0, 1]; missing or non-finite values fall back to the default
fn clip_confidence(confidence: Option<f64>) -> f64 {
    confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE)
}

fn render_prompt(context: &PromptContext<'_>, horizon: usize) -> AppResult<Prompt> {
    let context_json = serde_json::to_string_pretty(context)
        .map_err(|e| AppError::Internal(format!("Failed to serialize prompt context: {}", e)))?;

    let fields = ForecastField::ALL
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let user = format!(
        "Weather observations and active warnings:\n{context_json}\n\n\
         Forecast the next {horizon} hours, one entry per hour after forecast_anchor \
         (hour 1 = anchor + 1h), and assess the storm risk.\n\
         Respond with a single JSON object:\n\
         {{\"hourly_forecast\": [{{\"hour\": 1, {fields_example}, \"condition\": \"...\", \
         \"confidence\": 0.0}}], \"storm_detected\": false, \"confidence_score\": 0.0, \
         \"alert_level\": \"LOW|MEDIUM|HIGH|CRITICAL\", \"predicted_arrival\": null, \
         \"predicted_intensity\": null, \"analysis_summary\": \"...\", \
         \"recommendations\": []}}\n\
         Units: temperature °C, humidity %, pressure hPa, wind_speed m/s, precipitation mm, \
         precipitation_probability %. Fields: {fields}. Confidence values are 0-1.",
        fields_example = ForecastField::ALL
            .iter()
            .map(|f| format!("\"{}\": 0", f.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
    );

    Ok(Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    })
}
