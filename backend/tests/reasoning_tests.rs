//! Reasoning-based forecast tests
//!
//! Unit tests for:
//! - Ordered response parser strategies
//! - Point construction (hour alignment, confidence clipping, plausibility)
//! - Hard timeout and the single in-flight guard
//! - Prompt truncation and the size ceiling

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use shared::{
    AlertLevel, ForecastField, ForecastMethod, Location, Measurement, Severity, SeverityWarning,
};
use stormcast_backend::config::ReasoningConfig;
use stormcast_backend::error::{AppError, AppResult, FailureKind};
use stormcast_backend::services::response_parser::parse_response;
use stormcast_backend::services::{Prompt, ReasoningCapability, ReasoningForecastGenerator};
use tokio::sync::Notify;

// ============================================================================
// Test Helpers
// ============================================================================

fn latest() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 40, 0).unwrap()
}

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

fn history(count: i64) -> Vec<Measurement> {
    (0..count)
        .map(|i| {
            Measurement::new("station", latest() - ChronoDuration::minutes(10 * (count - 1 - i)))
                .with(ForecastField::Temperature, 22.0)
                .with(ForecastField::Humidity, 70.0)
                .with(ForecastField::Pressure, 1009.0)
                .with(ForecastField::PrecipitationProbability, 60.0)
        })
        .collect()
}

const SIX_HOURS: &str = r#"{
    "hourly_forecast": [
        {"hour": 1, "temperature": 21.5, "pressure": 1008, "precipitation_probability": 70, "confidence": 1.4},
        {"hour": 2, "temperature": 21.0, "pressure": 1007, "precipitation_probability": 80, "confidence": 0.7},
        {"hour": 3, "temperature": 999, "pressure": 1006, "precipitation_probability": 85},
        {"hour": 4, "temperature": 20.0, "pressure": 1006, "precipitation_probability": 90},
        {"hour": 5, "temperature": 19.5, "pressure": 1007, "precipitation_probability": 75},
        {"hour": 6, "temperature": 19.0, "pressure": 1008, "precipitation_probability": 60},
        {"hour": 7, "temperature": 18.5, "pressure": 1009, "precipitation_probability": 50}
    ],
    "storm_detected": true,
    "confidence_score": 0.8,
    "alert_level": "HIGH",
    "analysis_summary": "Convective cells approaching from the west"
}"#;

/// Capability answering every prompt with the same text
struct Scripted(String);

#[async_trait]
impl ReasoningCapability for Scripted {
    async fn complete(&self, _prompt: &Prompt) -> AppResult<String> {
        Ok(self.0.clone())
    }
}

/// Capability that never answers in time
struct Stalled;

#[async_trait]
impl ReasoningCapability for Stalled {
    async fn complete(&self, _prompt: &Prompt) -> AppResult<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(String::new())
    }
}

/// Capability that holds the call open until released
struct Gated {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl ReasoningCapability for Gated {
    async fn complete(&self, _prompt: &Prompt) -> AppResult<String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(SIX_HOURS.to_string())
    }
}

fn generator(capability: impl ReasoningCapability + 'static) -> ReasoningForecastGenerator {
    ReasoningForecastGenerator::new(Arc::new(capability), ReasoningConfig::default(), 6)
}

// ============================================================================
// Parser Strategy Tests
// ============================================================================

mod parser_tests {
    use super::*;

    #[test]
    fn test_direct_json() {
        let (parsed, strategy) = parse_response(SIX_HOURS).unwrap();
        assert_eq!(strategy, "direct_json");
        assert_eq!(parsed.points.len(), 7);
        assert_eq!(parsed.confidence, Some(0.8));
        let assessment = parsed.assessment.unwrap();
        assert!(assessment.storm_detected);
        assert_eq!(assessment.alert_level, AlertLevel::High);
    }

    #[test]
    fn test_fenced_block() {
        let text = format!("Here is my analysis.\n```json\n{SIX_HOURS}\n```\nStay safe.");
        let (parsed, strategy) = parse_response(&text).unwrap();
        assert_eq!(strategy, "fenced_block");
        assert_eq!(parsed.points.len(), 7);
    }

    #[test]
    fn test_brace_span() {
        let text = format!("My forecast: {SIX_HOURS} -- end of forecast");
        let (parsed, strategy) = parse_response(&text).unwrap();
        assert_eq!(strategy, "brace_span");
        assert!(parsed.assessment.is_some());
    }

    #[test]
    fn test_key_value_lines() {
        let text = "Forecast follows\n\
                    +1h temperature=21.0 pressure=1008 precipitation_probability=70%\n\
                    +2h temperature=20.0 pressure=1007 precipitation_probability=80%\n\
                    confidence: 0.6\n\
                    storm_detected: yes\n\
                    alert_level: HIGH";
        let (parsed, strategy) = parse_response(text).unwrap();
        assert_eq!(strategy, "key_value_lines");
        assert_eq!(parsed.points.len(), 2);
        assert_eq!(parsed.points[1].hour, Some(2));
        assert_eq!(
            parsed.points[1].values.get(&ForecastField::PrecipitationProbability),
            Some(&80.0)
        );
        assert_eq!(parsed.confidence, Some(0.6));
        let assessment = parsed.assessment.unwrap();
        assert!(assessment.storm_detected);
        assert_eq!(assessment.alert_level, AlertLevel::High);
    }

    #[test]
    fn test_unparseable_is_parse_failure() {
        for text in ["", "   ", "I cannot help with that.", "{ not json"] {
            let err = parse_response(text).unwrap_err();
            assert_eq!(err.kind(), FailureKind::ParseFailure, "{text:?}");
        }
    }
}

// ============================================================================
// Generator Tests
// ============================================================================

mod generator_tests {
    use super::*;

    #[tokio::test]
    async fn test_points_are_aligned_and_clipped() {
        let forecast = generator(Scripted(SIX_HOURS.to_string()))
            .generate(&Location::default(), &history(6), &[], latest())
            .await
            .unwrap();

        assert_eq!(forecast.method, ForecastMethod::ReasoningBased);
        assert_eq!(forecast.points.len(), 6, "hour 7 is past the horizon");
        for (i, point) in forecast.points.iter().enumerate() {
            assert_eq!(point.target, anchor() + ChronoDuration::hours(i as i64 + 1));
            for field in point.fields() {
                let c = point.confidence(field).unwrap();
                assert!((0.0..=1.0).contains(&c));
            }
        }

        assert_eq!(forecast.points[0].confidence(ForecastField::Temperature), Some(1.0));
        assert_eq!(forecast.points[1].confidence(ForecastField::Temperature), Some(0.7));
        // Falls back to the response-level confidence
        assert_eq!(forecast.points[3].confidence(ForecastField::Pressure), Some(0.8));

        // Implausible temperature dropped, other fields kept
        assert_eq!(forecast.points[2].temperature_c, None);
        assert_eq!(forecast.points[2].pressure_hpa, Some(1006.0));

        assert!(forecast.sources.contains(&"reasoning".to_string()));
        assert!(forecast.assessment.unwrap().storm_detected);
    }

    #[tokio::test]
    async fn test_unusable_answer_is_parse_failure() {
        let result = generator(Scripted("The weather will be nice.".into()))
            .generate(&Location::default(), &history(3), &[], latest())
            .await;
        assert!(matches!(result, Err(AppError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn test_hours_outside_horizon_are_dropped() {
        let answer = r#"{"hourly_forecast": [
            {"hour": 1e17, "temperature": 20.0},
            {"hour": -3, "temperature": 20.5},
            {"hour": 0, "temperature": 21.0},
            {"hour": 2, "temperature": 21.5},
            {"hour": -9.2e18, "temperature": 22.0}
        ]}"#;
        let forecast = generator(Scripted(answer.to_string()))
            .generate(&Location::default(), &history(3), &[], latest())
            .await
            .unwrap();
        assert_eq!(forecast.points.len(), 1);
        assert_eq!(forecast.points[0].target, anchor() + ChronoDuration::hours(2));
        assert_eq!(forecast.points[0].temperature_c, Some(21.5));
    }

    #[tokio::test]
    async fn test_only_out_of_range_hours_is_parse_failure() {
        let answer = r#"{"hourly_forecast": [{"hour": 1e17, "temperature": 20.0}]}"#;
        let handle = tokio::spawn(async move {
            generator(Scripted(answer.to_string()))
                .generate(&Location::default(), &history(3), &[], latest())
                .await
        });
        let result = handle.await.expect("generation must not panic");
        assert!(matches!(result, Err(AppError::ParseFailure(_))));
    }

    #[tokio::test]
    async fn test_no_history_is_no_data() {
        let result = generator(Scripted(SIX_HOURS.to_string()))
            .generate(&Location::default(), &[], &[], latest())
            .await;
        assert!(matches!(result, Err(AppError::NoData(_))));
    }

    #[tokio::test]
    async fn test_hard_timeout() {
        let generator = generator(Stalled).with_timeout(Duration::from_millis(50));
        let started = std::time::Instant::now();
        let result = generator
            .generate(&Location::default(), &history(3), &[], latest())
            .await;

        assert!(matches!(result, Err(AppError::ReasoningTimeout(_))));
        assert_eq!(result.unwrap_err().kind(), FailureKind::ExternalCallFailure);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!generator.is_in_flight(), "guard released after timeout");
    }

    #[tokio::test]
    async fn test_second_call_is_skipped_while_in_flight() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let generator = Arc::new(generator(Gated {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }));

        let first = {
            let generator = Arc::clone(&generator);
            tokio::spawn(async move {
                generator
                    .generate(&Location::default(), &history(3), &[], latest())
                    .await
            })
        };
        entered.notified().await;
        assert!(generator.is_in_flight());

        let second = generator
            .generate(&Location::default(), &history(3), &[], latest())
            .await;
        assert!(matches!(second, Err(AppError::AnalysisInFlight)));

        release.notify_one();
        let first = first.await.unwrap();
        assert!(first.is_ok());
        assert!(!generator.is_in_flight());
    }
}

// ============================================================================
// Prompt Tests
// ============================================================================

mod prompt_tests {
    use super::*;

    #[test]
    fn test_history_truncated_to_fit() {
        let readings = history(24);
        let refs: Vec<&Measurement> = readings.iter().collect();

        let full = generator(Scripted(String::new()))
            .build_prompt(&Location::default(), &refs, &[], latest())
            .unwrap();

        let limit = full.len() - 1;
        let config = ReasoningConfig {
            max_prompt_chars: limit,
            ..ReasoningConfig::default()
        };
        let bounded = ReasoningForecastGenerator::new(Arc::new(Scripted(String::new())), config, 6);
        let prompt = bounded
            .build_prompt(&Location::default(), &refs, &[], latest())
            .unwrap();

        assert!(prompt.len() <= limit);
        assert!(prompt.len() < full.len());
        assert!(prompt.user.contains("forecast_anchor"));
    }

    #[test]
    fn test_history_capped_by_point_count() {
        let readings = history(30);
        let refs: Vec<&Measurement> = readings.iter().collect();
        let config = ReasoningConfig {
            max_history_points: 4,
            ..ReasoningConfig::default()
        };
        let capped = ReasoningForecastGenerator::new(Arc::new(Scripted(String::new())), config, 6)
            .build_prompt(&Location::default(), &refs, &[], latest())
            .unwrap();
        let uncapped = generator(Scripted(String::new()))
            .build_prompt(&Location::default(), &refs, &[], latest())
            .unwrap();
        assert!(capped.len() < uncapped.len());
    }

    #[test]
    fn test_warnings_dropped_before_giving_up() {
        let readings = history(1);
        let refs: Vec<&Measurement> = readings.iter().collect();
        let warnings: Vec<SeverityWarning> = (0..3)
            .map(|i| SeverityWarning {
                id: format!("bulky-{i}"),
                event: "Severe thunderstorms".to_string(),
                severity: Severity::Severe,
                window_start: latest(),
                window_end: None,
                description: Some("x".repeat(4_000)),
            })
            .collect();

        let bare = generator(Scripted(String::new()))
            .build_prompt(&Location::default(), &refs, &[], latest())
            .unwrap();
        let config = ReasoningConfig {
            max_prompt_chars: bare.len(),
            ..ReasoningConfig::default()
        };
        let prompt = ReasoningForecastGenerator::new(Arc::new(Scripted(String::new())), config, 6)
            .build_prompt(&Location::default(), &refs, &warnings, latest())
            .unwrap();

        assert!(prompt.len() <= bare.len());
        assert!(!prompt.user.contains("bulky-"));
    }

    #[test]
    fn test_prompt_too_large() {
        let readings = history(3);
        let refs: Vec<&Measurement> = readings.iter().collect();
        let config = ReasoningConfig {
            max_prompt_chars: 100,
            ..ReasoningConfig::default()
        };
        let result = ReasoningForecastGenerator::new(Arc::new(Scripted(String::new())), config, 6)
            .build_prompt(&Location::default(), &refs, &[], latest());

        match result {
            Err(AppError::PromptTooLarge { size, limit }) => {
                assert_eq!(limit, 100);
                assert!(size > 100);
            }
            other => panic!("expected PromptTooLarge, got {other:?}"),
        }
    }
}
