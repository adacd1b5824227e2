//! HTTP API tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`:
//! - Health reporting
//! - Forecast reads before and after a cycle
//! - Trigger decision log limits
//! - Accuracy records

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use shared::{ForecastField, Measurement};
use stormcast_backend::config::Config;
use stormcast_backend::services::ForecastEngine;
use stormcast_backend::{create_app, AppState};
use tower::ServiceExt;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()
}

fn reading(at: DateTime<Utc>, probability: f64) -> Measurement {
    Measurement::new("station", at)
        .with(ForecastField::Temperature, 22.0)
        .with(ForecastField::Humidity, 60.0)
        .with(ForecastField::Pressure, 1014.0)
        .with(ForecastField::WindSpeed, 4.0)
        .with(ForecastField::PrecipitationProbability, probability)
}

fn setup() -> (Router, Arc<ForecastEngine>) {
    let config = Arc::new(Config::default());
    let engine = Arc::new(ForecastEngine::new(Arc::clone(&config)));
    let app = create_app(AppState::new(Arc::clone(&engine), config));
    (app, engine)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn run_cycles(engine: &ForecastEngine, count: i64) {
    for step in 0..count {
        let at = t0() + Duration::minutes(step * 10);
        engine.ingest(vec![reading(at, 40.0)]).await.unwrap();
        engine.forecast_cycle(at).await.unwrap();
    }
}

// ============================================================================
// Endpoint Tests
// ============================================================================

mod endpoint_tests {
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (app, _) = setup();
        let (status, body) = get(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["reasoning_enabled"], false);
        assert!(body["last_forecast_at"].is_null());

        let (status, _) = get(app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ensemble_not_found_before_first_cycle() {
        let (app, _) = setup();
        let (status, body) = get(app, "/api/v1/forecast/ensemble").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_ensemble_after_cycle() {
        let (app, engine) = setup();
        run_cycles(&engine, 1).await;

        let (status, body) = get(app.clone(), "/api/v1/forecast/ensemble").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"].as_array().unwrap().len(), 6);
        assert_eq!(body["contributing_methods"][0], "physical");
        assert_eq!(body["missing_methods"][0], "reasoning_based");

        let (status, body) = get(app.clone(), "/api/v1/forecast/methods").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["physical"]["method"], "physical");
        assert!(body["reasoning_based"].is_null());

        let (_, health) = get(app, "/health").await;
        assert!(!health["last_forecast_at"].is_null());
    }

    #[tokio::test]
    async fn test_trigger_log_respects_limit() {
        let (app, engine) = setup();
        run_cycles(&engine, 4).await;

        let (status, body) = get(app.clone(), "/api/v1/triggers?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let decisions = body.as_array().unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0]["outcome"], "suppressed");
        assert_eq!(decisions[0]["reason"], "no_condition");

        let (_, body) = get(app, "/api/v1/triggers").await;
        assert_eq!(body.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_accuracy_records() {
        let (app, engine) = setup();
        let (status, body) = get(app.clone(), "/api/v1/accuracy").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());

        run_cycles(&engine, 1).await;
        engine
            .ingest(vec![reading(t0() + Duration::minutes(62), 40.0)])
            .await
            .unwrap();
        engine
            .reconcile_cycle(t0() + Duration::minutes(75))
            .await
            .unwrap();

        let (_, body) = get(app, "/api/v1/accuracy").await;
        let records = body.as_array().unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().any(|r| r["method"] == "physical"));
    }
}
