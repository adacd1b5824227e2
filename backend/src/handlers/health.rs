//! Health check handlers

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub location: String,
    pub store: String,
    pub reasoning_enabled: bool,
    pub reasoning_in_flight: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub last_forecast_at: Option<DateTime<Utc>>,
}

/// Health check endpoint handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.engine;
    let last_forecast_at = engine.snapshot().ensemble.map(|e| e.generated_at);

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        location: engine.location().name.clone(),
        store: engine.store_kind().to_string(),
        reasoning_enabled: engine.reasoning_enabled(),
        reasoning_in_flight: engine.reasoning_in_flight(),
        last_fired_at: engine.last_fired_at(),
        last_forecast_at,
    })
}
