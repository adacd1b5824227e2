//! HTTP handlers for forecast read endpoints

use axum::{extract::State, Json};
use serde::Serialize;
use shared::{EnsembleForecast, MethodForecast};

use crate::error::{AppError, AppResult};
use crate::AppState;

/// Latest ensemble forecast
pub async fn get_ensemble_forecast(
    State(state): State<AppState>,
) -> AppResult<Json<EnsembleForecast>> {
    state
        .engine
        .snapshot()
        .ensemble
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No ensemble forecast has been produced yet".into()))
}

#[derive(Debug, Serialize)]
pub struct MethodForecastsResponse {
    pub physical: Option<MethodForecast>,
    pub reasoning_based: Option<MethodForecast>,
}

/// Latest raw forecast of each method
pub async fn get_method_forecasts(State(state): State<AppState>) -> Json<MethodForecastsResponse> {
    let snapshot = state.engine.snapshot();
    Json(MethodForecastsResponse {
        physical: snapshot.physical,
        reasoning_based: snapshot.reasoning,
    })
}
