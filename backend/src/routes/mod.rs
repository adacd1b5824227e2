//! Route definitions for the forecast engine API

use axum::{routing::get, Router};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/forecast", forecast_routes())
        .route("/triggers", get(handlers::list_trigger_decisions))
        .route("/accuracy", get(handlers::get_accuracy))
}

/// Forecast read routes
fn forecast_routes() -> Router<AppState> {
    Router::new()
        .route("/ensemble", get(handlers::get_ensemble_forecast))
        .route("/methods", get(handlers::get_method_forecasts))
}
