//! Stormcast forecast engine
//!
//! Decides when a weather state warrants an expensive reasoning analysis,
//! produces a deterministic physical forecast, blends both methods by their
//! observed accuracy and exposes the results over a read-only HTTP API.

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::PgPool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod external;
pub mod handlers;
pub mod routes;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};

use external::{OpenWeatherClient, ReasoningClient, WarningFeedClient, WebhookNotifier};
use services::{ForecastEngine, PgStore, ReasoningForecastGenerator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ForecastEngine>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(engine: Arc<ForecastEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }
}

/// Wire the engine with every collaborator the configuration enables
pub fn build_engine(config: Arc<Config>, db: Option<PgPool>) -> AppResult<ForecastEngine> {
    let location = config.location.to_location();
    let mut engine = ForecastEngine::new(Arc::clone(&config));

    if let Some(pool) = db {
        engine = engine.with_store(Arc::new(PgStore::new(pool, &location)));
    }

    match config.weather.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => {
            let client = OpenWeatherClient::new(&config.weather, key.to_string())?;
            engine = engine.with_source(Arc::new(client));
        }
        None => tracing::warn!("No weather API key configured; ingestion has no sources"),
    }

    if let Some(url) = config.warnings.feed_url.as_deref().filter(|u| !u.is_empty()) {
        let client = WarningFeedClient::new(&config.warnings, url.to_string())?;
        engine = engine.with_warnings(Arc::new(client));
    }

    if let Some(url) = config.delivery.webhook_url.as_deref().filter(|u| !u.is_empty()) {
        let notifier = WebhookNotifier::new(&config.delivery, url.to_string())?;
        engine = engine.with_notifier(Arc::new(notifier));
    }

    if config.reasoning.api_key.as_deref().map_or(true, str::is_empty) {
        tracing::warn!("No reasoning API key configured; ensemble runs on the physical method only");
    } else {
        let client = ReasoningClient::new(&config.reasoning)?;
        let generator = ReasoningForecastGenerator::new(
            Arc::new(client),
            config.reasoning.clone(),
            config.physical.horizon_hours,
        );
        engine = engine.with_reasoning(generator);
    }

    Ok(engine)
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Stormcast Forecast Engine API v1.0"
}
