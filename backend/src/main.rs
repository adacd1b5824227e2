//! Stormcast forecast engine - server binary
//!
//! Runs the coordinating loop in the background and serves the read-only API.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stormcast_backend::{build_engine, create_app, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "stormcast=debug,stormcast_backend=debug,tower_http=debug,sqlx=warn".into()
    });
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.validate()?;

    tracing::info!("Starting Stormcast forecast engine");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool when persistence is configured
    let db_pool = match config.database.url.as_deref() {
        Some(url) if !url.is_empty() => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await?;
            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&pool).await?;
                tracing::info!("Migrations completed");
            }
            Some(pool)
        }
        _ => {
            tracing::info!("No database configured; using the in-memory store");
            None
        }
    };

    let config = Arc::new(config);
    let engine = Arc::new(build_engine(Arc::clone(&config), db_pool)?);

    // Start the coordinating loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(Arc::clone(&engine).run(shutdown_rx));

    // Build application
    let app = create_app(AppState::new(engine, Arc::clone(&config)));

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    shutdown_tx.send(true).ok();
    engine_task.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
