//! Nimbus alerts server binary entrypoint.
//!
//! Runs the alert scheduler in the background and serves the operational API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use nimbus_common::config::AppConfig;
use nimbus_common::db::{create_pool, run_migrations};
use nimbus_common::redis_pool::create_redis_pool;
use nimbus_engine::pg_store::PgAlertStore;
use nimbus_engine::scheduler::Scheduler;
use nimbus_engine::store::AlertStore;
use nimbus_notifier::FcmChannel;
use nimbus_weather::{CachedProvider, OpenMeteoClient, WeatherProvider};

use nimbus_api::routes::create_router;
use nimbus_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("nimbus_api=debug,nimbus_engine=debug,nimbus_weather=info,tower_http=debug")
    });
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting Nimbus alerts server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Database
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    // Weather provider behind the Redis cache
    let redis = create_redis_pool(&config.redis_url).await?;
    let client = OpenMeteoClient::new(
        config.weather_api_url.clone(),
        config.air_quality_api_url.clone(),
        Duration::from_secs(config.upstream_timeout_secs),
    )?;
    let provider: Arc<dyn WeatherProvider> = Arc::new(CachedProvider::new(
        Arc::new(client),
        redis,
        config.weather_cache_ttl_secs,
    ));

    // Push channel
    let push_timeout = Duration::from_secs(config.push_timeout_secs);
    let mut channel = FcmChannel::new(
        config.fcm_project_id.clone(),
        config.fcm_access_token.clone(),
        push_timeout,
    )?;
    if let Some(url) = &config.fcm_api_url {
        channel = channel.with_base_url(url.clone());
    }

    // Scheduler
    let store: Arc<dyn AlertStore> = Arc::new(PgAlertStore::new(pool.clone()));
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        provider,
        Arc::new(channel),
        config.scheduler.clone(),
        Duration::from_secs(config.upstream_timeout_secs),
        push_timeout,
    ));
    let scheduler_handle = scheduler.start().await;

    // Build router
    let state = AppState::new(pool, store, scheduler);
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_handle.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
