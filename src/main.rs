mod analytics;
mod config;
mod crypto;
mod db;
mod domain;
mod middleware;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::state::SharedState;
use axum::{routing::get_service, Router};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            e
        })?;
    tracing::info!("Database migrations completed");

    if config.seed_demo {
        db::seed::seed_demo(&pool).await?;
    }

    let crypto = Arc::new(crypto::Crypto::new(&config.enc_key)?);
    let ai = Arc::new(services::ai::AiService::new(
        &config.openai_api_key,
        &config.openai_model,
        config.ai_timeout,
        config.ai_cache_ttl,
    ));

    let shared: SharedState = Arc::new(state::AppState {
        pool,
        crypto,
        ai,
        session_key: config.session_key.clone(),
        config: Arc::new(config),
    });

    let scheduler = JobScheduler::new().await?;

    // Hourly: drop expired AI replies and idle rate-limit buckets
    let shared_for_cleanup = shared.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let state = shared_for_cleanup.clone();
            Box::pin(async move {
                let purged = state.ai.cache().purge_expired().await;
                if purged > 0 {
                    let remaining = state.ai.cache().len().await;
                    tracing::info!("Purged {} expired AI cache entries, {} remain", purged, remaining);
                }
                web::auth::login_limiter().cleanup().await;
                web::public::session_start_limiter().cleanup().await;
            })
        })?)
        .await?;

    scheduler.start().await?;
    tracing::info!("Scheduler started: AI cache purge hourly");

    let static_dir = Path::new(&shared.config.static_dir);
    let static_handler =
        ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));

    let app = Router::new()
        .merge(web::routes(shared.clone()))
        .fallback_service(get_service(static_handler))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = shared.config.bind_addr.clone();
    tracing::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
