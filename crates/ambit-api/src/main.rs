// ambit API server
//
// Startup order: store connect + ping -> job-engine startup recovery ->
// background services as detached tasks -> HTTP/WS accepting connections.

mod agents;
mod auth;
mod common;
mod inbox;
mod jobs;
mod mcps;
mod rag_files;
mod state;
mod ws;

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ambit_openai::OpenAiClient;
use ambit_storage::Database;
use ambit_worker::{build_services, InstanceFactory, InstanceSync, SyncConfig};

use crate::state::AppState;

async fn health(
    axum::extract::State(db): axum::extract::State<Database>,
) -> Json<serde_json::Value> {
    let db_ok = db.store().ping().await.is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "database": db_ok,
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ambit_api=debug,ambit_worker=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ambit-api starting...");

    // 1. Store connects and pings
    let database_url = database_url_from_env()?;
    let pool_size = std::env::var("DB_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let db = Database::connect(&database_url, pool_size)
        .await
        .context("Failed to connect to database")?;
    db.run_migrations().await.context("Migration failed")?;
    tracing::info!("Connected to database");

    let llm: Arc<dyn ambit_core::llm::LlmClient> =
        Arc::new(OpenAiClient::from_env().context("LLM provider configuration")?);

    // 2-3. Startup recovery happens inside engine start; background services
    // run as detached tasks
    let (runtime, engine, poller) = build_services(db.clone(), llm.clone());
    engine.clone().start().await?;
    poller.clone().start().await?;
    tracing::info!("Background services started");

    let app_state = AppState {
        db: db.clone(),
        runtime,
        factory: InstanceFactory::new(db.clone()),
        llm: llm.clone(),
        admin_secret: std::env::var("ADMIN_SECRET_KEY").ok(),
        base_working_path: PathBuf::from(
            std::env::var("BASE_WORKING_PATH").unwrap_or_else(|_| "./workspaces".into()),
        ),
    };
    let jobs_state = jobs::JobsState {
        app: app_state.clone(),
        sync: InstanceSync::new(db.clone(), llm, SyncConfig::from_env()),
    };

    // 4. HTTP/WS layer
    let app = Router::new()
        .route("/health", get(health).with_state(db))
        .merge(auth::routes(app_state.clone()))
        .merge(agents::routes(app_state.clone()))
        .merge(mcps::routes(app_state.clone()))
        .merge(rag_files::routes(app_state.clone()))
        .merge(jobs::routes(jobs_state))
        .merge(inbox::routes(app_state.clone()))
        .merge(ws::routes(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind")?;
    tracing::info!("Listening on {addr}");

    let serve = axum::serve(listener, app).into_future();
    tokio::select! {
        result = serve => result.context("Server error")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            engine.stop().await;
            poller.stop().await;
        }
    }

    Ok(())
}

/// DATABASE_URL, or the discrete DB_* variables
fn database_url_from_env() -> Result<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let host = std::env::var("DB_HOST").context("DATABASE_URL or DB_HOST required")?;
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
    let name = std::env::var("DB_NAME").context("DB_NAME required")?;
    let user = std::env::var("DB_USER").context("DB_USER required")?;
    let password = std::env::var("DB_PASSWORD").unwrap_or_default();
    Ok(format!("postgres://{user}:{password}@{host}:{port}/{name}"))
}
