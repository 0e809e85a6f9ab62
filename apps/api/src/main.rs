mod config;
mod consultation;
mod content_store;
mod errors;
mod generation;
mod llm_client;
mod retry;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::content_store::persistence::PersistenceCoordinator;
use crate::content_store::HttpContentStore;
use crate::generation::pipeline::{GenerationSettings, Pipeline};
use crate::llm_client::GenerationInvoker;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Consult API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize generation client
    let invoker = GenerationInvoker::from_config(&config.generation)?;
    info!(
        "Generation client initialized (model: {}, timeout: {}s)",
        config.generation.model,
        config.generation.timeout.as_secs()
    );

    // Initialize content store
    let store = Arc::new(HttpContentStore::new(config.content_store.clone())?);
    info!(
        "Content store client initialized ({}; refresh {})",
        config.content_store.base_url,
        if config.content_store.refresh.is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );

    let persistence = PersistenceCoordinator::new(
        store,
        config.pipeline.store_retry,
        config.pipeline.intermediate_save_interval,
    );
    let pipeline = Pipeline::new(
        invoker,
        persistence,
        GenerationSettings {
            model: config.generation.model.clone(),
            reasoning_effort: config.generation.reasoning_effort,
        },
        &config.pipeline,
    );

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
