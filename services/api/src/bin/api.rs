//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{OpenAiContentAdapter, OpenAiTtsAdapter, PlainTextExtractor},
    config::Config,
    error::ApiError,
    web::{router, ApiDoc, AppState},
};
use async_openai::{config::OpenAIConfig, types::audio::SpeechModel, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderValue, Method,
    },
    Router,
};
use learning_assistant_core::{SessionEngine, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(config.openai_api_key.clone());
    let openai_client = Client::with_config(openai_config);

    let tts_voice = OpenAiTtsAdapter::voice_from_name(&config.tts_voice).ok_or_else(|| {
        ApiError::Internal(format!(
            "Invalid TTS voice specified in config: '{}'",
            config.tts_voice
        ))
    })?;
    let speaker = Arc::new(OpenAiTtsAdapter::new(
        openai_client.clone(),
        SpeechModel::Tts1Hd,
        tts_voice,
    ));
    let content = Arc::new(OpenAiContentAdapter::new(
        openai_client,
        config.content_model.clone(),
    ));
    let extractor = Arc::new(PlainTextExtractor::new());

    // --- 3. Build the Session Engine & Shared AppState ---
    let store = Arc::new(SessionStore::new());
    let engine = Arc::new(SessionEngine::new(
        store.clone(),
        extractor,
        content,
        speaker,
        config.engine_config(),
    ));
    let app_state = Arc::new(AppState {
        engine,
        config: config.clone(),
    });

    // --- 4. Spawn the Idle-Session Sweeper ---
    let shutdown_token = CancellationToken::new();
    if let Some(ttl) = config.session_idle_ttl {
        let max_idle = chrono::Duration::from_std(ttl)
            .map_err(|e| ApiError::Internal(format!("Session idle TTL is out of range: {}", e)))?;
        let sweeper_shutdown = shutdown_token.clone();
        let sweeper_store = store.clone();
        info!(ttl_secs = ttl.as_secs(), "Idle session eviction enabled");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if sweeper_store.is_empty() {
                            continue;
                        }
                        let evicted = sweeper_store.evict_idle(max_idle);
                        if evicted > 0 {
                            info!("Evicted {} idle sessions", evicted);
                        }
                    }
                    _ = sweeper_shutdown.cancelled() => {
                        debug!("Session sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }

    // --- 5. Create the Web Router ---
    let mut origins = Vec::with_capacity(config.allowed_origins.len());
    for origin in &config.allowed_origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(_) => warn!("Ignoring invalid CORS origin '{}'", origin),
        }
    }
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    let api_router = router(app_state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;

    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        shutdown_token.cancel();
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(server_shutdown.cancelled_owned())
        .await?;

    info!("Server stopped");
    Ok(())
}
