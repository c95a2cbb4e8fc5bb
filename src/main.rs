use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mindread::{api, broadcast, config::ServerConfig, llm, state::AppState, ws};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mindread=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mindread...");

    let server_config = ServerConfig::from_env();

    // Initialize LLM providers
    let llm_config = llm::LlmConfig::from_env();
    let llm_manager = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers initialized successfully");
            manager
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. New rounds cannot start and every guess gets the fallback rating.",
                e
            );
            llm::LlmManager::new(Vec::new(), &llm_config)
        }
    };

    let state = Arc::new(AppState::new_with_llm(llm_manager, &llm_config));

    // Drop notification topics whose observers have all gone
    broadcast::spawn_topic_pruner(state.hub.clone());

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/rooms/{room_id}/ready", get(api::ready_status))
        .route("/api/rooms/{room_id}/standings", get(api::standings))
        .route("/api/rounds/{round_id}/results", get(api::results))
        .fallback_service(ServeDir::new(&server_config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Listening on http://{}", server_config.addr);

    let listener = match tokio::net::TcpListener::bind(server_config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", server_config.addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
