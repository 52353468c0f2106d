//! Backend for the events platform client.
//!
//! The client talks to Firestore directly for almost everything. This server
//! only covers writes that need admin credentials or a known document shape.
//!
//!
//!
//! # Endpoints
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /` | health check, always answers |
//! | `POST /create-event` | store an event payload in `events` |
//! | `POST /seed` | overwrite one sample document per collection |
//! | `POST /ensure-collections` | placeholder documents for empty collections |
//!
//! Everything except the health check answers 500 while Firestore is not
//! configured.
//!
//!
//!
//! # Configuration
//!
//! - `FIREBASE_SERVICE_ACCOUNT`: path to the service account JSON, unset runs degraded
//! - `FIRESTORE_DATABASE`: database id, default `(default)`
//! - `RUST_HOST`, `RUST_PORT`: bind address, default `0.0.0.0:5000`
//! - `RUST_LOG`: tracing filter
//!
//!
//!
//! # Setup
//!
//! Run locally.
//! ```sh
//! FIREBASE_SERVICE_ACCOUNT=./service-account.json RUST_LOG=info cargo run
//! ```
//!
//! Create the collections the client expects.
//! ```sh
//! curl -X POST localhost:5000/ensure-collections
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio::{net::TcpListener, signal::ctrl_c};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod firestore;
pub mod routes;
pub mod seed;
pub mod state;
pub mod utils;

use routes::{create_event_handler, ensure_collections_handler, health_handler, seed_handler};
use state::AppState;

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await?;

    info!("Starting server...");

    let address = state.config.address();
    let app = app(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");

    Ok(())
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/", get(health_handler))
        .route("/create-event", post(create_event_handler))
        .route("/seed", post(seed_handler))
        .route("/ensure-collections", post(ensure_collections_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
