use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::{
    error::AppError,
    events::{create_event, parse_event_payload},
    seed::{ensure_collections, seed},
    state::AppState,
};

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    message: &'static str,
}

#[derive(Serialize)]
pub struct Created {
    status: &'static str,
    id: String,
}

#[derive(Serialize)]
pub struct Seeded {
    status: &'static str,
}

#[derive(Serialize)]
pub struct Ensured {
    created: Vec<String>,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(Health {
        status: "ok",
        message: "Backend running",
    })
}

pub async fn create_event_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let store = state.store.handle()?;
    let payload = parse_event_payload(&body)?;

    let id = create_event(store, payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(Created {
            status: "created",
            id,
        }),
    ))
}

pub async fn seed_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    seed(state.store.handle()?).await?;

    Ok(Json(Seeded { status: "seeded" }))
}

pub async fn ensure_collections_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let created = ensure_collections(state.store.handle()?).await?;

    Ok(Json(Ensured { created }))
}
