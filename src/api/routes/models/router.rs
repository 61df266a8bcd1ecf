//! Router for listing and switching models

use axum::{
    Json, Router,
    extract::State,
    routing::{get, put},
};

use super::public;
use crate::api::public::ApiError;
use crate::api::state::SharedState;

/// List the models advertised by the endpoint. Never fails: an
/// unreachable endpoint yields an empty list.
async fn list_models(
    State(state): State<SharedState>,
) -> Result<Json<public::ModelsResponse>, ApiError> {
    let (chat, directory) = {
        let shared_state = state
            .read()
            .map_err(|_| anyhow::anyhow!("Unable to read shared state"))?;
        (shared_state.chat.clone(), shared_state.models.clone())
    };
    let api_key = chat.connection().await.api_key;

    Ok(Json(public::ModelsResponse {
        models: directory.list_models(api_key.as_deref()).await,
    }))
}

/// Switch the conversation to another model
async fn set_active_model(
    State(state): State<SharedState>,
    Json(payload): Json<public::SetModelRequest>,
) -> Result<Json<public::ActiveModelResponse>, ApiError> {
    let (chat, directory) = {
        let shared_state = state
            .read()
            .map_err(|_| anyhow::anyhow!("Unable to read shared state"))?;
        (shared_state.chat.clone(), shared_state.models.clone())
    };

    let requested = payload.model.trim();
    if requested.is_empty() {
        return Err(ApiError::bad_request("Model must not be empty"));
    }
    let model = requested
        .parse::<usize>()
        .ok()
        .and_then(|i| directory.get(i))
        .unwrap_or_else(|| requested.to_string());

    chat.set_model(&model).await;
    Ok(Json(public::ActiveModelResponse { model }))
}

/// Create the models router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_models))
        .route("/active", put(set_active_model))
}
