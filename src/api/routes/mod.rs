//! API routes module

pub mod chat;
pub mod models;

use axum::Router;

use crate::api::state::SharedState;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Chat routes
        .nest("/chat", chat::router())
        // Model listing and selection
        .nest("/models", models::router())
}
