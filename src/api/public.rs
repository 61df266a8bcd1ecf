//! Public API types

use axum::response::{IntoResponse, Response};
use http::StatusCode;

use crate::core::ChatError;

// Errors

pub struct ApiError(anyhow::Error, Option<StatusCode>);

impl ApiError {
    pub fn bad_request(message: &str) -> Self {
        Self(anyhow::anyhow!(message.to_string()), Some(StatusCode::BAD_REQUEST))
    }

    fn status(&self) -> StatusCode {
        if let Some(status) = self.1 {
            return status;
        }
        match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::Template { .. }) => StatusCode::BAD_REQUEST,
            Some(ChatError::MissingCredential) => StatusCode::UNAUTHORIZED,
            Some(ChatError::Transport { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert `ApiError` into an Axum compatible response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Always log the error
        tracing::error!("{}", self.0);

        (self.status(), format!("Something went wrong: {}", self.0)).into_response()
    }
}

/// Enables using `?` on functions that return `Result<_,
/// anyhow::Error>` to turn them into `Result<_, ApiError>`
impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into(), None)
    }
}

// Re-export public types from each route

pub mod chat {
    pub use crate::api::routes::chat::public::*;
}

pub mod models {
    pub use crate::api::routes::models::public::*;
}
