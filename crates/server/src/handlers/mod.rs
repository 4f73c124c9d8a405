//! HTTP handlers for the chat server surface.

pub mod auth;
pub mod blocks;
pub mod messages;

// Re-export AppState from config
pub use crate::config::AppState;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use crate::auth::UserInfo;

// Auth handlers
pub use auth::{list_users, login, logout, me, signup};

// Chat HTTP surface
pub use blocks::{block_user, unblock_user};
pub use messages::{list_messages, mark_seen};

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Resolve the bearer token in `Authorization` to an authenticated user.
pub(crate) async fn require_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<UserInfo, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    state
        .auth
        .validate_session(token)
        .await
        .map_err(|_| api_error(StatusCode::UNAUTHORIZED, "Invalid or expired session"))
}
