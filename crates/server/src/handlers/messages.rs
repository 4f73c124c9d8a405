//! Message history and mark-as-seen handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use super::{api_error, require_user, ApiError};
use crate::config::AppState;
use crate::store::{MarkSeenOutcome, MessageRecord};

/// GET /messages
///
/// Every message the caller sent or received, in insertion order.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    let user = require_user(&state, &headers).await?;
    info!("GET /messages - {}", user.username);

    match state.messages.for_user(&user.id).await {
        Ok(messages) => Ok(Json(messages)),
        Err(e) => {
            warn!("Failed to load messages for {}: {}", user.username, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load messages",
            ))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MarkSeenRequest {
    pub ids_to_mark: Vec<i64>,
}

/// POST /messages/mark
///
/// Marks the submitted message ids as seen; ids that do not exist are
/// ignored. Responds 304 when nothing matched.
pub async fn mark_seen(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MarkSeenRequest>,
) -> Result<StatusCode, ApiError> {
    let user = require_user(&state, &headers).await?;
    info!(
        "POST /messages/mark - {} ({} ids)",
        user.username,
        req.ids_to_mark.len()
    );

    match state.messages.mark_seen(&req.ids_to_mark).await {
        Ok(MarkSeenOutcome::Updated(_)) => Ok(StatusCode::OK),
        Ok(MarkSeenOutcome::NotModified) => Ok(StatusCode::NOT_MODIFIED),
        Err(e) => {
            warn!("Failed to mark messages seen: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to mark messages as seen",
            ))
        }
    }
}
