//! Block and unblock endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;
use tracing::{info, warn};

use super::{api_error, require_user, ApiError};
use crate::auth::UserInfo;
use crate::blocks::{BlockOutcome, UnblockOutcome};
use crate::config::AppState;

#[derive(Debug, Serialize)]
pub struct BlockResponse {
    pub message: String,
}

async fn resolve_target(
    state: &AppState,
    username: &str,
) -> Result<UserInfo, ApiError> {
    match state.auth.get_user_by_username(username).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No such user {}", username),
        )),
        Err(e) => {
            warn!("User lookup failed for {}: {}", username, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to look up user",
            ))
        }
    }
}

/// POST /users/{username}/block
///
/// Creates a block between the caller and the target user, preventing either
/// side from messaging the other until it is lifted.
pub async fn block_user(
    Path(username): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<BlockResponse>), ApiError> {
    let initiator = require_user(&state, &headers).await?;
    info!("POST /users/{}/block - by {}", username, initiator.username);

    let target = resolve_target(&state, &username).await?;

    match state.blocks.create(&initiator.id, &target.id).await {
        Ok(BlockOutcome::Created) => Ok((
            StatusCode::CREATED,
            Json(BlockResponse {
                message: format!("User {} has been successfully blocked.", username),
            }),
        )),
        Ok(BlockOutcome::AlreadyBlocked) => Ok((
            StatusCode::NOT_MODIFIED,
            Json(BlockResponse {
                message: format!("User {} is already blocked.", username),
            }),
        )),
        Err(e) => {
            warn!("Failed to block {}: {}", username, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create block",
            ))
        }
    }
}

/// DELETE /users/{username}/block
///
/// Removes the caller's own block record for the target. Only the initiator
/// of a block can lift it.
pub async fn unblock_user(
    Path(username): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let initiator = require_user(&state, &headers).await?;
    info!("DELETE /users/{}/block - by {}", username, initiator.username);

    let target = resolve_target(&state, &username).await?;

    match state.blocks.remove(&initiator.id, &target.id).await {
        Ok(UnblockOutcome::Removed) => Ok(StatusCode::NO_CONTENT),
        Ok(UnblockOutcome::NotFound) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("User {} is not blocked.", username),
        )),
        Err(e) => {
            warn!("Failed to unblock {}: {}", username, e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to remove block",
            ))
        }
    }
}
