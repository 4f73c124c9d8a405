//! Auth handlers

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{api_error, require_user, ApiError};
use crate::auth::UserInfo;
use crate::config::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user_id: String,
    pub username: String,
}

/// POST /auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    info!("POST /auth/signup - {}", req.email);

    let user = match state
        .auth
        .signup(req.email.clone(), req.username, req.password.clone())
        .await
    {
        Ok(user) => user,
        Err(e) => {
            warn!("Signup failed for {}: {}", req.email, e);
            return Err(api_error(StatusCode::BAD_REQUEST, e.to_string()));
        }
    };

    match state.auth.login(req.email, req.password).await {
        Ok((_, session)) => Ok(Json(AuthResponse {
            token: session.token,
            user_id: user.id,
            username: user.username,
        })),
        Err(e) => {
            warn!("Login after signup failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Account created but login failed",
            ))
        }
    }
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    info!("POST /auth/login - {}", req.email);

    match state.auth.login(req.email.clone(), req.password).await {
        Ok((user, session)) => Ok(Json(AuthResponse {
            token: session.token,
            user_id: user.id,
            username: user.username,
        })),
        Err(e) => {
            warn!("Login failed for {}: {}", req.email, e);
            Err(api_error(StatusCode::UNAUTHORIZED, "Invalid credentials"))
        }
    }
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    info!("POST /auth/logout");

    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Missing bearer token"))?;

    match state.auth.logout(token).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) => {
            warn!("Logout failed: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to invalidate session",
            ))
        }
    }
}

/// GET /auth/me
pub async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserInfo>, ApiError> {
    let user = require_user(&state, &headers).await?;
    Ok(Json(user))
}

/// GET /users
pub async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserInfo>>, ApiError> {
    require_user(&state, &headers).await?;

    match state.auth.list_users().await {
        Ok(users) => Ok(Json(users)),
        Err(e) => {
            warn!("Failed to list users: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list users",
            ))
        }
    }
}
