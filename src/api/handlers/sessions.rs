use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth_error;
use crate::api::cookies::{removal_cookie, session_cookie};
use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::User;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub refresh_token: String,
    pub token: String,
    pub user: UserResponse,
}

/// Minimal user fields returned alongside credentials
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub id: String,
    pub last_name: Option<String>,
    pub roles: Vec<String>,
    pub username: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Issue a session for an existing user. The caller is trusted to have
/// verified the identity upstream (password check, social provider, ...).
pub async fn create_session(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<(CookieJar, Json<JSend<SessionResponse>>), ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }

    let mut user = state
        .db
        .get_user(&ctx.tenant, &req.user_id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let issued = state.engine.issue_session(&mut user).map_err(auth_error)?;

    let cookie = session_cookie(
        &ctx.tenant,
        issued.token.clone(),
        &state.config.cookies,
        state.config.tokens.session_ttl_seconds,
    );

    tracing::debug!(tenant = %ctx.tenant, user_id = %user.id, "Created session");

    Ok((
        jar.add(cookie),
        JSend::success(SessionResponse {
            refresh_token: issued.refresh_token,
            token: issued.token,
            user: user_to_response(&user),
        }),
    ))
}

/// Exchange a refresh credential (bearer header) for a new access/refresh
/// pair. Single-use: a replayed refresh token is rejected.
pub async fn refresh_session(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JSend<SessionResponse>>, ApiError> {
    let refresh_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::bad_request("Bearer refresh token is required"))?;

    let exchange = state
        .engine
        .exchange_refresh(&ctx.tenant, refresh_token)
        .map_err(auth_error)?;

    let user = state
        .db
        .get_user(&ctx.tenant, &exchange.claims.sub)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

    Ok(JSend::success(SessionResponse {
        refresh_token: exchange.refresh_token,
        token: exchange.token,
        user: user_to_response(&user),
    }))
}

/// Revoke the presented session and clear the cookie.
pub async fn sign_out(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<JSend<()>>), ApiError> {
    if let Some(ref claims) = ctx.claims {
        state
            .engine
            .sign_out(&ctx.tenant, claims)
            .map_err(auth_error)?;
    }

    let jar = jar.add(removal_cookie(&ctx.tenant, &state.config.cookies));
    Ok((jar, JSend::success(())))
}

// ============================================================================
// Helpers
// ============================================================================

pub(super) fn user_to_response(user: &User) -> UserResponse {
    UserResponse {
        email: user.email.clone(),
        first_name: user.first_name.clone(),
        id: user.id.clone(),
        last_name: user.last_name.clone(),
        roles: user.roles.clone(),
        username: user.username.clone(),
    }
}
