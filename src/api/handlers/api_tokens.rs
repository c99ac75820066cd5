use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::sessions::user_to_response;
use super::{api_token_error, sessions::UserResponse};
use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::ApiToken;
use crate::tokens::api_token;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateApiTokenRequest {
    #[serde(default)]
    pub expires_at: Option<String>,
    pub name: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateApiTokenResponse {
    pub expires_at: Option<String>,
    pub id: String,
    pub name: String,
    pub prefix: String,
    /// The raw secret. Returned exactly once; only its hash is stored.
    pub token: String,
    pub workspace_id: Option<String>,
}

/// Safe fields only: never the hash, never the raw secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiTokenResponse {
    pub created_at: String,
    pub expires_at: Option<String>,
    pub id: String,
    pub last_used_at: Option<String>,
    pub name: String,
    pub prefix: String,
    pub workspace_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VerifyApiTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyApiTokenResponse {
    pub user: UserResponse,
    pub workspace_id: Option<String>,
    pub workspace_roles: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_api_token(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateApiTokenRequest>,
) -> Result<Json<JSend<CreateApiTokenResponse>>, ApiError> {
    let claims = ctx.require()?;
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }

    let expires_at = req
        .expires_at
        .as_deref()
        .map(|s| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| ApiError::bad_request("expires_at must be a valid RFC 3339 datetime"))
        })
        .transpose()?;

    let user = state
        .db
        .get_user(&ctx.tenant, &claims.sub)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::unauthorized("Unknown user"))?;

    let (token, raw) = api_token::create(
        &state.db,
        &state.config.tokens,
        &user,
        req.name.trim(),
        req.workspace_id,
        expires_at,
    )
    .map_err(api_token_error)?;

    Ok(JSend::success(CreateApiTokenResponse {
        expires_at: token.expires_at.map(|t| t.to_rfc3339()),
        id: token.id,
        name: token.name,
        prefix: token.prefix,
        token: raw,
        workspace_id: token.workspace_id,
    }))
}

pub async fn list_api_tokens(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<JSend<Vec<ApiTokenResponse>>>, ApiError> {
    let claims = ctx.require()?;

    let tokens = api_token::list(&state.db, &ctx.tenant, &claims.sub).map_err(api_token_error)?;
    Ok(JSend::success(
        tokens.iter().map(api_token_to_response).collect(),
    ))
}

pub async fn revoke_api_token(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    let claims = ctx.require()?;

    // Only the owning user may revoke a token
    let owned = state
        .db
        .get_api_token_by_id(&ctx.tenant, &id)
        .map_err(|e| ApiError::internal(e.to_string()))?
        .is_some_and(|t| t.user_id == claims.sub);
    if !owned {
        return Err(ApiError::not_found("API token not found"));
    }

    api_token::revoke(
        &state.db,
        &state.api_tokens,
        &state.config.tokens,
        &ctx.tenant,
        &id,
    )
    .map_err(api_token_error)?;

    Ok(JSend::success(()))
}

/// Resolve a raw API secret to its identity. Returns "no identity" as a
/// not-found fail rather than distinguishing revoked from never-issued.
pub async fn verify_api_token(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<VerifyApiTokenRequest>,
) -> Result<Json<JSend<VerifyApiTokenResponse>>, ApiError> {
    if req.token.trim().is_empty() {
        return Err(ApiError::bad_request("token is required"));
    }

    let identity = api_token::authenticate(
        &state.db,
        &state.api_tokens,
        &state.config.tokens,
        &ctx.tenant,
        req.token.trim(),
    )
    .map_err(api_token_error)?
    .ok_or_else(|| ApiError::not_found("API token not found or expired"))?;

    Ok(JSend::success(VerifyApiTokenResponse {
        user: user_to_response(&identity.user),
        workspace_id: identity.workspace.map(|w| w.id),
        workspace_roles: identity.workspace_roles,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn api_token_to_response(token: &ApiToken) -> ApiTokenResponse {
    ApiTokenResponse {
        created_at: token.created_at.to_rfc3339(),
        expires_at: token.expires_at.map(|t| t.to_rfc3339()),
        id: token.id.clone(),
        last_used_at: token.last_used_at.map(|t| t.to_rfc3339()),
        name: token.name.clone(),
        prefix: token.prefix.clone(),
        workspace_id: token.workspace_id.clone(),
    }
}
