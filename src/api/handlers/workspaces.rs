use axum::extract::{Path, State};
use axum::{Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use std::sync::Arc;

use super::workspace_error;
use crate::api::cookies::session_cookie;
use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, JSend};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ActivateWorkspaceResponse {
    pub token: String,
    pub workspace: WorkspaceResponse,
}

#[derive(Debug, Serialize)]
pub struct WorkspaceResponse {
    pub id: String,
    pub name: String,
    /// The caller's roles within this workspace
    pub roles: Vec<String>,
}

/// Re-sign the caller's session with an active workspace context. Always a
/// fresh issuance: the previous cookie's record stays untouched.
pub async fn activate_workspace(
    Extension(ctx): Extension<AuthContext>,
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Path(workspace_id): Path<String>,
) -> Result<(CookieJar, Json<JSend<ActivateWorkspaceResponse>>), ApiError> {
    let claims = ctx.require()?;

    let activated = state
        .engine
        .activate_workspace(&ctx.tenant, &claims.sub, &workspace_id)
        .map_err(workspace_error)?;

    let cookie = session_cookie(
        &ctx.tenant,
        activated.token.clone(),
        &state.config.cookies,
        state.config.tokens.session_ttl_seconds,
    );

    let workspace_claims = activated
        .claims
        .workspace
        .as_ref()
        .ok_or_else(|| ApiError::internal("Activated claims missing workspace context"))?;

    Ok((
        jar.add(cookie),
        JSend::success(ActivateWorkspaceResponse {
            token: activated.token,
            workspace: WorkspaceResponse {
                id: activated.workspace.id,
                name: activated.workspace.name,
                roles: workspace_claims.roles.clone(),
            },
        }),
    ))
}
