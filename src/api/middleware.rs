//! Authentication middleware
//!
//! Runs the rotation engine for every inbound request. A request presents
//! either the tenant session cookie or a bearer access credential; the
//! resolved identity (possibly anonymous) is installed as an `AuthContext`
//! request extension, and a rotated cookie is appended to the response.
//! This layer never rejects: downstream authorization decides what an
//! anonymous caller may do.

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, SET_COOKIE};
use axum::http::{HeaderValue, Request, Response};
use axum::middleware::Next;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;

use crate::config::DEFAULT_TENANT;
use crate::tokens::Claims;
use crate::AppState;

use super::cookies::{cookie_name, session_cookie};

/// Header naming the tenant a request is made under.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// The identity resolved for the current request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Verified claims, or `None` for an anonymous request
    pub claims: Option<Claims>,
    pub tenant: String,
}

impl AuthContext {
    /// The claims, or an unauthorized error for handlers that require a
    /// signed-in caller.
    pub fn require(&self) -> Result<&Claims, super::response::ApiError> {
        self.claims
            .as_ref()
            .ok_or_else(|| super::response::ApiError::unauthorized("Authentication required"))
    }
}

/// Extract the tenant from the request headers.
pub fn request_tenant(request: &Request<Body>) -> String {
    request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_TENANT.to_string())
}

pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let tenant = request_tenant(&request);

    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let mut rotated = None;
    let claims = if let Some(token) = bearer {
        state.engine.authenticate_bearer(&tenant, &token)
    } else if let Some(cookie) = jar.get(&cookie_name(&tenant)) {
        let auth = state.engine.authenticate_cookie(&tenant, cookie.value());
        rotated = auth.rotated;
        auth.claims
    } else {
        None
    };

    request.extensions_mut().insert(AuthContext {
        claims,
        tenant: tenant.clone(),
    });

    let mut response = next.run(request).await;

    if let Some(token) = rotated {
        // A handler that set this tenant's cookie itself (sign-out's
        // removal, a fresh issuance) takes precedence over the rotation;
        // appending after it would hand the client a live cookie back.
        let name = cookie_name(&tenant);
        let already_set = response.headers().get_all(SET_COOKIE).iter().any(|v| {
            v.to_str()
                .is_ok_and(|s| s.split('=').next() == Some(name.as_str()))
        });
        if !already_set {
            let cookie = session_cookie(
                &tenant,
                token,
                &state.config.cookies,
                state.config.tokens.session_ttl_seconds,
            );
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
    }

    response
}
