use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::authenticate;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Every request passes through the rotation engine; anonymous requests
    // proceed and downstream handlers decide what they may do.
    let authenticated = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions", delete(handlers::sign_out))
        .route("/sessions/refresh", post(handlers::refresh_session))
        .route(
            "/workspaces/:id/activate",
            post(handlers::activate_workspace),
        )
        .route("/api-tokens", post(handlers::create_api_token))
        .route("/api-tokens", get(handlers::list_api_tokens))
        .route("/api-tokens/:id", delete(handlers::revoke_api_token))
        .route("/api-tokens/verify", post(handlers::verify_api_token))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ));

    // Internal routes -- liveness probes, never authenticated
    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    Router::new()
        .merge(authenticated)
        .merge(internal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
