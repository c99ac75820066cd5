mod admin;
mod api_tokens;
mod sessions;
mod workspaces;

pub use admin::health;
pub use api_tokens::{create_api_token, list_api_tokens, revoke_api_token, verify_api_token};
pub use sessions::{create_session, refresh_session, sign_out};
pub use workspaces::activate_workspace;

use crate::api::response::ApiError;
use crate::tokens::api_token::ApiTokenError;
use crate::tokens::rotation::AuthError;
use crate::tokens::workspace::WorkspaceError;

/// Map an AuthError to an ApiError
fn auth_error(e: AuthError) -> ApiError {
    match e {
        AuthError::Codec(_) | AuthError::TokenRevoked => {
            ApiError::unauthorized("Credential is invalid or has been revoked")
        }
        AuthError::UserNotFound => ApiError::unauthorized("Unknown user"),
        AuthError::Store(e) => ApiError::internal(e.to_string()),
    }
}

/// Map a WorkspaceError to an ApiError
fn workspace_error(e: WorkspaceError) -> ApiError {
    match e {
        WorkspaceError::NotAMember => ApiError::forbidden("Not a member of this workspace"),
        WorkspaceError::UserNotFound => ApiError::unauthorized("Unknown user"),
        WorkspaceError::WorkspaceNotFound => ApiError::not_found("Workspace not found"),
        WorkspaceError::Auth(e) => auth_error(e),
    }
}

/// Map an ApiTokenError to an ApiError
fn api_token_error(e: ApiTokenError) -> ApiError {
    match e {
        ApiTokenError::MaxTokensReached => {
            ApiError::conflict("Maximum number of API tokens reached")
        }
        ApiTokenError::NotAMember => ApiError::forbidden("Not a member of this workspace"),
        ApiTokenError::Database(e) => ApiError::internal(e.to_string()),
    }
}
