//! Workspace overlay: re-signs a credential to embed an active workspace's
//! role set.
//!
//! Activation always issues a brand-new token record rather than mutating
//! the current one. Switching workspace is a privilege-boundary change and
//! must be auditable as a fresh issuance.

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

use crate::storage::models::{TokenKind, TokenMetadata, User, Workspace};
use crate::storage::Database;

use super::codec::{Claims, TokenUse, WorkspaceClaims};
use super::generator::generate_identifier;
use super::rotation::{AuthError, RotationEngine};
use super::store;

/// Characters escaped out of workspace names before they are embedded in
/// a credential.
const NAME_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b',')
    .add(b';')
    .add(b'\\');

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("User is not a member of this workspace")]
    NotAMember,
    #[error("User not found")]
    UserNotFound,
    #[error("Workspace not found")]
    WorkspaceNotFound,
}

impl From<crate::storage::DatabaseError> for WorkspaceError {
    fn from(e: crate::storage::DatabaseError) -> Self {
        WorkspaceError::Auth(e.into())
    }
}

impl From<super::store::StoreError> for WorkspaceError {
    fn from(e: super::store::StoreError) -> Self {
        WorkspaceError::Auth(e.into())
    }
}

/// An activated workspace session: the re-signed cookie plus the workspace.
#[derive(Debug)]
pub struct ActivatedWorkspace {
    pub claims: Claims,
    pub token: String,
    pub workspace: Workspace,
}

pub(crate) fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NAME_ESCAPE).to_string()
}

/// Build the workspace context for a user from their single matching
/// membership record. `Ok(None)` when the membership or workspace is gone.
pub(crate) fn workspace_claims_for(
    db: &Database,
    user: &User,
    workspace_id: &str,
) -> Result<Option<WorkspaceClaims>, AuthError> {
    let Some(membership) = user
        .memberships
        .iter()
        .find(|m| m.workspace_id == workspace_id)
    else {
        return Ok(None);
    };

    let Some(workspace) = db.get_workspace(&user.tenant_id, workspace_id)? else {
        return Ok(None);
    };

    Ok(Some(WorkspaceClaims {
        id: workspace.id,
        name: encode_name(&workspace.name),
        roles: membership.roles.clone(),
    }))
}

impl RotationEngine {
    /// Activate a workspace for an authenticated user: a fresh cookie
    /// credential whose claims carry the workspace id, encoded name, and
    /// the caller's roles within that workspace.
    pub fn activate_workspace(
        &self,
        tenant: &str,
        user_id: &str,
        workspace_id: &str,
    ) -> Result<ActivatedWorkspace, WorkspaceError> {
        let mut user = self
            .db
            .get_user(tenant, user_id)
            .map_err(AuthError::from)?
            .ok_or(WorkspaceError::UserNotFound)?;

        let membership = user
            .memberships
            .iter()
            .find(|m| m.workspace_id == workspace_id)
            .cloned()
            .ok_or(WorkspaceError::NotAMember)?;

        let workspace = self
            .db
            .get_workspace(tenant, workspace_id)
            .map_err(AuthError::from)?
            .ok_or(WorkspaceError::WorkspaceNotFound)?;

        let identifier = generate_identifier();
        store::add_token(
            &self.db,
            &mut user,
            TokenKind::Cookie,
            &identifier,
            TokenMetadata {
                related_identifier: None,
                workspace_id: Some(workspace_id.to_string()),
            },
            Utc::now() + self.session_ttl(),
        )?;

        let mut claims = Claims::for_user(&user);
        claims.workspace = Some(WorkspaceClaims {
            id: workspace.id.clone(),
            name: encode_name(&workspace.name),
            roles: membership.roles,
        });
        claims.token_id = Some(identifier);

        let token = self
            .codec
            .sign(&claims, TokenUse::Session, self.session_ttl())
            .map_err(AuthError::from)?;

        tracing::debug!(
            tenant = %tenant,
            user_id = %user_id,
            workspace_id = %workspace_id,
            "Activated workspace"
        );

        Ok(ActivatedWorkspace {
            claims,
            token,
            workspace,
        })
    }
}
