use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The transport a token record was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Browser session credential, rotated while in use.
    Cookie,
    /// Bearer refresh credential, single-use by construction.
    Oauth,
}

/// Extra context attached to a token record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Identifier of a paired credential (a refresh record points at its
    /// access identifier).
    pub related_identifier: Option<String>,
    /// Workspace the credential was scoped to when issued.
    pub workspace_id: Option<String>,
}

/// One entry in a user's active-token list.
///
/// The identifier's leading segment is its creation time in epoch
/// milliseconds (`"<epoch-ms>:<random>"`), so staleness is computable
/// without a separate lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// When the credential stops verifying regardless of rotation
    pub expires_at: DateTime<Utc>,
    /// Opaque identifier, unique within the owning user's list
    pub identifier: String,
    pub kind: TokenKind,
    #[serde(default)]
    pub metadata: TokenMetadata,
}

/// Membership of a user in one workspace, with the roles held there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceMembership {
    pub roles: Vec<String>,
    pub workspace_id: String,
}

/// A user document. The engine reads and writes this document as a whole;
/// the broader profile schema belongs to the surrounding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub id: String,
    pub last_name: Option<String>,
    #[serde(default)]
    pub memberships: Vec<WorkspaceMembership>,
    pub phone: Option<String>,
    pub roles: Vec<String>,
    pub tenant_id: String,
    /// Active token records, bounded and pruned by the token store
    #[serde(default)]
    pub tokens: Vec<TokenRecord>,
    pub username: Option<String>,
}

/// A workspace within a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
}

/// A long-lived API token. Only the SHA-256 of the raw secret is stored;
/// the prefix exists for UI identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the raw secret
    pub hashed_secret: String,
    /// Non-secret UUID identifier (used for listing, revoking)
    pub id: String,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Human-readable nickname
    pub name: String,
    /// Leading bytes of the raw secret, safe to display
    pub prefix: String,
    pub tenant_id: String,
    pub user_id: String,
    pub workspace_id: Option<String>,
}

impl ApiToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}
