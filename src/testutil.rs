//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::config::{Config, CookieConfig, NodeConfig, SecretConfig, TokenConfig};
use crate::storage::models::{ApiToken, TokenKind, TokenMetadata, User, Workspace};
use crate::storage::Database;
use crate::tokens::codec::{Claims, TokenUse};
use crate::tokens::generator::generate_hex;
use crate::tokens::{store, RotationEngine};

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A minimal `Config` suitable for unit tests.
pub fn test_config() -> Config {
    Config {
        cookies: CookieConfig::default(),
        node: NodeConfig {
            bind_address: "127.0.0.1:8080".to_string(),
            data_dir: "/tmp/test".to_string(),
        },
        secrets: SecretConfig {
            refresh_secret: "test-refresh-secret".to_string(),
            session_secret: "test-session-secret".to_string(),
        },
        tokens: TokenConfig::default(),
    }
}

/// Build a `RotationEngine` around the given database with test secrets.
pub fn test_engine(db: Database) -> RotationEngine {
    let config = test_config();
    RotationEngine::new(db, &config.secrets, config.tokens)
}

/// Create a `User` with the given id and tenant, default role `user`.
pub fn make_user(id: &str, tenant: &str) -> User {
    User {
        email: Some(format!("{id}@example.com")),
        first_name: None,
        id: id.to_string(),
        last_name: None,
        memberships: vec![],
        phone: None,
        roles: vec!["user".to_string()],
        tenant_id: tenant.to_string(),
        tokens: vec![],
        username: Some(id.to_string()),
    }
}

/// Create a `Workspace` with the given id, tenant and name.
pub fn make_workspace(id: &str, tenant: &str, name: &str) -> Workspace {
    Workspace {
        id: id.to_string(),
        name: name.to_string(),
        tenant_id: tenant.to_string(),
    }
}

/// Create an `ApiToken` with the given id and owner, no expiry.
pub fn make_api_token(id: &str, user_id: &str, tenant: &str) -> ApiToken {
    ApiToken {
        created_at: Utc::now(),
        expires_at: None,
        hashed_secret: format!("hash_{id}"),
        id: id.to_string(),
        last_used_at: None,
        name: format!("token-{id}"),
        prefix: "ql_deadbeef".to_string(),
        tenant_id: tenant.to_string(),
        user_id: user_id.to_string(),
        workspace_id: None,
    }
}

/// Forge a valid cookie whose identifier is two hours old: stale under the
/// default verification window, but nowhere near expiry. Persists the
/// backing record and returns `(cookie_value, identifier)`.
pub fn make_stale_cookie(engine: &RotationEngine, user: &mut User) -> (String, String) {
    let issued = Utc::now() - Duration::hours(2);
    let identifier = format!("{}:{}", issued.timestamp_millis(), generate_hex(16));

    store::add_token(
        &engine.db,
        user,
        TokenKind::Cookie,
        &identifier,
        TokenMetadata::default(),
        Utc::now() + Duration::days(7),
    )
    .unwrap();

    let mut claims = Claims::for_user(user);
    claims.token_id = Some(identifier.clone());
    let cookie = engine
        .codec
        .sign(&claims, TokenUse::Session, Duration::days(7))
        .unwrap();

    (cookie, identifier)
}
