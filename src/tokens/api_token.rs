//! Long-lived API-token authentication.
//!
//! An independent credential path from sessions: the raw secret is handed
//! out exactly once at creation, only its SHA-256 lives in the store, and
//! authentication runs prefix gate -> hash -> cache -> store. Positive
//! results are cached no longer than the token's remaining lifetime;
//! revocation writes a tombstone so a stale positive entry cannot outlive
//! the token. A cached tombstone is indistinguishable from a never-issued
//! secret, an accepted trade-off.

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::cache::TtlCache;
use crate::config::TokenConfig;
use crate::storage::models::{ApiToken, User, Workspace};
use crate::storage::Database;

use super::generator::{generate_api_secret, hash_secret, secret_prefix, API_SECRET_PREFIX};

#[derive(Debug, Error)]
pub enum ApiTokenError {
    #[error("Database error: {0}")]
    Database(#[from] crate::storage::DatabaseError),
    #[error("Maximum number of API tokens reached")]
    MaxTokensReached,
    #[error("User is not a member of this workspace")]
    NotAMember,
}

/// The identity an API token resolves to.
#[derive(Debug, Clone)]
pub struct ApiIdentity {
    pub token_id: String,
    pub user: User,
    pub workspace: Option<Workspace>,
    /// The user's roles within the resolved workspace, when one is set
    pub workspace_roles: Vec<String>,
}

/// Cache of authentication outcomes keyed by `tenant/hash`. `None` is a
/// tombstone: known-invalid, do not re-check the store.
pub type ApiTokenCache = TtlCache<Option<ApiIdentity>>;

fn cache_key(tenant: &str, hashed: &str) -> String {
    format!("{tenant}/{hashed}")
}

/// Create an API token for a user, bounded by the per-user quota.
/// Returns the record and the raw secret, the only time it exists.
pub fn create(
    db: &Database,
    config: &TokenConfig,
    user: &User,
    name: &str,
    workspace_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(ApiToken, String), ApiTokenError> {
    let existing = db.get_api_tokens_by_user(&user.tenant_id, &user.id)?;
    let now = Utc::now();
    let live = existing.iter().filter(|t| !t.is_expired_at(now)).count();
    if live >= config.max_api_tokens_per_user {
        return Err(ApiTokenError::MaxTokensReached);
    }

    if let Some(ref ws_id) = workspace_id {
        if !user.memberships.iter().any(|m| &m.workspace_id == ws_id) {
            return Err(ApiTokenError::NotAMember);
        }
    }

    let raw = generate_api_secret();
    let token = ApiToken {
        created_at: now,
        expires_at,
        hashed_secret: hash_secret(&raw),
        id: uuid::Uuid::new_v4().to_string(),
        last_used_at: None,
        name: name.to_string(),
        prefix: secret_prefix(&raw),
        tenant_id: user.tenant_id.clone(),
        user_id: user.id.clone(),
        workspace_id,
    };
    db.put_api_token(&token)?;

    tracing::debug!(token_id = %token.id, user_id = %user.id, "Created API token");
    Ok((token, raw))
}

/// List a user's API tokens, expired ones filtered out. Safe fields only
/// live on the record; the raw secret was never stored.
pub fn list(db: &Database, tenant: &str, user_id: &str) -> Result<Vec<ApiToken>, ApiTokenError> {
    let tokens = db.get_api_tokens_by_user(tenant, user_id)?;
    let now = Utc::now();
    Ok(tokens.into_iter().filter(|t| !t.is_expired_at(now)).collect())
}

/// Revoke an API token by id and tombstone its cache entry, so an
/// immediately following authentication attempt fails even if a positive
/// entry existed moments before.
pub fn revoke(
    db: &Database,
    cache: &ApiTokenCache,
    config: &TokenConfig,
    tenant: &str,
    token_id: &str,
) -> Result<bool, ApiTokenError> {
    let Some(token) = db.get_api_token_by_id(tenant, token_id)? else {
        return Ok(false);
    };

    db.delete_api_token(tenant, &token.hashed_secret)?;
    cache.insert(
        cache_key(tenant, &token.hashed_secret),
        None,
        Duration::from_secs(config.api_token_cache_ttl_seconds),
    );

    tracing::debug!(token_id = %token_id, "Revoked API token");
    Ok(true)
}

/// Resolve a raw API secret to an identity, or `None` when it does not
/// authenticate.
pub fn authenticate(
    db: &Database,
    cache: &ApiTokenCache,
    config: &TokenConfig,
    tenant: &str,
    raw_secret: &str,
) -> Result<Option<ApiIdentity>, ApiTokenError> {
    if !raw_secret.starts_with(API_SECRET_PREFIX) {
        return Ok(None);
    }

    let hashed = hash_secret(raw_secret);
    let key = cache_key(tenant, &hashed);

    if let Some(cached) = cache.get(&key) {
        // A cached None is a tombstone: known-invalid
        return Ok(cached);
    }

    let Some(token) = db.get_api_token(tenant, &hashed)? else {
        return Ok(None);
    };

    let now = Utc::now();
    if token.is_expired_at(now) {
        tracing::debug!(token_id = %token.id, "API token expired");
        return Ok(None);
    }

    // Best-effort usage accounting, off the success path's critical timing
    {
        let db = db.clone();
        let tenant = tenant.to_string();
        let hashed = hashed.clone();
        let token_id = token.id.clone();
        tokio::spawn(async move {
            if let Err(e) = db.touch_api_token(&tenant, &hashed, Utc::now()) {
                tracing::warn!(error = %e, token_id = %token_id, "Failed to update API token last_used_at");
            }
        });
    }

    let Some(user) = db.get_user(tenant, &token.user_id)? else {
        tracing::warn!(token_id = %token.id, "API token's user no longer exists");
        return Ok(None);
    };

    let (workspace, workspace_roles) = match token.workspace_id.as_deref() {
        Some(ws_id) => {
            let workspace = db.get_workspace(tenant, ws_id)?;
            let roles = user
                .memberships
                .iter()
                .find(|m| m.workspace_id == ws_id)
                .map(|m| m.roles.clone())
                .unwrap_or_default();
            (workspace, roles)
        }
        None => (None, Vec::new()),
    };

    let identity = ApiIdentity {
        token_id: token.id.clone(),
        user,
        workspace,
        workspace_roles,
    };

    // Cache no longer than the token's remaining lifetime
    let ceiling = Duration::from_secs(config.api_token_cache_ttl_seconds);
    let ttl = match token.expires_at {
        Some(exp) => {
            let remaining = (exp - now).num_seconds().max(0) as u64;
            ceiling.min(Duration::from_secs(remaining))
        }
        None => ceiling,
    };
    cache.insert(key, Some(identity.clone()), ttl);

    Ok(Some(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::WorkspaceMembership;
    use crate::testutil::{make_user, make_workspace, setup_db, test_config};

    fn setup() -> (Database, ApiTokenCache, TokenConfig, User, tempfile::TempDir) {
        let (db, temp) = setup_db();
        let user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        (db, ApiTokenCache::new(), test_config().tokens, user, temp)
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let (db, cache, config, user, _temp) = setup();

        let (token, raw) = create(&db, &config, &user, "ci token", None, None).unwrap();
        assert!(raw.starts_with("ql_"));
        assert_eq!(raw.len(), 67);
        assert!(token.hashed_secret != raw);
        assert!(raw.starts_with(&token.prefix));

        let identity = authenticate(&db, &cache, &config, "acme", &raw)
            .unwrap()
            .expect("raw secret must authenticate");
        assert_eq!(identity.user.id, "u1");
        assert!(identity.workspace.is_none());
    }

    #[tokio::test]
    async fn test_wrong_prefix_rejected_without_lookup() {
        let (db, cache, config, _user, _temp) = setup();

        let result = authenticate(&db, &cache, &config, "acme", "sk_deadbeef").unwrap();
        assert!(result.is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_authenticate_is_tenant_scoped() {
        let (db, cache, config, user, _temp) = setup();
        let (_, raw) = create(&db, &config, &user, "t", None, None).unwrap();

        assert!(authenticate(&db, &cache, &config, "other", &raw)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_token_does_not_authenticate() {
        let (db, cache, config, user, _temp) = setup();
        let expired = Utc::now() - chrono::Duration::hours(1);
        let (_, raw) = create(&db, &config, &user, "old", None, Some(expired)).unwrap();

        assert!(authenticate(&db, &cache, &config, "acme", &raw)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_revoke_beats_positive_cache() {
        let (db, cache, config, user, _temp) = setup();
        let (token, raw) = create(&db, &config, &user, "t", None, None).unwrap();

        // Warm the positive cache
        assert!(authenticate(&db, &cache, &config, "acme", &raw)
            .unwrap()
            .is_some());

        assert!(revoke(&db, &cache, &config, "acme", &token.id).unwrap());

        // Tombstone wins over the stale positive entry
        assert!(authenticate(&db, &cache, &config, "acme", &raw)
            .unwrap()
            .is_none());
        assert!(!revoke(&db, &cache, &config, "acme", &token.id).unwrap());
    }

    #[tokio::test]
    async fn test_quota_enforced_on_live_tokens() {
        let (db, cache, mut config, user, _temp) = setup();
        config.max_api_tokens_per_user = 2;
        let _ = cache;

        create(&db, &config, &user, "a", None, None).unwrap();
        create(&db, &config, &user, "b", None, None).unwrap();
        let third = create(&db, &config, &user, "c", None, None);
        assert!(matches!(third, Err(ApiTokenError::MaxTokensReached)));

        // Expired tokens do not count against the quota
        let expired = Utc::now() - chrono::Duration::hours(1);
        let (t, _) = {
            let mut roomy = config.clone();
            roomy.max_api_tokens_per_user = 10;
            create(&db, &roomy, &user, "dead", None, Some(expired)).unwrap()
        };
        db.delete_api_token("acme", &t.hashed_secret).unwrap();
    }

    #[tokio::test]
    async fn test_list_excludes_expired_and_secrets() {
        let (db, _cache, config, user, _temp) = setup();
        create(&db, &config, &user, "live", None, None).unwrap();
        create(
            &db,
            &config,
            &user,
            "dead",
            None,
            Some(Utc::now() - chrono::Duration::hours(1)),
        )
        .unwrap();

        let tokens = list(&db, "acme", "u1").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name, "live");
    }

    #[tokio::test]
    async fn test_workspace_scoped_token() {
        let (db, cache, config, mut user, _temp) = setup();
        user.memberships.push(WorkspaceMembership {
            roles: vec!["deploy".to_string()],
            workspace_id: "w1".to_string(),
        });
        db.put_user(&user).unwrap();
        db.put_workspace(&make_workspace("w1", "acme", "Ops")).unwrap();

        let (_, raw) = create(&db, &config, &user, "ops", Some("w1".to_string()), None).unwrap();
        let identity = authenticate(&db, &cache, &config, "acme", &raw)
            .unwrap()
            .unwrap();
        assert_eq!(identity.workspace.unwrap().id, "w1");
        assert_eq!(identity.workspace_roles, vec!["deploy"]);

        // Scoping to a workspace the user is not in is rejected
        let bad = create(&db, &config, &user, "x", Some("w9".to_string()), None);
        assert!(matches!(bad, Err(ApiTokenError::NotAMember)));
    }
}
