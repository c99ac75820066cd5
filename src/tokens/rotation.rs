//! The rotation engine: cookie verification, staleness detection,
//! concurrency-safe rotation, and refresh-token exchange.
//!
//! A presented cookie is in one of three states. Younger than the
//! verification window it is *fresh* and passes through untouched, with no
//! store or cache access. Older, it is *stale*: if the dedup cache already
//! holds a marker for its identifier some concurrent request has rotated
//! it, and this request rides through on the existing claims. Otherwise
//! this request performs the rotation itself.
//!
//! The marker is written before the replacement record is persisted so
//! concurrent racers see it as early as possible. That narrows the race
//! window, it does not close it: two requests arriving within microseconds
//! can both pass the check, in which case the second writer's removal of
//! the already-removed identifier is a no-op in the store. A crash between
//! marker and persist leaves the identifier marked with no new credential
//! issued; the affected caller simply rotates on a later request once the
//! marker expires.

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::cache::TtlCache;
use crate::config::{SecretConfig, TokenConfig};
use crate::storage::models::{TokenKind, TokenMetadata, User};
use crate::storage::Database;

use super::codec::{Claims, Codec, CodecError, TokenUse};
use super::generator::{generate_identifier, identifier_issued_at};
use super::store::{self, StoreError};
use super::workspace;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Token has been revoked")]
    TokenRevoked,
    #[error("User not found")]
    UserNotFound,
}

impl From<crate::storage::DatabaseError> for AuthError {
    fn from(e: crate::storage::DatabaseError) -> Self {
        AuthError::Store(StoreError::Unavailable(e))
    }
}

/// Outcome of presenting a cookie credential.
#[derive(Debug)]
pub struct CookieAuth {
    /// Verified identity, or `None` for an anonymous request
    pub claims: Option<Claims>,
    /// New signed cookie value to issue, when rotation happened
    pub rotated: Option<String>,
}

impl CookieAuth {
    fn anonymous() -> Self {
        Self {
            claims: None,
            rotated: None,
        }
    }

    fn pass(claims: Claims) -> Self {
        Self {
            claims: Some(claims),
            rotated: None,
        }
    }
}

/// A freshly issued session: access cookie plus linked refresh credential.
#[derive(Debug)]
pub struct IssuedSession {
    pub claims: Claims,
    pub refresh_token: String,
    pub token: String,
}

/// Result of a refresh-token exchange.
#[derive(Debug)]
pub struct RefreshExchange {
    pub claims: Claims,
    pub refresh_token: String,
    pub token: String,
}

/// Orchestrates the token lifecycle. Holds its configuration explicitly;
/// nothing here reads ambient process state.
#[derive(Clone)]
pub struct RotationEngine {
    pub(crate) codec: Codec,
    pub(crate) db: Database,
    processed: TtlCache<()>,
    pub(crate) tokens: TokenConfig,
}

impl RotationEngine {
    pub fn new(db: Database, secrets: &SecretConfig, tokens: TokenConfig) -> Self {
        Self {
            codec: Codec::new(secrets),
            db,
            processed: TtlCache::new(),
            tokens,
        }
    }

    pub(crate) fn session_ttl(&self) -> Duration {
        Duration::seconds(self.tokens.session_ttl_seconds as i64)
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.tokens.refresh_ttl_seconds as i64)
    }

    fn marker_key(tenant: &str, identifier: &str) -> String {
        format!("rotated/{tenant}/{identifier}")
    }

    fn is_processed(&self, tenant: &str, identifier: &str) -> bool {
        self.processed
            .get(&Self::marker_key(tenant, identifier))
            .is_some()
    }

    fn mark_processed(&self, tenant: &str, identifier: &str) {
        self.processed.insert(
            Self::marker_key(tenant, identifier),
            (),
            std::time::Duration::from_secs(self.tokens.dedup_ttl_seconds),
        );
    }

    // ========================================================================
    // Issuance
    // ========================================================================

    /// Issue a session: one cookie record and one linked refresh record,
    /// persisted together in a single write.
    pub fn issue_session(&self, user: &mut User) -> Result<IssuedSession, AuthError> {
        let access_id = generate_identifier();
        let refresh_id = generate_identifier();
        let now = Utc::now();

        store::push_token(
            user,
            TokenKind::Cookie,
            &access_id,
            TokenMetadata::default(),
            now + self.session_ttl(),
        );
        store::push_token(
            user,
            TokenKind::Oauth,
            &refresh_id,
            TokenMetadata {
                related_identifier: Some(access_id.clone()),
                workspace_id: None,
            },
            now + self.refresh_ttl(),
        );
        self.db.put_user(user)?;

        let mut claims = Claims::for_user(user);
        claims.token_id = Some(access_id);
        let token = self.codec.sign(&claims, TokenUse::Session, self.session_ttl())?;

        let mut refresh_claims = claims.clone();
        refresh_claims.token_id = Some(refresh_id);
        let refresh_token =
            self.codec
                .sign(&refresh_claims, TokenUse::Refresh, self.refresh_ttl())?;

        tracing::debug!(user_id = %user.id, tenant = %user.tenant_id, "Issued session");

        Ok(IssuedSession {
            claims,
            refresh_token,
            token,
        })
    }

    // ========================================================================
    // Cookie path
    // ========================================================================

    /// Authenticate a presented cookie, rotating it when stale.
    ///
    /// Never fails: verification failures and rotation errors alike degrade
    /// to an anonymous request. Populating an identity is this engine's job;
    /// rejecting the unauthenticated is downstream authorization's.
    pub fn authenticate_cookie(&self, tenant: &str, cookie_value: &str) -> CookieAuth {
        let claims = match self.codec.verify(cookie_value, TokenUse::Session, tenant) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(tenant = %tenant, error = %e, "Cookie failed verification");
                return CookieAuth::anonymous();
            }
        };

        let Some(identifier) = claims.token_id.clone() else {
            tracing::debug!(tenant = %tenant, "Cookie carries no token identifier");
            return CookieAuth::anonymous();
        };

        // Fresh: pass through with zero store/cache access
        let age_ms = identifier_issued_at(&identifier)
            .map(|issued| (Utc::now() - issued).num_milliseconds())
            .unwrap_or(i64::MAX);
        // Widen before the seconds-to-millis conversion; the window is an
        // unvalidated env knob and must not overflow here
        if (age_ms as i128) < self.tokens.verification_window_seconds as i128 * 1000 {
            return CookieAuth::pass(claims);
        }

        // Stale-Processed: a concurrent request already rotated this exact
        // identifier; the existing claims stay valid for this one request.
        if self.is_processed(tenant, &identifier) {
            return CookieAuth::pass(claims);
        }

        // Stale-Unprocessed
        match self.rotate(tenant, &claims, &identifier) {
            Ok(Some(rotated)) => rotated,
            Ok(None) => CookieAuth::pass(claims),
            Err(e) => {
                tracing::warn!(
                    tenant = %tenant,
                    user_id = %claims.sub,
                    error = %e,
                    "Cookie rotation failed; downgrading to anonymous"
                );
                CookieAuth::anonymous()
            }
        }
    }

    /// Perform the rotation for a stale, unprocessed identifier.
    ///
    /// `Ok(None)` means a concurrent request won the race benignly and the
    /// caller should ride through on the original claims.
    fn rotate(
        &self,
        tenant: &str,
        claims: &Claims,
        identifier: &str,
    ) -> Result<Option<CookieAuth>, AuthError> {
        let mut user = self
            .db
            .get_user(tenant, &claims.sub)?
            .ok_or(AuthError::UserNotFound)?;

        if !store::has_token(&user, TokenKind::Cookie, identifier) {
            // Benign race: another request rotated (and removed) it a split
            // second ago. If the marker is now visible, ride through.
            if self.is_processed(tenant, identifier) {
                return Ok(None);
            }
            // Reused, stolen, or explicitly invalidated
            return Err(AuthError::TokenRevoked);
        }

        // Marker before persist: racers must see it as early as possible
        self.mark_processed(tenant, identifier);

        let metadata = user
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::Cookie && t.identifier == identifier)
            .map(|t| t.metadata.clone())
            .unwrap_or_default();

        let new_identifier = generate_identifier();

        // Re-point any refresh record paired with the old identifier at the
        // new one, in the same write; sign-out resolves the pair through
        // `related_identifier` and must still find it after a rotation.
        for record in user.tokens.iter_mut() {
            if record.kind == TokenKind::Oauth
                && record.metadata.related_identifier.as_deref() == Some(identifier)
            {
                record.metadata.related_identifier = Some(new_identifier.clone());
            }
        }

        store::replace_token(
            &self.db,
            &mut user,
            TokenKind::Cookie,
            identifier,
            &new_identifier,
            metadata,
            Utc::now() + self.session_ttl(),
        )?;

        let mut new_claims = claims.clone();
        new_claims.token_id = Some(new_identifier);
        let token = self
            .codec
            .sign(&new_claims, TokenUse::Session, self.session_ttl())?;

        tracing::debug!(
            tenant = %tenant,
            user_id = %claims.sub,
            old = %identifier,
            "Rotated session cookie"
        );

        Ok(Some(CookieAuth {
            claims: Some(new_claims),
            rotated: Some(token),
        }))
    }

    // ========================================================================
    // Bearer path
    // ========================================================================

    /// Verify an access credential from a bearer header. No rotation; the
    /// bearer path re-issues through refresh exchange instead.
    pub fn authenticate_bearer(&self, tenant: &str, token: &str) -> Option<Claims> {
        match self.codec.verify(token, TokenUse::Session, tenant) {
            Ok(claims) => Some(claims),
            Err(e) => {
                tracing::debug!(tenant = %tenant, error = %e, "Bearer credential failed verification");
                None
            }
        }
    }

    /// Exchange a refresh credential for a new access/refresh pair.
    ///
    /// Single-use by construction: the presented identifier is removed from
    /// the store, so a replayed exchange fails with `TokenRevoked`. No
    /// dedup layer is needed on this path.
    pub fn exchange_refresh(&self, tenant: &str, token: &str) -> Result<RefreshExchange, AuthError> {
        let presented = self.codec.verify(token, TokenUse::Refresh, tenant)?;
        let identifier = presented.token_id.clone().ok_or(CodecError::Malformed)?;

        let mut user = self
            .db
            .get_user(tenant, &presented.sub)?
            .ok_or(AuthError::TokenRevoked)?;

        if !store::has_token(&user, TokenKind::Oauth, &identifier) {
            tracing::warn!(
                tenant = %tenant,
                user_id = %presented.sub,
                "Refresh credential no longer recognized (consumed or revoked)"
            );
            return Err(AuthError::TokenRevoked);
        }

        let workspace_id = user
            .tokens
            .iter()
            .find(|t| t.kind == TokenKind::Oauth && t.identifier == identifier)
            .and_then(|t| t.metadata.workspace_id.clone());

        let access_id = generate_identifier();
        let refresh_id = generate_identifier();
        let now = Utc::now();

        store::drop_token(&mut user, TokenKind::Oauth, &identifier);
        store::push_token(
            &mut user,
            TokenKind::Cookie,
            &access_id,
            TokenMetadata {
                related_identifier: None,
                workspace_id: workspace_id.clone(),
            },
            now + self.session_ttl(),
        );
        store::push_token(
            &mut user,
            TokenKind::Oauth,
            &refresh_id,
            TokenMetadata {
                related_identifier: Some(access_id.clone()),
                workspace_id: workspace_id.clone(),
            },
            now + self.refresh_ttl(),
        );
        self.db.put_user(&user)?;

        // Claims are rebuilt from the current document so role changes since
        // the last issuance take effect here.
        let mut claims = Claims::for_user(&user);
        if let Some(ref ws_id) = workspace_id {
            claims.workspace = workspace::workspace_claims_for(&self.db, &user, ws_id)?;
        }
        claims.token_id = Some(access_id);
        let access = self.codec.sign(&claims, TokenUse::Session, self.session_ttl())?;

        let mut refresh_claims = claims.clone();
        refresh_claims.token_id = Some(refresh_id);
        let refresh =
            self.codec
                .sign(&refresh_claims, TokenUse::Refresh, self.refresh_ttl())?;

        tracing::debug!(tenant = %tenant, user_id = %user.id, "Exchanged refresh credential");

        Ok(RefreshExchange {
            claims,
            refresh_token: refresh,
            token: access,
        })
    }

    // ========================================================================
    // Revocation
    // ========================================================================

    /// Remove the presented credential's record and any refresh record
    /// linked to it, in one persisted write.
    pub fn sign_out(&self, tenant: &str, claims: &Claims) -> Result<(), AuthError> {
        let Some(identifier) = claims.token_id.as_deref() else {
            return Ok(());
        };

        let Some(mut user) = self.db.get_user(tenant, &claims.sub)? else {
            return Ok(());
        };

        let mut changed = store::drop_token(&mut user, TokenKind::Cookie, identifier);
        if let Some(related) = store::find_by_related(&user, TokenKind::Oauth, identifier) {
            changed |= store::drop_token(&mut user, TokenKind::Oauth, &related);
        }

        if changed {
            self.db.put_user(&user)?;
            tracing::debug!(tenant = %tenant, user_id = %user.id, "Signed out session");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_stale_cookie, make_user, setup_db, test_config, test_engine};

    fn engine_with_window(db: Database, verification_window_seconds: u64) -> RotationEngine {
        let config = test_config();
        let tokens = TokenConfig {
            verification_window_seconds,
            ..config.tokens
        };
        RotationEngine::new(db, &config.secrets, tokens)
    }

    #[test]
    fn test_issue_session_persists_linked_pair() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert_eq!(stored.tokens.len(), 2);

        let access_id = issued.claims.token_id.clone().unwrap();
        assert!(store::has_token(&stored, TokenKind::Cookie, &access_id));
        assert!(store::find_by_related(&stored, TokenKind::Oauth, &access_id).is_some());
    }

    #[test]
    fn test_fresh_cookie_passes_through_unchanged() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let auth = engine.authenticate_cookie("acme", &issued.token);
        assert!(auth.rotated.is_none());
        let claims = auth.claims.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.token_id, issued.claims.token_id);
    }

    #[test]
    fn test_stale_cookie_rotates_once() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let (cookie, stale_id) = make_stale_cookie(&engine, &mut user);

        let auth = engine.authenticate_cookie("acme", &cookie);
        let new_cookie = auth.rotated.expect("stale cookie must rotate");
        let claims = auth.claims.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_ne!(claims.token_id.as_deref(), Some(stale_id.as_str()));

        // Old identifier replaced in the store
        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert!(!store::has_token(&stored, TokenKind::Cookie, &stale_id));
        assert!(store::has_token(
            &stored,
            TokenKind::Cookie,
            claims.token_id.as_deref().unwrap()
        ));

        // The replacement is fresh and passes through
        let again = engine.authenticate_cookie("acme", &new_cookie);
        assert!(again.rotated.is_none());
        assert!(again.claims.is_some());
    }

    #[test]
    fn test_processed_cookie_rides_through_without_second_rotation() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let (cookie, _) = make_stale_cookie(&engine, &mut user);

        let first = engine.authenticate_cookie("acme", &cookie);
        assert!(first.rotated.is_some());

        // Same stale cookie again: dedup marker is set, so it passes with
        // the original claims and no new Set-Cookie.
        let second = engine.authenticate_cookie("acme", &cookie);
        assert!(second.rotated.is_none());
        assert!(second.claims.is_some());

        // Exactly one cookie record remains
        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        let cookies: Vec<_> = stored
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Cookie)
            .collect();
        assert_eq!(cookies.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_stale_cookies_both_authenticate() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let (cookie, _) = make_stale_cookie(&engine, &mut user);

        let (a, b) = {
            let (e1, c1) = (engine.clone(), cookie.clone());
            let (e2, c2) = (engine.clone(), cookie.clone());
            tokio::join!(
                tokio::task::spawn_blocking(move || e1.authenticate_cookie("acme", &c1)),
                tokio::task::spawn_blocking(move || e2.authenticate_cookie("acme", &c2)),
            )
        };
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.claims.is_some());
        assert!(b.claims.is_some());

        // The remove-then-add executed effectively once
        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        let cookies = stored
            .tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Cookie)
            .count();
        assert_eq!(cookies, 1);
    }

    #[test]
    fn test_revoked_identifier_is_anonymous() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let (cookie, stale_id) = make_stale_cookie(&engine, &mut user);

        // Explicit revocation: drop the record outright
        store::remove_token(&db, &mut user, TokenKind::Cookie, &stale_id).unwrap();

        let auth = engine.authenticate_cookie("acme", &cookie);
        assert!(auth.claims.is_none());
        assert!(auth.rotated.is_none());
    }

    #[test]
    fn test_wrong_tenant_is_anonymous() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let auth = engine.authenticate_cookie("other", &issued.token);
        assert!(auth.claims.is_none());
    }

    #[test]
    fn test_refresh_exchange_is_single_use() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let exchanged = engine.exchange_refresh("acme", &issued.refresh_token).unwrap();
        assert_eq!(exchanged.claims.sub, "u1");
        assert_ne!(exchanged.refresh_token, issued.refresh_token);

        // Replay fails: the identifier was consumed
        let replay = engine.exchange_refresh("acme", &issued.refresh_token);
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));

        // The new refresh credential works
        assert!(engine.exchange_refresh("acme", &exchanged.refresh_token).is_ok());
    }

    #[test]
    fn test_refresh_exchange_rejects_session_secret() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        // The access credential must never pass the refresh endpoint
        let result = engine.exchange_refresh("acme", &issued.token);
        assert!(matches!(
            result,
            Err(AuthError::Codec(CodecError::InvalidSignature))
        ));
    }

    #[test]
    fn test_refresh_exchange_picks_up_role_changes() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let mut stored = db.get_user("acme", "u1").unwrap().unwrap();
        stored.roles.push("admin".to_string());
        db.put_user(&stored).unwrap();

        let exchanged = engine.exchange_refresh("acme", &issued.refresh_token).unwrap();
        assert!(exchanged.claims.roles.contains(&"admin".to_string()));
    }

    #[test]
    fn test_sign_out_after_rotation_revokes_linked_refresh() {
        let (db, _temp) = setup_db();
        // Zero window: the issued cookie is stale on first presentation
        let engine = engine_with_window(db.clone(), 0);

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        let auth = engine.authenticate_cookie("acme", &issued.token);
        assert!(auth.rotated.is_some());
        let claims = auth.claims.unwrap();

        engine.sign_out("acme", &claims).unwrap();

        // The rotated cookie record and the original refresh record are
        // both gone; the session family is fully revoked.
        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert!(stored.tokens.is_empty());

        let replay = engine.exchange_refresh("acme", &issued.refresh_token);
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));
    }

    #[test]
    fn test_huge_verification_window_never_rotates() {
        let (db, _temp) = setup_db();
        let engine = engine_with_window(db.clone(), u64::MAX);

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let (cookie, stale_id) = make_stale_cookie(&engine, &mut user);

        // Everything is inside a window this large; no rotation, no panic
        let auth = engine.authenticate_cookie("acme", &cookie);
        assert!(auth.rotated.is_none());
        assert_eq!(auth.claims.unwrap().token_id.as_deref(), Some(stale_id.as_str()));
    }

    #[test]
    fn test_sign_out_removes_cookie_and_linked_refresh() {
        let (db, _temp) = setup_db();
        let engine = test_engine(db.clone());

        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();
        let issued = engine.issue_session(&mut user).unwrap();

        engine.sign_out("acme", &issued.claims).unwrap();

        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert!(stored.tokens.is_empty());

        // The refresh token issued alongside is dead too
        let replay = engine.exchange_refresh("acme", &issued.refresh_token);
        assert!(matches!(replay, Err(AuthError::TokenRevoked)));
    }
}
