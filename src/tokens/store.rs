//! The per-user token store.
//!
//! Token records live inside the user document. All mutations happen on the
//! in-memory copy and end in a single whole-document persist, so no partial
//! credential state is ever observable; a failed persist leaves the stored
//! document untouched and surfaces as [`StoreError::Unavailable`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::models::{TokenKind, TokenMetadata, TokenRecord, User};
use crate::storage::Database;

/// Records beyond this count trigger expiry pruning on mutation.
pub const MAX_TOKEN_RECORDS: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Token store unavailable: {0}")]
    Unavailable(#[from] crate::storage::DatabaseError),
}

/// Whether the identifier is currently active for the user.
pub fn has_token(user: &User, kind: TokenKind, identifier: &str) -> bool {
    user.tokens
        .iter()
        .any(|t| t.kind == kind && t.identifier == identifier)
}

/// Find the identifier of a record whose metadata points at `related`.
pub fn find_by_related(user: &User, kind: TokenKind, related: &str) -> Option<String> {
    user.tokens
        .iter()
        .find(|t| t.kind == kind && t.metadata.related_identifier.as_deref() == Some(related))
        .map(|t| t.identifier.clone())
}

/// Drop expired records once the list exceeds the bound. Best-effort
/// hygiene to keep the user document small, not a scheduled job.
pub fn prune_expired(user: &mut User) {
    if user.tokens.len() > MAX_TOKEN_RECORDS {
        let now = Utc::now();
        user.tokens.retain(|t| t.expires_at > now);
    }
}

/// Append a record to the in-memory copy. Identifiers are unique within
/// the list; an existing record with the same identifier is replaced.
pub fn push_token(
    user: &mut User,
    kind: TokenKind,
    identifier: &str,
    metadata: TokenMetadata,
    expires_at: DateTime<Utc>,
) {
    prune_expired(user);
    user.tokens.retain(|t| t.identifier != identifier);
    user.tokens.push(TokenRecord {
        expires_at,
        identifier: identifier.to_string(),
        kind,
        metadata,
    });
}

/// Remove a record from the in-memory copy, returning whether it existed.
pub fn drop_token(user: &mut User, kind: TokenKind, identifier: &str) -> bool {
    let before = user.tokens.len();
    user.tokens
        .retain(|t| !(t.kind == kind && t.identifier == identifier));
    user.tokens.len() < before
}

/// Add a record and persist the user document atomically.
pub fn add_token(
    db: &Database,
    user: &mut User,
    kind: TokenKind,
    identifier: &str,
    metadata: TokenMetadata,
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    push_token(user, kind, identifier, metadata, expires_at);
    db.put_user(user)?;
    tracing::debug!(user_id = %user.id, identifier = %identifier, "Added token record");
    Ok(())
}

/// Remove a record and persist the user document atomically.
pub fn remove_token(
    db: &Database,
    user: &mut User,
    kind: TokenKind,
    identifier: &str,
) -> Result<bool, StoreError> {
    let removed = drop_token(user, kind, identifier);
    if removed {
        db.put_user(user)?;
        tracing::debug!(user_id = %user.id, identifier = %identifier, "Removed token record");
    }
    Ok(removed)
}

/// Replace one record with another in a single persisted write. Removing an
/// already-removed identifier is a no-op rather than an error, which is what
/// makes a lost rotation race harmless.
pub fn replace_token(
    db: &Database,
    user: &mut User,
    kind: TokenKind,
    old_identifier: &str,
    new_identifier: &str,
    metadata: TokenMetadata,
    expires_at: DateTime<Utc>,
) -> Result<(), StoreError> {
    drop_token(user, kind, old_identifier);
    push_token(user, kind, new_identifier, metadata, expires_at);
    db.put_user(user)?;
    tracing::debug!(
        user_id = %user.id,
        old = %old_identifier,
        new = %new_identifier,
        "Replaced token record"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_user, setup_db};
    use chrono::Duration;

    fn meta_related(related: &str) -> TokenMetadata {
        TokenMetadata {
            related_identifier: Some(related.to_string()),
            workspace_id: None,
        }
    }

    #[test]
    fn test_add_and_has_token() {
        let (db, _temp) = setup_db();
        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        add_token(&db, &mut user, TokenKind::Cookie, "1:abc", TokenMetadata::default(), expires)
            .unwrap();

        assert!(has_token(&user, TokenKind::Cookie, "1:abc"));
        assert!(!has_token(&user, TokenKind::Oauth, "1:abc"));

        // Persisted, not just in memory
        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert!(has_token(&stored, TokenKind::Cookie, "1:abc"));
    }

    #[test]
    fn test_identifiers_unique_within_list() {
        let (db, _temp) = setup_db();
        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        add_token(&db, &mut user, TokenKind::Cookie, "1:abc", TokenMetadata::default(), expires)
            .unwrap();
        add_token(&db, &mut user, TokenKind::Cookie, "1:abc", TokenMetadata::default(), expires)
            .unwrap();

        assert_eq!(user.tokens.len(), 1);
    }

    #[test]
    fn test_remove_token() {
        let (db, _temp) = setup_db();
        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        add_token(&db, &mut user, TokenKind::Cookie, "1:abc", TokenMetadata::default(), expires)
            .unwrap();

        assert!(remove_token(&db, &mut user, TokenKind::Cookie, "1:abc").unwrap());
        assert!(!remove_token(&db, &mut user, TokenKind::Cookie, "1:abc").unwrap());
        assert!(db.get_user("acme", "u1").unwrap().unwrap().tokens.is_empty());
    }

    #[test]
    fn test_find_by_related() {
        let mut user = make_user("u1", "acme");
        let expires = Utc::now() + Duration::hours(1);
        push_token(&mut user, TokenKind::Oauth, "2:ref", meta_related("1:acc"), expires);

        assert_eq!(
            find_by_related(&user, TokenKind::Oauth, "1:acc"),
            Some("2:ref".to_string())
        );
        assert_eq!(find_by_related(&user, TokenKind::Oauth, "1:zzz"), None);
        assert_eq!(find_by_related(&user, TokenKind::Cookie, "1:acc"), None);
    }

    #[test]
    fn test_prune_only_past_the_bound() {
        let mut user = make_user("u1", "acme");
        let expired = Utc::now() - Duration::hours(1);
        let live = Utc::now() + Duration::hours(1);

        // Below the bound: expired entries are kept (no pruning pass)
        for i in 0..5 {
            push_token(&mut user, TokenKind::Cookie, &format!("1:e{i}"), TokenMetadata::default(), expired);
        }
        prune_expired(&mut user);
        assert_eq!(user.tokens.len(), 5);

        // Push past the bound: the expired entries are dropped
        for i in 0..8 {
            push_token(&mut user, TokenKind::Cookie, &format!("2:l{i}"), TokenMetadata::default(), live);
        }
        assert!(user.tokens.len() <= MAX_TOKEN_RECORDS);
        assert!(user.tokens.iter().all(|t| t.expires_at > Utc::now()));
    }

    #[test]
    fn test_replace_token_single_write() {
        let (db, _temp) = setup_db();
        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        let meta = TokenMetadata {
            related_identifier: None,
            workspace_id: Some("w1".to_string()),
        };
        add_token(&db, &mut user, TokenKind::Cookie, "1:old", meta.clone(), expires).unwrap();

        replace_token(&db, &mut user, TokenKind::Cookie, "1:old", "2:new", meta, expires).unwrap();

        let stored = db.get_user("acme", "u1").unwrap().unwrap();
        assert!(!has_token(&stored, TokenKind::Cookie, "1:old"));
        assert!(has_token(&stored, TokenKind::Cookie, "2:new"));
        assert_eq!(stored.tokens.len(), 1);
        assert_eq!(stored.tokens[0].metadata.workspace_id.as_deref(), Some("w1"));
    }

    #[test]
    fn test_replace_missing_old_identifier_is_noop_remove() {
        let (db, _temp) = setup_db();
        let mut user = make_user("u1", "acme");
        db.put_user(&user).unwrap();

        let expires = Utc::now() + Duration::hours(1);
        replace_token(
            &db,
            &mut user,
            TokenKind::Cookie,
            "1:never-existed",
            "2:new",
            TokenMetadata::default(),
            expires,
        )
        .unwrap();

        assert!(has_token(&user, TokenKind::Cookie, "2:new"));
        assert_eq!(user.tokens.len(), 1);
    }
}
