//! Stateless signing and verification of bearer credentials.
//!
//! Two independent secrets exist: one for short-lived access/session
//! credentials and one for long-lived refresh credentials; callers select
//! the matching secret via [`TokenUse`]. Verification also enforces the
//! tenant-match invariant: claims signed for one tenant never verify
//! against a request made under another.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SecretConfig;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("Credential expired")]
    Expired,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Malformed credential")]
    Malformed,
    #[error("Credential tenant does not match request tenant")]
    TenantMismatch,
}

/// Which secret a credential is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUse {
    /// Long-lived refresh credential
    Refresh,
    /// Short-lived access/session credential
    Session,
}

/// Workspace context embedded in a re-signed credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceClaims {
    pub id: String,
    /// Reserved-character-encoded workspace name
    pub name: String,
    /// The subject's roles within this workspace
    pub roles: Vec<String>,
}

/// The signed payload of a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub email: Option<String>,
    /// Expiry (epoch seconds); set by [`Codec::sign`]
    #[serde(default)]
    pub exp: i64,
    pub first_name: Option<String>,
    /// Issued-at (epoch seconds); set by [`Codec::sign`]
    #[serde(default)]
    pub iat: i64,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub roles: Vec<String>,
    /// Subject: the user id
    pub sub: String,
    pub tenant: String,
    /// Identifier of the backing token record, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<WorkspaceClaims>,
}

impl Claims {
    /// Claims for a user, with no workspace context or token identifier.
    pub fn for_user(user: &crate::storage::models::User) -> Self {
        Self {
            email: user.email.clone(),
            exp: 0,
            first_name: user.first_name.clone(),
            iat: 0,
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            roles: user.roles.clone(),
            sub: user.id.clone(),
            tenant: user.tenant_id.clone(),
            token_id: None,
            username: user.username.clone(),
            workspace: None,
        }
    }
}

/// HS256 sign/verify over the two credential secrets. Pure computation,
/// no I/O.
#[derive(Clone)]
pub struct Codec {
    refresh_key: (EncodingKey, DecodingKey),
    session_key: (EncodingKey, DecodingKey),
}

impl Codec {
    pub fn new(secrets: &SecretConfig) -> Self {
        Self {
            refresh_key: (
                EncodingKey::from_secret(secrets.refresh_secret.as_bytes()),
                DecodingKey::from_secret(secrets.refresh_secret.as_bytes()),
            ),
            session_key: (
                EncodingKey::from_secret(secrets.session_secret.as_bytes()),
                DecodingKey::from_secret(secrets.session_secret.as_bytes()),
            ),
        }
    }

    /// Sign claims with the selected secret; `iat`/`exp` are stamped here.
    pub fn sign(&self, claims: &Claims, token_use: TokenUse, ttl: Duration) -> Result<String, CodecError> {
        let now = Utc::now();
        let mut claims = claims.clone();
        claims.iat = now.timestamp();
        claims.exp = (now + ttl).timestamp();

        let key = match token_use {
            TokenUse::Refresh => &self.refresh_key.0,
            TokenUse::Session => &self.session_key.0,
        };

        encode(&Header::default(), &claims, key).map_err(|_| CodecError::Malformed)
    }

    /// Verify a credential against the selected secret and the request tenant.
    ///
    /// Fails with `TenantMismatch` even when the signature is valid.
    pub fn verify(
        &self,
        token: &str,
        token_use: TokenUse,
        request_tenant: &str,
    ) -> Result<Claims, CodecError> {
        let key = match token_use {
            TokenUse::Refresh => &self.refresh_key.1,
            TokenUse::Session => &self.session_key.1,
        };

        let data = decode::<Claims>(token, key, &Validation::default()).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => CodecError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => CodecError::InvalidSignature,
                _ => CodecError::Malformed,
            }
        })?;

        if data.claims.tenant != request_tenant {
            return Err(CodecError::TenantMismatch);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_user, test_config};

    fn codec() -> Codec {
        Codec::new(&test_config().secrets)
    }

    fn claims() -> Claims {
        let mut user = make_user("u1", "acme");
        user.email = Some("u1@example.com".to_string());
        Claims::for_user(&user)
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let codec = codec();
        let claims = claims();

        let token = codec
            .sign(&claims, TokenUse::Session, Duration::minutes(30))
            .unwrap();
        let verified = codec.verify(&token, TokenUse::Session, "acme").unwrap();

        assert_eq!(verified.sub, claims.sub);
        assert_eq!(verified.tenant, "acme");
        assert_eq!(verified.email, claims.email);
        assert_eq!(verified.roles, claims.roles);
        assert!(verified.exp > verified.iat);
    }

    #[test]
    fn test_verify_wrong_secret_fails() {
        let codec = codec();
        let token = codec
            .sign(&claims(), TokenUse::Session, Duration::minutes(30))
            .unwrap();

        // The refresh secret must never verify a session credential
        assert_eq!(
            codec.verify(&token, TokenUse::Refresh, "acme"),
            Err(CodecError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_wrong_tenant_fails() {
        let codec = codec();
        let token = codec
            .sign(&claims(), TokenUse::Session, Duration::minutes(30))
            .unwrap();

        assert_eq!(
            codec.verify(&token, TokenUse::Session, "other"),
            Err(CodecError::TenantMismatch)
        );
    }

    #[test]
    fn test_verify_expired_fails() {
        let codec = codec();
        let token = codec
            .sign(&claims(), TokenUse::Session, Duration::seconds(-120))
            .unwrap();

        assert_eq!(
            codec.verify(&token, TokenUse::Session, "acme"),
            Err(CodecError::Expired)
        );
    }

    #[test]
    fn test_verify_garbage_is_malformed() {
        let codec = codec();
        assert_eq!(
            codec.verify("not.a.token", TokenUse::Session, "acme"),
            Err(CodecError::Malformed)
        );
    }
}
