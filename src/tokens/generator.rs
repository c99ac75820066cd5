use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Marker prefix on every raw API secret.
pub const API_SECRET_PREFIX: &str = "ql_";

/// Hex characters of the raw secret (after the marker) kept as the
/// display prefix.
const DISPLAY_PREFIX_LEN: usize = 8;

/// Generate `bytes` of randomness, hex encoded.
pub fn generate_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    hex::encode(buf)
}

/// Generate a token identifier: `"<epoch-ms>:<random>"`.
///
/// The leading segment is the creation time, so a credential's age is
/// computable from the identifier alone.
pub fn generate_identifier() -> String {
    format!("{}:{}", Utc::now().timestamp_millis(), generate_hex(16))
}

/// Recover the creation time embedded in an identifier.
pub fn identifier_issued_at(identifier: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = identifier.split(':').next()?.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Generate a raw API secret: `ql_` + 64 hex characters.
pub fn generate_api_secret() -> String {
    format!("{API_SECRET_PREFIX}{}", generate_hex(32))
}

/// The displayable leading slice of a raw secret (`"ql_ab12cd34"`).
pub fn secret_prefix(raw: &str) -> String {
    let end = (API_SECRET_PREFIX.len() + DISPLAY_PREFIX_LEN).min(raw.len());
    raw[..end].to_string()
}

/// Hash a raw secret with SHA-256, hex encoded. The raw value is never stored.
pub fn hash_secret(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}
