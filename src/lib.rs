//! quill-auth - A multi-tenant identity and session service
//!
//! This crate provides the token lifecycle and rotation engine for a
//! multi-tenant SaaS platform:
//! - Signed session cookies with race-avoiding rotation
//! - Single-use refresh-token exchange over bearer headers
//! - Workspace-scoped credential re-signing
//! - Long-lived API tokens (hash-at-rest, cached authentication)
//! - redb embedded document store (ACID, whole-document writes)
//! - REST API

pub mod api;
pub mod cache;
pub mod config;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use cache::TtlCache;
use config::Config;
use storage::Database;
use tokens::api_token::ApiTokenCache;
use tokens::RotationEngine;

/// Shared application state
pub struct AppState {
    /// Authentication-outcome cache for API tokens (tombstones included)
    pub api_tokens: ApiTokenCache,
    pub config: Config,
    pub db: Database,
    pub engine: RotationEngine,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let engine = RotationEngine::new(db.clone(), &config.secrets, config.tokens.clone());
        Self {
            api_tokens: TtlCache::new(),
            config,
            db,
            engine,
        }
    }
}
