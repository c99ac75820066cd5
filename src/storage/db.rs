use chrono::{DateTime, Utc};
use redb::{Database as RedbDatabase, ReadableTable};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::models::{ApiToken, User, Workspace};
use super::tables::*;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Redb(#[from] redb::Error),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
}

/// The backing document store.
///
/// User documents are always read and written whole; a `put_user` is one
/// atomic commit, which is what the token store's no-partial-writes
/// guarantee rests on.
#[derive(Clone)]
pub struct Database {
    db: Arc<RedbDatabase>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, DatabaseError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db_path = data_dir.as_ref().join("quill-auth.redb");
        let db = RedbDatabase::create(db_path)?;

        // Create tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(WORKSPACES)?;
            let _ = write_txn.open_table(API_TOKENS)?;
            let _ = write_txn.open_table(API_TOKEN_IDS)?;
            let _ = write_txn.open_table(USER_API_TOKENS)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // ========================================================================
    // User documents
    // ========================================================================

    /// Replace a user document atomically (single-document read-modify-write)
    pub fn put_user(&self, user: &User) -> Result<(), DatabaseError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            let data = bincode::serialize(user)?;
            table.insert(scoped(&user.tenant_id, &user.id).as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a user document by tenant and id
    pub fn get_user(&self, tenant: &str, user_id: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(scoped(tenant, user_id).as_str())? {
            Some(data) => {
                let user: User = bincode::deserialize(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    /// Store a workspace
    pub fn put_workspace(&self, workspace: &Workspace) -> Result<(), DatabaseError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WORKSPACES)?;
            let data = bincode::serialize(workspace)?;
            table.insert(
                scoped(&workspace.tenant_id, &workspace.id).as_str(),
                data.as_slice(),
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a workspace by tenant and id
    pub fn get_workspace(
        &self,
        tenant: &str,
        workspace_id: &str,
    ) -> Result<Option<Workspace>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WORKSPACES)?;

        match table.get(scoped(tenant, workspace_id).as_str())? {
            Some(data) => {
                let workspace: Workspace = bincode::deserialize(data.value())?;
                Ok(Some(workspace))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // API tokens
    // ========================================================================

    /// Store an API token and maintain the id and per-user indexes
    pub fn put_api_token(&self, token: &ApiToken) -> Result<(), DatabaseError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(API_TOKENS)?;
            let data = bincode::serialize(token)?;
            table.insert(
                scoped(&token.tenant_id, &token.hashed_secret).as_str(),
                data.as_slice(),
            )?;

            let mut id_table = write_txn.open_table(API_TOKEN_IDS)?;
            id_table.insert(
                scoped(&token.tenant_id, &token.id).as_str(),
                token.hashed_secret.as_str(),
            )?;

            // Update user_api_tokens index
            let mut index_table = write_txn.open_table(USER_API_TOKENS)?;
            let user_key = scoped(&token.tenant_id, &token.user_id);
            let mut hashes: Vec<String> = index_table
                .get(user_key.as_str())?
                .map(|v| bincode::deserialize(v.value()).unwrap_or_default())
                .unwrap_or_default();

            if !hashes.contains(&token.hashed_secret) {
                hashes.push(token.hashed_secret.clone());
                let index_data = bincode::serialize(&hashes)?;
                index_table.insert(user_key.as_str(), index_data.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get an API token by the hash of its raw secret
    pub fn get_api_token(
        &self,
        tenant: &str,
        hashed_secret: &str,
    ) -> Result<Option<ApiToken>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(API_TOKENS)?;

        match table.get(scoped(tenant, hashed_secret).as_str())? {
            Some(data) => {
                let token: ApiToken = bincode::deserialize(data.value())?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Get an API token by its non-secret id
    pub fn get_api_token_by_id(
        &self,
        tenant: &str,
        token_id: &str,
    ) -> Result<Option<ApiToken>, DatabaseError> {
        let hashed = {
            let read_txn = self.db.begin_read()?;
            let id_table = read_txn.open_table(API_TOKEN_IDS)?;
            match id_table.get(scoped(tenant, token_id).as_str())? {
                Some(v) => v.value().to_string(),
                None => return Ok(None),
            }
        };
        self.get_api_token(tenant, &hashed)
    }

    /// Delete an API token, returning the removed record
    pub fn delete_api_token(
        &self,
        tenant: &str,
        hashed_secret: &str,
    ) -> Result<Option<ApiToken>, DatabaseError> {
        let write_txn = self.db.begin_write()?;

        let removed: Option<ApiToken> = {
            let table = write_txn.open_table(API_TOKENS)?;
            // Deserialize before the block ends so the access guard does
            // not outlive the table handle
            let found = match table.get(scoped(tenant, hashed_secret).as_str())? {
                Some(data) => Some(bincode::deserialize(data.value())?),
                None => None,
            };
            found
        };

        if let Some(ref token) = removed {
            {
                let mut table = write_txn.open_table(API_TOKENS)?;
                table.remove(scoped(tenant, hashed_secret).as_str())?;
            }
            {
                let mut id_table = write_txn.open_table(API_TOKEN_IDS)?;
                id_table.remove(scoped(tenant, &token.id).as_str())?;
            }

            // Update user_api_tokens index
            let user_key = scoped(tenant, &token.user_id);
            let hashes: Option<Vec<String>> = {
                let index_table = write_txn.open_table(USER_API_TOKENS)?;
                let found = match index_table.get(user_key.as_str())? {
                    Some(data) => Some(bincode::deserialize(data.value())?),
                    None => None,
                };
                found
            };

            if let Some(mut hashes) = hashes {
                hashes.retain(|h| h != hashed_secret);
                let mut index_table = write_txn.open_table(USER_API_TOKENS)?;
                if hashes.is_empty() {
                    index_table.remove(user_key.as_str())?;
                } else {
                    let index_data = bincode::serialize(&hashes)?;
                    index_table.insert(user_key.as_str(), index_data.as_slice())?;
                }
            }
        }

        write_txn.commit()?;
        Ok(removed)
    }

    /// Get all API tokens belonging to one user
    pub fn get_api_tokens_by_user(
        &self,
        tenant: &str,
        user_id: &str,
    ) -> Result<Vec<ApiToken>, DatabaseError> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(USER_API_TOKENS)?;
        let tokens_table = read_txn.open_table(API_TOKENS)?;

        let hashes: Vec<String> = match index_table.get(scoped(tenant, user_id).as_str())? {
            Some(data) => bincode::deserialize(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut tokens = Vec::new();
        for hash in hashes {
            if let Some(data) = tokens_table.get(scoped(tenant, &hash).as_str())? {
                let token: ApiToken = bincode::deserialize(data.value())?;
                tokens.push(token);
            }
        }

        Ok(tokens)
    }

    /// Update an API token's last_used_at timestamp
    pub fn touch_api_token(
        &self,
        tenant: &str,
        hashed_secret: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let write_txn = self.db.begin_write()?;
        let touched = {
            let mut table = write_txn.open_table(API_TOKENS)?;
            let key = scoped(tenant, hashed_secret);
            let existing: Option<ApiToken> = match table.get(key.as_str())? {
                Some(data) => Some(bincode::deserialize(data.value())?),
                None => None,
            };
            match existing {
                Some(mut token) => {
                    token.last_used_at = Some(at);
                    let data = bincode::serialize(&token)?;
                    table.insert(key.as_str(), data.as_slice())?;
                    true
                }
                None => false,
            }
        };
        write_txn.commit()?;
        Ok(touched)
    }
}
