use redb::TableDefinition;

/// User documents: "tenant/user_id" -> User (bincode)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Workspaces: "tenant/workspace_id" -> Workspace (bincode)
pub const WORKSPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("workspaces");

/// API tokens: "tenant/hashed_secret" -> ApiToken (bincode)
pub const API_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_tokens");

/// Secondary index: "tenant/token_id" -> hashed_secret (for delete/list by id)
pub const API_TOKEN_IDS: TableDefinition<&str, &str> = TableDefinition::new("api_token_ids");

/// Secondary index: "tenant/user_id" -> Vec<hashed_secret> (for listing a user's tokens)
pub const USER_API_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_api_tokens");

/// Compose a tenant-scoped key. Every table is keyed this way so that one
/// tenant can never observe another tenant's rows.
pub fn scoped(tenant: &str, id: &str) -> String {
    format!("{tenant}/{id}")
}
