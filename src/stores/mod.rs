use crate::errors::ToolError;
use crate::models::{ListingScope, Organization, Server, ServerQuery, ServerStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod postgres_server_store;
pub mod sqlite_server_store;

pub use postgres_server_store::PostgresServerStore;
pub use sqlite_server_store::SqliteServerStore;

pub(crate) const SERVER_COLUMNS: &str = "id, name, description, host, port, username, \
     ssh_password, ssh_private_key_path, status, user_id, organization_id, \
     created_at, updated_at, deleted_at";

/// Which live-row uniqueness rule a write tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    Name,
    Endpoint,
    Other,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0:?}")]
    UniqueViolation(UniqueKey),
    #[error("{0} not found")]
    Missing(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("failed to decode row: {0}")]
    Decode(String),
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(UniqueKey::Name) => ToolError::already_exists(
                "a server with this name already exists in the organization",
            )
            .with_details(serde_json::json!({"field": "name"})),
            StoreError::UniqueViolation(UniqueKey::Endpoint) => ToolError::already_exists(
                "a server with this host and port already exists in the organization",
            )
            .with_details(serde_json::json!({"field": "host_port"})),
            StoreError::UniqueViolation(UniqueKey::Other) => {
                ToolError::already_exists("record already exists")
            }
            StoreError::Missing(what) => ToolError::server_not_found(format!("{} not found", what)),
            other => ToolError::internal(other.to_string()),
        }
    }
}

/// Non-transactional reads plus the entry point for transactional writes.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Creates tables and indexes if they do not exist.
    async fn migrate(&self) -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn ServerTx>, StoreError>;

    async fn find_live(&self, id: Uuid) -> Result<Option<Server>, StoreError>;

    async fn count_page(
        &self,
        scope: &ListingScope,
        search: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn list_page(
        &self,
        scope: &ListingScope,
        query: &ServerQuery,
    ) -> Result<Vec<Server>, StoreError>;

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError>;
}

/// One open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait ServerTx: Send {
    async fn organization_exists(&mut self, id: Uuid) -> Result<bool, StoreError>;

    async fn find_live(&mut self, id: Uuid) -> Result<Option<Server>, StoreError>;

    async fn find_by_name(
        &mut self,
        organization_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError>;

    async fn find_by_endpoint(
        &mut self,
        organization_id: Uuid,
        host: &str,
        port: u16,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError>;

    async fn insert(&mut self, server: &Server) -> Result<(), StoreError>;

    async fn update(&mut self, server: &Server) -> Result<(), StoreError>;

    async fn update_status(
        &mut self,
        id: Uuid,
        status: ServerStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn soft_delete(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Opens the backend named by `url`: `postgres://`, `postgresql://`,
/// `sqlite://<path>` or `sqlite::memory:`.
pub async fn open_store(url: &str, pool_size: u32) -> Result<Arc<dyn ServerStore>, StoreError> {
    let trimmed = url.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        let store = PostgresServerStore::connect(trimmed, pool_size).await?;
        return Ok(Arc::new(store));
    }
    if trimmed.starts_with("sqlite:") {
        return Ok(Arc::new(SqliteServerStore::from_url(trimmed)?));
    }
    Err(StoreError::UnsupportedUrl(trimmed.to_string()))
}

/// Substring pattern for `LIKE ... ESCAPE '\'`.
pub(crate) fn like_pattern(search: &str) -> String {
    let mut out = String::with_capacity(search.len() + 2);
    out.push('%');
    for ch in search.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

pub(crate) fn order_clause(query: &ServerQuery) -> String {
    format!(
        "ORDER BY {} {}, id ASC",
        query.sort_field.column(),
        query.sort_order.as_sql()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SortField, SortOrder};

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("web"), "%web%");
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }

    #[test]
    fn order_clause_uses_whitelisted_column() {
        let query = ServerQuery {
            sort_field: SortField::Port,
            sort_order: SortOrder::Asc,
            ..ServerQuery::default()
        };
        assert_eq!(order_clause(&query), "ORDER BY port ASC, id ASC");
    }

    #[test]
    fn unique_violations_become_already_exists() {
        let err: ToolError = StoreError::UniqueViolation(UniqueKey::Endpoint).into();
        assert_eq!(err.code, "ALREADY_EXISTS");
        let err: ToolError = StoreError::Database("boom".to_string()).into();
        assert_eq!(err.code, "INTERNAL");
    }
}
