use super::{
    like_pattern, order_clause, ServerStore, ServerTx, StoreError, UniqueKey, SERVER_COLUMNS,
};
use crate::constants::storage::POOL_CONNECT_TIMEOUT_MS;
use crate::models::{ListingScope, Organization, Server, ServerQuery, ServerStatus};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use bb8_postgres::PostgresConnectionManager;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config, NoTls, Row};
use uuid::Uuid;

type PgPool = Pool<PostgresConnectionManager<NoTls>>;
type PgConnection = PooledConnection<'static, PostgresConnectionManager<NoTls>>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    deleted_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS servers (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    host TEXT NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    username TEXT NOT NULL,
    ssh_password TEXT,
    ssh_private_key_path TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    user_id UUID NOT NULL,
    organization_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS servers_name_org_live
    ON servers (name, organization_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS servers_endpoint_org_live
    ON servers (host, port, organization_id) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS servers_scope_live
    ON servers (organization_id, user_id) WHERE deleted_at IS NULL;
"#;

const SEARCH_FILTER: &str = "($3::text IS NULL OR name ILIKE $3 ESCAPE '\\' \
     OR host ILIKE $3 ESCAPE '\\' OR username ILIKE $3 ESCAPE '\\' \
     OR description ILIKE $3 ESCAPE '\\')";

#[derive(Clone)]
pub struct PostgresServerStore {
    pool: PgPool,
}

impl PostgresServerStore {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let config: Config = url
            .parse()
            .map_err(|err: tokio_postgres::Error| StoreError::Database(err.to_string()))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_millis(POOL_CONNECT_TIMEOUT_MS))
            .build(manager)
            .await
            .map_err(map_pg_error)?;
        Ok(Self { pool })
    }

    async fn connection(&self) -> Result<PgConnection, StoreError> {
        self.pool.get_owned().await.map_err(map_pool_error)
    }
}

#[async_trait]
impl ServerStore for PostgresServerStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.batch_execute(SCHEMA).await.map_err(map_pg_error)
    }

    async fn begin(&self) -> Result<Box<dyn ServerTx>, StoreError> {
        let conn = self.connection().await?;
        conn.batch_execute("BEGIN").await.map_err(map_pg_error)?;
        Ok(Box::new(PostgresServerTx { conn: Some(conn) }))
    }

    async fn find_live(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let conn = self.connection().await?;
        let sql = format!(
            "SELECT {} FROM servers WHERE id = $1 AND deleted_at IS NULL",
            SERVER_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id]).await.map_err(map_pg_error)?;
        row.as_ref().map(row_to_server).transpose()
    }

    async fn count_page(
        &self,
        scope: &ListingScope,
        search: Option<&str>,
    ) -> Result<u64, StoreError> {
        let conn = self.connection().await?;
        let pattern = search.map(like_pattern);
        let sql = format!(
            "SELECT COUNT(*) FROM servers \
             WHERE organization_id = $1 AND user_id = $2 AND deleted_at IS NULL AND {}",
            SEARCH_FILTER
        );
        let row = conn
            .query_one(&sql, &[&scope.organization_id, &scope.user_id, &pattern])
            .await
            .map_err(map_pg_error)?;
        let total: i64 = row
            .try_get(0)
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        Ok(total.max(0) as u64)
    }

    async fn list_page(
        &self,
        scope: &ListingScope,
        query: &ServerQuery,
    ) -> Result<Vec<Server>, StoreError> {
        let conn = self.connection().await?;
        let pattern = query.search.as_deref().map(like_pattern);
        let limit = query.limit() as i64;
        let offset = query.offset() as i64;
        let sql = format!(
            "SELECT {} FROM servers \
             WHERE organization_id = $1 AND user_id = $2 AND deleted_at IS NULL AND {} \
             {} LIMIT $4 OFFSET $5",
            SERVER_COLUMNS,
            SEARCH_FILTER,
            order_clause(query)
        );
        let params: [&(dyn ToSql + Sync); 5] = [
            &scope.organization_id,
            &scope.user_id,
            &pattern,
            &limit,
            &offset,
        ];
        let rows = conn.query(&sql, &params).await.map_err(map_pg_error)?;
        rows.iter().map(row_to_server).collect()
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES ($1, $2, $3)",
            &[&org.id, &org.name, &org.created_at],
        )
        .await
        .map_err(map_pg_error)?;
        Ok(())
    }
}

/// Transaction on a pooled connection held for its whole lifetime.
pub struct PostgresServerTx {
    conn: Option<PgConnection>,
}

impl PostgresServerTx {
    fn conn(&self) -> Result<&PgConnection, StoreError> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))
    }

    async fn find_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Server>, StoreError> {
        let row = self
            .conn()?
            .query_opt(sql, params)
            .await
            .map_err(map_pg_error)?;
        row.as_ref().map(row_to_server).transpose()
    }

    async fn execute_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        id: Uuid,
    ) -> Result<(), StoreError> {
        let affected = self
            .conn()?
            .execute(sql, params)
            .await
            .map_err(map_pg_error)?;
        if affected == 0 {
            return Err(StoreError::Missing(format!("server {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerTx for PostgresServerTx {
    async fn organization_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let row = self
            .conn()?
            .query_opt(
                "SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.is_some())
    }

    async fn find_live(&mut self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE id = $1 AND deleted_at IS NULL",
            SERVER_COLUMNS
        );
        self.find_one(&sql, &[&id]).await
    }

    async fn find_by_name(
        &mut self,
        organization_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE name = $1 AND organization_id = $2 \
             AND deleted_at IS NULL AND ($3::uuid IS NULL OR id <> $3) LIMIT 1",
            SERVER_COLUMNS
        );
        self.find_one(&sql, &[&name, &organization_id, &exclude])
            .await
    }

    async fn find_by_endpoint(
        &mut self,
        organization_id: Uuid,
        host: &str,
        port: u16,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE host = $1 AND port = $2 AND organization_id = $3 \
             AND deleted_at IS NULL AND ($4::uuid IS NULL OR id <> $4) LIMIT 1",
            SERVER_COLUMNS
        );
        let port = port as i32;
        self.find_one(&sql, &[&host, &port, &organization_id, &exclude])
            .await
    }

    async fn insert(&mut self, server: &Server) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO servers ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            SERVER_COLUMNS
        );
        let port = server.port as i32;
        let status = server.status.as_str();
        self.conn()?
            .execute(
                &sql,
                &[
                    &server.id,
                    &server.name,
                    &server.description,
                    &server.host,
                    &port,
                    &server.username,
                    &server.ssh_password,
                    &server.ssh_private_key_path,
                    &status,
                    &server.user_id,
                    &server.organization_id,
                    &server.created_at,
                    &server.updated_at,
                    &server.deleted_at,
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn update(&mut self, server: &Server) -> Result<(), StoreError> {
        let port = server.port as i32;
        self.execute_one(
            "UPDATE servers SET name = $2, description = $3, host = $4, port = $5, \
             username = $6, ssh_password = $7, ssh_private_key_path = $8, updated_at = $9 \
             WHERE id = $1 AND deleted_at IS NULL",
            &[
                &server.id,
                &server.name,
                &server.description,
                &server.host,
                &port,
                &server.username,
                &server.ssh_password,
                &server.ssh_private_key_path,
                &server.updated_at,
            ],
            server.id,
        )
        .await
    }

    async fn update_status(
        &mut self,
        id: Uuid,
        status: ServerStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let status = status.as_str();
        self.execute_one(
            "UPDATE servers SET status = $2, updated_at = $3 \
             WHERE id = $1 AND deleted_at IS NULL",
            &[&id, &status, &at],
            id,
        )
        .await
    }

    async fn soft_delete(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.execute_one(
            "UPDATE servers SET deleted_at = $2, updated_at = $2 \
             WHERE id = $1 AND deleted_at IS NULL",
            &[&id, &at],
            id,
        )
        .await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let conn = tx
            .conn
            .take()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))?;
        if let Err(err) = conn.batch_execute("COMMIT").await {
            let _ = conn.batch_execute("ROLLBACK").await;
            return Err(map_pg_error(err));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        match tx.conn.take() {
            Some(conn) => conn.batch_execute("ROLLBACK").await.map_err(map_pg_error),
            None => Ok(()),
        }
    }
}

impl Drop for PostgresServerTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = conn.batch_execute("ROLLBACK").await;
            });
        }
    }
}

fn row_to_server(row: &Row) -> Result<Server, StoreError> {
    let decode = |err: tokio_postgres::Error| StoreError::Decode(err.to_string());
    let port: i32 = row.try_get("port").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(Server {
        id: row.try_get("id").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        host: row.try_get("host").map_err(decode)?,
        port: u16::try_from(port)
            .map_err(|_| StoreError::Decode(format!("port out of range: {}", port)))?,
        username: row.try_get("username").map_err(decode)?,
        ssh_password: row.try_get("ssh_password").map_err(decode)?,
        ssh_private_key_path: row.try_get("ssh_private_key_path").map_err(decode)?,
        status: status
            .parse()
            .map_err(|err: crate::errors::ToolError| StoreError::Decode(err.message))?,
        user_id: row.try_get("user_id").map_err(decode)?,
        organization_id: row.try_get("organization_id").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
        deleted_at: row.try_get("deleted_at").map_err(decode)?,
    })
}

fn map_pg_error(err: tokio_postgres::Error) -> StoreError {
    if let Some(db) = err.as_db_error() {
        if *db.code() == SqlState::UNIQUE_VIOLATION {
            let key = match db.constraint() {
                Some("servers_name_org_live") => UniqueKey::Name,
                Some("servers_endpoint_org_live") => UniqueKey::Endpoint,
                _ => UniqueKey::Other,
            };
            return StoreError::UniqueViolation(key);
        }
    }
    StoreError::Database(err.to_string())
}

fn map_pool_error(err: RunError<tokio_postgres::Error>) -> StoreError {
    match err {
        RunError::User(inner) => map_pg_error(inner),
        RunError::TimedOut => StoreError::Pool("timed out waiting for a connection".to_string()),
    }
}
