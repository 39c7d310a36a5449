use super::{
    like_pattern, order_clause, ServerStore, ServerTx, StoreError, UniqueKey, SERVER_COLUMNS,
};
use crate::models::{ListingScope, Organization, Server, ServerQuery, ServerStatus};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS servers (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    host TEXT NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    username TEXT NOT NULL,
    ssh_password TEXT,
    ssh_private_key_path TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    user_id TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS servers_name_org_live
    ON servers (name, organization_id) WHERE deleted_at IS NULL;
CREATE UNIQUE INDEX IF NOT EXISTS servers_endpoint_org_live
    ON servers (host, port, organization_id) WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS servers_scope_live
    ON servers (organization_id, user_id) WHERE deleted_at IS NULL;
"#;

/// Unicode lowercase; SQLite's own `LIKE` only folds ASCII.
const FOLD_FN: &str = "hostctl_fold";

const SEARCH_FILTER: &str = "(?3 IS NULL \
     OR hostctl_fold(name) LIKE hostctl_fold(?3) ESCAPE '\\' \
     OR hostctl_fold(host) LIKE hostctl_fold(?3) ESCAPE '\\' \
     OR hostctl_fold(username) LIKE hostctl_fold(?3) ESCAPE '\\' \
     OR hostctl_fold(description) LIKE hostctl_fold(?3) ESCAPE '\\')";

/// Single-connection SQLite backend. Transactions hold the connection lock
/// for their whole lifetime, so writers are serialized.
#[derive(Clone)]
pub struct SqliteServerStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteServerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_sqlite_error)?;
        Self::wrap(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_error)?;
        Self::wrap(conn)
    }

    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let rest = url
            .strip_prefix("sqlite:")
            .ok_or_else(|| StoreError::UnsupportedUrl(url.to_string()))?;
        if rest == ":memory:" || rest == "//:memory:" {
            return Self::open_in_memory();
        }
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        }
        Self::open(path)
    }

    fn wrap(conn: Connection) -> Result<Self, StoreError> {
        conn.create_scalar_function(
            FOLD_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|value| value.to_lowercase()))
            },
        )
        .map_err(map_sqlite_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl ServerStore for SqliteServerStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(SCHEMA).map_err(map_sqlite_error)
    }

    async fn begin(&self) -> Result<Box<dyn ServerTx>, StoreError> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(map_sqlite_error)?;
        Ok(Box::new(SqliteServerTx {
            conn,
            finished: false,
        }))
    }

    async fn find_live(&self, id: Uuid) -> Result<Option<Server>, StoreError> {
        let conn = self.conn.lock().await;
        select_live(&conn, id)
    }

    async fn count_page(
        &self,
        scope: &ListingScope,
        search: Option<&str>,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let pattern = search.map(like_pattern);
        let sql = format!(
            "SELECT COUNT(*) FROM servers \
             WHERE organization_id = ?1 AND user_id = ?2 AND deleted_at IS NULL AND {}",
            SEARCH_FILTER
        );
        let total: i64 = conn
            .query_row(
                &sql,
                params![
                    scope.organization_id.to_string(),
                    scope.user_id.to_string(),
                    pattern
                ],
                |row| row.get(0),
            )
            .map_err(map_sqlite_error)?;
        Ok(total.max(0) as u64)
    }

    async fn list_page(
        &self,
        scope: &ListingScope,
        query: &ServerQuery,
    ) -> Result<Vec<Server>, StoreError> {
        let conn = self.conn.lock().await;
        let pattern = query.search.as_deref().map(like_pattern);
        let sql = format!(
            "SELECT {} FROM servers \
             WHERE organization_id = ?1 AND user_id = ?2 AND deleted_at IS NULL AND {} \
             {} LIMIT ?4 OFFSET ?5",
            SERVER_COLUMNS,
            SEARCH_FILTER,
            order_clause(query)
        );
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
        let rows = stmt
            .query_map(
                params![
                    scope.organization_id.to_string(),
                    scope.user_id.to_string(),
                    pattern,
                    query.limit() as i64,
                    query.offset() as i64
                ],
                SqliteRow::read,
            )
            .map_err(map_sqlite_error)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(map_sqlite_error)?.into_server()?);
        }
        Ok(out)
    }

    async fn insert_organization(&self, org: &Organization) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![org.id.to_string(), org.name, timestamp(&org.created_at)],
        )
        .map_err(map_sqlite_error)?;
        Ok(())
    }
}

pub struct SqliteServerTx {
    conn: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl SqliteServerTx {
    fn find_one(&self, sql: &str, args: &[&dyn ToSql]) -> Result<Option<Server>, StoreError> {
        let raw = self
            .conn
            .query_row(sql, args, SqliteRow::read)
            .optional()
            .map_err(map_sqlite_error)?;
        raw.map(SqliteRow::into_server).transpose()
    }

    fn expect_one(&self, affected: usize, id: Uuid) -> Result<(), StoreError> {
        if affected == 0 {
            return Err(StoreError::Missing(format!("server {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ServerTx for SqliteServerTx {
    async fn organization_exists(&mut self, id: Uuid) -> Result<bool, StoreError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM organizations WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_sqlite_error)?;
        Ok(found.is_some())
    }

    async fn find_live(&mut self, id: Uuid) -> Result<Option<Server>, StoreError> {
        select_live(&self.conn, id)
    }

    async fn find_by_name(
        &mut self,
        organization_id: Uuid,
        name: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE name = ?1 AND organization_id = ?2 \
             AND deleted_at IS NULL AND (?3 IS NULL OR id <> ?3) LIMIT 1",
            SERVER_COLUMNS
        );
        let exclude = exclude.map(|id| id.to_string());
        self.find_one(&sql, params![name, organization_id.to_string(), exclude])
    }

    async fn find_by_endpoint(
        &mut self,
        organization_id: Uuid,
        host: &str,
        port: u16,
        exclude: Option<Uuid>,
    ) -> Result<Option<Server>, StoreError> {
        let sql = format!(
            "SELECT {} FROM servers WHERE host = ?1 AND port = ?2 AND organization_id = ?3 \
             AND deleted_at IS NULL AND (?4 IS NULL OR id <> ?4) LIMIT 1",
            SERVER_COLUMNS
        );
        let exclude = exclude.map(|id| id.to_string());
        self.find_one(
            &sql,
            params![host, port as i64, organization_id.to_string(), exclude],
        )
    }

    async fn insert(&mut self, server: &Server) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO servers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            SERVER_COLUMNS
        );
        self.conn
            .execute(
                &sql,
                params![
                    server.id.to_string(),
                    server.name,
                    server.description,
                    server.host,
                    server.port as i64,
                    server.username,
                    server.ssh_password,
                    server.ssh_private_key_path,
                    server.status.as_str(),
                    server.user_id.to_string(),
                    server.organization_id.to_string(),
                    timestamp(&server.created_at),
                    timestamp(&server.updated_at),
                    server.deleted_at.as_ref().map(timestamp),
                ],
            )
            .map_err(map_sqlite_error)?;
        Ok(())
    }

    async fn update(&mut self, server: &Server) -> Result<(), StoreError> {
        let affected = self
            .conn
            .execute(
                "UPDATE servers SET name = ?2, description = ?3, host = ?4, port = ?5, \
                 username = ?6, ssh_password = ?7, ssh_private_key_path = ?8, updated_at = ?9 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    server.id.to_string(),
                    server.name,
                    server.description,
                    server.host,
                    server.port as i64,
                    server.username,
                    server.ssh_password,
                    server.ssh_private_key_path,
                    timestamp(&server.updated_at),
                ],
            )
            .map_err(map_sqlite_error)?;
        self.expect_one(affected, server.id)
    }

    async fn update_status(
        &mut self,
        id: Uuid,
        status: ServerStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let affected = self
            .conn
            .execute(
                "UPDATE servers SET status = ?2, updated_at = ?3 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), status.as_str(), timestamp(&at)],
            )
            .map_err(map_sqlite_error)?;
        self.expect_one(affected, id)
    }

    async fn soft_delete(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let stamp = timestamp(&at);
        let affected = self
            .conn
            .execute(
                "UPDATE servers SET deleted_at = ?2, updated_at = ?2 \
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string(), stamp],
            )
            .map_err(map_sqlite_error)?;
        self.expect_one(affected, id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.conn.execute_batch("COMMIT").map_err(map_sqlite_error)?;
        tx.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.finished = true;
        tx.conn.execute_batch("ROLLBACK").map_err(map_sqlite_error)
    }
}

impl Drop for SqliteServerTx {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn select_live(conn: &Connection, id: Uuid) -> Result<Option<Server>, StoreError> {
    let sql = format!(
        "SELECT {} FROM servers WHERE id = ?1 AND deleted_at IS NULL",
        SERVER_COLUMNS
    );
    let raw = conn
        .query_row(&sql, params![id.to_string()], SqliteRow::read)
        .optional()
        .map_err(map_sqlite_error)?;
    raw.map(SqliteRow::into_server).transpose()
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Decode(format!("timestamp {}: {}", raw, err)))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|err| StoreError::Decode(format!("uuid {}: {}", raw, err)))
}

/// Column values as SQLite hands them back, before type conversion.
struct SqliteRow {
    id: String,
    name: String,
    description: String,
    host: String,
    port: i64,
    username: String,
    ssh_password: Option<String>,
    ssh_private_key_path: Option<String>,
    status: String,
    user_id: String,
    organization_id: String,
    created_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl SqliteRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            host: row.get(3)?,
            port: row.get(4)?,
            username: row.get(5)?,
            ssh_password: row.get(6)?,
            ssh_private_key_path: row.get(7)?,
            status: row.get(8)?,
            user_id: row.get(9)?,
            organization_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }

    fn into_server(self) -> Result<Server, StoreError> {
        let port = u16::try_from(self.port)
            .map_err(|_| StoreError::Decode(format!("port out of range: {}", self.port)))?;
        let status = self
            .status
            .parse::<ServerStatus>()
            .map_err(|err| StoreError::Decode(err.message))?;
        Ok(Server {
            id: parse_uuid(&self.id)?,
            name: self.name,
            description: self.description,
            host: self.host,
            port,
            username: self.username,
            ssh_password: self.ssh_password,
            ssh_private_key_path: self.ssh_private_key_path,
            status,
            user_id: parse_uuid(&self.user_id)?,
            organization_id: parse_uuid(&self.organization_id)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            deleted_at: self.deleted_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn map_sqlite_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, message) = &err {
        let text = message.as_deref().unwrap_or_default();
        if code.code == rusqlite::ErrorCode::ConstraintViolation && text.contains("UNIQUE") {
            let key = if text.contains("servers.name") {
                UniqueKey::Name
            } else if text.contains("servers.host") {
                UniqueKey::Endpoint
            } else {
                UniqueKey::Other
            };
            return StoreError::UniqueViolation(key);
        }
    }
    StoreError::Database(err.to_string())
}
