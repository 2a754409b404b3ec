// SPDX-License-Identifier: Apache-2.0

//! SQLite Driver
//!
//! Implements [`SqlDriver`] for SQLite files using SQLx.
//!
//! ## SQLite Specifics
//!
//! - The descriptor's `file_path` is the database; missing files are created
//! - Supports `:memory:` for in-memory databases
//! - Uses WAL mode for better concurrency
//! - A file holds exactly one database, reported by its file name
//! - No session events: a lost file handle is only seen on the next query

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datalink_core::{
    ConnectRequest, Datasource, DialectFamily, FileDatasource, LinkError, LinkResult, SessionId,
    SqlDriver,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::RwLock;
use tracing::debug;

use crate::PoolSettings;

const MEMORY_PATH: &str = ":memory:";

/// Holds the connection state for a SQLite session.
pub struct SqliteSession {
    pub pool: SqlitePool,
    pub db_path: String,
}

/// SQLite driver implementation
pub struct SqliteDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<SqliteSession>>>>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get_session(&self, session: SessionId) -> LinkResult<Arc<SqliteSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| LinkError::connection_not_found(session.to_string()))
    }

    fn file_datasource(request: &ConnectRequest) -> LinkResult<&FileDatasource> {
        match &request.datasource {
            Datasource::Sqlite(ds) => Ok(ds),
            other => Err(LinkError::unsupported_dialect(other.dialect().as_str())),
        }
    }

    fn build_connect_options(path: &str) -> SqliteConnectOptions {
        let conn_str = if path == MEMORY_PATH {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}", path)
        };

        SqliteConnectOptions::from_str(&conn_str)
            .unwrap_or_else(|_| SqliteConnectOptions::new().filename(path))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
    }

    /// Name reported by `list_databases`: the file's base name
    pub(crate) fn database_name(path: &str) -> String {
        if path == MEMORY_PATH {
            return "main".to_string();
        }
        Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string())
    }

    async fn create_pool(path: &str, settings: &PoolSettings) -> LinkResult<SqlitePool> {
        // An in-memory database lives per connection; more than one would
        // hand out unrelated databases.
        let max_connections = if path == MEMORY_PATH {
            1
        } else {
            settings.max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(settings.min_connections.min(max_connections))
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(Self::build_connect_options(path))
            .await
            .map_err(|e| LinkError::connection_failed(e.to_string()))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(LinkError::execution_error(e.to_string()));
        }

        Ok(pool)
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlDriver for SqliteDriver {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    fn family(&self) -> DialectFamily {
        DialectFamily::Sqlite
    }

    async fn test_connection(&self, request: &ConnectRequest) -> LinkResult<()> {
        let ds = Self::file_datasource(request)?;
        let pool = Self::create_pool(&ds.file_path, &PoolSettings::single()).await?;
        pool.close().await;
        Ok(())
    }

    async fn connect(&self, request: &ConnectRequest) -> LinkResult<SessionId> {
        let ds = Self::file_datasource(request)?;
        let pool = Self::create_pool(&ds.file_path, &PoolSettings::default()).await?;

        let session_id = SessionId::new();
        let session = Arc::new(SqliteSession {
            pool,
            db_path: ds.file_path.clone(),
        });

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);
        debug!(session = %session_id, path = %ds.file_path, "SQLite session opened");

        Ok(session_id)
    }

    async fn ping(&self, session: SessionId) -> LinkResult<()> {
        let sqlite_session = self.get_session(session).await?;
        sqlx::query("SELECT 1")
            .execute(&sqlite_session.pool)
            .await
            .map_err(|e| LinkError::connection_failed(e.to_string()))?;
        Ok(())
    }

    async fn list_databases(&self, session: SessionId) -> LinkResult<Vec<String>> {
        let sqlite_session = self.get_session(session).await?;
        Ok(vec![Self::database_name(&sqlite_session.db_path)])
    }

    async fn disconnect(&self, session: SessionId) -> LinkResult<()> {
        let sqlite_session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&session)
                .ok_or_else(|| LinkError::connection_not_found(session.to_string()))?
        };

        sqlite_session.pool.close().await;
        Ok(())
    }
}
