// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL Driver
//!
//! Implements [`SqlDriver`] for the PostgreSQL wire protocol using SQLx.
//! CockroachDB speaks the same protocol and is served by this driver too.
//!
//! Each session owns a pool plus a heartbeat task; the heartbeat is the only
//! source of error/close events because sqlx pools do not emit any.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datalink_core::{
    ConnectRequest, Datasource, DialectFamily, HostDatasource, LinkError, LinkResult,
    SessionEvent, SessionId, SqlDriver, TlsMaterial, TlsMode,
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::heartbeat::Heartbeat;
use crate::PoolSettings;

const DEFAULT_DATABASE: &str = "postgres";

/// Holds the connection state for a PostgreSQL session.
pub struct PostgresSession {
    pub pool: PgPool,
    heartbeat: Heartbeat,
}

/// PostgreSQL driver implementation
pub struct PostgresDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<PostgresSession>>>>,
    heartbeat_interval: Duration,
    pool_settings: PoolSettings,
}

impl PostgresDriver {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            heartbeat_interval,
            pool_settings: PoolSettings::default(),
        }
    }

    pub fn with_pool_settings(mut self, pool_settings: PoolSettings) -> Self {
        self.pool_settings = pool_settings;
        self
    }

    async fn get_session(&self, session: SessionId) -> LinkResult<Arc<PostgresSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| LinkError::connection_not_found(session.to_string()))
    }

    fn host_datasource(request: &ConnectRequest) -> LinkResult<&HostDatasource> {
        match &request.datasource {
            Datasource::Postgres(ds) | Datasource::Cockroachdb(ds) => Ok(ds),
            other => Err(LinkError::unsupported_dialect(other.dialect().as_str())),
        }
    }

    fn ssl_mode(mode: TlsMode) -> PgSslMode {
        match mode {
            TlsMode::Disabled => PgSslMode::Disable,
            TlsMode::Required => PgSslMode::Require,
            TlsMode::VerifyCa => PgSslMode::VerifyCa,
            TlsMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }

    /// Builds connect options from the descriptor and prepared TLS material
    pub(crate) fn build_connect_options(
        ds: &HostDatasource,
        tls: Option<&TlsMaterial>,
    ) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new()
            .host(&ds.host)
            .port(ds.port)
            .database(ds.database.as_deref().unwrap_or(DEFAULT_DATABASE));

        if let Some(username) = ds.username.as_deref() {
            opts = opts.username(username);
        }
        if let Some(password) = ds.password.as_ref() {
            opts = opts.password(password.expose());
        }

        match tls {
            None => opts.ssl_mode(PgSslMode::Disable),
            Some(tls) => {
                let mut opts = opts.ssl_mode(Self::ssl_mode(tls.mode));
                if let Some(ca) = tls.ca_pem.as_ref() {
                    opts = opts.ssl_root_cert_from_pem(ca.as_bytes().to_vec());
                }
                if let Some(cert) = tls.cert_pem.as_ref() {
                    opts = opts.ssl_client_cert_from_pem(cert.as_bytes());
                }
                if let Some(key) = tls.key_pem.as_ref() {
                    opts = opts.ssl_client_key_from_pem(key.as_bytes());
                }
                opts
            }
        }
    }

    fn map_connect_error(e: sqlx::Error) -> LinkError {
        let msg = e.to_string();
        if msg.contains("password authentication failed") {
            LinkError::auth_failed(msg)
        } else if msg.contains("SSL") || msg.contains("TLS") {
            LinkError::ssl(msg)
        } else {
            LinkError::connection_failed(msg)
        }
    }

    async fn open_pool(
        &self,
        request: &ConnectRequest,
        settings: &PoolSettings,
    ) -> LinkResult<PgPool> {
        let ds = Self::host_datasource(request)?;
        let opts = Self::build_connect_options(ds, request.tls.as_ref());

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(opts)
            .await
            .map_err(Self::map_connect_error)?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(LinkError::connection_failed(e.to_string()));
        }

        Ok(pool)
    }
}

#[async_trait]
impl SqlDriver for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL / CockroachDB"
    }

    fn family(&self) -> DialectFamily {
        DialectFamily::Postgres
    }

    async fn test_connection(&self, request: &ConnectRequest) -> LinkResult<()> {
        let pool = self.open_pool(request, &PoolSettings::single()).await?;
        pool.close().await;
        Ok(())
    }

    async fn connect(&self, request: &ConnectRequest) -> LinkResult<SessionId> {
        let pool = self.open_pool(request, &self.pool_settings).await?;

        let probe_pool = pool.clone();
        let closed_pool = pool.clone();
        let heartbeat = Heartbeat::spawn(
            self.heartbeat_interval,
            move || closed_pool.is_closed(),
            move || {
                let pool = probe_pool.clone();
                async move {
                    sqlx::query("SELECT 1")
                        .execute(&pool)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            },
        );

        let session_id = SessionId::new();
        let session = Arc::new(PostgresSession { pool, heartbeat });

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);
        debug!(session = %session_id, "PostgreSQL session opened");

        Ok(session_id)
    }

    async fn ping(&self, session: SessionId) -> LinkResult<()> {
        let pg_session = self.get_session(session).await?;
        sqlx::query("SELECT 1")
            .execute(&pg_session.pool)
            .await
            .map_err(|e| LinkError::connection_failed(e.to_string()))?;
        Ok(())
    }

    async fn list_databases(&self, session: SessionId) -> LinkResult<Vec<String>> {
        let pg_session = self.get_session(session).await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )
        .fetch_all(&pg_session.pool)
        .await
        .map_err(|e| LinkError::execution_error(e.to_string()))?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn disconnect(&self, session: SessionId) -> LinkResult<()> {
        let pg_session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&session)
                .ok_or_else(|| LinkError::connection_not_found(session.to_string()))?
        };

        pg_session.pool.close().await;
        Ok(())
    }

    async fn subscribe_events(&self, session: SessionId) -> Option<broadcast::Receiver<SessionEvent>> {
        let sessions = self.sessions.read().await;
        sessions.get(&session).map(|s| s.heartbeat.subscribe())
    }
}
