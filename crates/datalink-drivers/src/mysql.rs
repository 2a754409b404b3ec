//! MySQL Driver
//!
//! Implements [`SqlDriver`] for MySQL and MariaDB using SQLx.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use datalink_core::{
    ConnectRequest, Datasource, DialectFamily, HostDatasource, LinkError, LinkResult,
    SessionEvent, SessionId, SqlDriver, TlsMaterial, TlsMode,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::heartbeat::Heartbeat;
use crate::PoolSettings;

pub struct MySqlSession {
    pub pool: MySqlPool,
    heartbeat: Heartbeat,
}

/// MySQL driver implementation
pub struct MySqlDriver {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<MySqlSession>>>>,
    heartbeat_interval: Duration,
    pool_settings: PoolSettings,
}

impl MySqlDriver {
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

    async fn get_session(&self, session: SessionId) -> LinkResult<Arc<MySqlSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session)
            .cloned()
            .ok_or_else(|| LinkError::connection_not_found(session.to_string()))
    }

    fn host_datasource(request: &ConnectRequest) -> LinkResult<&HostDatasource> {
        match &request.datasource {
            Datasource::Mysql(ds) | Datasource::Mariadb(ds) => Ok(ds),
            other => Err(LinkError::unsupported_dialect(other.dialect().as_str())),
        }
    }

    fn ssl_mode(mode: TlsMode) -> MySqlSslMode {
        match mode {
            TlsMode::Disabled => MySqlSslMode::Disabled,
            TlsMode::Required => MySqlSslMode::Required,
            TlsMode::VerifyCa => MySqlSslMode::VerifyCa,
            TlsMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        }
    }

    pub(crate) fn build_connect_options(
        ds: &HostDatasource,
        tls: Option<&TlsMaterial>,
    ) -> MySqlConnectOptions {
        let mut opts = MySqlConnectOptions::new().host(&ds.host).port(ds.port);

        // No default schema: listing databases must work without one.
        if let Some(database) = ds.database.as_deref().filter(|d| !d.is_empty()) {
            opts = opts.database(database);
        }
        if let Some(username) = ds.username.as_deref() {
            opts = opts.username(username);
        }
        if let Some(password) = ds.password.as_ref() {
            opts = opts.password(password.expose());
        }

        let Some(tls) = tls else {
            return opts.ssl_mode(MySqlSslMode::Disabled);
        };

        opts = opts.ssl_mode(Self::ssl_mode(tls.mode));
        if let Some(ca) = tls.ca_pem.as_ref() {
            opts = opts.ssl_ca_from_pem(ca.as_bytes().to_vec());
        }
        if let Some(cert) = tls.cert_pem.as_ref() {
            opts = opts.ssl_client_cert_from_pem(cert.as_bytes());
        }
        if let Some(key) = tls.key_pem.as_ref() {
            opts = opts.ssl_client_key_from_pem(key.as_bytes());
        }
        opts
    }

    pub(crate) fn map_connect_error(message: String) -> LinkError {
        if message.contains("Access denied") {
            LinkError::auth_failed(message)
        } else if message.contains("SSL") || message.contains("TLS") {
            LinkError::ssl(message)
        } else {
            LinkError::connection_failed(message)
        }
    }

    async fn open_pool(
        &self,
        request: &ConnectRequest,
        settings: &PoolSettings,
    ) -> LinkResult<MySqlPool> {
        let ds = Self::host_datasource(request)?;
        let opts = Self::build_connect_options(ds, request.tls.as_ref());

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(opts)
            .await
            .map_err(|e| Self::map_connect_error(e.to_string()))?;

        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(LinkError::connection_failed(e.to_string()));
        }

        Ok(pool)
    }
}

#[async_trait]
impl SqlDriver for MySqlDriver {
    fn driver_id(&self) -> &'static str {
        "mysql"
    }

    fn driver_name(&self) -> &'static str {
        "MySQL / MariaDB"
    }

    fn family(&self) -> DialectFamily {
        DialectFamily::MySql
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
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, Arc::new(MySqlSession { pool, heartbeat }));
        debug!(session = %session_id, "MySQL session opened");

        Ok(session_id)
    }

    async fn ping(&self, session: SessionId) -> LinkResult<()> {
        let mysql_session = self.get_session(session).await?;
        sqlx::query("SELECT 1")
            .execute(&mysql_session.pool)
            .await
            .map_err(|e| LinkError::connection_failed(e.to_string()))?;
        Ok(())
    }

    async fn list_databases(&self, session: SessionId) -> LinkResult<Vec<String>> {
        let mysql_session = self.get_session(session).await?;

        // SHOW DATABASES returns VARBINARY on some server versions
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as("SHOW DATABASES")
            .fetch_all(&mysql_session.pool)
            .await
            .map_err(|e| LinkError::execution_error(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name,)| String::from_utf8_lossy(&name).into_owned())
            .collect())
    }

    async fn disconnect(&self, session: SessionId) -> LinkResult<()> {
        let mysql_session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&session)
                .ok_or_else(|| LinkError::connection_not_found(session.to_string()))?
        };

        mysql_session.pool.close().await;
        Ok(())
    }

    async fn subscribe_events(&self, session: SessionId) -> Option<broadcast::Receiver<SessionEvent>> {
        let sessions = self.sessions.read().await;
        sessions.get(&session).map(|s| s.heartbeat.subscribe())
    }
}
