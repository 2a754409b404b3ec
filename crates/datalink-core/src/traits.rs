//! SqlDriver trait definition
//!
//! The seam between the connection manager and the SQL client library.
//! Drivers own their physical pools and hand out [`SessionId`]s; the manager
//! only keeps those back-references.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::datasource::{Datasource, DialectFamily};
use crate::error::LinkResult;
use crate::tls::TlsMaterial;
use crate::types::{SessionEvent, SessionId};

/// Everything a driver needs to open a physical connection
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Hydrated descriptor (secrets already present)
    pub datasource: Datasource,
    /// PEM material resolved from the descriptor's TLS paths
    pub tls: Option<TlsMaterial>,
}

impl ConnectRequest {
    /// Builds a request, reading any referenced certificate files from disk.
    pub fn prepare(datasource: Datasource) -> Self {
        let tls = datasource.tls().and_then(TlsMaterial::prepare);
        Self { datasource, tls }
    }
}

/// Core trait that every SQL client integration implements
#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Unique identifier for this driver (e.g. "postgres", "mysql", "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Human-readable name
    fn driver_name(&self) -> &'static str;

    /// Protocol family this driver speaks
    fn family(&self) -> DialectFamily;

    /// Opens a throwaway connection, probes it and closes it again.
    async fn test_connection(&self, request: &ConnectRequest) -> LinkResult<()>;

    /// Opens a physical connection and returns its session identifier.
    async fn connect(&self, request: &ConnectRequest) -> LinkResult<SessionId>;

    /// Liveness probe (`SELECT 1`)
    async fn ping(&self, session: SessionId) -> LinkResult<()>;

    /// Lists the logical databases visible on the session
    async fn list_databases(&self, session: SessionId) -> LinkResult<Vec<String>>;

    /// Closes a session and releases its pool
    async fn disconnect(&self, session: SessionId) -> LinkResult<()>;

    /// Error/close notifications for a session.
    ///
    /// Drivers whose client library exposes no such events return `None`;
    /// loss on those sessions is only noticed when a later query fails.
    async fn subscribe_events(&self, _session: SessionId) -> Option<broadcast::Receiver<SessionEvent>> {
        None
    }
}
