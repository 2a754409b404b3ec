//! Registry entries and the handles given out for them

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use datalink_core::{
    format_connection_string, ConnectionId, Datasource, LinkError, LinkResult, SessionId,
    SqlDriver,
};
use tokio::sync::watch;
use uuid::Uuid;

use super::snapshot::{ConnectionSnapshot, ConnectionState};

/// Cheap, cloneable reference to a live physical connection.
///
/// The pool itself stays inside the driver; the handle only names it.
#[derive(Clone)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    session: SessionId,
    driver: Arc<dyn SqlDriver>,
}

impl ConnectionHandle {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn driver(&self) -> &Arc<dyn SqlDriver> {
        &self.driver
    }

    /// Liveness probe against the underlying session
    pub async fn ping(&self) -> LinkResult<()> {
        self.driver.ping(self.session).await
    }

    pub async fn list_databases(&self) -> LinkResult<Vec<String>> {
        self.driver.list_databases(self.session).await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .field("session", &self.session)
            .field("driver", &self.driver.driver_id())
            .finish()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id && self.session == other.session
    }
}

pub(crate) fn new_attempt() -> watch::Sender<AttemptStatus> {
    watch::channel(AttemptStatus::Pending).0
}

/// Outcome of an in-flight attempt, shared with every waiter
#[derive(Debug, Clone)]
pub(crate) enum AttemptStatus {
    Pending,
    Connected(ConnectionHandle),
    Failed(LinkError),
}

pub(crate) struct ConnectionRecord {
    pub id: ConnectionId,
    pub name: String,
    pub state: ConnectionState,
    pub session: Option<SessionId>,
    pub driver: Arc<dyn SqlDriver>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Hydrated once secrets were rehydrated; reconnects reuse it as-is
    pub datasource: Datasource,
    pub connection_string: Option<String>,
    /// Distinguishes this entry from a later one under the same id
    pub epoch: Uuid,
    /// Present while an initial attempt or a retry cycle is running
    pub attempt: Option<watch::Sender<AttemptStatus>>,
}

impl ConnectionRecord {
    /// Fresh CONNECTING entry with an open attempt channel
    pub fn connecting(id: ConnectionId, datasource: Datasource, driver: Arc<dyn SqlDriver>) -> Self {
        Self {
            name: datasource.name().to_string(),
            connection_string: format_connection_string(&datasource),
            id,
            state: ConnectionState::Connecting,
            session: None,
            driver,
            retry_count: 0,
            last_error: None,
            created_at: Utc::now(),
            last_connected_at: None,
            datasource,
            epoch: Uuid::new_v4(),
            attempt: Some(new_attempt()),
        }
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.session.map(|session| ConnectionHandle {
            connection_id: self.id.clone(),
            session,
            driver: Arc::clone(&self.driver),
        })
    }

    pub fn is_live(&self) -> bool {
        self.state == ConnectionState::Connected && self.session.is_some()
    }

    /// Resolves the attempt channel, waking every waiter
    pub fn finish_attempt(&mut self, status: AttemptStatus) {
        if let Some(tx) = self.attempt.take() {
            let _ = tx.send(status);
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            last_connected_at: self.last_connected_at,
            connection_string: self.connection_string.clone(),
        }
    }
}
