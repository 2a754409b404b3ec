//! In-memory collaborators for exercising the connection manager without a
//! database server or OS keychain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use datalink_core::{
    ConnectRequest, Datasource, DialectFamily, LinkError, LinkResult, SessionEvent, SessionId,
    SqlDriver,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::vault::DatasourceStore;

/// Scriptable [`SqlDriver`] that opens imaginary sessions
pub struct FakeDriver {
    family: DialectFamily,
    emits_events: bool,
    databases: Vec<String>,
    connect_delay: Mutex<Duration>,
    connect_error: Mutex<Option<LinkError>>,
    fail_disconnect: AtomicBool,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    sessions: Mutex<HashMap<SessionId, broadcast::Sender<SessionEvent>>>,
    last_request: Mutex<Option<ConnectRequest>>,
}

impl FakeDriver {
    pub fn new(family: DialectFamily) -> Self {
        Self {
            family,
            emits_events: true,
            databases: vec!["main".to_string()],
            connect_delay: Mutex::new(Duration::ZERO),
            connect_error: Mutex::new(None),
            fail_disconnect: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            sessions: Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        }
    }

    /// Behaves like a client library with no error/close notifications
    pub fn without_events(mut self) -> Self {
        self.emits_events = false;
        self
    }

    pub fn with_databases(mut self, databases: &[&str]) -> Self {
        self.databases = databases.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Every following connect fails with `error` until reset with `None`
    pub fn fail_connects(&self, error: Option<LinkError>) {
        *self.connect_error.lock() = error;
    }

    pub fn fail_disconnects(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.last_request.lock().clone()
    }

    /// Publishes `event` on the session's channel. Returns false if nobody
    /// is listening.
    pub fn emit(&self, session: SessionId, event: SessionEvent) -> bool {
        self.sessions
            .lock()
            .get(&session)
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    async fn open(&self, request: &ConnectRequest) -> LinkResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.connect_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SqlDriver for FakeDriver {
    fn driver_id(&self) -> &'static str {
        "fake"
    }

    fn driver_name(&self) -> &'static str {
        "Fake Driver"
    }

    fn family(&self) -> DialectFamily {
        self.family
    }

    async fn test_connection(&self, request: &ConnectRequest) -> LinkResult<()> {
        self.open(request).await
    }

    async fn connect(&self, request: &ConnectRequest) -> LinkResult<SessionId> {
        self.open(request).await?;

        let session = SessionId::new();
        let (tx, _) = broadcast::channel(8);
        self.sessions.lock().insert(session, tx);
        Ok(session)
    }

    async fn ping(&self, session: SessionId) -> LinkResult<()> {
        if self.sessions.lock().contains_key(&session) {
            Ok(())
        } else {
            Err(LinkError::connection_not_found(session.to_string()))
        }
    }

    async fn list_databases(&self, session: SessionId) -> LinkResult<Vec<String>> {
        self.ping(session).await?;
        Ok(self.databases.clone())
    }

    async fn disconnect(&self, session: SessionId) -> LinkResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        // Dropping the sender ends any monitor listening on it
        let existed = self.sessions.lock().remove(&session).is_some();

        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(LinkError::connection_failed("close failed"));
        }
        if !existed {
            return Err(LinkError::connection_not_found(session.to_string()));
        }
        Ok(())
    }

    async fn subscribe_events(&self, session: SessionId) -> Option<broadcast::Receiver<SessionEvent>> {
        if !self.emits_events {
            return None;
        }
        self.sessions.lock().get(&session).map(|tx| tx.subscribe())
    }
}

/// [`DatasourceStore`] holding secrets in a map and recording touches
#[derive(Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
    touches: Mutex<Vec<String>>,
    fail_touch: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, datasource_id: &str, secret: &str) -> Self {
        self.secrets
            .lock()
            .insert(datasource_id.to_string(), secret.to_string());
        self
    }

    pub fn fail_touches(&self, fail: bool) {
        self.fail_touch.store(fail, Ordering::SeqCst);
    }

    pub fn touches(&self) -> Vec<String> {
        self.touches.lock().clone()
    }
}

#[async_trait]
impl DatasourceStore for MemoryStore {
    async fn rehydrate_secrets(&self, datasource: Datasource) -> LinkResult<Datasource> {
        let id = datasource
            .id()
            .ok_or_else(|| LinkError::secret("Datasource has no id"))?;
        let secret = self
            .secrets
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| LinkError::secret(format!("No secret stored for {}", id)))?;
        Ok(datasource.with_secret(secret))
    }

    async fn touch(&self, datasource_id: &str) -> LinkResult<()> {
        if self.fail_touch.load(Ordering::SeqCst) {
            return Err(LinkError::internal("touch failed"));
        }
        self.touches.lock().push(datasource_id.to_string());
        Ok(())
    }
}
