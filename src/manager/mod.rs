// SPDX-License-Identifier: Apache-2.0

//! Connection Manager
//!
//! Registry of live connections keyed by endpoint identity. This is the
//! single source of truth for connection state: at most one physical
//! connection (or one attempt to open it) exists per [`ConnectionId`], and
//! every change to the registry is broadcast as a full snapshot batch.

mod lifecycle;
mod record;
mod snapshot;

pub use record::ConnectionHandle;
pub use snapshot::{ConnectionSnapshot, ConnectionState, CONNECTIONS_UPDATED_EVENT};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use datalink_core::{
    identity, ConnectRequest, ConnectionId, Datasource, LinkError, LinkResult, SessionId,
    SqlDriver,
};
use datalink_drivers::DriverRegistry;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn, Instrument};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::metrics;
use crate::vault::DatasourceStore;
use record::{AttemptStatus, ConnectionRecord};

/// Owns the connection registry and drives every connection's lifecycle.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ManagerConfig,
    drivers: Arc<DriverRegistry>,
    store: Arc<dyn DatasourceStore>,
    records: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
    events: broadcast::Sender<Vec<ConnectionSnapshot>>,
}

enum Plan {
    Ready(ConnectionHandle),
    Wait(watch::Receiver<AttemptStatus>),
    Open {
        epoch: Uuid,
        stale: Option<(Arc<dyn SqlDriver>, SessionId)>,
    },
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        drivers: Arc<DriverRegistry>,
        store: Arc<dyn DatasourceStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.snapshot_channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                drivers,
                store,
                records: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    fn driver_for(&self, datasource: &Datasource) -> LinkResult<Arc<dyn SqlDriver>> {
        self.inner
            .drivers
            .get(datasource.family())
            .ok_or_else(|| LinkError::unsupported_dialect(datasource.dialect().as_str()))
    }

    /// Returns the live connection for the descriptor's endpoint, opening it
    /// if needed.
    ///
    /// Concurrent callers for the same endpoint share one attempt.
    #[instrument(
        skip(self, datasource),
        fields(
            dialect = %datasource.dialect(),
            connection_id = %identity::resolve(&datasource),
        )
    )]
    pub async fn get_or_create(&self, datasource: Datasource) -> LinkResult<ConnectionHandle> {
        let driver = self.driver_for(&datasource)?;
        let id = identity::resolve(&datasource);

        let plan = {
            let mut records = self.inner.records.write();
            let reusable = records.get(&id).and_then(|record| {
                if record.is_live() {
                    record.handle().map(Plan::Ready)
                } else {
                    record.attempt.as_ref().map(|tx| Plan::Wait(tx.subscribe()))
                }
            });

            match reusable {
                Some(plan) => plan,
                None => {
                    // FAILED, or DISCONNECTED with no retry cycle: start over.
                    // Inserting before the first await is what keeps the
                    // attempt exclusive.
                    let stale = records
                        .get(&id)
                        .and_then(|r| r.session.map(|s| (Arc::clone(&r.driver), s)));
                    let record =
                        ConnectionRecord::connecting(id.clone(), datasource.clone(), driver.clone());
                    let epoch = record.epoch;
                    records.insert(id.clone(), record);
                    Plan::Open { epoch, stale }
                }
            }
        };

        match plan {
            Plan::Ready(handle) => {
                trace!("Reusing live connection");
                self.touch_in_background(&datasource);
                Ok(handle)
            }
            Plan::Wait(rx) => {
                debug!("Waiting on in-flight connection attempt");
                self.wait_for_attempt(rx).await
            }
            Plan::Open { epoch, stale } => {
                if let Some((stale_driver, session)) = stale {
                    self.close_in_background(stale_driver, session);
                }
                self.notify();

                // The attempt owns its outcome: a caller that gives up early
                // must not leave the record CONNECTING.
                let manager = self.clone();
                let entry_id = id.clone();
                let attempt = tokio::spawn(
                    async move { manager.open_record(id, epoch, datasource, driver).await }
                        .in_current_span(),
                );
                match attempt.await {
                    Ok(result) => result,
                    Err(e) => {
                        // Dropping the entry drops its attempt sender and
                        // releases any waiters.
                        let removed = {
                            let mut records = self.inner.records.write();
                            let same_entry =
                                records.get(&entry_id).is_some_and(|r| r.epoch == epoch);
                            same_entry && records.remove(&entry_id).is_some()
                        };
                        if removed {
                            self.notify();
                        }
                        Err(LinkError::internal(format!(
                            "Connection attempt task failed: {}",
                            e
                        )))
                    }
                }
            }
        }
    }

    /// Alias of [`get_or_create`](Self::get_or_create)
    pub async fn create_connection(&self, datasource: Datasource) -> LinkResult<ConnectionHandle> {
        self.get_or_create(datasource).await
    }

    async fn open_record(
        &self,
        id: ConnectionId,
        epoch: Uuid,
        datasource: Datasource,
        driver: Arc<dyn SqlDriver>,
    ) -> LinkResult<ConnectionHandle> {
        let opened = async {
            let datasource = self.hydrate(datasource).await?;
            let session = self.open_session(&driver, &datasource).await?;
            Ok::<_, LinkError>((datasource, session))
        }
        .await;

        match opened {
            Ok((datasource, session)) => {
                let handle = {
                    let mut records = self.inner.records.write();
                    match records.get_mut(&id).filter(|r| r.epoch == epoch) {
                        Some(record) => {
                            record.state = ConnectionState::Connected;
                            record.session = Some(session);
                            record.retry_count = 0;
                            record.last_error = None;
                            record.last_connected_at = Some(Utc::now());
                            record.datasource = datasource.clone();
                            let handle = record.handle();
                            if let Some(handle) = handle.clone() {
                                record.finish_attempt(AttemptStatus::Connected(handle));
                            }
                            handle
                        }
                        None => None,
                    }
                };

                let Some(handle) = handle else {
                    // Disconnected (or replaced) while the attempt was in flight
                    self.close_in_background(driver, session);
                    return Err(LinkError::connection_failed(
                        "Connection was closed while it was being opened",
                    ));
                };

                info!(connection_id = %id, "Connection established");
                self.notify();
                self.install_monitor(id, epoch, session, driver).await;
                self.touch_in_background(&datasource);
                Ok(handle)
            }
            Err(err) => {
                warn!(connection_id = %id, error = %err, "Connection attempt failed");
                let updated = {
                    let mut records = self.inner.records.write();
                    match records.get_mut(&id).filter(|r| r.epoch == epoch) {
                        Some(record) => {
                            record.state = ConnectionState::Failed;
                            record.last_error = Some(err.to_string());
                            record.finish_attempt(AttemptStatus::Failed(err.clone()));
                            true
                        }
                        None => false,
                    }
                };
                if updated {
                    self.notify();
                }
                Err(err)
            }
        }
    }

    /// Fills in secrets for persisted descriptors that arrived without them
    async fn hydrate(&self, datasource: Datasource) -> LinkResult<Datasource> {
        if !datasource.needs_secret_rehydration() {
            return Ok(datasource);
        }

        debug!(datasource_id = ?datasource.id(), "Rehydrating secrets");
        self.inner
            .store
            .rehydrate_secrets(datasource)
            .await
            .map_err(|e| match e {
                LinkError::SecretError { .. } => e,
                other => LinkError::secret(other.to_string()),
            })
    }

    /// Opens and probes a physical session, bounded by the connect timeout
    async fn open_session(
        &self,
        driver: &Arc<dyn SqlDriver>,
        datasource: &Datasource,
    ) -> LinkResult<SessionId> {
        let request = ConnectRequest::prepare(datasource.clone());
        let connect_timeout = self.inner.config.connect_timeout();
        let started = Instant::now();

        let result = match timeout(connect_timeout, driver.connect(&request)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::timeout(self.inner.config.connect_timeout_ms)),
        };

        metrics::record_connect(started.elapsed().as_secs_f64() * 1000.0, result.is_ok());
        result
    }

    async fn wait_for_attempt(
        &self,
        mut rx: watch::Receiver<AttemptStatus>,
    ) -> LinkResult<ConnectionHandle> {
        let wait = async {
            loop {
                let status = rx.borrow_and_update().clone();
                match status {
                    AttemptStatus::Connected(handle) => return Ok(handle),
                    AttemptStatus::Failed(err) => return Err(err),
                    AttemptStatus::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(LinkError::connection_failed(
                        "Connection attempt was abandoned",
                    ));
                }
            }
        };

        match timeout(self.inner.config.connecting_wait_timeout(), wait).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_wait_timeout();
                Err(LinkError::timeout(
                    self.inner.config.connecting_wait_timeout_ms,
                ))
            }
        }
    }

    /// Opens a throwaway connection and closes it again.
    ///
    /// Leaves the registry untouched.
    #[instrument(skip(self, datasource), fields(dialect = %datasource.dialect()))]
    pub async fn test_connection(&self, datasource: Datasource) -> LinkResult<()> {
        let driver = self.driver_for(&datasource)?;
        let datasource = self.hydrate(datasource).await?;
        let request = ConnectRequest::prepare(datasource);

        match timeout(
            self.inner.config.test_timeout(),
            driver.test_connection(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LinkError::timeout(self.inner.config.test_timeout_ms)),
        }
    }

    /// Lists the logical databases visible on a connected endpoint
    #[instrument(skip(self), fields(connection_id = %id))]
    pub async fn list_databases(&self, id: &ConnectionId) -> LinkResult<Vec<String>> {
        let handle = {
            let records = self.inner.records.read();
            let record = records
                .get(id)
                .ok_or_else(|| LinkError::connection_not_found(id.as_str()))?;
            if !record.is_live() {
                return Err(LinkError::not_connected(id.as_str()));
            }
            record.handle()
        };

        match handle {
            Some(handle) => handle.list_databases().await,
            None => Err(LinkError::not_connected(id.as_str())),
        }
    }

    /// Handle for a connected endpoint, if any
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let records = self.inner.records.read();
        records
            .get(id)
            .filter(|r| r.is_live())
            .and_then(|r| r.handle())
    }

    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner.records.read().get(id).map(|r| r.state)
    }

    pub fn snapshot(&self, id: &ConnectionId) -> Option<ConnectionSnapshot> {
        self.inner.records.read().get(id).map(|r| r.snapshot())
    }

    /// Snapshot of every registry entry, oldest first
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<ConnectionSnapshot> = {
            let records = self.inner.records.read();
            records.values().map(|r| r.snapshot()).collect()
        };
        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        snapshots
    }

    /// Receives a full snapshot batch after every registry change
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ConnectionSnapshot>> {
        self.inner.events.subscribe()
    }

    /// Closes a connection and forgets it.
    ///
    /// Closing errors are logged, never returned; unknown ids are a no-op.
    /// Stored datasource definitions are not touched.
    #[instrument(skip(self), fields(connection_id = %id))]
    pub async fn disconnect(&self, id: &ConnectionId) -> LinkResult<()> {
        // Dropping the record drops its attempt sender, which releases waiters.
        let removed = self.inner.records.write().remove(id);
        let Some(record) = removed else {
            debug!("Disconnect for unknown connection ignored");
            return Ok(());
        };

        self.notify();

        if let Some(session) = record.session {
            if let Err(e) = record.driver.disconnect(session).await {
                warn!(error = %e, "Error while closing connection");
            }
        }

        info!("Connection closed");
        Ok(())
    }

    /// Disconnects and makes sure no entry remains under `id`.
    pub async fn remove(&self, id: &ConnectionId) -> LinkResult<()> {
        self.disconnect(id).await?;

        let leftover = self.inner.records.write().remove(id);
        if let Some(record) = leftover {
            if let Some(session) = record.session {
                self.close_in_background(record.driver, session);
            }
            self.notify();
        }
        Ok(())
    }

    /// Disconnects every registry entry concurrently
    pub async fn disconnect_all(&self) -> LinkResult<()> {
        let ids: Vec<ConnectionId> = self.inner.records.read().keys().cloned().collect();
        let results = join_all(ids.iter().map(|id| self.disconnect(id))).await;
        results.into_iter().collect::<LinkResult<Vec<()>>>()?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let count = self.inner.records.read().len();
        if let Err(e) = self.disconnect_all().await {
            warn!(error = %e, "Error while shutting down connections");
        }
        info!(connections = count, "Connection manager shut down");
    }

    /// Broadcasts the current registry. Never call with the registry locked.
    fn notify(&self) {
        let snapshots = self.snapshots();
        if self.inner.events.send(snapshots).is_err() {
            trace!("No snapshot subscribers");
        }
    }

    fn touch_in_background(&self, datasource: &Datasource) {
        let Some(datasource_id) = datasource.id().map(str::to_string) else {
            return;
        };
        let store = Arc::clone(&self.inner.store);
        tokio::spawn(async move {
            if let Err(e) = store.touch(&datasource_id).await {
                warn!(datasource_id = %datasource_id, error = %e, "Failed to record datasource usage");
            }
        });
    }

    fn close_in_background(&self, driver: Arc<dyn SqlDriver>, session: SessionId) {
        tokio::spawn(async move {
            if let Err(e) = driver.disconnect(session).await {
                debug!(session = %session, error = %e, "Error while closing orphaned session");
            }
        });
    }
}
