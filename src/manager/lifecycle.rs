//! Loss detection and bounded reconnection
//!
//! A CONNECTED record that loses its session goes DISCONNECTED and a retry
//! cycle starts. Each attempt waits `retry_delay`, drops the stale session and
//! reopens from the stored hydrated descriptor. After `max_retries` failures
//! the record goes FAILED and is evicted. Every step is broadcast.

use std::sync::Arc;

use chrono::Utc;
use datalink_core::{ConnectionId, LinkError, SessionId, SqlDriver};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::record::{new_attempt, AttemptStatus, ConnectionRecord};
use super::{ConnectionManager, ConnectionState};
use crate::metrics;

impl ConnectionManager {
    /// Forwards the driver's first error/close event for `session` into
    /// [`on_connection_lost`](Self::on_connection_lost).
    pub(super) async fn install_monitor(
        &self,
        id: ConnectionId,
        epoch: Uuid,
        session: SessionId,
        driver: Arc<dyn SqlDriver>,
    ) {
        let Some(mut events) = driver.subscribe_events(session).await else {
            debug!(connection_id = %id, driver = driver.driver_id(), "Driver emits no session events");
            return;
        };

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        manager.on_connection_lost(&id, epoch, session, event.describe());
                        break;
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    // The driver dropped the session; nothing left to watch.
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Reports that a connection's session stopped working.
    ///
    /// Meant for dialects without session events, where the loss only shows
    /// up as a failing query. Returns whether a reconnection cycle started.
    pub fn report_lost(&self, id: &ConnectionId, reason: impl Into<String>) -> bool {
        let current = {
            let records = self.inner.records.read();
            records
                .get(id)
                .filter(|r| r.is_live())
                .and_then(|r| r.session.map(|s| (r.epoch, s)))
        };

        match current {
            Some((epoch, session)) => self.on_connection_lost(id, epoch, session, reason.into()),
            None => false,
        }
    }

    /// CONNECTED → DISCONNECTED and start the retry cycle.
    ///
    /// Ignored unless the record is still the same entry, CONNECTED, and on
    /// the session that signalled.
    pub(super) fn on_connection_lost(
        &self,
        id: &ConnectionId,
        epoch: Uuid,
        session: SessionId,
        reason: String,
    ) -> bool {
        {
            let mut records = self.inner.records.write();
            let Some(record) = records.get_mut(id) else {
                return false;
            };
            if record.epoch != epoch
                || record.state != ConnectionState::Connected
                || record.session != Some(session)
            {
                return false;
            }

            record.state = ConnectionState::Disconnected;
            record.last_error = Some(reason.clone());
            record.attempt = Some(new_attempt());
        }

        warn!(connection_id = %id, reason = %reason, "Connection lost, reconnecting");
        self.notify();

        let manager = self.clone();
        let id = id.clone();
        tokio::spawn(async move {
            manager.retry_loop(id, epoch).await;
        });
        true
    }

    async fn retry_loop(&self, id: ConnectionId, epoch: Uuid) {
        let max_retries = self.inner.config.max_retries;

        for attempt in 1..=max_retries {
            if !self.update_record(&id, epoch, |r| r.retry_count = attempt) {
                return;
            }
            self.notify();
            metrics::record_reconnect_attempt();

            tokio::time::sleep(self.inner.config.retry_delay()).await;

            let taken = {
                let mut records = self.inner.records.write();
                records
                    .get_mut(&id)
                    .filter(|r| r.epoch == epoch)
                    .map(|r| (r.session.take(), Arc::clone(&r.driver), r.datasource.clone()))
            };
            let Some((stale, driver, datasource)) = taken else {
                return;
            };

            if let Some(session) = stale {
                if let Err(e) = driver.disconnect(session).await {
                    debug!(connection_id = %id, error = %e, "Error while closing stale session");
                }
            }

            if !self.update_record(&id, epoch, |r| r.state = ConnectionState::Connecting) {
                return;
            }
            self.notify();
            info!(connection_id = %id, attempt, max_retries, "Reconnecting");

            match self.open_session(&driver, &datasource).await {
                Ok(session) => {
                    let reconnected = {
                        let mut records = self.inner.records.write();
                        match records.get_mut(&id).filter(|r| r.epoch == epoch) {
                            Some(record) => {
                                record.state = ConnectionState::Connected;
                                record.session = Some(session);
                                record.retry_count = 0;
                                record.last_error = None;
                                record.last_connected_at = Some(Utc::now());
                                if let Some(handle) = record.handle() {
                                    record.finish_attempt(AttemptStatus::Connected(handle));
                                }
                                true
                            }
                            None => false,
                        }
                    };

                    if !reconnected {
                        self.close_in_background(driver, session);
                        return;
                    }

                    info!(connection_id = %id, attempt, "Reconnected");
                    self.notify();
                    self.install_monitor(id, epoch, session, driver).await;
                    return;
                }
                Err(err) => {
                    warn!(connection_id = %id, attempt, error = %err, "Reconnection attempt failed");
                    if !self.update_record(&id, epoch, |r| {
                        r.last_error = Some(err.to_string());
                        r.state = ConnectionState::Disconnected;
                    }) {
                        return;
                    }
                    self.notify();
                }
            }
        }

        self.evict(&id, epoch);
    }

    /// FAILED (broadcast) then removed (broadcast)
    fn evict(&self, id: &ConnectionId, epoch: Uuid) {
        let failed = {
            let mut records = self.inner.records.write();
            match records.get_mut(id).filter(|r| r.epoch == epoch) {
                Some(record) => {
                    record.state = ConnectionState::Failed;
                    let message = record
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "Connection lost".to_string());
                    record.finish_attempt(AttemptStatus::Failed(LinkError::connection_failed(
                        message.clone(),
                    )));
                    Some((record.session.take(), Arc::clone(&record.driver), message))
                }
                None => None,
            }
        };
        let Some((stale, driver, message)) = failed else {
            return;
        };
        if let Some(session) = stale {
            self.close_in_background(driver, session);
        }
        self.notify();

        let removed = {
            let mut records = self.inner.records.write();
            let same_entry = records.get(id).is_some_and(|r| r.epoch == epoch);
            same_entry && records.remove(id).is_some()
        };
        if removed {
            metrics::record_eviction();
            error!(
                connection_id = %id,
                retries = self.inner.config.max_retries,
                last_error = %message,
                "Reconnection attempts exhausted, connection evicted"
            );
            self.notify();
        }
    }

    /// Applies `apply` to the record if it is still the entry for `epoch`
    fn update_record(
        &self,
        id: &ConnectionId,
        epoch: Uuid,
        apply: impl FnOnce(&mut ConnectionRecord),
    ) -> bool {
        let mut records = self.inner.records.write();
        match records.get_mut(id).filter(|r| r.epoch == epoch) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }
}
