//! Per-session heartbeat
//!
//! sqlx pools expose no error/close events, so the network drivers probe each
//! session periodically. The first failed probe, or a pool closed underneath
//! them, publishes one [`SessionEvent`] and ends the task. Dropping the
//! heartbeat aborts the probe task, which also closes the event channel for
//! subscribers.

use std::future::Future;
use std::time::Duration;

use datalink_core::SessionEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

const EVENT_CHANNEL_CAPACITY: usize = 16;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) struct Heartbeat {
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub(crate) fn spawn<C, P, Fut>(interval: Duration, is_closed: C, probe: P) -> Self
    where
        C: Fn() -> bool + Send + 'static,
        P: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send,
    {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sender = events.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the session was just probed.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if is_closed() {
                    let _ = sender.send(SessionEvent::Closed);
                    break;
                }

                if let Err(message) = probe().await {
                    warn!(error = %message, "Heartbeat probe failed");
                    let _ = sender.send(SessionEvent::Error(message));
                    break;
                }
            }
        });

        Self { events, task }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
