//! Manager configuration
//!
//! Every knob has a default matching production behavior; any of them can be
//! overridden through a `DATALINK_*` environment variable.

use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

const ENV_PREFIX: &str = "DATALINK_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Reconnection attempts after a loss before the record is evicted
    pub max_retries: u32,
    /// Fixed delay before each reconnection attempt
    pub retry_delay_ms: u64,
    /// How long a caller waits on someone else's in-flight attempt
    pub connecting_wait_timeout_ms: u64,
    /// Upper bound on opening and probing a physical connection
    pub connect_timeout_ms: u64,
    /// Upper bound on a throwaway `test_connection`
    pub test_timeout_ms: u64,
    /// Heartbeat period of the network drivers
    pub heartbeat_interval_ms: u64,
    /// Buffered snapshot batches per slow subscriber
    pub snapshot_channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            connecting_wait_timeout_ms: 30_000,
            connect_timeout_ms: 15_000,
            test_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            snapshot_channel_capacity: 64,
        }
    }
}

impl ManagerConfig {
    /// Defaults overridden by `DATALINK_MAX_RETRIES`, `DATALINK_RETRY_DELAY_MS`, etc.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        override_from(&lookup, "MAX_RETRIES", &mut config.max_retries);
        override_from(&lookup, "RETRY_DELAY_MS", &mut config.retry_delay_ms);
        override_from(
            &lookup,
            "CONNECTING_WAIT_TIMEOUT_MS",
            &mut config.connecting_wait_timeout_ms,
        );
        override_from(&lookup, "CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms);
        override_from(&lookup, "TEST_TIMEOUT_MS", &mut config.test_timeout_ms);
        override_from(&lookup, "HEARTBEAT_INTERVAL_MS", &mut config.heartbeat_interval_ms);
        override_from(
            &lookup,
            "SNAPSHOT_CHANNEL_CAPACITY",
            &mut config.snapshot_channel_capacity,
        );

        // broadcast::channel panics on zero capacity
        config.snapshot_channel_capacity = config.snapshot_channel_capacity.max(1);
        if config.heartbeat_interval_ms == 0 {
            warn!(
                key = "DATALINK_HEARTBEAT_INTERVAL_MS",
                "Heartbeat interval must be positive, keeping default"
            );
            config.heartbeat_interval_ms = Self::default().heartbeat_interval_ms;
        }
        config
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connecting_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.connecting_wait_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_millis(self.test_timeout_ms)
    }

    /// Never zero; `tokio::time::interval` panics on a zero period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

fn override_from<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    suffix: &str,
    target: &mut T,
) {
    let key = format!("{}{}", ENV_PREFIX, suffix);
    let Some(raw) = lookup(&key) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key = %key, value = %raw, "Ignoring invalid configuration override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.connecting_wait_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.test_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATALINK_MAX_RETRIES", "5"),
            ("DATALINK_RETRY_DELAY_MS", " 250 "),
            ("DATALINK_TEST_TIMEOUT_MS", "not-a-number"),
            ("DATALINK_SNAPSHOT_CHANNEL_CAPACITY", "0"),
        ]);
        let config = ManagerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay_ms, 250);
        assert_eq!(config.test_timeout_ms, 10_000);
        assert_eq!(config.snapshot_channel_capacity, 1);
    }

    #[test]
    fn test_partial_json() {
        let config: ManagerConfig = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_zero_heartbeat_interval_is_rejected() {
        let vars: HashMap<&str, &str> = HashMap::from([("DATALINK_HEARTBEAT_INTERVAL_MS", "0")]);
        let config = ManagerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));

        let config: ManagerConfig =
            serde_json::from_str(r#"{"heartbeat_interval_ms": 0}"#).unwrap();
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(1));
    }
}
