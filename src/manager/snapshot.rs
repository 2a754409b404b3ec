//! Observer-facing projection of registry entries

use chrono::{DateTime, Utc};
use datalink_core::ConnectionId;
use serde::{Deserialize, Serialize};

/// Event name under which snapshot batches are forwarded to UI bridges
pub const CONNECTIONS_UPDATED_EVENT: &str = "connections:updated";

/// Lifecycle state of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of one connection, recomputed on every emission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub name: String,
    pub state: ConnectionState,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let snapshot = ConnectionSnapshot {
            id: ConnectionId::from("postgres-db1:5432"),
            name: "primary".to_string(),
            state: ConnectionState::Failed,
            retry_count: 3,
            last_error: Some("Connection failed: refused".to_string()),
            created_at: Utc.with_ymd_and_hms(2026, 10, 15, 8, 30, 0).unwrap(),
            last_connected_at: None,
            connection_string: Some("postgres://app@db1:5432/orders".to_string()),
        };

        assert_eq!(
            serde_json::to_value(&snapshot).unwrap(),
            json!({
                "id": "postgres-db1:5432",
                "name": "primary",
                "state": "failed",
                "retryCount": 3,
                "lastError": "Connection failed: refused",
                "createdAt": "2026-10-15T08:30:00Z",
                "connectionString": "postgres://app@db1:5432/orders"
            })
        );
    }
}
