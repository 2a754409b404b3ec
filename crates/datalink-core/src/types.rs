//! Shared handle types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a physical session owned by a driver
///
/// The connection registry only keeps this back-reference; the pool behind
/// it lives inside the driver that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Asynchronous signal raised by a driver about one of its sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session hit an error (e.g. a failed heartbeat probe)
    Error(String),
    /// The session was closed underneath us
    Closed,
}

impl SessionEvent {
    pub fn describe(&self) -> String {
        match self {
            Self::Error(message) => message.clone(),
            Self::Closed => "Connection closed".to_string(),
        }
    }
}
