//! Datalink drivers
//!
//! sqlx-backed [`SqlDriver`](datalink_core::SqlDriver) implementations and the
//! registry that maps protocol families onto them.

use std::time::Duration;

mod heartbeat;
pub mod mysql;
pub mod postgres;
pub mod registry;
pub mod sqlite;

pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use registry::DriverRegistry;
pub use sqlite::SqliteDriver;

/// Pool sizing shared by the sqlx drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// One connection, no idle floor. Used for throwaway test connections.
    pub fn single() -> Self {
        Self {
            max_connections: 1,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}
