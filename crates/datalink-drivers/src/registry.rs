//! Driver Registry
//!
//! Maps each protocol family to the driver that can open physical
//! connections for it. Families without a registered driver are rejected as
//! unsupported before any connection attempt is made.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use datalink_core::{DialectFamily, SqlDriver};

use crate::mysql::MySqlDriver;
use crate::postgres::PostgresDriver;
use crate::sqlite::SqliteDriver;

/// Registry that holds all available SQL drivers
pub struct DriverRegistry {
    drivers: HashMap<DialectFamily, Arc<dyn SqlDriver>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with the built-in sqlx drivers (PostgreSQL, MySQL, SQLite).
    pub fn with_defaults(heartbeat_interval: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresDriver::new(heartbeat_interval)));
        registry.register(Arc::new(MySqlDriver::new(heartbeat_interval)));
        registry.register(Arc::new(SqliteDriver::new()));
        registry
    }

    /// Registers a driver under the family it reports.
    ///
    /// A later registration for the same family replaces the earlier one.
    pub fn register(&mut self, driver: Arc<dyn SqlDriver>) {
        self.drivers.insert(driver.family(), driver);
    }

    /// Gets the driver for a protocol family
    pub fn get(&self, family: DialectFamily) -> Option<Arc<dyn SqlDriver>> {
        self.drivers.get(&family).cloned()
    }

    /// Lists all registered driver IDs, sorted
    pub fn list(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.drivers.values().map(|d| d.driver_id()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
