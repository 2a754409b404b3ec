// Datalink - connection registry and lifecycle manager for SQL datasources
// Core library

pub mod config;
pub mod manager;
pub mod metrics;
pub mod observability;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod vault;

use std::path::PathBuf;
use std::sync::Arc;

use datalink_drivers::DriverRegistry;
use vault::{CredentialProvider, KeyringProvider, VaultStorage};

pub use config::ManagerConfig;
pub use datalink_core::{
    format_connection_string, resolve, ConnectionId, Datasource, Dialect, DialectFamily,
    FileDatasource, HostDatasource, LinkError, LinkResult, TlsConfig, TlsMode, UrlDatasource,
};
pub use manager::{
    ConnectionHandle, ConnectionManager, ConnectionSnapshot, ConnectionState,
    CONNECTIONS_UPDATED_EVENT,
};

const DEFAULT_PROJECT: &str = "default";

pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub vault: Arc<VaultStorage>,
    pub manager: ConnectionManager,
}

impl AppState {
    /// Wires the sqlx drivers, the keychain-backed vault under `storage_dir`
    /// and the connection manager.
    pub fn new(config: ManagerConfig, storage_dir: PathBuf) -> Self {
        Self::with_credentials(config, storage_dir, Arc::new(KeyringProvider::new()))
    }

    pub fn with_credentials(
        config: ManagerConfig,
        storage_dir: PathBuf,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let registry = Arc::new(DriverRegistry::with_defaults(config.heartbeat_interval()));
        let vault = Arc::new(VaultStorage::with_provider(
            DEFAULT_PROJECT,
            storage_dir,
            credentials,
        ));
        let manager = ConnectionManager::new(config, Arc::clone(&registry), vault.clone());

        Self {
            registry,
            vault,
            manager,
        }
    }

    /// Closes every connection
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
