// SPDX-License-Identifier: Apache-2.0

//! Datasource persistence
//!
//! The connection manager only needs two things from storage: secrets for a
//! descriptor that arrived without them, and a "last used" bump after a
//! connection is handed out. Both go through [`DatasourceStore`].

pub mod backend;
pub mod storage;

use async_trait::async_trait;
use datalink_core::{Datasource, LinkResult};

pub use backend::{CredentialProvider, KeyringProvider, MockProvider};
pub use storage::{SavedDatasource, VaultStorage};

/// Storage collaborator consumed by the connection manager
#[async_trait]
pub trait DatasourceStore: Send + Sync {
    /// Returns the descriptor with its secret material filled in.
    ///
    /// Failures are reported as [`LinkError::SecretError`](datalink_core::LinkError).
    async fn rehydrate_secrets(&self, datasource: Datasource) -> LinkResult<Datasource>;

    /// Records that the datasource with this id was just used.
    async fn touch(&self, datasource_id: &str) -> LinkResult<()>;
}
