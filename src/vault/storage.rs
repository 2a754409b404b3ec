//! Vault Storage
//!
//! Datasource metadata lives in a local JSON file to avoid excessive keychain
//! prompts; secrets (passwords, auth tokens) live in the credential provider
//! only. Descriptors serialize without their secrets, so the file never holds
//! any.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datalink_core::{Datasource, LinkError, LinkResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::backend::{CredentialProvider, KeyringProvider};
use super::DatasourceStore;

const SERVICE_PREFIX: &str = "datalink";
const DATASOURCES_FILE: &str = "datasources.json";

/// A persisted datasource definition (never contains secrets)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SavedDatasource {
    pub datasource: Datasource,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl SavedDatasource {
    pub fn id(&self) -> Option<&str> {
        self.datasource.id()
    }
}

/// Storage for saved datasources and their secrets
pub struct VaultStorage {
    project_id: String,
    storage_dir: PathBuf,
    credentials: Arc<dyn CredentialProvider>,
    // Serializes read-modify-write cycles on the metadata file
    file_lock: Mutex<()>,
}

impl VaultStorage {
    /// Creates a vault backed by the OS keychain
    pub fn new(project_id: &str, storage_dir: PathBuf) -> Self {
        Self::with_provider(project_id, storage_dir, Arc::new(KeyringProvider::new()))
    }

    pub fn with_provider(
        project_id: &str,
        storage_dir: PathBuf,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            storage_dir,
            credentials,
            file_lock: Mutex::new(()),
        }
    }

    fn service_name(&self) -> String {
        format!("{}_{}", SERVICE_PREFIX, self.project_id)
    }

    fn secret_key(&self, datasource_id: &str) -> String {
        format!("secret_{}", datasource_id)
    }

    fn datasources_file_path(&self) -> PathBuf {
        self.storage_dir.join(DATASOURCES_FILE)
    }

    fn load_file(&self) -> LinkResult<Vec<SavedDatasource>> {
        let path = self.datasources_file_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| LinkError::internal(format!("Failed to read datasources file: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| LinkError::internal(format!("Failed to parse datasources file: {}", e)))
    }

    fn save_file(&self, datasources: &[SavedDatasource]) -> LinkResult<()> {
        fs::create_dir_all(&self.storage_dir).map_err(|e| {
            LinkError::internal(format!("Failed to create storage directory: {}", e))
        })?;

        let content = serde_json::to_string_pretty(datasources)
            .map_err(|e| LinkError::internal(format!("Failed to serialize datasources: {}", e)))?;

        fs::write(self.datasources_file_path(), content)
            .map_err(|e| LinkError::internal(format!("Failed to write datasources file: {}", e)))
    }

    /// Saves (or replaces) a datasource definition and its secret.
    ///
    /// The descriptor must carry an `id`. A descriptor without secret
    /// material keeps whatever secret was stored before.
    #[instrument(skip(self, datasource), fields(dialect = %datasource.dialect()))]
    pub fn save_datasource(&self, datasource: &Datasource) -> LinkResult<SavedDatasource> {
        let id = datasource
            .id()
            .ok_or_else(|| LinkError::internal("Cannot save a datasource without an id"))?
            .to_string();

        let saved = {
            let _guard = self.file_lock.lock();
            let mut datasources = self.load_file()?;

            let (created_at, last_used_at) = datasources
                .iter()
                .find(|d| d.id() == Some(id.as_str()))
                .map(|d| (d.created_at, d.last_used_at))
                .unwrap_or_else(|| (Utc::now(), None));

            let saved = SavedDatasource {
                datasource: datasource.clone(),
                created_at,
                last_used_at,
            };
            datasources.retain(|d| d.id() != Some(id.as_str()));
            datasources.push(saved.clone());
            self.save_file(&datasources)?;
            saved
        };

        if let Some(secret) = datasource.secret().filter(|s| !s.is_empty()) {
            self.credentials
                .set_password(&self.service_name(), &self.secret_key(&id), secret.expose())?;
        }

        debug!(datasource_id = %id, "Datasource saved");
        Ok(saved)
    }

    /// Retrieves a saved datasource (metadata only, no secrets)
    pub fn get_datasource(&self, datasource_id: &str) -> LinkResult<SavedDatasource> {
        self.load_file()?
            .into_iter()
            .find(|d| d.id() == Some(datasource_id))
            .ok_or_else(|| LinkError::internal(format!("Datasource not found: {}", datasource_id)))
    }

    pub fn list_datasources(&self) -> LinkResult<Vec<SavedDatasource>> {
        self.load_file()
    }

    /// Deletes a saved datasource and its secret
    pub fn delete_datasource(&self, datasource_id: &str) -> LinkResult<()> {
        {
            let _guard = self.file_lock.lock();
            let mut datasources = self.load_file()?;
            let original_len = datasources.len();
            datasources.retain(|d| d.id() != Some(datasource_id));

            if datasources.len() != original_len {
                self.save_file(&datasources)?;
            }
        }

        self.credentials
            .delete_password(&self.service_name(), &self.secret_key(datasource_id))
    }

    fn mark_used(&self, datasource_id: &str) -> LinkResult<bool> {
        let _guard = self.file_lock.lock();
        let mut datasources = self.load_file()?;

        let Some(saved) = datasources
            .iter_mut()
            .find(|d| d.id() == Some(datasource_id))
        else {
            return Ok(false);
        };
        saved.last_used_at = Some(Utc::now());

        self.save_file(&datasources)?;
        Ok(true)
    }
}

#[async_trait]
impl DatasourceStore for VaultStorage {
    async fn rehydrate_secrets(&self, datasource: Datasource) -> LinkResult<Datasource> {
        let id = datasource
            .id()
            .ok_or_else(|| LinkError::secret("Datasource has no id to look up secrets for"))?
            .to_string();

        let secret = self
            .credentials
            .get_password(&self.service_name(), &self.secret_key(&id))
            .map_err(|e| match e {
                LinkError::SecretError { .. } => e,
                other => LinkError::secret(other.to_string()),
            })?;

        Ok(datasource.with_secret(secret))
    }

    async fn touch(&self, datasource_id: &str) -> LinkResult<()> {
        if !self.mark_used(datasource_id)? {
            debug!(datasource_id = %datasource_id, "Touch for unsaved datasource ignored");
        }
        Ok(())
    }
}
