use std::collections::HashMap;
use std::sync::Arc;

use datalink_core::{LinkError, LinkResult};
use keyring::Entry;
use parking_lot::Mutex;

/// Trait for credential storage backend
pub trait CredentialProvider: Send + Sync {
    fn set_password(&self, service: &str, username: &str, password: &str) -> LinkResult<()>;
    fn get_password(&self, service: &str, username: &str) -> LinkResult<String>;
    fn delete_password(&self, service: &str, username: &str) -> LinkResult<()>;
}

/// Production implementation using OS Keyring
#[derive(Default)]
pub struct KeyringProvider;

impl KeyringProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialProvider for KeyringProvider {
    fn set_password(&self, service: &str, username: &str, password: &str) -> LinkResult<()> {
        let entry = Entry::new(service, username)
            .map_err(|e| LinkError::secret(format!("Keyring error: {}", e)))?;
        entry
            .set_password(password)
            .map_err(|e| LinkError::secret(format!("Failed to set password: {}", e)))
    }

    fn get_password(&self, service: &str, username: &str) -> LinkResult<String> {
        let entry = Entry::new(service, username)
            .map_err(|e| LinkError::secret(format!("Keyring error: {}", e)))?;
        match entry.get_password() {
            Ok(pwd) => Ok(pwd),
            Err(keyring::Error::NoEntry) => Err(LinkError::secret("Credentials not found")),
            Err(e) => Err(LinkError::secret(format!("Failed to get password: {}", e))),
        }
    }

    fn delete_password(&self, service: &str, username: &str) -> LinkResult<()> {
        // If entry doesn't exist, it's fine
        if let Ok(entry) = Entry::new(service, username) {
            let _ = entry.delete_credential();
        }
        Ok(())
    }
}

/// In-memory implementation for tests and headless environments
#[derive(Clone, Default)]
pub struct MockProvider {
    storage: Arc<Mutex<HashMap<String, String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(service: &str, username: &str) -> String {
        format!("{}::{}", service, username)
    }

    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }
}

impl CredentialProvider for MockProvider {
    fn set_password(&self, service: &str, username: &str, password: &str) -> LinkResult<()> {
        self.storage
            .lock()
            .insert(Self::key(service, username), password.to_string());
        Ok(())
    }

    fn get_password(&self, service: &str, username: &str) -> LinkResult<String> {
        self.storage
            .lock()
            .get(&Self::key(service, username))
            .cloned()
            .ok_or_else(|| LinkError::secret("Credentials not found"))
    }

    fn delete_password(&self, service: &str, username: &str) -> LinkResult<()> {
        self.storage.lock().remove(&Self::key(service, username));
        Ok(())
    }
}
