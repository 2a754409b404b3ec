//! Transport-security configuration
//!
//! Descriptors reference certificate material by local file path. Before a
//! physical connection is opened the paths are resolved into in-memory PEM
//! content; unreadable files are logged and skipped rather than failing the
//! connection.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// TLS/SSL mode for a host-based datasource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TlsMode {
    /// No TLS at all
    #[default]
    #[serde(rename = "DISABLED")]
    Disabled,
    /// Encrypt, but do not verify the server certificate
    #[serde(rename = "REQUIRED")]
    Required,
    /// Encrypt and verify the certificate chain against the CA
    #[serde(rename = "VERIFY-CA")]
    VerifyCa,
    /// Encrypt, verify the chain and the server hostname
    #[serde(rename = "VERIFY-FULL")]
    VerifyFull,
}

impl TlsMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Strict certificate verification (`rejectUnauthorized`)
    pub fn rejects_unauthorized(&self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

/// TLS settings as stored on a descriptor (paths, not contents)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TlsConfig {
    pub mode: TlsMode,
    /// Path to the CA certificate used to verify the server
    #[serde(default)]
    pub ca: Option<String>,
    /// Path to the client certificate for mutual TLS
    #[serde(default)]
    pub cert: Option<String>,
    /// Path to the client private key for mutual TLS
    #[serde(default)]
    pub key: Option<String>,
}

impl TlsConfig {
    pub fn new(mode: TlsMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_ca(mut self, path: impl Into<String>) -> Self {
        self.ca = Some(path.into());
        self
    }

    pub fn with_client_cert(mut self, cert: impl Into<String>, key: impl Into<String>) -> Self {
        self.cert = Some(cert.into());
        self.key = Some(key.into());
        self
    }
}

/// Resolved TLS settings handed to a driver
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub mode: TlsMode,
    pub reject_unauthorized: bool,
    pub ca_pem: Option<String>,
    pub cert_pem: Option<String>,
    pub key_pem: Option<String>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("mode", &self.mode)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("ca_pem", &self.ca_pem.is_some())
            .field("cert_pem", &self.cert_pem.is_some())
            .field("key_pem", &self.key_pem.is_some())
            .finish()
    }
}

impl TlsMaterial {
    /// Reads the referenced PEM files. Returns `None` when TLS is disabled.
    pub fn prepare(config: &TlsConfig) -> Option<Self> {
        if !config.mode.is_enabled() {
            return None;
        }

        Some(Self {
            mode: config.mode,
            reject_unauthorized: config.mode.rejects_unauthorized(),
            ca_pem: read_cert_file(config.ca.as_deref()),
            cert_pem: read_cert_file(config.cert.as_deref()),
            key_pem: read_cert_file(config.key.as_deref()),
        })
    }
}

fn read_cert_file(path: Option<&str>) -> Option<String> {
    let path = path.filter(|p| !p.is_empty())?;

    if !Path::new(path).exists() {
        warn!(path = %path, "Certificate file not found, omitting from TLS config");
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            error!(path = %path, error = %e, "Failed to read certificate file");
            None
        }
    }
}
