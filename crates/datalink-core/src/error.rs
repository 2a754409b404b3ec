// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for Datalink
//!
//! Driver, storage and lifecycle failures are all mapped onto [`LinkError`]
//! so callers and observers see one error vocabulary regardless of dialect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all connection management operations
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinkError {
    #[error("Unknown datasource kind: {message}")]
    UnknownDatasourceKind { message: String },

    #[error("Unsupported dialect for physical connection: {dialect}")]
    UnsupportedDialect { dialect: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound { connection_id: String },

    #[error("Connection is not connected: {connection_id}")]
    NotConnected { connection_id: String },

    #[error("Secret rehydration failed: {message}")]
    SecretError { message: String },

    #[error("SSL/TLS error: {message}")]
    SslError { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LinkError {
    pub fn unknown_kind(msg: impl Into<String>) -> Self {
        Self::UnknownDatasourceKind { message: msg.into() }
    }

    pub fn unsupported_dialect(dialect: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            dialect: dialect.into(),
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn connection_not_found(id: impl Into<String>) -> Self {
        Self::ConnectionNotFound {
            connection_id: id.into(),
        }
    }

    pub fn not_connected(id: impl Into<String>) -> Self {
        Self::NotConnected {
            connection_id: id.into(),
        }
    }

    pub fn secret(msg: impl Into<String>) -> Self {
        Self::SecretError { message: msg.into() }
    }

    pub fn ssl(msg: impl Into<String>) -> Self {
        Self::SslError { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Returns true for connectivity failures that the lifecycle retries.
    ///
    /// Configuration and secret errors are fatal for the attempt that raised
    /// them and are surfaced to the caller as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ExecutionError { .. }
                | Self::Timeout { .. }
                | Self::SslError { .. }
        )
    }
}

/// Result type alias for connection management operations
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(LinkError::connection_failed("refused").is_transient());
        assert!(LinkError::timeout(1000).is_transient());
        assert!(!LinkError::unsupported_dialect("mongodb").is_transient());
        assert!(!LinkError::secret("keychain locked").is_transient());
        assert!(!LinkError::unknown_kind("oracle").is_transient());
    }

    #[test]
    fn display_carries_message() {
        let err = LinkError::connection_failed("connection refused");
        assert_eq!(err.to_string(), "Connection failed: connection refused");

        let err = LinkError::timeout(30000);
        assert_eq!(err.to_string(), "Operation timed out after 30000ms");
    }
}
