// SPDX-License-Identifier: Apache-2.0

//! Datasource descriptors
//!
//! A [`Datasource`] is a closed sum over the connection kinds Datalink knows
//! about. Every dialect-specific decision (identity, display string, driver
//! selection) matches on it exhaustively, so adding a dialect is a localized,
//! compiler-checked change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::sensitive::Sensitive;
use crate::tls::TlsConfig;

/// Concrete SQL dialect of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Cockroachdb,
    Mysql,
    Mariadb,
    Sqlite,
    Libsql,
    Mongodb,
}

impl Dialect {
    pub const ALL: [Dialect; 7] = [
        Dialect::Postgres,
        Dialect::Cockroachdb,
        Dialect::Mysql,
        Dialect::Mariadb,
        Dialect::Sqlite,
        Dialect::Libsql,
        Dialect::Mongodb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Cockroachdb => "cockroachdb",
            Self::Mysql => "mysql",
            Self::Mariadb => "mariadb",
            Self::Sqlite => "sqlite",
            Self::Libsql => "libsql",
            Self::Mongodb => "mongodb",
        }
    }

    /// Wire-protocol family. Compatible forks share their base family.
    pub fn family(&self) -> DialectFamily {
        match self {
            Self::Postgres | Self::Cockroachdb => DialectFamily::Postgres,
            Self::Mysql | Self::Mariadb => DialectFamily::MySql,
            Self::Sqlite => DialectFamily::Sqlite,
            Self::Libsql => DialectFamily::Libsql,
            Self::Mongodb => DialectFamily::MongoDb,
        }
    }

    /// Whether a persisted descriptor of this dialect is expected to carry a secret.
    pub fn requires_secret(&self) -> bool {
        match self {
            Self::Postgres | Self::Cockroachdb | Self::Mysql | Self::Mariadb | Self::Mongodb => {
                true
            }
            Self::Sqlite | Self::Libsql => false,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|dialect| dialect.as_str() == s)
            .ok_or_else(|| LinkError::unknown_kind(s))
    }
}

/// Protocol family used for connection identity and driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectFamily {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
    Libsql,
    #[serde(rename = "mongodb")]
    MongoDb,
}

impl DialectFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Libsql => "libsql",
            Self::MongoDb => "mongodb",
        }
    }
}

impl fmt::Display for DialectFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host/port based SQL endpoint (PostgreSQL, CockroachDB, MySQL, MariaDB)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostDatasource {
    /// Persistent identifier assigned by the storage collaborator
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<Sensitive<String>>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub ssl: Option<TlsConfig>,
}

/// File based SQL database (SQLite)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileDatasource {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub file_path: String,
}

/// URL based remote endpoint (libSQL, MongoDB)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UrlDatasource {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing)]
    pub auth_token: Option<Sensitive<String>>,
}

/// Descriptor for everything needed to open a physical connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Datasource {
    Postgres(HostDatasource),
    Cockroachdb(HostDatasource),
    Mysql(HostDatasource),
    Mariadb(HostDatasource),
    Sqlite(FileDatasource),
    Libsql(UrlDatasource),
    Mongodb(UrlDatasource),
}

impl Datasource {
    /// Parses a descriptor, rejecting unrecognized `type` tags as
    /// [`LinkError::UnknownDatasourceKind`].
    pub fn from_json(value: serde_json::Value) -> LinkResult<Self> {
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| LinkError::unknown_kind("missing datasource type"))?;
        kind.parse::<Dialect>()?;

        serde_json::from_value(value)
            .map_err(|e| LinkError::internal(format!("Invalid datasource descriptor: {}", e)))
    }

    pub fn from_json_str(raw: &str) -> LinkResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| LinkError::internal(format!("Invalid datasource JSON: {}", e)))?;
        Self::from_json(value)
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Postgres(_) => Dialect::Postgres,
            Self::Cockroachdb(_) => Dialect::Cockroachdb,
            Self::Mysql(_) => Dialect::Mysql,
            Self::Mariadb(_) => Dialect::Mariadb,
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Libsql(_) => Dialect::Libsql,
            Self::Mongodb(_) => Dialect::Mongodb,
        }
    }

    pub fn family(&self) -> DialectFamily {
        self.dialect().family()
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Postgres(ds) | Self::Cockroachdb(ds) | Self::Mysql(ds) | Self::Mariadb(ds) => {
                ds.id.as_deref()
            }
            Self::Sqlite(ds) => ds.id.as_deref(),
            Self::Libsql(ds) | Self::Mongodb(ds) => ds.id.as_deref(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Postgres(ds) | Self::Cockroachdb(ds) | Self::Mysql(ds) | Self::Mariadb(ds) => {
                &ds.name
            }
            Self::Sqlite(ds) => &ds.name,
            Self::Libsql(ds) | Self::Mongodb(ds) => &ds.name,
        }
    }

    pub fn tls(&self) -> Option<&TlsConfig> {
        match self {
            Self::Postgres(ds) | Self::Cockroachdb(ds) | Self::Mysql(ds) | Self::Mariadb(ds) => {
                ds.ssl.as_ref()
            }
            Self::Sqlite(_) | Self::Libsql(_) | Self::Mongodb(_) => None,
        }
    }

    /// Password or auth token, whichever the variant carries
    pub fn secret(&self) -> Option<&Sensitive<String>> {
        match self {
            Self::Postgres(ds) | Self::Cockroachdb(ds) | Self::Mysql(ds) | Self::Mariadb(ds) => {
                ds.password.as_ref()
            }
            Self::Sqlite(_) => None,
            Self::Libsql(ds) | Self::Mongodb(ds) => ds.auth_token.as_ref(),
        }
    }

    /// Returns the descriptor with its secret slot filled. File-based
    /// descriptors have no secret and are returned unchanged.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = Some(Sensitive::new(secret.into()));
        match &mut self {
            Self::Postgres(ds) | Self::Cockroachdb(ds) | Self::Mysql(ds) | Self::Mariadb(ds) => {
                ds.password = secret
            }
            Self::Sqlite(_) => {}
            Self::Libsql(ds) | Self::Mongodb(ds) => ds.auth_token = secret,
        }
        self
    }

    /// Whether the descriptor currently carries non-empty secret material.
    pub fn has_secret(&self) -> bool {
        self.secret().is_some_and(|s| !s.is_empty())
    }

    /// A persisted descriptor whose dialect needs a secret but arrived
    /// without one must be rehydrated from storage before connecting.
    pub fn needs_secret_rehydration(&self) -> bool {
        self.id().is_some() && self.dialect().requires_secret() && !self.has_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pg(password: Option<&str>, id: Option<&str>) -> Datasource {
        Datasource::Postgres(HostDatasource {
            id: id.map(str::to_string),
            name: "primary".to_string(),
            host: "db1".to_string(),
            port: 5432,
            username: Some("app".to_string()),
            password: password.map(Sensitive::from),
            database: Some("orders".to_string()),
            ssl: None,
        })
    }

    #[test]
    fn parses_tagged_descriptor() {
        let ds = Datasource::from_json(json!({
            "type": "cockroachdb",
            "id": "ds_1",
            "name": "crdb",
            "host": "db1",
            "port": 26257,
            "username": "root",
            "password": "s3cret"
        }))
        .expect("should parse");

        assert_eq!(ds.dialect(), Dialect::Cockroachdb);
        assert_eq!(ds.family(), DialectFamily::Postgres);
        assert_eq!(ds.id(), Some("ds_1"));
        assert!(ds.has_secret());
    }

    #[test]
    fn parses_file_descriptor_with_camel_case_path() {
        let ds = Datasource::from_json(json!({
            "type": "sqlite",
            "name": "local",
            "filePath": "/tmp/app.db"
        }))
        .expect("should parse");

        match ds {
            Datasource::Sqlite(file) => assert_eq!(file.file_path, "/tmp/app.db"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = Datasource::from_json(json!({ "type": "oracle", "name": "legacy" }))
            .expect_err("oracle is not supported");
        assert!(matches!(err, LinkError::UnknownDatasourceKind { .. }));

        let err = Datasource::from_json(json!({ "name": "untyped" }))
            .expect_err("type tag is required");
        assert!(matches!(err, LinkError::UnknownDatasourceKind { .. }));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let json = serde_json::to_value(pg(Some("s3cret"), Some("ds_1"))).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["type"], "postgres");
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", pg(Some("s3cret"), None));
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn rehydration_needed_only_for_persisted_secretless_descriptors() {
        assert!(pg(None, Some("ds_1")).needs_secret_rehydration());
        assert!(pg(Some(""), Some("ds_1")).needs_secret_rehydration());
        assert!(!pg(Some("s3cret"), Some("ds_1")).needs_secret_rehydration());
        assert!(!pg(None, None).needs_secret_rehydration());

        let sqlite = Datasource::Sqlite(FileDatasource {
            id: Some("ds_2".to_string()),
            name: "local".to_string(),
            file_path: "/tmp/app.db".to_string(),
        });
        assert!(!sqlite.needs_secret_rehydration());
    }

    #[test]
    fn with_secret_fills_the_variant_slot() {
        let hydrated = pg(None, Some("ds_1")).with_secret("s3cret");
        assert_eq!(hydrated.secret().map(|s| s.expose().as_str()), Some("s3cret"));

        let libsql = Datasource::Libsql(UrlDatasource {
            id: Some("ds_3".to_string()),
            name: "edge".to_string(),
            url: "libsql://tenant.turso.io".to_string(),
            auth_token: None,
        })
        .with_secret("token");
        assert!(libsql.has_secret());
    }
}
