// SPDX-License-Identifier: Apache-2.0

//! Connection identity
//!
//! Derives a stable identifier for the physical endpoint a descriptor points
//! at. Credentials, display names and database names never participate, and
//! protocol-compatible dialects share their base family prefix so that e.g. a
//! CockroachDB descriptor and a PostgreSQL descriptor for the same host:port
//! deduplicate onto one connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::datasource::{Datasource, DialectFamily};

/// Stable identifier of a physical endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Resolves the connection identifier for a descriptor.
pub fn resolve(datasource: &Datasource) -> ConnectionId {
    let family = datasource.family();
    match datasource {
        Datasource::Postgres(ds)
        | Datasource::Cockroachdb(ds)
        | Datasource::Mysql(ds)
        | Datasource::Mariadb(ds) => ConnectionId(format!(
            "{}-{}:{}",
            family,
            normalize_host(&ds.host),
            ds.port
        )),
        Datasource::Sqlite(ds) => ConnectionId(format!("{}-{}", family, ds.file_path)),
        Datasource::Libsql(ds) | Datasource::Mongodb(ds) => url_identity(family, &ds.url),
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().to_ascii_lowercase()
}

fn default_port(family: DialectFamily) -> Option<u16> {
    match family {
        DialectFamily::MongoDb => Some(27017),
        _ => None,
    }
}

fn url_identity(family: DialectFamily, raw: &str) -> ConnectionId {
    let parsed = Url::parse(raw.trim()).ok().and_then(|url| {
        let host = url.host_str().filter(|h| !h.is_empty())?.to_string();
        Some((normalize_host(&host), url.port_or_known_default()))
    });

    match parsed {
        Some((host, port)) => match port.or_else(|| default_port(family)) {
            Some(port) => ConnectionId(format!("{}-{}:{}", family, host, port)),
            None => ConnectionId(format!("{}-{}", family, host)),
        },
        // Unparseable URLs still need a stable key; a full digest keeps
        // distinct malformed URLs from colliding.
        None => ConnectionId(format!("{}-{}", family, content_hash(raw))),
    }
}

fn content_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{FileDatasource, HostDatasource, UrlDatasource};
    use crate::sensitive::Sensitive;

    fn host(host: &str, port: u16, user: &str, password: &str) -> HostDatasource {
        HostDatasource {
            id: None,
            name: "endpoint".to_string(),
            host: host.to_string(),
            port,
            username: Some(user.to_string()),
            password: Some(Sensitive::from(password)),
            database: None,
            ssl: None,
        }
    }

    fn url(raw: &str) -> UrlDatasource {
        UrlDatasource {
            id: None,
            name: "remote".to_string(),
            url: raw.to_string(),
            auth_token: None,
        }
    }

    #[test]
    fn compatible_dialects_share_identity() {
        let pg = Datasource::Postgres(host("db1", 5432, "app", "a"));
        let crdb = Datasource::Cockroachdb(host("db1", 5432, "root", "b"));
        assert_eq!(resolve(&pg), resolve(&crdb));
        assert_eq!(resolve(&pg).as_str(), "postgres-db1:5432");

        let mysql = Datasource::Mysql(host("db2", 3306, "app", "a"));
        let maria = Datasource::Mariadb(host("db2", 3306, "app", "a"));
        assert_eq!(resolve(&mysql), resolve(&maria));
        assert_eq!(resolve(&mysql).as_str(), "mysql-db2:3306");
    }

    #[test]
    fn credentials_and_database_do_not_affect_identity() {
        let mut a = host("DB1 ", 5432, "alice", "one");
        a.database = Some("orders".to_string());
        let b = host("db1", 5432, "bob", "two");

        assert_eq!(
            resolve(&Datasource::Postgres(a)),
            resolve(&Datasource::Postgres(b))
        );
    }

    #[test]
    fn different_ports_are_distinct() {
        let a = Datasource::Postgres(host("db1", 5432, "app", "a"));
        let b = Datasource::Postgres(host("db1", 5433, "app", "a"));
        assert_ne!(resolve(&a), resolve(&b));
    }

    #[test]
    fn file_identity_uses_path() {
        let ds = Datasource::Sqlite(FileDatasource {
            id: None,
            name: "local".to_string(),
            file_path: "/var/data/app.db".to_string(),
        });
        assert_eq!(resolve(&ds).as_str(), "sqlite-/var/data/app.db");
    }

    #[test]
    fn url_identity_uses_host_and_port() {
        let mongo = Datasource::Mongodb(url("mongodb://user:pw@Mongo.Internal/app"));
        assert_eq!(resolve(&mongo).as_str(), "mongodb-mongo.internal:27017");

        let mongo_port = Datasource::Mongodb(url("mongodb://mongo.internal:27018/app"));
        assert_eq!(resolve(&mongo_port).as_str(), "mongodb-mongo.internal:27018");

        let libsql = Datasource::Libsql(url("libsql://tenant.turso.io"));
        assert_eq!(resolve(&libsql).as_str(), "libsql-tenant.turso.io");

        let https = Datasource::Libsql(url("https://tenant.turso.io"));
        assert_eq!(resolve(&https).as_str(), "libsql-tenant.turso.io:443");
    }

    #[test]
    fn malformed_url_falls_back_to_full_hash() {
        let a = Datasource::Mongodb(url("not a url at all"));
        let b = Datasource::Mongodb(url("not a url at all!"));

        let id_a = resolve(&a);
        assert_eq!(id_a, resolve(&a.clone()));
        assert_ne!(id_a, resolve(&b));

        let digest = id_a.as_str().strip_prefix("mongodb-").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
