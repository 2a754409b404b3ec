//! Display-only connection strings
//!
//! These strings are shown to observers next to each connection. They are
//! never used to open a connection and never contain secrets.

use url::Url;

use crate::datasource::{Datasource, HostDatasource};

/// Formats a human-readable connection string for a descriptor.
///
/// Returns `None` when there is nothing meaningful to show (host-based
/// descriptor without a host).
pub fn format_connection_string(datasource: &Datasource) -> Option<String> {
    match datasource {
        Datasource::Postgres(ds)
        | Datasource::Cockroachdb(ds)
        | Datasource::Mysql(ds)
        | Datasource::Mariadb(ds) => format_host_based(datasource.dialect().as_str(), ds),
        Datasource::Sqlite(ds) => Some(format!("sqlite:{}", ds.file_path)),
        Datasource::Libsql(ds) => Some(if ds.url.starts_with("libsql://") {
            ds.url.clone()
        } else {
            format!("libsql:{}", ds.url)
        }),
        Datasource::Mongodb(ds) => Some(mask_url_password(&ds.url)),
    }
}

fn format_host_based(protocol: &str, ds: &HostDatasource) -> Option<String> {
    if ds.host.trim().is_empty() {
        return None;
    }

    let auth = ds
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(|u| format!("{}@", u))
        .unwrap_or_default();
    let port = if ds.port > 0 {
        format!(":{}", ds.port)
    } else {
        String::new()
    };
    let database = ds
        .database
        .as_deref()
        .filter(|d| !d.is_empty())
        .map(|d| format!("/{}", d))
        .unwrap_or_default();

    Some(format!("{}://{}{}{}{}", protocol, auth, ds.host, port, database))
}

fn mask_url_password(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_ok() {
                url.to_string()
            } else {
                raw.to_string()
            }
        }
        _ => raw.to_string(),
    }
}
