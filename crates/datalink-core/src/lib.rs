//! Datalink core: datasource descriptors, connection identity, the driver
//! seam and the shared error type.

pub mod connection_string;
pub mod datasource;
pub mod error;
pub mod identity;
pub mod sensitive;
pub mod tls;
pub mod traits;
pub mod types;

pub use connection_string::format_connection_string;
pub use datasource::{Datasource, Dialect, DialectFamily, FileDatasource, HostDatasource, UrlDatasource};
pub use error::{LinkError, LinkResult};
pub use identity::{resolve, ConnectionId};
pub use sensitive::Sensitive;
pub use tls::{TlsConfig, TlsMaterial, TlsMode};
pub use traits::{ConnectRequest, SqlDriver};
pub use types::{SessionEvent, SessionId};
