//! MySQL client/server wire protocol.
//!
//! This crate implements both ends of the MySQL protocol over blocking
//! `std::net` streams. It provides:
//!
//! - Packet framing with sequence numbers and 16MB continuation packets
//! - The connection handshake, including the in-band TLS upgrade
//! - Authentication (mysql_native_password, caching_sha2_password,
//!   sha256_password) from the client and the server side
//! - Text and binary query protocols and prepared statements
//! - Replication commands (REGISTER_SLAVE, BINLOG_DUMP, BINLOG_DUMP_GTID)
//! - A threaded server that dispatches commands to a [`server::Handler`]
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Packets over 16MB are split
//! - Request/response pairing via sequence numbers
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire_protocol::{ClientConfig, Connection};
//!
//! let config = ClientConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .password("secret")
//!     .default_schema("mydb");
//!
//! let mut conn = Connection::connect(config)?;
//! let result = conn.query("SELECT 1 AS x")?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod stream;
pub mod tls;
pub mod types;

pub use auth::{AuthMethod, RsaKeyPair, Sha2Cache};
pub use config::{ClientConfig, SslMode, TlsConfig};
pub use connection::{Connection, ConnectionState, ServerInfo};
pub use protocol::QueryResult;
pub use protocol::prepared::PreparedStatement;
pub use server::{Handler, ResultWriter, Server, ServerConfig, Session};
pub use types::{ColumnDef, FieldType};
