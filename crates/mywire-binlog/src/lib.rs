//! MySQL binlog replication for mywire.
//!
//! This crate turns a replication stream into typed events. It provides:
//!
//! - Event header and FormatDescription handling, with CRC32 checksums
//! - Query, Rotate, Xid, GTID and PreviousGTIDs events
//! - TableMap decoding including optional row metadata
//! - Row images for Write/Update/Delete (v1, v2 and partial JSON updates)
//! - Packed DECIMAL and temporal column decoding
//! - A JSONB decoder with text and `serde_json` output
//! - [`BinlogStreamer`], which registers as a replica and iterates events
//!
//! # Example
//!
//! ```rust,ignore
//! use mywire_binlog::{BinlogStreamer, EventData, ReplicationConfig};
//! use mywire_protocol::{ClientConfig, Connection};
//!
//! let conn = Connection::connect(ClientConfig::new().host("db").user("repl").password("pw"))?;
//! let config = ReplicationConfig::new(1001).start_file("binlog.000001", 4);
//! for event in BinlogStreamer::start(conn, &config)? {
//!     if let EventData::Rows(rows) = event?.data {
//!         println!("{}.{}: {} rows", rows.table.schema, rows.table.table, rows.rows.len());
//!     }
//! }
//! ```

pub mod decimal;
pub mod event;
pub mod fde;
pub mod gtid;
pub mod jsonb;
pub mod parser;
pub mod query;
pub mod rows;
pub mod streamer;
pub mod table_map;
pub mod temporal;

pub use event::{Event, EventData, EventHeader, EventType};
pub use fde::{ChecksumAlg, FormatDescription};
pub use gtid::{GtidEvent, GtidSet};
pub use jsonb::JsonbValue;
pub use parser::Parser;
pub use query::{QueryEvent, StatusVar};
pub use rows::{Row, RowChange, RowsEvent, RowsKind};
pub use streamer::{BinlogStreamer, ReplicationConfig, StartPosition};
pub use table_map::{ColumnMeta, TableMap};
