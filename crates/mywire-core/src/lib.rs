//! Core types shared by the mywire crates.
//!
//! - [`Error`] and its per-category payloads, covering transport, framing,
//!   encoding, protocol, authentication, binlog and JSONB failures as well as
//!   errors reported by a MySQL server
//! - [`Value`] for decoded column values (text rows, binary rows and binlog
//!   row images)
//! - the process-wide [`collation`] table
//! - [`BitSet`], a bounds-checked bitmap

pub mod bitset;
pub mod collation;
pub mod error;
pub mod value;

pub use bitset::BitSet;
pub use collation::Collation;
pub use error::{
    AuthError, AuthErrorKind, BinlogError, BinlogErrorKind, ConfigError, EncodingError,
    EncodingErrorKind, Error, FramingError, FramingErrorKind, JsonbError, JsonbErrorKind,
    ProtocolError, ProtocolErrorKind, Result, ServerError, TransportError, TransportErrorKind,
};
pub use value::{DateTimeValue, DateValue, TimeValue, TimestampValue, Value};
