//! Packet layer: codec, framing and the packet types of every phase.
//!
//! Each physical packet is a 3-byte little-endian payload length, a 1-byte
//! sequence id and the payload. A logical payload of 2^24 - 1 bytes or more
//! is carried as consecutive full-size packets ending with a shorter one;
//! [`Framer`] hides the split in both directions.

pub mod framer;
pub mod handshake;
pub mod prepared;
pub mod reader;
pub mod replication;
pub mod response;
pub mod resultset;
pub mod writer;

pub use framer::Framer;
pub use handshake::{AuthSwitchRequest, HandshakeResponse41, HandshakeV10, SslRequest};
pub use prepared::{StmtExecute, StmtPrepareOk};
pub use reader::PacketReader;
pub use replication::{BinlogDump, BinlogDumpGtid, RegisterSlave};
pub use response::{EofPacket, ErrPacket, OkPacket, Response};
pub use resultset::QueryResult;
pub use writer::PacketWriter;

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_NO_SCHEMA: u32 = 1 << 4;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_ODBC: u32 = 1 << 6;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_IGNORE_SPACE: u32 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 1 << 12;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_RESERVED: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS: u32 = 1 << 22;
    pub const CLIENT_SESSION_TRACK: u32 = 1 << 23;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities every client built on this crate requests.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;

    /// Capabilities the bundled server advertises (SSL is added when TLS
    /// material is configured).
    pub const DEFAULT_SERVER_FLAGS: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_CONNECT_ATTRS
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_SESSION_TRACK
        | CLIENT_DEPRECATE_EOF;

    /// Capability names, lowest bit first, for trace output.
    pub fn names(flags: u32) -> Vec<&'static str> {
        const NAMES: [&str; 25] = [
            "LongPassword",
            "FoundRows",
            "LongFlag",
            "ConnectWithDB",
            "NoSchema",
            "Compress",
            "ODBC",
            "LocalFiles",
            "IgnoreSpace",
            "Protocol41",
            "Interactive",
            "SSL",
            "IgnoreSigpipe",
            "Transactions",
            "Reserved",
            "SecureConnection",
            "MultiStatements",
            "MultiResults",
            "PsMultiResults",
            "PluginAuth",
            "ConnectAttrs",
            "PluginAuthLenencClientData",
            "CanHandleExpiredPasswords",
            "SessionTrack",
            "DeprecateEOF",
        ];
        NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| flags & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// MySQL command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    Statistics = 0x09,
    ProcessKill = 0x0c,
    Ping = 0x0e,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
}

impl Command {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Command::Sleep,
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x09 => Command::Statistics,
            0x0c => Command::ProcessKill,
            0x0e => Command::Ping,
            0x11 => Command::ChangeUser,
            0x12 => Command::BinlogDump,
            0x15 => Command::RegisterSlave,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1e => Command::BinlogDumpGtid,
            0x1f => Command::ResetConnection,
            _ => return None,
        })
    }
}

/// MySQL server status flags.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPES: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
    pub const SERVER_STATUS_IN_TRANS_READONLY: u16 = 0x2000;
    pub const SERVER_SESSION_STATE_CHANGED: u16 = 0x4000;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Where a payload was received, which changes how 0xFE is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketContext {
    /// Between HandshakeResponse and the final OK/ERR
    Handshake,
    /// First packet of a command response
    CommandResponse,
    /// Inside a result set (column definitions or rows)
    ResultSet,
}

/// Generic packet classes recognized by first byte and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ok,
    Error,
    /// Legacy EOF (0xFE, payload < 9 bytes)
    Eof,
    AuthSwitchRequest,
    AuthMoreData,
    LocalInfile,
    /// Anything else: column count, column definition, row
    Data,
}

impl PacketType {
    /// Classify a payload.
    ///
    /// With `deprecate_eof` negotiated, a 0xFE packet shorter than
    /// [`MAX_PACKET_SIZE`] is an OK-shaped terminator rather than a legacy EOF.
    pub fn classify(payload: &[u8], context: PacketContext, deprecate_eof: bool) -> Self {
        let Some(&first) = payload.first() else {
            return PacketType::Data;
        };
        let len = payload.len();
        match (first, context) {
            (0xFF, _) => PacketType::Error,
            (0x00, PacketContext::Handshake | PacketContext::CommandResponse) if len >= 7 => {
                PacketType::Ok
            }
            (0xFE, PacketContext::Handshake) => PacketType::AuthSwitchRequest,
            (0x01, PacketContext::Handshake) => PacketType::AuthMoreData,
            (0xFE, _) if deprecate_eof && len < MAX_PACKET_SIZE => PacketType::Ok,
            (0xFE, _) if len < 9 => PacketType::Eof,
            (0xFB, PacketContext::CommandResponse) => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}
