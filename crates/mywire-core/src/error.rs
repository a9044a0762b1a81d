//! Error types for mywire operations.
//!
//! Every failure is distinguishable by its category and kind. Errors that
//! originate on a MySQL server travel as [`ServerError`] and are the only
//! ones carrying a non-zero error code.

use std::fmt;

/// The primary error type for all mywire operations.
#[derive(Debug)]
pub enum Error {
    /// The underlying stream failed or was closed by the peer
    Transport(TransportError),
    /// Packet envelope problems (short read, bad length, sequence gap)
    Framing(FramingError),
    /// Primitive decoding problems inside a payload
    Encoding(EncodingError),
    /// A well-formed packet that is not valid in the current state
    Protocol(ProtocolError),
    /// Authentication failures
    Auth(AuthError),
    /// Binlog stream decoding failures
    Binlog(BinlogError),
    /// JSONB document decoding failures
    Jsonb(JsonbError),
    /// Error reported by the peer in an ERR packet
    Server(ServerError),
    /// Configuration errors
    Config(ConfigError),
    /// Collation id or name not present in the built-in table
    UnknownCollation(String),
    /// I/O errors outside the connection stream (files, key material)
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Dialing the remote address failed
    Connect,
    /// The peer closed the stream
    RemoteClosed,
    /// Reading from the stream failed
    Read,
    /// Writing to the stream failed
    Write,
    /// TLS negotiation or record processing failed
    Tls,
}

#[derive(Debug)]
pub struct FramingError {
    pub kind: FramingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingErrorKind {
    /// Fewer bytes remain than the field requires
    ShortRead,
    /// Packet header or payload is malformed
    InvalidPacket,
    /// Sequence id differs from the expected value
    SequenceGap,
    /// Logical payload exceeds the configured maximum
    PacketTooLarge,
}

#[derive(Debug)]
pub struct EncodingError {
    pub kind: EncodingErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingErrorKind {
    /// 0xFF (or another reserved byte) where a length-encoded integer was expected
    InvalidLenEnc,
    /// NUL-terminated string ran off the end of the buffer
    NoTerminator,
    /// Payload starts with a byte not valid for the expected packet
    UnexpectedFirstByte,
    /// Bit index beyond the bitmap's length
    IndexOutOfRange,
    /// Field value cannot be represented (bad UTF-8, bad date, ...)
    InvalidValue,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub kind: ProtocolErrorKind,
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// Packet is not valid in the current state
    UnexpectedPacket,
    /// The peer lacks a capability this side requires
    UnsupportedCapability,
    /// Query event status variable with an unknown code
    UnsupportedStatusVar,
    /// Binlog event type this decoder cannot interpret
    UnsupportedEvent,
    /// Command byte with no handler
    UnsupportedCommand,
    /// Server asked for a LOCAL INFILE transfer
    LocalInfileUnsupported,
}

#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Response does not match the stored credential
    Mismatch,
    /// Authentication plugin is not implemented
    UnsupportedMethod,
    /// RSA key parsing, encryption or decryption failed
    PublicKey,
    /// Method requires TLS or RSA and neither is available
    InsecureTransport,
}

#[derive(Debug)]
pub struct BinlogError {
    pub kind: BinlogErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinlogErrorKind {
    /// Event received before any FormatDescriptionEvent
    MissingFormatDescription,
    /// Rows event references a table id with no cached TableMap
    MissingTableMap,
    /// Column binlog type has no decoder
    UnexpectedColumnType,
    /// TableMap metadata is inconsistent with the column types
    InvalidMetadata,
    /// Trailing CRC32 does not match the event bytes
    ChecksumMismatch,
    /// Server signalled the end of the dump stream
    EndOfStream,
}

#[derive(Debug)]
pub struct JsonbError {
    pub kind: JsonbErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonbErrorKind {
    /// Offsets, sizes or headers violate the document layout
    Corrupt,
    /// Type byte is not a known JSONB type
    InvalidScalarType,
    /// Variable-length length exceeds 2^32 or 5 bytes
    LengthOverflow,
}

/// An error carried in an ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Well-known server error codes and their SQL states.
pub mod codes {
    pub const ER_HANDSHAKE_ERROR: u16 = 1043;
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
    pub const ER_NET_READ_ERROR: u16 = 1158;
    pub const ER_NOT_SUPPORTED_AUTH_MODE: u16 = 1251;
    pub const ER_UNKNOWN_STMT_HANDLER: u16 = 1243;
    pub const ER_UNKNOWN_ERROR: u16 = 1105;

    pub const SS_ACCESS_DENIED: &str = "28000";
    pub const SS_UNKNOWN_COM: &str = "08S01";
    pub const SS_NOT_SUPPORTED_AUTH: &str = "08004";
    pub const SS_GENERAL: &str = "HY000";
}

impl Error {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Error::Transport(TransportError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Wrap an I/O error raised by the connection stream.
    pub fn transport_io(kind: TransportErrorKind, err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportErrorKind::RemoteClosed,
            _ => kind,
        };
        Error::Transport(TransportError {
            kind,
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }

    pub fn framing(kind: FramingErrorKind, message: impl Into<String>) -> Self {
        Error::Framing(FramingError {
            kind,
            message: message.into(),
        })
    }

    /// A fixed-size read needed `needed` bytes but only `remaining` were left.
    pub fn short_read(needed: usize, remaining: usize) -> Self {
        Error::framing(
            FramingErrorKind::ShortRead,
            format!("needed {needed} bytes, {remaining} remaining"),
        )
    }

    pub fn encoding(kind: EncodingErrorKind, message: impl Into<String>) -> Self {
        Error::Encoding(EncodingError {
            kind,
            message: message.into(),
        })
    }

    pub fn protocol(kind: ProtocolErrorKind, message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            kind,
            message: message.into(),
            raw_data: None,
        })
    }

    /// Unexpected packet with the offending payload attached for diagnostics.
    pub fn unexpected_packet(message: impl Into<String>, payload: &[u8]) -> Self {
        Error::Protocol(ProtocolError {
            kind: ProtocolErrorKind::UnexpectedPacket,
            message: message.into(),
            raw_data: Some(payload.to_vec()),
        })
    }

    pub fn auth(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Error::Auth(AuthError {
            kind,
            message: message.into(),
        })
    }

    pub fn binlog(kind: BinlogErrorKind, message: impl Into<String>) -> Self {
        Error::Binlog(BinlogError {
            kind,
            message: message.into(),
        })
    }

    pub fn jsonb(kind: JsonbErrorKind, message: impl Into<String>) -> Self {
        Error::Jsonb(JsonbError {
            kind,
            message: message.into(),
        })
    }

    pub fn server(code: u16, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Server(ServerError {
            code,
            sql_state: sql_state.into(),
            message: message.into(),
        })
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// MySQL error code, present only for errors reported by a server.
    pub fn error_code(&self) -> Option<u16> {
        match self {
            Error::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// SQL state, present only for errors reported by a server.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Error::Server(e) => Some(&e.sql_state),
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Whether the owning connection must be closed after this error.
    ///
    /// Binlog and JSONB errors end the current stream only; a server error
    /// leaves the connection usable unless it came from the connection phase.
    pub fn is_connection_fatal(&self) -> bool {
        match self {
            Error::Transport(_)
            | Error::Framing(_)
            | Error::Encoding(_)
            | Error::Protocol(_)
            | Error::Auth(_) => true,
            Error::Binlog(_)
            | Error::Jsonb(_)
            | Error::Server(_)
            | Error::Config(_)
            | Error::UnknownCollation(_)
            | Error::Io(_) => false,
        }
    }

    pub fn framing_kind(&self) -> Option<FramingErrorKind> {
        match self {
            Error::Framing(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn encoding_kind(&self) -> Option<EncodingErrorKind> {
        match self {
            Error::Encoding(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            Error::Protocol(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            Error::Auth(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn binlog_kind(&self) -> Option<BinlogErrorKind> {
        match self {
            Error::Binlog(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn jsonb_kind(&self) -> Option<JsonbErrorKind> {
        match self {
            Error::Jsonb(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Error::Transport(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl ServerError {
    pub fn new(code: u16, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.into(),
            message: message.into(),
        }
    }

    /// ERR 1045 / 28000 for a failed login.
    pub fn access_denied(user: &str, host: &str, using_password: bool) -> Self {
        Self::new(
            codes::ER_ACCESS_DENIED_ERROR,
            codes::SS_ACCESS_DENIED,
            format!(
                "Access denied for user '{}'@'{}' (using password: {})",
                user,
                host,
                if using_password { "YES" } else { "NO" }
            ),
        )
    }

    /// ERR 1047 / 08S01 for a command with no handler.
    pub fn unknown_command(command: u8) -> Self {
        Self::new(
            codes::ER_UNKNOWN_COM_ERROR,
            codes::SS_UNKNOWN_COM,
            format!("Unknown command 0x{command:02X}"),
        )
    }
}

/// Render a server-side log line: `[MY-<6-digit-code>] [<module>] <msg>`.
pub fn server_log_line(code: u16, module: &str, message: &str) -> String {
    format!("[MY-{code:06}] [{module}] {message}")
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Transport(e) => write!(f, "Transport error: {}", e.message),
            Error::Framing(e) => write!(f, "Framing error ({:?}): {}", e.kind, e.message),
            Error::Encoding(e) => write!(f, "Encoding error ({:?}): {}", e.kind, e.message),
            Error::Protocol(e) => write!(f, "Protocol error ({:?}): {}", e.kind, e.message),
            Error::Auth(e) => write!(f, "Authentication error ({:?}): {}", e.kind, e.message),
            Error::Binlog(e) => write!(f, "Binlog error ({:?}): {}", e.kind, e.message),
            Error::Jsonb(e) => write!(f, "JSONB error ({:?}): {}", e.kind, e.message),
            Error::Server(e) => write!(f, "{e}"),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::UnknownCollation(key) => write!(f, "Unknown collation: {key}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.sql_state, self.message)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for mywire operations.
pub type Result<T> = std::result::Result<T, Error>;
