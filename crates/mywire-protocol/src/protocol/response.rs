//! Generic response packets: OK, ERR and EOF.

use mywire_core::error::EncodingErrorKind;
use mywire_core::{Error, Result, ServerError};

use super::capabilities::{
    CLIENT_DEPRECATE_EOF, CLIENT_PROTOCOL_41, CLIENT_SESSION_TRACK, CLIENT_TRANSACTIONS,
};
use super::server_status::SERVER_SESSION_STATE_CHANGED;
use super::{PacketContext, PacketReader, PacketType, PacketWriter};

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// 0x00, or 0xFE when it terminates a result set under DeprecateEOF
    pub header: u8,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
    /// Raw session-state-change block, returned without interpretation
    pub session_state_changes: Option<Vec<u8>>,
}

/// Parsed ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Five ASCII characters; "HY000" when the sender omitted it
    pub sql_state: String,
    pub error_message: String,
}

/// Parsed legacy EOF packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

/// A response packet, tagged by family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(OkPacket),
    Err(ErrPacket),
    Eof(EofPacket),
    /// LOCAL INFILE request carrying the file name the server wants
    LocalInfile(String),
    /// Result set header (column count)
    ResultSet(u64),
}

impl OkPacket {
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let header = reader.read_u8()?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::encoding(
                EncodingErrorKind::UnexpectedFirstByte,
                format!("OK packet starts with 0x{header:02X}"),
            ));
        }
        let affected_rows = reader.read_lenenc_int()?;
        let last_insert_id = reader.read_lenenc_int()?;

        let (status_flags, warnings) = if capabilities & CLIENT_PROTOCOL_41 != 0 {
            (reader.read_u16_le()?, reader.read_u16_le()?)
        } else if capabilities & CLIENT_TRANSACTIONS != 0 {
            (reader.read_u16_le()?, 0)
        } else {
            (0, 0)
        };

        let mut session_state_changes = None;
        let info = if capabilities & CLIENT_SESSION_TRACK != 0 {
            let info = if reader.is_empty() {
                String::new()
            } else {
                reader.read_lenenc_string()?
            };
            if status_flags & SERVER_SESSION_STATE_CHANGED != 0 {
                session_state_changes = Some(reader.read_lenenc_bytes()?.to_vec());
            }
            info
        } else {
            reader.read_rest_string()
        };

        Ok(Self {
            header,
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
            session_state_changes,
        })
    }

    pub fn encode(&self, capabilities: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(self.header);
        writer.write_lenenc_int(self.affected_rows);
        writer.write_lenenc_int(self.last_insert_id);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            writer.write_u16_le(self.status_flags);
            writer.write_u16_le(self.warnings);
        } else if capabilities & CLIENT_TRANSACTIONS != 0 {
            writer.write_u16_le(self.status_flags);
        }
        if capabilities & CLIENT_SESSION_TRACK != 0 {
            writer.write_lenenc_string(&self.info);
            if self.status_flags & SERVER_SESSION_STATE_CHANGED != 0 {
                writer.write_lenenc_bytes(self.session_state_changes.as_deref().unwrap_or(&[]));
            }
        } else {
            writer.write_bytes(self.info.as_bytes());
        }
        writer.into_bytes()
    }
}

impl ErrPacket {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let header = reader.read_u8()?;
        if header != 0xFF {
            return Err(Error::encoding(
                EncodingErrorKind::UnexpectedFirstByte,
                format!("ERR packet starts with 0x{header:02X}"),
            ));
        }
        let error_code = reader.read_u16_le()?;
        // Servers send the state marker even before Protocol41 is agreed.
        let sql_state = if reader.peek() == Some(b'#') {
            reader.skip(1)?;
            reader.read_fixed_string(5)?
        } else {
            "HY000".to_string()
        };
        Ok(Self {
            error_code,
            sql_state,
            error_message: reader.read_rest_string(),
        })
    }

    pub fn encode(&self, capabilities: u32) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u8(0xFF);
        writer.write_u16_le(self.error_code);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            writer.write_u8(b'#');
            writer.write_fixed_string(&self.sql_state, 5);
        }
        writer.write_bytes(self.error_message.as_bytes());
        writer.into_bytes()
    }

    pub fn into_error(self) -> Error {
        Error::Server(self.into())
    }
}

impl From<ErrPacket> for ServerError {
    fn from(err: ErrPacket) -> Self {
        ServerError::new(err.error_code, err.sql_state, err.error_message)
    }
}

impl From<&ServerError> for ErrPacket {
    fn from(err: &ServerError) -> Self {
        Self {
            error_code: err.code,
            sql_state: err.sql_state.clone(),
            error_message: err.message.clone(),
        }
    }
}

impl EofPacket {
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let header = reader.read_u8()?;
        if header != 0xFE {
            return Err(Error::encoding(
                EncodingErrorKind::UnexpectedFirstByte,
                format!("EOF packet starts with 0x{header:02X}"),
            ));
        }
        if capabilities & CLIENT_PROTOCOL_41 != 0 && reader.remaining() >= 4 {
            Ok(Self {
                warnings: reader.read_u16_le()?,
                status_flags: reader.read_u16_le()?,
            })
        } else {
            Ok(Self::default())
        }
    }

    pub fn encode(&self, capabilities: u32) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(5);
        writer.write_u8(0xFE);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            writer.write_u16_le(self.warnings);
            writer.write_u16_le(self.status_flags);
        }
        writer.into_bytes()
    }
}

impl Response {
    /// Decode the first packet of a command response.
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self> {
        let deprecate_eof = capabilities & CLIENT_DEPRECATE_EOF != 0;
        match PacketType::classify(payload, PacketContext::CommandResponse, deprecate_eof) {
            PacketType::Ok => OkPacket::parse(payload, capabilities).map(Response::Ok),
            PacketType::Error => ErrPacket::parse(payload).map(Response::Err),
            PacketType::Eof => EofPacket::parse(payload, capabilities).map(Response::Eof),
            PacketType::LocalInfile => Ok(Response::LocalInfile(
                String::from_utf8_lossy(&payload[1..]).into_owned(),
            )),
            _ => {
                let mut reader = PacketReader::new(payload);
                let count = reader.read_lenenc_int()?;
                if count == 0 {
                    return Err(Error::unexpected_packet("zero column count", payload));
                }
                Ok(Response::ResultSet(count))
            }
        }
    }
}

/// Parse the packet that ends a column block or row block.
///
/// Under DeprecateEOF this is an OK-shaped 0xFE packet; the returned
/// [`EofPacket`] carries its status and warnings either way.
pub fn parse_terminator(payload: &[u8], capabilities: u32) -> Result<EofPacket> {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        let ok = OkPacket::parse(payload, capabilities)?;
        Ok(EofPacket {
            warnings: ok.warnings,
            status_flags: ok.status_flags,
        })
    } else {
        EofPacket::parse(payload, capabilities)
    }
}

/// Encode the packet that ends a row block.
pub fn encode_terminator(eof: EofPacket, capabilities: u32) -> Vec<u8> {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        OkPacket {
            header: 0xFE,
            status_flags: eof.status_flags,
            warnings: eof.warnings,
            ..OkPacket::default()
        }
        .encode(capabilities)
    } else {
        eof.encode(capabilities)
    }
}
