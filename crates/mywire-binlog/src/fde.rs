//! FormatDescriptionEvent: binlog version, post-header lengths, checksum.

use mywire_core::error::{BinlogErrorKind, ProtocolErrorKind};
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;

use crate::event::{EVENT_HEADER_LEN, EventType};

const SERVER_VERSION_LEN: usize = 50;

/// First server version whose FDE carries a checksum algorithm byte.
const CHECKSUM_VERSION: (u32, u32, u32) = (5, 6, 1);

/// Length of the trailing CRC32.
pub const CHECKSUM_LEN: usize = 4;

/// Event checksum algorithm declared by the FDE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlg {
    #[default]
    Off,
    Crc32,
    /// 0xFF: the source did not know its own algorithm (treated as off)
    Undefined,
}

impl ChecksumAlg {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ChecksumAlg::Off),
            1 => Ok(ChecksumAlg::Crc32),
            0xFF => Ok(ChecksumAlg::Undefined),
            other => Err(Error::binlog(
                BinlogErrorKind::InvalidMetadata,
                format!("unknown checksum algorithm {other}"),
            )),
        }
    }

    /// Parse the value of `@@global.binlog_checksum`.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("CRC32") {
            ChecksumAlg::Crc32
        } else {
            ChecksumAlg::Off
        }
    }

    /// Bytes of checksum trailing each event.
    pub fn trailer_len(self) -> usize {
        match self {
            ChecksumAlg::Crc32 => CHECKSUM_LEN,
            ChecksumAlg::Off | ChecksumAlg::Undefined => 0,
        }
    }
}

/// Verify the CRC32 trailing `event`; returns the event without it.
pub fn verify_crc32(event: &[u8]) -> Result<&[u8]> {
    let Some(split) = event.len().checked_sub(CHECKSUM_LEN) else {
        return Err(Error::short_read(CHECKSUM_LEN, event.len()));
    };
    let (data, trailer) = event.split_at(split);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(data);
    if actual != expected {
        return Err(Error::binlog(
            BinlogErrorKind::ChecksumMismatch,
            format!("event crc32 {actual:08x} does not match trailer {expected:08x}"),
        ));
    }
    Ok(data)
}

/// Decoded FormatDescriptionEvent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_length: u8,
    /// Post-header length per event type, indexed by `type_code - 1`
    pub post_header_lengths: Vec<u8>,
    pub checksum: ChecksumAlg,
}

impl FormatDescription {
    /// Parse the event body (everything after the common header, including
    /// the checksum trailer when the server version has one).
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let binlog_version = reader.read_u16_le()?;
        if binlog_version != 4 {
            return Err(Error::protocol(
                ProtocolErrorKind::UnsupportedEvent,
                format!("binlog version {binlog_version} is not supported"),
            ));
        }
        let raw_version = reader.read_bytes(SERVER_VERSION_LEN)?;
        let end = raw_version
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(raw_version.len());
        let server_version = String::from_utf8_lossy(&raw_version[..end]).into_owned();
        let create_timestamp = reader.read_u32_le()?;
        let header_length = reader.read_u8()?;
        if usize::from(header_length) != EVENT_HEADER_LEN {
            return Err(Error::binlog(
                BinlogErrorKind::InvalidMetadata,
                format!("event header length {header_length}, expected {EVENT_HEADER_LEN}"),
            ));
        }

        let rest = reader.read_rest();
        let (post_header_lengths, checksum) = if version_triple(&server_version) >= CHECKSUM_VERSION {
            let Some(split) = rest.len().checked_sub(1 + CHECKSUM_LEN) else {
                return Err(Error::short_read(1 + CHECKSUM_LEN, rest.len()));
            };
            (rest[..split].to_vec(), ChecksumAlg::from_u8(rest[split])?)
        } else {
            (rest.to_vec(), ChecksumAlg::Off)
        };

        Ok(Self {
            binlog_version,
            server_version,
            create_timestamp,
            header_length,
            post_header_lengths,
            checksum,
        })
    }

    /// Post-header length for `event_type`, 0 when the table has no entry.
    pub fn post_header_len(&self, event_type: EventType) -> usize {
        (event_type as usize)
            .checked_sub(1)
            .and_then(|i| self.post_header_lengths.get(i))
            .map_or(0, |&len| usize::from(len))
    }

    pub fn version(&self) -> (u32, u32, u32) {
        version_triple(&self.server_version)
    }
}

/// Leading `major.minor.patch` of a server version string.
fn version_triple(version: &str) -> (u32, u32, u32) {
    let mut parts = version.split('.').map(|part| {
        part.chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse::<u32>()
            .unwrap_or(0)
    });
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
