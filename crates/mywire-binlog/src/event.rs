//! Binlog event header, event type codes and the small fixed-layout events.

use std::sync::Arc;

use mywire_core::error::FramingErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;

use crate::fde::FormatDescription;
use crate::gtid::{GtidEvent, GtidSet};
use crate::query::QueryEvent;
use crate::rows::RowsEvent;
use crate::table_map::TableMap;

/// Size of the v4 event header.
pub const EVENT_HEADER_LEN: usize = 19;

/// Binlog event type codes (`Log_event_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0x00,
    StartV3 = 0x01,
    Query = 0x02,
    Stop = 0x03,
    Rotate = 0x04,
    Intvar = 0x05,
    Load = 0x06,
    Slave = 0x07,
    CreateFile = 0x08,
    AppendBlock = 0x09,
    ExecLoad = 0x0A,
    DeleteFile = 0x0B,
    NewLoad = 0x0C,
    Rand = 0x0D,
    UserVar = 0x0E,
    FormatDescription = 0x0F,
    Xid = 0x10,
    BeginLoadQuery = 0x11,
    ExecuteLoadQuery = 0x12,
    TableMap = 0x13,
    PreGaWriteRows = 0x14,
    PreGaUpdateRows = 0x15,
    PreGaDeleteRows = 0x16,
    WriteRowsV1 = 0x17,
    UpdateRowsV1 = 0x18,
    DeleteRowsV1 = 0x19,
    Incident = 0x1A,
    Heartbeat = 0x1B,
    Ignorable = 0x1C,
    RowsQuery = 0x1D,
    WriteRowsV2 = 0x1E,
    UpdateRowsV2 = 0x1F,
    DeleteRowsV2 = 0x20,
    Gtid = 0x21,
    AnonymousGtid = 0x22,
    PreviousGtids = 0x23,
    TransactionContext = 0x24,
    ViewChange = 0x25,
    XaPrepare = 0x26,
    PartialUpdateRows = 0x27,
    TransactionPayload = 0x28,
    HeartbeatV2 = 0x29,
}

impl EventType {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => EventType::Unknown,
            0x01 => EventType::StartV3,
            0x02 => EventType::Query,
            0x03 => EventType::Stop,
            0x04 => EventType::Rotate,
            0x05 => EventType::Intvar,
            0x06 => EventType::Load,
            0x07 => EventType::Slave,
            0x08 => EventType::CreateFile,
            0x09 => EventType::AppendBlock,
            0x0A => EventType::ExecLoad,
            0x0B => EventType::DeleteFile,
            0x0C => EventType::NewLoad,
            0x0D => EventType::Rand,
            0x0E => EventType::UserVar,
            0x0F => EventType::FormatDescription,
            0x10 => EventType::Xid,
            0x11 => EventType::BeginLoadQuery,
            0x12 => EventType::ExecuteLoadQuery,
            0x13 => EventType::TableMap,
            0x14 => EventType::PreGaWriteRows,
            0x15 => EventType::PreGaUpdateRows,
            0x16 => EventType::PreGaDeleteRows,
            0x17 => EventType::WriteRowsV1,
            0x18 => EventType::UpdateRowsV1,
            0x19 => EventType::DeleteRowsV1,
            0x1A => EventType::Incident,
            0x1B => EventType::Heartbeat,
            0x1C => EventType::Ignorable,
            0x1D => EventType::RowsQuery,
            0x1E => EventType::WriteRowsV2,
            0x1F => EventType::UpdateRowsV2,
            0x20 => EventType::DeleteRowsV2,
            0x21 => EventType::Gtid,
            0x22 => EventType::AnonymousGtid,
            0x23 => EventType::PreviousGtids,
            0x24 => EventType::TransactionContext,
            0x25 => EventType::ViewChange,
            0x26 => EventType::XaPrepare,
            0x27 => EventType::PartialUpdateRows,
            0x28 => EventType::TransactionPayload,
            0x29 => EventType::HeartbeatV2,
            _ => return None,
        })
    }

    pub const fn is_rows(self) -> bool {
        matches!(
            self,
            EventType::WriteRowsV1
                | EventType::UpdateRowsV1
                | EventType::DeleteRowsV1
                | EventType::WriteRowsV2
                | EventType::UpdateRowsV2
                | EventType::DeleteRowsV2
                | EventType::PartialUpdateRows
        )
    }
}

/// The 19-byte header in front of every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub timestamp: u32,
    /// Raw type code; see [`EventHeader::event_type`]
    pub type_code: u8,
    pub server_id: u32,
    /// Total event size including header and checksum
    pub event_size: u32,
    /// Position of the next event in the source binlog
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(bytes);
        let header = Self {
            timestamp: reader.read_u32_le()?,
            type_code: reader.read_u8()?,
            server_id: reader.read_u32_le()?,
            event_size: reader.read_u32_le()?,
            log_pos: reader.read_u32_le()?,
            flags: reader.read_u16_le()?,
        };
        if (header.event_size as usize) < EVENT_HEADER_LEN {
            return Err(Error::framing(
                FramingErrorKind::InvalidPacket,
                format!("event size {} is smaller than the header", header.event_size),
            ));
        }
        Ok(header)
    }

    /// `None` for type codes newer than this decoder knows.
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_u8(self.type_code)
    }
}

/// A decoded event.
#[derive(Debug, Clone)]
pub struct Event {
    pub header: EventHeader,
    pub data: EventData,
}

/// Event body, one variant per decoded event type.
#[derive(Debug, Clone)]
pub enum EventData {
    FormatDescription(FormatDescription),
    Rotate(RotateEvent),
    Query(QueryEvent),
    Xid(XidEvent),
    IntVar(IntVarEvent),
    TableMap(Arc<TableMap>),
    Rows(RowsEvent),
    Gtid(GtidEvent),
    AnonymousGtid(GtidEvent),
    PreviousGtids(GtidSet),
    RowsQuery(RowsQueryEvent),
    Heartbeat(HeartbeatEvent),
    Incident(IncidentEvent),
    Stop,
    /// Events this decoder does not interpret, checksum removed
    Unparsed(Vec<u8>),
}

/// Switch to a new binlog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotateEvent {
    pub position: u64,
    pub next_file: String,
}

impl RotateEvent {
    pub fn parse(body: &[u8], post_header_len: usize) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let position = if post_header_len >= 8 {
            let position = reader.read_u64_le()?;
            reader.skip(post_header_len - 8)?;
            position
        } else {
            4
        };
        Ok(Self {
            position,
            next_file: reader.read_rest_string(),
        })
    }
}

/// Transaction commit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XidEvent {
    pub xid: u64,
}

impl XidEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self {
            xid: PacketReader::new(body).read_u64_le()?,
        })
    }
}

/// Auto-increment or LAST_INSERT_ID() value used by the following statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntVarEvent {
    /// 1 = LAST_INSERT_ID, 2 = INSERT_ID
    pub kind: u8,
    pub value: u64,
}

impl IntVarEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        Ok(Self {
            kind: reader.read_u8()?,
            value: reader.read_u64_le()?,
        })
    }
}

/// Original statement text for the rows events that follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsQueryEvent {
    pub query: String,
}

impl RowsQueryEvent {
    pub fn parse(body: &[u8], post_header_len: usize) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        reader.skip(post_header_len)?;
        // The length byte is truncated for statements over 255 bytes; the
        // rest of the event is the full text.
        reader.skip(1)?;
        Ok(Self {
            query: reader.read_rest_string(),
        })
    }
}

/// Keepalive sent by the source while idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatEvent {
    /// Binlog file the source is currently at; the position is in the header
    pub log_file: String,
}

impl HeartbeatEvent {
    pub fn parse(body: &[u8]) -> Self {
        Self {
            log_file: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentEvent {
    pub kind: u16,
    pub message: String,
}

impl IncidentEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let kind = reader.read_u16_le()?;
        let message = if reader.is_empty() {
            String::new()
        } else {
            let len = reader.read_u8()?;
            String::from_utf8_lossy(reader.read_bytes(usize::from(len))?).into_owned()
        };
        Ok(Self { kind, message })
    }
}
