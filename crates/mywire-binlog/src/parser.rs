//! Stateful event parser: FormatDescription, checksums and the TableMap cache.

use std::collections::HashMap;
use std::sync::Arc;

use mywire_core::error::{BinlogErrorKind, ProtocolErrorKind};
use mywire_core::{Error, Result};
use mywire_protocol::protocol::ErrPacket;

use crate::event::{
    EVENT_HEADER_LEN, Event, EventData, EventHeader, EventType, HeartbeatEvent, IncidentEvent,
    IntVarEvent, RotateEvent, RowsQueryEvent, XidEvent,
};
use crate::fde::{CHECKSUM_LEN, ChecksumAlg, FormatDescription, verify_crc32};
use crate::gtid::{GtidEvent, GtidSet};
use crate::query::QueryEvent;
use crate::rows::RowsEvent;
use crate::table_map::TableMap;

/// Post-header length of ROTATE in every v4 binlog.
const ROTATE_POST_HEADER_LEN: usize = 8;

/// Bytes of an unparsed body shown in trace logs.
const TRACE_BODY_BYTES: usize = 32;

/// Parses the events of one binlog stream, in order.
///
/// Holds the current FormatDescription and the TableMaps seen since the
/// last Rotate. One parser per stream; it is not shared between streams.
#[derive(Debug, Default)]
pub struct Parser {
    fde: Option<FormatDescription>,
    tables: HashMap<u64, Arc<TableMap>>,
    checksum_hint: ChecksumAlg,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checksum algorithm negotiated for the stream, used for the events a
    /// source sends before its FormatDescription (the fake Rotate and
    /// heartbeats).
    pub fn with_checksum(mut self, alg: ChecksumAlg) -> Self {
        self.checksum_hint = alg;
        self
    }

    pub fn set_checksum(&mut self, alg: ChecksumAlg) {
        self.checksum_hint = alg;
    }

    pub fn format_description(&self) -> Option<&FormatDescription> {
        self.fde.as_ref()
    }

    pub fn table(&self, table_id: u64) -> Option<&Arc<TableMap>> {
        self.tables.get(&table_id)
    }

    /// Forget the FormatDescription and every cached TableMap.
    pub fn reset(&mut self) {
        self.fde = None;
        self.tables.clear();
    }

    /// Parse one replication packet: 0x00 + event, 0xFE end of stream, or
    /// an ERR packet.
    pub fn parse_packet(&mut self, packet: &[u8]) -> Result<Event> {
        match packet.first() {
            Some(0x00) => self.parse_event(&packet[1..]),
            Some(0xFE) => Err(Error::binlog(
                BinlogErrorKind::EndOfStream,
                "source reached the end of the binlog",
            )),
            Some(0xFF) => Err(ErrPacket::parse(packet)?.into_error()),
            _ => Err(Error::unexpected_packet("expected a binlog event", packet)),
        }
    }

    /// Parse one raw event (header, body and optional checksum).
    pub fn parse_event(&mut self, bytes: &[u8]) -> Result<Event> {
        let header = EventHeader::parse(bytes)?;
        let size = header.event_size as usize;
        if bytes.len() < size {
            return Err(Error::short_read(size, bytes.len()));
        }
        let event = &bytes[..size];
        let event_type = header.event_type();
        tracing::trace!(
            type_code = header.type_code,
            size,
            log_pos = header.log_pos,
            "binlog event"
        );

        if event_type == Some(EventType::FormatDescription) {
            let fde = FormatDescription::parse(&event[EVENT_HEADER_LEN..])?;
            if fde.checksum == ChecksumAlg::Crc32 {
                verify_crc32(event)?;
            }
            tracing::debug!(
                server_version = %fde.server_version,
                checksum = ?fde.checksum,
                "format description"
            );
            self.fde = Some(fde.clone());
            return Ok(Event {
                header,
                data: EventData::FormatDescription(fde),
            });
        }

        let checksum = match (&self.fde, event_type) {
            (Some(fde), _) => fde.checksum,
            (None, Some(EventType::Rotate | EventType::Heartbeat)) => self.checksum_hint,
            (None, _) => {
                return Err(Error::binlog(
                    BinlogErrorKind::MissingFormatDescription,
                    format!("event type 0x{:02X} before the format description", header.type_code),
                ));
            }
        };
        let event = if checksum == ChecksumAlg::Crc32 {
            verify_crc32(event)?
        } else {
            event
        };
        let body = event
            .get(EVENT_HEADER_LEN..)
            .ok_or_else(|| Error::short_read(EVENT_HEADER_LEN + CHECKSUM_LEN, size))?;

        let data = match event_type {
            Some(event_type) => self.parse_body(event_type, body)?,
            None => EventData::Unparsed(body.to_vec()),
        };
        if let EventData::Unparsed(body) = &data {
            tracing::trace!(
                type_code = header.type_code,
                head = %hex::encode(&body[..body.len().min(TRACE_BODY_BYTES)]),
                "event left unparsed"
            );
        }
        Ok(Event { header, data })
    }

    fn post_header_len(&self, event_type: EventType) -> usize {
        match &self.fde {
            Some(fde) => fde.post_header_len(event_type),
            None if event_type == EventType::Rotate => ROTATE_POST_HEADER_LEN,
            None => 0,
        }
    }

    fn parse_body(&mut self, event_type: EventType, body: &[u8]) -> Result<EventData> {
        let post_header_len = self.post_header_len(event_type);
        let data = match event_type {
            EventType::Rotate => {
                let rotate = RotateEvent::parse(body, post_header_len)?;
                tracing::debug!(
                    next_file = %rotate.next_file,
                    position = rotate.position,
                    dropped_tables = self.tables.len(),
                    "rotate"
                );
                self.tables.clear();
                EventData::Rotate(rotate)
            }
            EventType::Query => EventData::Query(QueryEvent::parse(body, post_header_len)?),
            EventType::Xid => EventData::Xid(XidEvent::parse(body)?),
            EventType::Intvar => EventData::IntVar(IntVarEvent::parse(body)?),
            EventType::TableMap => {
                let map = Arc::new(TableMap::parse(body, post_header_len)?);
                tracing::trace!(
                    table_id = map.table_id,
                    schema = %map.schema,
                    table = %map.table,
                    columns = map.column_count(),
                    "table map"
                );
                self.tables.insert(map.table_id, Arc::clone(&map));
                EventData::TableMap(map)
            }
            t if t.is_rows() => EventData::Rows(RowsEvent::parse(body, t, post_header_len, |id| {
                self.tables.get(&id).cloned()
            })?),
            EventType::Gtid => EventData::Gtid(GtidEvent::parse(body)?),
            EventType::AnonymousGtid => EventData::AnonymousGtid(GtidEvent::parse(body)?),
            EventType::PreviousGtids => EventData::PreviousGtids(GtidSet::decode(body)?),
            EventType::RowsQuery => {
                EventData::RowsQuery(RowsQueryEvent::parse(body, post_header_len)?)
            }
            EventType::Heartbeat => EventData::Heartbeat(HeartbeatEvent::parse(body)),
            EventType::Incident => EventData::Incident(IncidentEvent::parse(body)?),
            EventType::Stop => EventData::Stop,
            EventType::StartV3 => {
                return Err(Error::protocol(
                    ProtocolErrorKind::UnsupportedEvent,
                    "binlog format v1/v3 is not supported",
                ));
            }
            _ => EventData::Unparsed(body.to_vec()),
        };
        Ok(data)
    }
}
