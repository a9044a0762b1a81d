//! GTID sets and the GTID / PreviousGTIDs events.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use mywire_core::error::EncodingErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::{PacketReader, PacketWriter};
use uuid::Uuid;

/// Server version reported when the event does not carry one.
pub const UNDEFINED_SERVER_VERSION: u32 = 999_999;

const LOGICAL_TIMESTAMP_TYPECODE: u8 = 2;
const COMMIT_TS_LEN: usize = 7;
const COMMIT_TS_FLAG: u64 = 1 << 55;
const SERVER_VERSION_FLAG: u32 = 1 << 31;

/// Half-open range of transaction numbers `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GtidInterval {
    pub start: u64,
    pub end: u64,
}

/// Transactions executed per source UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet {
    sids: BTreeMap<Uuid, Vec<GtidInterval>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    /// Add `[start, end)` for `sid`, merging with overlapping or adjacent ranges.
    pub fn add_interval(&mut self, sid: Uuid, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let intervals = self.sids.entry(sid).or_default();
        intervals.push(GtidInterval { start, end });
        intervals.sort_unstable();
        let mut merged: Vec<GtidInterval> = Vec::with_capacity(intervals.len());
        for interval in intervals.drain(..) {
            match merged.last_mut() {
                Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
                _ => merged.push(interval),
            }
        }
        *intervals = merged;
    }

    /// Add a single transaction.
    pub fn add(&mut self, sid: Uuid, gno: u64) {
        self.add_interval(sid, gno, gno.saturating_add(1));
    }

    pub fn contains(&self, sid: &Uuid, gno: u64) -> bool {
        self.intervals(sid)
            .iter()
            .any(|interval| interval.start <= gno && gno < interval.end)
    }

    pub fn intervals(&self, sid: &Uuid) -> &[GtidInterval] {
        self.sids.get(sid).map_or(&[], Vec::as_slice)
    }

    pub fn sids(&self) -> impl Iterator<Item = &Uuid> {
        self.sids.keys()
    }

    /// Binary SID block used by PreviousGTIDs and BINLOG_DUMP_GTID.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        writer.write_u64_le(self.sids.len() as u64);
        for (sid, intervals) in &self.sids {
            writer.write_bytes(sid.as_bytes());
            writer.write_u64_le(intervals.len() as u64);
            for interval in intervals {
                writer.write_u64_le(interval.start);
                writer.write_u64_le(interval.end);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(bytes);
        let mut set = Self::new();
        let sid_count = reader.read_u64_le()?;
        for _ in 0..sid_count {
            let sid = read_sid(&mut reader)?;
            let interval_count = reader.read_u64_le()?;
            for _ in 0..interval_count {
                let start = reader.read_u64_le()?;
                let end = reader.read_u64_le()?;
                set.add_interval(sid, start, end);
            }
        }
        Ok(set)
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (sid, intervals)) in self.sids.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{sid}")?;
            for interval in intervals {
                if interval.end - interval.start == 1 {
                    write!(f, ":{}", interval.start)?;
                } else {
                    write!(f, ":{}-{}", interval.start, interval.end - 1)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for GtidSet {
    type Err = Error;

    /// Parse `uuid:1-5:7,uuid2:3`.
    fn from_str(text: &str) -> Result<Self> {
        let mut set = Self::new();
        for part in text.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let mut fields = part.split(':');
            let sid_text = fields.next().unwrap_or_default().trim();
            let sid = Uuid::parse_str(sid_text)
                .map_err(|e| invalid_gtid(format!("bad source id {sid_text:?}: {e}")))?;
            let mut any = false;
            for range in fields {
                let (start, last) = match range.trim().split_once('-') {
                    Some((a, b)) => (parse_gno(a)?, parse_gno(b)?),
                    None => {
                        let gno = parse_gno(range)?;
                        (gno, gno)
                    }
                };
                if start == 0 || last < start {
                    return Err(invalid_gtid(format!("bad interval {range:?}")));
                }
                set.add_interval(sid, start, last.saturating_add(1));
                any = true;
            }
            if !any {
                return Err(invalid_gtid(format!("{part:?} has no intervals")));
            }
        }
        Ok(set)
    }
}

fn parse_gno(text: &str) -> Result<u64> {
    text.trim()
        .parse()
        .map_err(|_| invalid_gtid(format!("bad transaction number {text:?}")))
}

fn invalid_gtid(message: String) -> Error {
    Error::encoding(EncodingErrorKind::InvalidValue, message)
}

fn read_sid(reader: &mut PacketReader<'_>) -> Result<Uuid> {
    let bytes = reader.read_bytes(16)?;
    let mut sid = [0u8; 16];
    sid.copy_from_slice(bytes);
    Ok(Uuid::from_bytes(sid))
}

/// GTID_EVENT / ANONYMOUS_GTID_EVENT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtidEvent {
    pub flags: u8,
    pub sid: Uuid,
    pub gno: u64,
    /// 2 when the logical clock fields are present
    pub logical_ts_type: u8,
    pub last_committed: u64,
    pub sequence_number: u64,
    /// Microseconds since the epoch
    pub immediate_commit_ts: Option<u64>,
    pub original_commit_ts: Option<u64>,
    pub transaction_length: Option<u64>,
    pub immediate_server_version: u32,
    pub original_server_version: u32,
}

impl GtidEvent {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let flags = reader.read_u8()?;
        let sid = read_sid(&mut reader)?;
        let gno = reader.read_u64_le()?;
        let mut event = Self {
            flags,
            sid,
            gno,
            logical_ts_type: 0,
            last_committed: 0,
            sequence_number: 0,
            immediate_commit_ts: None,
            original_commit_ts: None,
            transaction_length: None,
            immediate_server_version: UNDEFINED_SERVER_VERSION,
            original_server_version: UNDEFINED_SERVER_VERSION,
        };
        if reader.is_empty() {
            return Ok(event);
        }

        event.logical_ts_type = reader.read_u8()?;
        if event.logical_ts_type == LOGICAL_TIMESTAMP_TYPECODE {
            event.last_committed = reader.read_u64_le()?;
            event.sequence_number = reader.read_u64_le()?;
        }

        if reader.remaining() >= COMMIT_TS_LEN {
            let immediate = reader.read_uint_le(COMMIT_TS_LEN)?;
            if immediate & COMMIT_TS_FLAG != 0 {
                let immediate = immediate & !COMMIT_TS_FLAG;
                event.immediate_commit_ts = Some(immediate);
                event.original_commit_ts = Some(reader.read_uint_le(COMMIT_TS_LEN)?);
            } else {
                event.immediate_commit_ts = Some(immediate);
                event.original_commit_ts = Some(immediate);
            }
        }

        if !reader.is_empty() {
            event.transaction_length = Some(reader.read_lenenc_int()?);
        }

        if reader.remaining() >= 4 {
            let immediate = reader.read_u32_le()?;
            if immediate & SERVER_VERSION_FLAG != 0 {
                event.immediate_server_version = immediate & !SERVER_VERSION_FLAG;
                event.original_server_version = reader.read_u32_le()?;
            } else {
                event.immediate_server_version = immediate;
                event.original_server_version = immediate;
            }
        }

        Ok(event)
    }

    /// `uuid:gno`
    pub fn gtid(&self) -> String {
        format!("{}:{}", self.sid, self.gno)
    }
}
