//! Rows events and row-image decoding.
//!
//! A rows event names a table id, which must resolve to a TableMap seen
//! earlier in the stream. Each row image is a null bitmap over the columns
//! present in the image followed by the non-null values, encoded per the
//! column's real type and metadata.

#![allow(clippy::cast_possible_truncation)]

use std::sync::Arc;

use mywire_core::error::{BinlogErrorKind, EncodingErrorKind, ProtocolErrorKind};
use mywire_core::{BitSet, Error, Result, Value};
use mywire_protocol::protocol::PacketReader;
use mywire_protocol::types::FieldType;
use serde::Serialize;
use serde_json::json;

use crate::decimal;
use crate::event::EventType;
use crate::jsonb;
use crate::table_map::{ColumnMeta, TableMap, read_table_id};
use crate::temporal;

/// Extra-data TLV tags of v2 rows events.
const EXTRA_NDB_INFO: u8 = 0;
const EXTRA_PARTITION_INFO: u8 = 1;

/// `value_options` bit announcing partially updated JSON columns.
const PARTIAL_JSON_UPDATES: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowsKind {
    Write,
    Update,
    Delete,
    /// UPDATE with JSON columns logged as diffs
    PartialUpdate,
}

impl RowsKind {
    fn from_event_type(event_type: EventType) -> Option<(Self, u8)> {
        Some(match event_type {
            EventType::WriteRowsV1 => (RowsKind::Write, 1),
            EventType::UpdateRowsV1 => (RowsKind::Update, 1),
            EventType::DeleteRowsV1 => (RowsKind::Delete, 1),
            EventType::WriteRowsV2 => (RowsKind::Write, 2),
            EventType::UpdateRowsV2 => (RowsKind::Update, 2),
            EventType::DeleteRowsV2 => (RowsKind::Delete, 2),
            EventType::PartialUpdateRows => (RowsKind::PartialUpdate, 2),
            _ => return None,
        })
    }

    fn has_after_image(self) -> bool {
        matches!(self, RowsKind::Update | RowsKind::PartialUpdate)
    }
}

/// Extra data carried by v2 rows events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraRowInfo {
    /// NDB cluster info: (format, payload)
    pub ndb: Option<(u8, Vec<u8>)>,
    /// Partition id, plus the source partition for updates
    pub partition: Option<(u16, Option<u16>)>,
}

/// One row image, one slot per table column. `None` means the column is
/// not part of this image; a SQL NULL is `Some(Value::Null)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row(pub Vec<Option<Value>>);

impl Row {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Value of a column by name, when the TableMap carried names.
    pub fn get_named<'a>(&'a self, table: &TableMap, name: &str) -> Option<&'a Value> {
        let index = table
            .columns
            .iter()
            .position(|c| c.name.as_deref() == Some(name))?;
        self.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RowChange {
    Insert { row: Row },
    Delete { row: Row },
    Update { before: Row, after: Row },
}

/// Decoded Write/Update/Delete rows event.
#[derive(Debug, Clone)]
pub struct RowsEvent {
    pub kind: RowsKind,
    /// 1 or 2
    pub version: u8,
    pub table_id: u64,
    pub flags: u16,
    pub extra: ExtraRowInfo,
    pub table: Arc<TableMap>,
    /// Columns present in the before image (or the only image)
    pub columns_present: BitSet,
    /// Columns present in the after image of updates
    pub columns_after: Option<BitSet>,
    pub rows: Vec<RowChange>,
}

impl RowsEvent {
    /// Decode a rows event body. `lookup` resolves the table id to the
    /// TableMap cached for it.
    pub fn parse(
        body: &[u8],
        event_type: EventType,
        post_header_len: usize,
        lookup: impl FnOnce(u64) -> Option<Arc<TableMap>>,
    ) -> Result<Self> {
        let (kind, version) = RowsKind::from_event_type(event_type).ok_or_else(|| {
            Error::protocol(
                ProtocolErrorKind::UnsupportedEvent,
                format!("{event_type:?} is not a rows event"),
            )
        })?;

        let mut reader = PacketReader::new(body);
        let (table_id, flags) = read_table_id(&mut reader, post_header_len)?;
        let extra = if version == 2 {
            let len = usize::from(reader.read_u16_le()?);
            let data = reader.read_bytes(len.saturating_sub(2))?;
            parse_extra(data, kind)?
        } else {
            ExtraRowInfo::default()
        };

        let table = lookup(table_id).ok_or_else(|| {
            Error::binlog(
                BinlogErrorKind::MissingTableMap,
                format!("no table map for table id {table_id}"),
            )
        })?;

        let column_count = reader.read_lenenc_int()? as usize;
        if column_count != table.column_count() {
            return Err(Error::binlog(
                BinlogErrorKind::InvalidMetadata,
                format!(
                    "rows event has {column_count} columns, table map for {}.{} has {}",
                    table.schema,
                    table.table,
                    table.column_count()
                ),
            ));
        }
        let columns_present = reader.read_bitmap(column_count)?;
        let columns_after = if kind.has_after_image() {
            Some(reader.read_bitmap(column_count)?)
        } else {
            None
        };

        let decoder = RowDecoder { table: &table };
        let mut rows = Vec::new();
        while !reader.is_empty() {
            let change = match kind {
                RowsKind::Write => RowChange::Insert {
                    row: decoder.read_image(&mut reader, &columns_present, None)?,
                },
                RowsKind::Delete => RowChange::Delete {
                    row: decoder.read_image(&mut reader, &columns_present, None)?,
                },
                RowsKind::Update | RowsKind::PartialUpdate => {
                    let before = decoder.read_image(&mut reader, &columns_present, None)?;
                    let after_columns = columns_after.as_ref().unwrap_or(&columns_present);
                    let partial = if kind == RowsKind::PartialUpdate {
                        decoder.read_partial_bits(&mut reader)?
                    } else {
                        None
                    };
                    let after = decoder.read_image(&mut reader, after_columns, partial.as_ref())?;
                    RowChange::Update { before, after }
                }
            };
            rows.push(change);
        }
        tracing::trace!(
            table_id,
            schema = %table.schema,
            table = %table.table,
            rows = rows.len(),
            "decoded rows event"
        );

        Ok(Self {
            kind,
            version,
            table_id,
            flags,
            extra,
            table,
            columns_present,
            columns_after,
            rows,
        })
    }
}

fn parse_extra(data: &[u8], kind: RowsKind) -> Result<ExtraRowInfo> {
    let mut reader = PacketReader::new(data);
    let mut extra = ExtraRowInfo::default();
    while !reader.is_empty() {
        match reader.read_u8()? {
            EXTRA_NDB_INFO => {
                // length covers itself and the format byte
                let len = usize::from(reader.read_u8()?);
                let format = reader.read_u8()?;
                let payload = reader.read_bytes(len.saturating_sub(2))?;
                extra.ndb = Some((format, payload.to_vec()));
            }
            EXTRA_PARTITION_INFO => {
                let partition = reader.read_u16_le()?;
                let source = if kind.has_after_image() {
                    Some(reader.read_u16_le()?)
                } else {
                    None
                };
                extra.partition = Some((partition, source));
            }
            other => {
                return Err(Error::binlog(
                    BinlogErrorKind::InvalidMetadata,
                    format!("unknown rows extra data tag {other}"),
                ));
            }
        }
    }
    Ok(extra)
}

struct RowDecoder<'t> {
    table: &'t TableMap,
}

impl RowDecoder<'_> {
    /// `value_options` and, when JSON diffs follow, a bitmap over the
    /// table's JSON columns marking which ones are logged as diffs.
    fn read_partial_bits(&self, reader: &mut PacketReader<'_>) -> Result<Option<BitSet>> {
        let options = reader.read_lenenc_int()?;
        if options & PARTIAL_JSON_UPDATES == 0 {
            return Ok(None);
        }
        let json_columns = self
            .table
            .columns
            .iter()
            .filter(|c| c.real_type == FieldType::Json)
            .count();
        Ok(Some(reader.read_bitmap(json_columns)?))
    }

    fn read_image(
        &self,
        reader: &mut PacketReader<'_>,
        present: &BitSet,
        partial: Option<&BitSet>,
    ) -> Result<Row> {
        let nulls = reader.read_bitmap(present.count_ones())?;
        let mut values = vec![None; self.table.column_count()];
        let json_positions = self.json_positions();

        for (null_index, column_index) in present.iter_ones().enumerate() {
            let column = &self.table.columns[column_index];
            let value = if nulls.test(null_index)? {
                Value::Null
            } else {
                let is_partial = match (partial, json_positions.get(column_index).copied().flatten()) {
                    (Some(bits), Some(json_index)) => bits.test(json_index)?,
                    _ => false,
                };
                if is_partial {
                    read_json_diff(reader, column)?
                } else {
                    decode_value(reader, column)?
                }
            };
            values[column_index] = Some(value);
        }
        Ok(Row(values))
    }

    /// For each column, its index among the table's JSON columns.
    fn json_positions(&self) -> Vec<Option<usize>> {
        let mut next = 0;
        self.table
            .columns
            .iter()
            .map(|c| {
                (c.real_type == FieldType::Json).then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }
}

fn unexpected_type(column: &ColumnMeta) -> Error {
    Error::binlog(
        BinlogErrorKind::UnexpectedColumnType,
        format!(
            "cannot decode {:?} (binlog type {:?}, meta 0x{:04X})",
            column.real_type, column.binlog_type, column.meta
        ),
    )
}

fn int_value(reader: &mut PacketReader<'_>, width: usize, unsigned: bool) -> Result<Value> {
    Ok(if unsigned {
        Value::UInt(reader.read_uint_le(width)?)
    } else {
        Value::Int(reader.read_int_le(width)?)
    })
}

/// Length prefix of 1 byte for declared lengths below 256, otherwise 2.
fn read_short_prefixed(reader: &mut PacketReader<'_>, max_len: usize) -> Result<Vec<u8>> {
    let len = if max_len < 256 {
        usize::from(reader.read_u8()?)
    } else {
        usize::from(reader.read_u16_le()?)
    };
    Ok(reader.read_bytes(len)?.to_vec())
}

/// Blob-style value with a `width`-byte little-endian length prefix.
fn read_blob<'a>(reader: &mut PacketReader<'a>, width: u16) -> Result<&'a [u8]> {
    if !(1..=4).contains(&width) {
        return Err(Error::encoding(
            EncodingErrorKind::InvalidValue,
            format!("blob length prefix of {width} bytes"),
        ));
    }
    let len = reader.read_uint_le(usize::from(width))? as usize;
    reader.read_bytes(len)
}

/// Decode one non-null column value.
pub fn decode_value(reader: &mut PacketReader<'_>, column: &ColumnMeta) -> Result<Value> {
    let meta = column.meta;
    let fsp = meta as u8;
    Ok(match column.real_type {
        FieldType::Tiny => int_value(reader, 1, column.unsigned)?,
        FieldType::Short => int_value(reader, 2, column.unsigned)?,
        FieldType::Int24 => int_value(reader, 3, column.unsigned)?,
        FieldType::Long => int_value(reader, 4, column.unsigned)?,
        FieldType::LongLong => int_value(reader, 8, column.unsigned)?,
        FieldType::Float => Value::Float(reader.read_f32_le()?),
        FieldType::Double => Value::Double(reader.read_f64_le()?),
        FieldType::NewDecimal => {
            Value::Decimal(decimal::read_decimal(reader, (meta >> 8) as u8, meta as u8)?)
        }
        FieldType::Timestamp => Value::Timestamp(temporal::read_timestamp(reader)?),
        FieldType::Timestamp2 => Value::Timestamp(temporal::read_timestamp2(reader, fsp)?),
        FieldType::DateTime => Value::DateTime(temporal::read_datetime(reader)?),
        FieldType::DateTime2 => Value::DateTime(temporal::read_datetime2(reader, fsp)?),
        FieldType::Time => Value::Time(temporal::read_time(reader)?),
        FieldType::Time2 => Value::Time(temporal::read_time2(reader, fsp)?),
        FieldType::Date | FieldType::NewDate => Value::Date(temporal::read_date(reader)?),
        FieldType::Year => match reader.read_u8()? {
            0 => Value::Year(0),
            year => Value::Year(1900 + u16::from(year)),
        },
        FieldType::Enum => match column.string_length() {
            1 => Value::Enum(u16::from(reader.read_u8()?)),
            2 => Value::Enum(reader.read_u16_le()?),
            _ => return Err(unexpected_type(column)),
        },
        FieldType::Set => match column.string_length() {
            len @ 1..=8 => Value::Set(reader.read_uint_le(len)?),
            _ => return Err(unexpected_type(column)),
        },
        FieldType::Bit => {
            let bits = usize::from(meta >> 8) * 8 + usize::from(meta & 0xFF);
            Value::Bit(reader.read_bytes(bits.div_ceil(8))?.to_vec())
        }
        FieldType::Blob
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Geometry => Value::Bytes(read_blob(reader, meta)?.to_vec()),
        FieldType::Json => {
            let doc = read_blob(reader, meta)?;
            Value::Json(jsonb::decode(doc)?.to_json())
        }
        FieldType::VarChar | FieldType::VarString => {
            Value::Bytes(read_short_prefixed(reader, usize::from(meta))?)
        }
        FieldType::String => Value::Bytes(read_short_prefixed(reader, column.string_length())?),
        _ => return Err(unexpected_type(column)),
    })
}

/// JSON column logged as a list of diffs against the before image.
fn read_json_diff(reader: &mut PacketReader<'_>, column: &ColumnMeta) -> Result<Value> {
    let mut diffs = PacketReader::new(read_blob(reader, column.meta)?);
    let mut ops = Vec::new();
    while !diffs.is_empty() {
        let op = match diffs.read_u8()? {
            0 => "replace",
            1 => "insert",
            2 => "remove",
            other => {
                return Err(Error::binlog(
                    BinlogErrorKind::InvalidMetadata,
                    format!("unknown JSON diff operation {other}"),
                ));
            }
        };
        let path = diffs.read_lenenc_string()?;
        if op == "remove" {
            ops.push(json!({ "op": op, "path": path }));
        } else {
            let value = jsonb::decode(diffs.read_lenenc_bytes()?)?.to_json();
            ops.push(json!({ "op": op, "path": path, "value": value }));
        }
    }
    Ok(Value::Json(serde_json::Value::Array(ops)))
}
