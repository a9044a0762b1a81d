//! Result set row encoding.
//!
//! A result set is a column count, N column definitions, an optional EOF,
//! rows, and a terminator. This module handles the rows; the surrounding
//! packet sequence is driven by the connection and the server.
//!
//! Text rows carry each value as a length-encoded string (0xFB for NULL).
//! Binary rows start with 0x00, then a NULL bitmap of (N + 7 + 2) / 8 bytes
//! whose first two bits are reserved, then the non-NULL values.

use mywire_core::{Result, Value};

use super::reader::binary_null_bit;
use super::server_status::SERVER_MORE_RESULTS_EXISTS;
use super::{OkPacket, PacketReader, PacketWriter};
use crate::types::{ColumnDef, parse_text_value, read_binary_value, write_binary_value};

/// One complete command result: an OK summary or a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Empty when the statement produced no result set
    pub columns: Vec<ColumnDef>,
    /// Text rows hold [`Value::Bytes`] / [`Value::Null`]; binary rows are typed
    pub rows: Vec<Vec<Value>>,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub warnings: u16,
    pub status_flags: u16,
    pub info: String,
}

impl QueryResult {
    pub fn from_ok(ok: &OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            last_insert_id: ok.last_insert_id,
            warnings: ok.warnings,
            status_flags: ok.status_flags,
            info: ok.info.clone(),
            ..Self::default()
        }
    }

    pub fn is_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Whether the server announced another result after this one.
    pub fn has_more_results(&self) -> bool {
        self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Convert text rows to typed values using the column metadata.
    pub fn typed_rows(&self) -> Result<Vec<Vec<Value>>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&self.columns)
                    .map(|(value, column)| match value {
                        Value::Bytes(raw) => parse_text_value(column, raw),
                        other => Ok(other.clone()),
                    })
                    .collect()
            })
            .collect()
    }
}

/// Decode a text-protocol row; non-NULL values come back as [`Value::Bytes`].
pub fn parse_text_row(payload: &[u8], column_count: usize) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let mut row = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let value = match reader.read_lenenc_bytes_or_null()? {
            Some(bytes) => Value::Bytes(bytes.to_vec()),
            None => Value::Null,
        };
        row.push(value);
    }
    Ok(row)
}

pub fn encode_text_row(row: &[Value]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(row.len() * 8);
    for value in row {
        match value.to_text() {
            Some(text) => writer.write_lenenc_bytes(&text),
            None => writer.write_null_marker(),
        }
    }
    writer.into_bytes()
}

/// Size of the binary-row NULL bitmap for `column_count` columns.
pub const fn binary_null_bitmap_len(column_count: usize) -> usize {
    (column_count + 7 + 2) / 8
}

/// Decode a binary-protocol row against its column definitions.
pub fn parse_binary_row(payload: &[u8], columns: &[ColumnDef]) -> Result<Vec<Value>> {
    let mut reader = PacketReader::new(payload);
    let header = reader.read_u8()?;
    if header != 0x00 {
        return Err(mywire_core::Error::unexpected_packet(
            "binary row without 0x00 header",
            payload,
        ));
    }
    let bitmap = reader.read_bytes(binary_null_bitmap_len(columns.len()))?;
    let mut row = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        if binary_null_bit(bitmap, i) {
            row.push(Value::Null);
        } else {
            row.push(read_binary_value(
                &mut reader,
                column.column_type,
                column.is_unsigned(),
            )?);
        }
    }
    Ok(row)
}

pub fn encode_binary_row(row: &[Value], columns: &[ColumnDef]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(16 + row.len() * 8);
    writer.write_u8(0x00);
    let mut bitmap = vec![0u8; binary_null_bitmap_len(columns.len())];
    for (i, value) in row.iter().enumerate() {
        if value.is_null() {
            let bit = i + 2;
            bitmap[bit / 8] |= 1 << (bit % 8);
        }
    }
    writer.write_bytes(&bitmap);
    for (value, column) in row.iter().zip(columns) {
        write_binary_value(&mut writer, value, column.column_type);
    }
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, column_flags};

    #[test]
    fn test_typed_rows_use_column_types() {
        let result = QueryResult {
            columns: vec![
                ColumnDef::new("id", FieldType::LongLong),
                ColumnDef::new("name", FieldType::VarString),
            ],
            rows: vec![vec![Value::Bytes(b"42".to_vec()), Value::Null]],
            ..QueryResult::default()
        };
        assert!(result.is_result_set());
        assert_eq!(result.column_index("name"), Some(1));
        assert_eq!(
            result.typed_rows().unwrap(),
            vec![vec![Value::Int(42), Value::Null]]
        );
    }

    #[test]
    fn test_text_row_with_null() {
        let row = parse_text_row(&[0x01, b'1', 0xFB, 0x00], 3).unwrap();
        assert_eq!(
            row,
            vec![Value::Bytes(b"1".to_vec()), Value::Null, Value::Bytes(Vec::new())]
        );
        assert_eq!(encode_text_row(&row), [0x01, b'1', 0xFB, 0x00]);
        assert!(parse_text_row(&[0x01, b'1'], 2).is_err());
    }

    #[test]
    fn test_binary_row_bitmap_offset() {
        assert_eq!(binary_null_bitmap_len(1), 1);
        assert_eq!(binary_null_bitmap_len(6), 1);
        assert_eq!(binary_null_bitmap_len(7), 2);

        let columns = vec![
            ColumnDef::new("a", FieldType::Long),
            ColumnDef::new("b", FieldType::VarString),
            ColumnDef::new("c", FieldType::Tiny).with_flags(column_flags::UNSIGNED),
        ];
        let row = vec![Value::Int(-5), Value::Null, Value::UInt(200)];
        let payload = encode_binary_row(&row, &columns);
        // header, bitmap with column 1 -> bit 3
        assert_eq!(&payload[..2], &[0x00, 0b0000_1000]);
        assert_eq!(payload.len(), 2 + 4 + 1);
        assert_eq!(parse_binary_row(&payload, &columns).unwrap(), row);
    }
}
