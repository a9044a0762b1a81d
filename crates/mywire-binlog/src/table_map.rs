//! TableMapEvent: the column layout that rows events refer to by table id.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::BinlogErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;
use mywire_protocol::types::FieldType;

/// Optional metadata field codes (`binlog_row_metadata`).
mod optional {
    pub const SIGNEDNESS: u8 = 1;
    pub const DEFAULT_CHARSET: u8 = 2;
    pub const COLUMN_CHARSET: u8 = 3;
    pub const COLUMN_NAME: u8 = 4;
    pub const SET_STR_VALUE: u8 = 5;
    pub const ENUM_STR_VALUE: u8 = 6;
    pub const GEOMETRY_TYPE: u8 = 7;
    pub const SIMPLE_PRIMARY_KEY: u8 = 8;
    pub const PRIMARY_KEY_WITH_PREFIX: u8 = 9;
    pub const ENUM_AND_SET_DEFAULT_CHARSET: u8 = 10;
    pub const ENUM_AND_SET_COLUMN_CHARSET: u8 = 11;
    pub const COLUMN_VISIBILITY: u8 = 12;
}

/// One column as described by a TableMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Type code written in the event
    pub binlog_type: FieldType,
    /// Type after unpacking STRING metadata (ENUM and SET travel as STRING)
    pub real_type: FieldType,
    /// Raw metadata; layout depends on `binlog_type`
    pub meta: u16,
    /// Element type of a TYPED_ARRAY column
    pub array_element: Option<FieldType>,
    pub nullable: bool,
    /// Only ever set for numeric columns
    pub unsigned: bool,
    /// Only ever set for character, ENUM and SET columns
    pub collation: Option<u16>,
    pub name: Option<String>,
    pub enum_values: Vec<String>,
    pub set_values: Vec<String>,
    pub geometry_type: Option<u64>,
    pub visible: bool,
}

impl ColumnMeta {
    fn new(binlog_type: FieldType, meta: u16, array_element: Option<FieldType>) -> Self {
        Self {
            binlog_type,
            real_type: real_type(binlog_type, meta),
            meta,
            array_element,
            nullable: false,
            unsigned: false,
            collation: None,
            name: None,
            enum_values: Vec::new(),
            set_values: Vec::new(),
            geometry_type: None,
            visible: true,
        }
    }

    /// Declared byte length of a CHAR column, or the pack length of an
    /// ENUM / SET column.
    pub fn string_length(&self) -> usize {
        let [high, low] = self.meta.to_be_bytes();
        if self.binlog_type == FieldType::String && high & 0x30 != 0x30 {
            usize::from(low) | (usize::from((high & 0x30) ^ 0x30) << 4)
        } else {
            usize::from(low)
        }
    }

    fn is_numeric(&self) -> bool {
        self.real_type.is_numeric()
    }

    fn is_character(&self) -> bool {
        self.real_type.is_character()
    }
}

/// STRING metadata hides the real type (ENUM, SET, CHAR) in its high byte;
/// the high nibble also carries two bits of the length for long CHARs.
fn real_type(binlog_type: FieldType, meta: u16) -> FieldType {
    if binlog_type != FieldType::String || meta < 256 {
        return binlog_type;
    }
    let high = (meta >> 8) as u8;
    let code = if high & 0x30 != 0x30 { high | 0x30 } else { high };
    FieldType::from_u8(code).unwrap_or(binlog_type)
}

/// Read one column's metadata from the metadata block.
fn read_column_meta(reader: &mut PacketReader<'_>, field_type: FieldType) -> Result<u16> {
    Ok(match field_type {
        FieldType::Float
        | FieldType::Double
        | FieldType::Blob
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Geometry
        | FieldType::Json
        | FieldType::Time2
        | FieldType::Timestamp2
        | FieldType::DateTime2 => u16::from(reader.read_u8()?),
        FieldType::String | FieldType::NewDecimal | FieldType::Enum | FieldType::Set => {
            reader.read_uint_be(2)? as u16
        }
        FieldType::Bit | FieldType::VarChar | FieldType::VarString => reader.read_u16_le()?,
        _ => 0,
    })
}

fn invalid_metadata(message: impl Into<String>) -> Error {
    Error::binlog(BinlogErrorKind::InvalidMetadata, message)
}

/// Decoded TableMapEvent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMap {
    pub table_id: u64,
    pub flags: u16,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnMeta>,
    /// (column index, prefix length); prefix 0 means the whole column
    pub primary_key: Vec<(usize, usize)>,
}

impl TableMap {
    pub fn parse(body: &[u8], post_header_len: usize) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let (table_id, flags) = read_table_id(&mut reader, post_header_len)?;

        let schema = read_name(&mut reader)?;
        let table = read_name(&mut reader)?;

        let column_count = reader.read_lenenc_int()? as usize;
        let type_bytes = reader.read_bytes(column_count)?;
        let mut types = Vec::with_capacity(column_count);
        for &code in type_bytes {
            types.push(FieldType::from_u8(code).ok_or_else(|| {
                Error::binlog(
                    BinlogErrorKind::UnexpectedColumnType,
                    format!("column type 0x{code:02X} in {schema}.{table}"),
                )
            })?);
        }

        let meta_block = reader.read_lenenc_bytes()?;
        let mut meta_reader = PacketReader::new(meta_block);
        let mut columns = Vec::with_capacity(column_count);
        for field_type in types {
            let column = if field_type == FieldType::TypedArray {
                let element = FieldType::from_u8(meta_reader.read_u8()?)
                    .ok_or_else(|| invalid_metadata("unknown typed array element type"))?;
                let meta = read_column_meta(&mut meta_reader, element)?;
                ColumnMeta::new(field_type, meta, Some(element))
            } else {
                let meta = read_column_meta(&mut meta_reader, field_type)?;
                ColumnMeta::new(field_type, meta, None)
            };
            columns.push(column);
        }
        if !meta_reader.is_empty() {
            return Err(invalid_metadata(format!(
                "{} unused bytes in column metadata of {schema}.{table}",
                meta_reader.remaining()
            )));
        }

        let nullable = reader.read_bitmap(column_count)?;
        for (i, column) in columns.iter_mut().enumerate() {
            column.nullable = nullable.test(i)?;
        }

        let mut map = Self {
            table_id,
            flags,
            schema,
            table,
            columns,
            primary_key: Vec::new(),
        };
        while !reader.is_empty() {
            let field = reader.read_u8()?;
            let value = reader.read_lenenc_bytes()?;
            map.apply_optional(field, value)?;
        }
        Ok(map)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column names when the source logs full row metadata.
    pub fn column_names(&self) -> Vec<Option<&str>> {
        self.columns.iter().map(|c| c.name.as_deref()).collect()
    }

    fn apply_optional(&mut self, field: u8, value: &[u8]) -> Result<()> {
        let mut reader = PacketReader::new(value);
        match field {
            optional::SIGNEDNESS => {
                for (n, column) in self.columns.iter_mut().filter(|c| c.is_numeric()).enumerate() {
                    column.unsigned = msb_bit(value, n);
                }
            }
            optional::DEFAULT_CHARSET => {
                self.apply_default_charset(&mut reader, ColumnMeta::is_character)?;
            }
            optional::ENUM_AND_SET_DEFAULT_CHARSET => {
                self.apply_default_charset(&mut reader, |c| c.real_type.is_enum_or_set())?;
            }
            optional::COLUMN_CHARSET => {
                for column in self.columns.iter_mut().filter(|c| c.is_character()) {
                    column.collation = Some(reader.read_lenenc_int()? as u16);
                }
            }
            optional::ENUM_AND_SET_COLUMN_CHARSET => {
                for column in self.columns.iter_mut().filter(|c| c.real_type.is_enum_or_set()) {
                    column.collation = Some(reader.read_lenenc_int()? as u16);
                }
            }
            optional::COLUMN_NAME => {
                for column in &mut self.columns {
                    column.name = Some(reader.read_lenenc_string()?);
                }
            }
            optional::SET_STR_VALUE | optional::ENUM_STR_VALUE => {
                let wanted = if field == optional::SET_STR_VALUE {
                    FieldType::Set
                } else {
                    FieldType::Enum
                };
                for column in self.columns.iter_mut().filter(|c| c.real_type == wanted) {
                    let count = reader.read_lenenc_int()?;
                    let mut names = Vec::new();
                    for _ in 0..count {
                        names.push(reader.read_lenenc_string()?);
                    }
                    if wanted == FieldType::Set {
                        column.set_values = names;
                    } else {
                        column.enum_values = names;
                    }
                }
            }
            optional::GEOMETRY_TYPE => {
                for column in self
                    .columns
                    .iter_mut()
                    .filter(|c| c.real_type == FieldType::Geometry)
                {
                    column.geometry_type = Some(reader.read_lenenc_int()?);
                }
            }
            optional::SIMPLE_PRIMARY_KEY => {
                while !reader.is_empty() {
                    let index = self.column_index(reader.read_lenenc_int()?)?;
                    self.primary_key.push((index, 0));
                }
            }
            optional::PRIMARY_KEY_WITH_PREFIX => {
                while !reader.is_empty() {
                    let index = self.column_index(reader.read_lenenc_int()?)?;
                    let prefix = reader.read_lenenc_int()? as usize;
                    self.primary_key.push((index, prefix));
                }
            }
            optional::COLUMN_VISIBILITY => {
                for (i, column) in self.columns.iter_mut().enumerate() {
                    column.visible = msb_bit(value, i);
                }
            }
            other => {
                tracing::trace!(field = other, len = value.len(), "skipping unknown table map metadata");
            }
        }
        Ok(())
    }

    /// Default collation for every selected column, then
    /// `(selected-column index, collation)` exceptions.
    fn apply_default_charset(
        &mut self,
        reader: &mut PacketReader<'_>,
        selected: impl Fn(&ColumnMeta) -> bool,
    ) -> Result<()> {
        let default = reader.read_lenenc_int()? as u16;
        let mut targets: Vec<&mut ColumnMeta> =
            self.columns.iter_mut().filter(|c| selected(c)).collect();
        for column in &mut targets {
            column.collation = Some(default);
        }
        while !reader.is_empty() {
            let index = reader.read_lenenc_int()? as usize;
            let collation = reader.read_lenenc_int()? as u16;
            let column = targets
                .get_mut(index)
                .ok_or_else(|| invalid_metadata(format!("charset for missing column {index}")))?;
            column.collation = Some(collation);
        }
        Ok(())
    }

    fn column_index(&self, index: u64) -> Result<usize> {
        let index = index as usize;
        if index >= self.columns.len() {
            return Err(invalid_metadata(format!(
                "primary key column {index} of {} columns",
                self.columns.len()
            )));
        }
        Ok(index)
    }
}

/// Table id (4 or 6 bytes depending on the post-header length) and flags.
pub(crate) fn read_table_id(reader: &mut PacketReader<'_>, post_header_len: usize) -> Result<(u64, u16)> {
    let id_len = if post_header_len == 6 { 4 } else { 6 };
    let table_id = reader.read_uint_le(id_len)?;
    let flags = reader.read_u16_le()?;
    Ok((table_id, flags))
}

fn read_name(reader: &mut PacketReader<'_>) -> Result<String> {
    let len = reader.read_u8()?;
    let name = String::from_utf8_lossy(reader.read_bytes(usize::from(len))?).into_owned();
    reader.skip(1)?;
    Ok(name)
}

/// Bit `i` of a most-significant-bit-first bitmap.
fn msb_bit(bytes: &[u8], i: usize) -> bool {
    bytes
        .get(i / 8)
        .is_some_and(|byte| byte & (0x80 >> (i % 8)) != 0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// TableMap body for `schema.table` with the given (type, metadata) columns.
    pub(crate) fn table_map_body(
        table_id: u64,
        schema: &str,
        table: &str,
        columns: &[(FieldType, &[u8])],
        optional: &[u8],
    ) -> Vec<u8> {
        let mut body = table_id.to_le_bytes()[..6].to_vec();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.push(schema.len() as u8);
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.push(table.len() as u8);
        body.extend_from_slice(table.as_bytes());
        body.push(0);
        body.push(columns.len() as u8);
        body.extend(columns.iter().map(|(t, _)| *t as u8));
        let meta: Vec<u8> = columns.iter().flat_map(|(_, m)| m.iter().copied()).collect();
        body.push(meta.len() as u8);
        body.extend_from_slice(&meta);
        body.extend(std::iter::repeat_n(0xFF, columns.len().div_ceil(8)));
        body.extend_from_slice(optional);
        body
    }

    #[test]
    fn test_int_and_varchar() {
        let body = table_map_body(
            17,
            "db",
            "t",
            &[(FieldType::Long, &[]), (FieldType::VarChar, &[0x80, 0x00])],
            &[],
        );
        let map = TableMap::parse(&body, 8).unwrap();
        assert_eq!(map.table_id, 17);
        assert_eq!((map.schema.as_str(), map.table.as_str()), ("db", "t"));
        assert_eq!(map.column_count(), 2);
        assert_eq!(map.columns[1].meta, 128);
        assert!(map.columns.iter().all(|c| c.nullable));
    }

    #[test]
    fn test_string_metadata_unpacks_real_type() {
        // ENUM with a 1-byte pack length, SET with 2, and CHAR(255) in utf8mb4
        let body = table_map_body(
            1,
            "db",
            "t",
            &[
                (FieldType::String, &[0xF7, 0x01]),
                (FieldType::String, &[0xF8, 0x02]),
                (FieldType::String, &[0xCE, 0xFC]),
            ],
            &[],
        );
        let map = TableMap::parse(&body, 8).unwrap();
        assert_eq!(map.columns[0].real_type, FieldType::Enum);
        assert_eq!(map.columns[0].string_length(), 1);
        assert_eq!(map.columns[1].real_type, FieldType::Set);
        assert_eq!(map.columns[1].string_length(), 2);
        assert_eq!(map.columns[2].real_type, FieldType::String);
        assert_eq!(map.columns[2].string_length(), 1020);
    }

    #[test]
    fn test_optional_metadata() {
        let mut optional = Vec::new();
        // signedness over the two numeric columns: second is unsigned
        optional.extend_from_slice(&[1, 1, 0b0100_0000]);
        // default collation 45, character column 0 uses 63
        optional.extend_from_slice(&[2, 3, 45, 0, 63]);
        optional.extend_from_slice(&[4, 9, 2, b'i', b'd', 1, b'n', 3, b'q', b't', b'y']);
        optional.extend_from_slice(&[8, 1, 0]);
        optional.extend_from_slice(&[12, 1, 0b1010_0000]);

        let body = table_map_body(
            2,
            "db",
            "t",
            &[
                (FieldType::Long, &[]),
                (FieldType::VarChar, &[0x40, 0x00]),
                (FieldType::LongLong, &[]),
            ],
            &optional,
        );
        let map = TableMap::parse(&body, 8).unwrap();
        assert!(!map.columns[0].unsigned);
        assert!(map.columns[2].unsigned);
        assert_eq!(map.columns[0].collation, None);
        assert_eq!(map.columns[1].collation, Some(63));
        assert_eq!(map.column_names(), vec![Some("id"), Some("n"), Some("qty")]);
        assert_eq!(map.primary_key, vec![(0, 0)]);
        assert!(map.columns[0].visible);
        assert!(!map.columns[1].visible);
        assert!(map.columns[2].visible);
    }

    #[test]
    fn test_enum_values_follow_real_type() {
        let optional = [6, 5, 2, 1, b'a', 1, b'b'];
        let body = table_map_body(3, "db", "t", &[(FieldType::String, &[0xF7, 0x01])], &optional);
        let map = TableMap::parse(&body, 8).unwrap();
        assert_eq!(map.columns[0].enum_values, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(map.columns[0].collation, None);
    }

    #[test]
    fn test_unknown_column_type() {
        let mut body = table_map_body(4, "db", "t", &[(FieldType::Long, &[])], &[]);
        let type_at = 6 + 2 + 4 + 3 + 1;
        body[type_at] = 0x30;
        let err = TableMap::parse(&body, 8).unwrap_err();
        assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::UnexpectedColumnType));
    }

    #[test]
    fn test_leftover_metadata_is_invalid() {
        let body = table_map_body(5, "db", "t", &[(FieldType::Long, &[0x01])], &[]);
        let err = TableMap::parse(&body, 8).unwrap_err();
        assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::InvalidMetadata));
    }

    #[test]
    fn test_four_byte_table_id() {
        let mut body = 9u32.to_le_bytes().to_vec();
        body.extend_from_slice(&table_map_body(0, "db", "t", &[(FieldType::Tiny, &[])], &[])[6..]);
        let map = TableMap::parse(&body, 6).unwrap();
        assert_eq!(map.table_id, 9);
    }
}
