//! MySQL type system and value encoding.
//!
//! This module provides:
//! - MySQL field type constants
//! - Column definitions as carried in result-set metadata
//! - Binary-protocol encoding of values (prepared statements)
//! - Typed parsing of text-protocol values
//!
//! # MySQL Type System
//!
//! MySQL uses field type codes in result sets, prepared statements and the
//! binlog. COM_QUERY returns every value as text; COM_STMT_EXECUTE returns a
//! type-specific binary encoding.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::EncodingErrorKind;
use mywire_core::{DateTimeValue, DateValue, Error, Result, TimeValue, Value};

use crate::protocol::{PacketReader, PacketWriter};

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    /// MySQL 5.6+ temporal types with fractional seconds (binlog only)
    Timestamp2 = 0x11,
    DateTime2 = 0x12,
    Time2 = 0x13,
    /// Array-typed column in binlog metadata (multi-valued indexes)
    TypedArray = 0x14,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Parse a field type code; `None` for codes MySQL does not define.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A => FieldType::Date,
            0x0B => FieldType::Time,
            0x0C => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0E => FieldType::NewDate,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0x11 => FieldType::Timestamp2,
            0x12 => FieldType::DateTime2,
            0x13 => FieldType::Time2,
            0x14 => FieldType::TypedArray,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFE => FieldType::String,
            0xFF => FieldType::Geometry,
            _ => return None,
        })
    }

    /// Parse a field type code, mapping unknown codes to an encoding error.
    pub fn try_from_u8(value: u8) -> Result<Self> {
        Self::from_u8(value).ok_or_else(|| {
            Error::encoding(
                EncodingErrorKind::InvalidValue,
                format!("unknown field type 0x{value:02X}"),
            )
        })
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    /// Types that carry a signedness bit in binlog optional metadata.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Int24
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::NewDecimal
                | FieldType::Decimal
                | FieldType::Float
                | FieldType::Double
        )
    }

    /// Types that carry a collation in binlog optional metadata.
    pub const fn is_character(self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::VarString
                | FieldType::VarChar
                | FieldType::Blob
                | FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
        )
    }

    pub const fn is_enum_or_set(self) -> bool {
        matches!(self, FieldType::Enum | FieldType::Set)
    }

    pub const fn is_temporal(self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::Time
                | FieldType::DateTime
                | FieldType::Timestamp
                | FieldType::NewDate
                | FieldType::Timestamp2
                | FieldType::DateTime2
                | FieldType::Time2
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp | FieldType::Timestamp2 => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date | FieldType::NewDate => "DATE",
            FieldType::Time | FieldType::Time2 => "TIME",
            FieldType::DateTime | FieldType::DateTime2 => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::TypedArray => "TYPED_ARRAY",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flags in result set metadata.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const UNIQUE_KEY: u16 = 4;
    pub const MULTIPLE_KEY: u16 = 8;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const ZEROFILL: u16 = 64;
    pub const BINARY: u16 = 128;
    pub const ENUM: u16 = 256;
    pub const AUTO_INCREMENT: u16 = 512;
    pub const TIMESTAMP: u16 = 1024;
    pub const SET: u16 = 2048;
    pub const NO_DEFAULT_VALUE: u16 = 4096;
    pub const ON_UPDATE_NOW: u16 = 8192;
    pub const NUM: u16 = 32768;
}

/// Column definition (ColumnDefinition41).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Catalog name (always "def")
    pub catalog: String,
    pub schema: String,
    /// Table name (or alias)
    pub table: String,
    pub org_table: String,
    /// Column name (or alias)
    pub name: String,
    pub org_name: String,
    /// Collation id
    pub collation: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
    /// Default value, present only in COM_FIELD_LIST responses
    pub default_value: Option<Vec<u8>>,
}

impl ColumnDef {
    /// A column with only a name and type, as a server handler would build it.
    pub fn new(name: impl Into<String>, column_type: FieldType) -> Self {
        let name = name.into();
        let (collation, column_length) = if column_type.is_integer() || column_type.is_numeric() {
            (mywire_core::collation::BINARY_COLLATION_ID, 21)
        } else if column_type.is_temporal() {
            (mywire_core::collation::BINARY_COLLATION_ID, 26)
        } else {
            (mywire_core::collation::DEFAULT_COLLATION_ID, 1024)
        };
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            collation,
            column_length,
            column_type,
            flags: 0,
            decimals: 0,
            default_value: None,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = schema.into();
        self.table = table.into();
        self.org_table = self.table.clone();
        self
    }

    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    pub const fn is_primary_key(&self) -> bool {
        self.flags & column_flags::PRIMARY_KEY != 0
    }

    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    pub const fn is_binary(&self) -> bool {
        self.flags & column_flags::BINARY != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let catalog = reader.read_lenenc_string()?;
        let schema = reader.read_lenenc_string()?;
        let table = reader.read_lenenc_string()?;
        let org_table = reader.read_lenenc_string()?;
        let name = reader.read_lenenc_string()?;
        let org_name = reader.read_lenenc_string()?;
        let fixed_len = reader.read_lenenc_int()?;
        if fixed_len < 0x0C {
            return Err(Error::encoding(
                EncodingErrorKind::InvalidValue,
                format!("column definition fixed block of {fixed_len} bytes"),
            ));
        }
        let collation = reader.read_u16_le()?;
        let column_length = reader.read_u32_le()?;
        let column_type = FieldType::try_from_u8(reader.read_u8()?)?;
        let flags = reader.read_u16_le()?;
        let decimals = reader.read_u8()?;
        reader.skip(2)?;
        let default_value = if reader.is_empty() {
            None
        } else {
            Some(reader.read_lenenc_bytes()?.to_vec())
        };
        Ok(Self {
            catalog,
            schema,
            table,
            org_table,
            name,
            org_name,
            collation,
            column_length,
            column_type,
            flags,
            decimals,
            default_value,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(64);
        writer.write_lenenc_string(&self.catalog);
        writer.write_lenenc_string(&self.schema);
        writer.write_lenenc_string(&self.table);
        writer.write_lenenc_string(&self.org_table);
        writer.write_lenenc_string(&self.name);
        writer.write_lenenc_string(&self.org_name);
        writer.write_lenenc_int(0x0C);
        writer.write_u16_le(self.collation);
        writer.write_u32_le(self.column_length);
        writer.write_u8(self.column_type as u8);
        writer.write_u16_le(self.flags);
        writer.write_u8(self.decimals);
        writer.write_zeros(2);
        if let Some(default) = &self.default_value {
            writer.write_lenenc_bytes(default);
        }
        writer.into_bytes()
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::encoding(EncodingErrorKind::InvalidValue, message)
}

/// Read one binary-protocol value of `field_type`.
pub fn read_binary_value(
    reader: &mut PacketReader<'_>,
    field_type: FieldType,
    unsigned: bool,
) -> Result<Value> {
    let value = match field_type {
        FieldType::Null => Value::Null,
        FieldType::Tiny => int_value(reader.read_uint_le(1)?, 1, unsigned),
        FieldType::Short => int_value(reader.read_uint_le(2)?, 2, unsigned),
        FieldType::Year => Value::Year(reader.read_u16_le()?),
        FieldType::Long | FieldType::Int24 => int_value(reader.read_uint_le(4)?, 4, unsigned),
        FieldType::LongLong => int_value(reader.read_uint_le(8)?, 8, unsigned),
        FieldType::Float => Value::Float(reader.read_f32_le()?),
        FieldType::Double => Value::Double(reader.read_f64_le()?),
        FieldType::Date | FieldType::NewDate => {
            let dt = read_binary_datetime(reader)?;
            Value::Date(dt.date())
        }
        FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => Value::DateTime(read_binary_datetime(reader)?),
        FieldType::Time | FieldType::Time2 => Value::Time(read_binary_time(reader)?),
        FieldType::Decimal | FieldType::NewDecimal => {
            let bytes = reader.read_lenenc_bytes()?;
            Value::Decimal(String::from_utf8_lossy(bytes).into_owned())
        }
        FieldType::Json => {
            let bytes = reader.read_lenenc_bytes()?;
            serde_json::from_slice(bytes).map_or_else(|_| Value::Bytes(bytes.to_vec()), Value::Json)
        }
        FieldType::Bit => Value::Bit(reader.read_lenenc_bytes()?.to_vec()),
        FieldType::VarChar
        | FieldType::TypedArray
        | FieldType::Enum
        | FieldType::Set
        | FieldType::TinyBlob
        | FieldType::MediumBlob
        | FieldType::LongBlob
        | FieldType::Blob
        | FieldType::VarString
        | FieldType::String
        | FieldType::Geometry => Value::Bytes(reader.read_lenenc_bytes()?.to_vec()),
    };
    Ok(value)
}

fn int_value(raw: u64, width: usize, unsigned: bool) -> Value {
    if unsigned {
        Value::UInt(raw)
    } else {
        let shift = 64 - 8 * width as u32;
        Value::Int(((raw << shift) as i64) >> shift)
    }
}

/// DATE/DATETIME/TIMESTAMP: length byte in {0, 4, 7, 11}.
fn read_binary_datetime(reader: &mut PacketReader<'_>) -> Result<DateTimeValue> {
    let len = reader.read_u8()?;
    let mut dt = DateTimeValue::default();
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(invalid(format!("binary datetime length {len}")));
    }
    if len >= 4 {
        dt.year = reader.read_u16_le()?;
        dt.month = reader.read_u8()?;
        dt.day = reader.read_u8()?;
    }
    if len >= 7 {
        dt.hour = reader.read_u8()?;
        dt.minute = reader.read_u8()?;
        dt.second = reader.read_u8()?;
    }
    if len == 11 {
        dt.micros = reader.read_u32_le()?;
    }
    Ok(dt)
}

/// TIME: length byte in {0, 8, 12}.
fn read_binary_time(reader: &mut PacketReader<'_>) -> Result<TimeValue> {
    let len = reader.read_u8()?;
    let mut t = TimeValue::default();
    if !matches!(len, 0 | 8 | 12) {
        return Err(invalid(format!("binary time length {len}")));
    }
    if len >= 8 {
        t.negative = reader.read_u8()? != 0;
        t.days = reader.read_u32_le()?;
        t.hours = reader.read_u8()?;
        t.minutes = reader.read_u8()?;
        t.seconds = reader.read_u8()?;
    }
    if len == 12 {
        t.micros = reader.read_u32_le()?;
    }
    Ok(t)
}

/// Wire type and unsigned flag used to bind `value` as a statement parameter.
pub fn binary_param_type(value: &Value) -> (FieldType, bool) {
    match value {
        Value::Null => (FieldType::Null, false),
        Value::Int(_) => (FieldType::LongLong, false),
        Value::UInt(_) | Value::Set(_) => (FieldType::LongLong, true),
        Value::Enum(_) | Value::Year(_) => (FieldType::Short, true),
        Value::Float(_) => (FieldType::Float, false),
        Value::Double(_) => (FieldType::Double, false),
        Value::Decimal(_) => (FieldType::NewDecimal, false),
        Value::Bytes(_) => (FieldType::VarString, false),
        Value::Bit(_) => (FieldType::Bit, false),
        Value::Date(_) => (FieldType::Date, false),
        Value::Time(_) => (FieldType::Time, false),
        Value::DateTime(_) => (FieldType::DateTime, false),
        Value::Timestamp(_) => (FieldType::Timestamp, false),
        Value::Json(_) => (FieldType::Json, false),
    }
}

/// Append the binary-protocol encoding of `value` as a `field_type` column.
///
/// NULL writes nothing; it is carried by the NULL bitmap.
pub fn write_binary_value(writer: &mut PacketWriter, value: &Value, field_type: FieldType) {
    match value {
        Value::Null => {}
        Value::Int(v) => write_binary_int(writer, *v as u64, field_type),
        Value::UInt(v) | Value::Set(v) => write_binary_int(writer, *v, field_type),
        Value::Enum(v) | Value::Year(v) => write_binary_int(writer, u64::from(*v), field_type),
        Value::Float(v) => match field_type {
            FieldType::Double => writer.write_f64_le(f64::from(*v)),
            _ => writer.write_f32_le(*v),
        },
        Value::Double(v) => match field_type {
            FieldType::Float => writer.write_f32_le(*v as f32),
            _ => writer.write_f64_le(*v),
        },
        Value::Decimal(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) | Value::Bit(b) => writer.write_lenenc_bytes(b),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
        Value::Date(d) => write_binary_datetime(writer, &DateTimeValue::from(*d)),
        Value::DateTime(dt) => write_binary_datetime(writer, dt),
        Value::Timestamp(ts) => {
            let dt = ts
                .to_utc()
                .map(|utc| {
                    use chrono::{Datelike, Timelike};
                    DateTimeValue {
                        year: utc.year() as u16,
                        month: utc.month() as u8,
                        day: utc.day() as u8,
                        hour: utc.hour() as u8,
                        minute: utc.minute() as u8,
                        second: utc.second() as u8,
                        micros: ts.micros,
                    }
                })
                .unwrap_or_default();
            write_binary_datetime(writer, &dt);
        }
        Value::Time(t) => write_binary_time(writer, t),
    }
}

fn write_binary_int(writer: &mut PacketWriter, raw: u64, field_type: FieldType) {
    let width = match field_type {
        FieldType::Tiny => 1,
        FieldType::Short | FieldType::Year => 2,
        FieldType::Long | FieldType::Int24 => 4,
        FieldType::Float => {
            writer.write_f32_le(raw as i64 as f32);
            return;
        }
        FieldType::Double => {
            writer.write_f64_le(raw as i64 as f64);
            return;
        }
        FieldType::LongLong => 8,
        _ => {
            writer.write_lenenc_string(&(raw as i64).to_string());
            return;
        }
    };
    writer.write_uint_le(raw, width);
}

fn write_binary_datetime(writer: &mut PacketWriter, dt: &DateTimeValue) {
    if dt.is_zero() && dt.hour == 0 && dt.minute == 0 && dt.second == 0 && dt.micros == 0 {
        writer.write_u8(0);
        return;
    }
    let len = if dt.micros != 0 {
        11
    } else if dt.hour != 0 || dt.minute != 0 || dt.second != 0 {
        7
    } else {
        4
    };
    writer.write_u8(len);
    writer.write_u16_le(dt.year);
    writer.write_u8(dt.month);
    writer.write_u8(dt.day);
    if len >= 7 {
        writer.write_u8(dt.hour);
        writer.write_u8(dt.minute);
        writer.write_u8(dt.second);
    }
    if len == 11 {
        writer.write_u32_le(dt.micros);
    }
}

fn write_binary_time(writer: &mut PacketWriter, t: &TimeValue) {
    if t.is_zero() {
        writer.write_u8(0);
        return;
    }
    let len = if t.micros != 0 { 12 } else { 8 };
    writer.write_u8(len);
    writer.write_u8(u8::from(t.negative));
    writer.write_u32_le(t.days);
    writer.write_u8(t.hours);
    writer.write_u8(t.minutes);
    writer.write_u8(t.seconds);
    if len == 12 {
        writer.write_u32_le(t.micros);
    }
}

/// Parse a text-protocol value into a typed value according to its column.
///
/// Text rows are returned as raw bytes; this is the opt-in conversion.
pub fn parse_text_value(column: &ColumnDef, data: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(data).map_err(|e| invalid(format!("non-UTF-8 text value: {e}")));
    let value = match column.column_type {
        FieldType::Tiny
        | FieldType::Short
        | FieldType::Long
        | FieldType::Int24
        | FieldType::LongLong => {
            let text = text?;
            if column.is_unsigned() {
                Value::UInt(text.parse().map_err(|_| invalid(format!("bad integer {text:?}")))?)
            } else {
                Value::Int(text.parse().map_err(|_| invalid(format!("bad integer {text:?}")))?)
            }
        }
        FieldType::Year => {
            let text = text?;
            Value::Year(text.parse().map_err(|_| invalid(format!("bad year {text:?}")))?)
        }
        FieldType::Float => {
            let text = text?;
            Value::Float(text.parse().map_err(|_| invalid(format!("bad float {text:?}")))?)
        }
        FieldType::Double => {
            let text = text?;
            Value::Double(text.parse().map_err(|_| invalid(format!("bad double {text:?}")))?)
        }
        FieldType::Decimal | FieldType::NewDecimal => Value::Decimal(text?.to_string()),
        FieldType::Date | FieldType::NewDate => Value::Date(parse_date(text?)?),
        FieldType::DateTime
        | FieldType::Timestamp
        | FieldType::DateTime2
        | FieldType::Timestamp2 => Value::DateTime(parse_datetime(text?)?),
        FieldType::Time | FieldType::Time2 => Value::Time(parse_time(text?)?),
        FieldType::Json => serde_json::from_slice(data)
            .map(Value::Json)
            .map_err(|e| invalid(format!("bad JSON: {e}")))?,
        FieldType::Bit => Value::Bit(data.to_vec()),
        _ => Value::Bytes(data.to_vec()),
    };
    Ok(value)
}

fn parse_num<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    s.parse().map_err(|_| invalid(format!("bad {what} component {s:?}")))
}

/// `YYYY-MM-DD`
pub fn parse_date(text: &str) -> Result<DateValue> {
    let mut parts = text.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid(format!("bad date {text:?}")));
    };
    Ok(DateValue {
        year: parse_num(y, "year")?,
        month: parse_num(m, "month")?,
        day: parse_num(d, "day")?,
    })
}

/// `YYYY-MM-DD[ hh:mm:ss[.ffffff]]`
pub fn parse_datetime(text: &str) -> Result<DateTimeValue> {
    let (date, time) = text.split_once(' ').unwrap_or((text, "00:00:00"));
    let date = parse_date(date)?;
    let time = parse_time(time)?;
    Ok(DateTimeValue {
        year: date.year,
        month: date.month,
        day: date.day,
        hour: time.hours,
        minute: time.minutes,
        second: time.seconds,
        micros: time.micros,
    })
}

/// `[-]HHH:MM:SS[.ffffff]`; hours beyond 23 spill into days.
pub fn parse_time(text: &str) -> Result<TimeValue> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (hms, frac) = body.split_once('.').unwrap_or((body, ""));
    let mut parts = hms.splitn(3, ':');
    let (Some(h), Some(m), Some(s)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid(format!("bad time {text:?}")));
    };
    let total_hours: u32 = parse_num(h, "hour")?;
    let micros = if frac.is_empty() {
        0
    } else {
        let digits: String = frac.chars().chain(std::iter::repeat('0')).take(6).collect();
        parse_num(&digits, "fraction")?
    };
    Ok(TimeValue {
        negative,
        days: total_hours / 24,
        hours: (total_hours % 24) as u8,
        minutes: parse_num(m, "minute")?,
        seconds: parse_num(s, "second")?,
        micros,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_codes() {
        assert_eq!(FieldType::from_u8(0x08), Some(FieldType::LongLong));
        assert_eq!(FieldType::from_u8(0xF5), Some(FieldType::Json));
        assert_eq!(FieldType::from_u8(0x20), None);
        assert!(FieldType::try_from_u8(0x20).is_err());
        assert!(FieldType::NewDecimal.is_numeric());
        assert!(FieldType::Blob.is_character());
        assert!(!FieldType::Enum.is_character());
    }

    #[test]
    fn test_column_definition_layout() {
        let col = ColumnDef::new("x", FieldType::LongLong).with_flags(column_flags::NOT_NULL);
        let bytes = col.encode();
        // def, "", "", "", x, x
        assert_eq!(&bytes[..9], &[3, b'd', b'e', b'f', 0, 0, 0, 1, b'x']);
        assert_eq!(bytes[11], 0x0C);
        assert_eq!(&bytes[12..14], &[63, 0]);
        assert_eq!(bytes[18], FieldType::LongLong as u8);
        assert_eq!(bytes.len(), 24);
        assert_eq!(ColumnDef::parse(&bytes).unwrap(), col);
    }

    #[test]
    fn test_binary_integers_respect_signedness() {
        let mut r = PacketReader::new(&[0xFF]);
        assert_eq!(read_binary_value(&mut r, FieldType::Tiny, false).unwrap(), Value::Int(-1));
        let mut r = PacketReader::new(&[0xFF]);
        assert_eq!(read_binary_value(&mut r, FieldType::Tiny, true).unwrap(), Value::UInt(255));
        let mut r = PacketReader::new(&[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(read_binary_value(&mut r, FieldType::Long, false).unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_binary_temporal_lengths() {
        let dt = DateTimeValue {
            year: 2023,
            month: 12,
            day: 31,
            hour: 23,
            minute: 59,
            second: 58,
            micros: 123_456,
        };
        let mut w = PacketWriter::new();
        write_binary_value(&mut w, &Value::DateTime(dt), FieldType::DateTime);
        assert_eq!(w.as_bytes()[0], 11);
        let bytes = w.into_bytes();
        let mut r = PacketReader::new(&bytes);
        assert_eq!(
            read_binary_value(&mut r, FieldType::DateTime, false).unwrap(),
            Value::DateTime(dt)
        );

        let mut w = PacketWriter::new();
        write_binary_value(&mut w, &Value::DateTime(DateTimeValue::default()), FieldType::DateTime);
        assert_eq!(w.as_bytes(), &[0]);

        let t = TimeValue {
            negative: true,
            days: 2,
            hours: 3,
            minutes: 4,
            seconds: 5,
            micros: 0,
        };
        let mut w = PacketWriter::new();
        write_binary_value(&mut w, &Value::Time(t), FieldType::Time);
        assert_eq!(w.as_bytes(), &[8, 1, 2, 0, 0, 0, 3, 4, 5]);

        let mut r = PacketReader::new(&[5, 0, 0, 0, 0, 0]);
        assert!(read_binary_value(&mut r, FieldType::Date, false).is_err());
    }

    #[test]
    fn test_text_value_parsing() {
        let col = ColumnDef::new("n", FieldType::LongLong);
        assert_eq!(parse_text_value(&col, b"-12").unwrap(), Value::Int(-12));
        let col = ColumnDef::new("n", FieldType::Long).with_flags(column_flags::UNSIGNED);
        assert_eq!(parse_text_value(&col, b"4294967295").unwrap(), Value::UInt(4_294_967_295));

        let col = ColumnDef::new("t", FieldType::Time);
        let Value::Time(t) = parse_text_value(&col, b"-838:59:59.5").unwrap() else {
            panic!("expected time");
        };
        assert!(t.negative);
        assert_eq!(t.total_hours(), 838);
        assert_eq!(t.micros, 500_000);

        let col = ColumnDef::new("d", FieldType::DateTime);
        assert_eq!(
            parse_text_value(&col, b"2020-01-02 03:04:05").unwrap().to_text(),
            Some(b"2020-01-02 03:04:05".to_vec())
        );
        assert!(parse_text_value(&ColumnDef::new("i", FieldType::Long), b"abc").is_err());
    }
}
