//! MySQL binary JSON (JSONB) decoding.
//!
//! A document is one type byte followed by a value. Objects and arrays start
//! with an element count and a byte size, followed by key entries (objects
//! only) and value entries. Small scalars are inlined in the value entry;
//! everything else is referenced by an offset from the start of the
//! enclosing container.
//!
//! Every offset and size is checked against the enclosing container before
//! it is followed, so a corrupt document fails with [`JsonbErrorKind::Corrupt`]
//! instead of reading out of bounds.

#![allow(clippy::cast_possible_truncation)]

use std::fmt::{self, Write as _};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mywire_core::error::JsonbErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;
use mywire_protocol::types::FieldType;

use crate::{decimal, temporal};

const SMALL_OBJECT: u8 = 0x00;
const LARGE_OBJECT: u8 = 0x01;
const SMALL_ARRAY: u8 = 0x02;
const LARGE_ARRAY: u8 = 0x03;
const LITERAL: u8 = 0x04;
const INT16: u8 = 0x05;
const UINT16: u8 = 0x06;
const INT32: u8 = 0x07;
const UINT32: u8 = 0x08;
const INT64: u8 = 0x09;
const UINT64: u8 = 0x0A;
const DOUBLE: u8 = 0x0B;
const STRING: u8 = 0x0C;
const OPAQUE: u8 = 0x0F;

const LITERAL_NULL: u8 = 0x00;
const LITERAL_TRUE: u8 = 0x01;
const LITERAL_FALSE: u8 = 0x02;

/// Nesting limit MySQL enforces on stored documents.
const MAX_DEPTH: usize = 100;

/// A decoded JSONB value.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonbValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    /// A MySQL-typed value stored verbatim (DECIMAL, DATETIME, ...)
    Opaque { field_type: u8, data: Vec<u8> },
    Array(Vec<JsonbValue>),
    /// Members in stored order
    Object(Vec<(String, JsonbValue)>),
}

/// Decode a whole document. An empty document is JSON `null`.
pub fn decode(doc: &[u8]) -> Result<JsonbValue> {
    let Some((&type_byte, data)) = doc.split_first() else {
        return Ok(JsonbValue::Null);
    };
    parse_value(type_byte, data, 0)
}

/// Decode a document straight to its text form.
pub fn to_text(doc: &[u8]) -> Result<String> {
    Ok(decode(doc)?.to_string())
}

fn corrupt(message: impl Into<String>) -> Error {
    Error::jsonb(JsonbErrorKind::Corrupt, message)
}

fn parse_value(type_byte: u8, data: &[u8], depth: usize) -> Result<JsonbValue> {
    match type_byte {
        SMALL_OBJECT | LARGE_OBJECT | SMALL_ARRAY | LARGE_ARRAY => {
            if depth >= MAX_DEPTH {
                return Err(corrupt(format!("document nested deeper than {MAX_DEPTH}")));
            }
            parse_container(type_byte, data, depth + 1)
        }
        _ => parse_scalar(type_byte, data),
    }
}

fn parse_scalar(type_byte: u8, data: &[u8]) -> Result<JsonbValue> {
    let mut reader = PacketReader::new(data);
    let truncated = |_| corrupt(format!("scalar of type 0x{type_byte:02X} is truncated"));
    let value = match type_byte {
        LITERAL => literal(reader.read_u8().map_err(truncated)?)?,
        INT16 => JsonbValue::Int(reader.read_int_le(2).map_err(truncated)?),
        UINT16 => JsonbValue::UInt(reader.read_uint_le(2).map_err(truncated)?),
        INT32 => JsonbValue::Int(reader.read_int_le(4).map_err(truncated)?),
        UINT32 => JsonbValue::UInt(reader.read_uint_le(4).map_err(truncated)?),
        INT64 => JsonbValue::Int(reader.read_u64_le().map_err(truncated)? as i64),
        UINT64 => JsonbValue::UInt(reader.read_u64_le().map_err(truncated)?),
        DOUBLE => JsonbValue::Double(reader.read_f64_le().map_err(truncated)?),
        STRING => {
            let bytes = read_variable(data)?;
            JsonbValue::String(String::from_utf8_lossy(bytes).into_owned())
        }
        OPAQUE => {
            let field_type = reader.read_u8().map_err(truncated)?;
            let bytes = read_variable(&data[1..])?;
            JsonbValue::Opaque {
                field_type,
                data: bytes.to_vec(),
            }
        }
        other => {
            return Err(Error::jsonb(
                JsonbErrorKind::InvalidScalarType,
                format!("unknown JSONB type 0x{other:02X}"),
            ));
        }
    };
    Ok(value)
}

fn literal(byte: u8) -> Result<JsonbValue> {
    match byte {
        LITERAL_NULL => Ok(JsonbValue::Null),
        LITERAL_TRUE => Ok(JsonbValue::Bool(true)),
        LITERAL_FALSE => Ok(JsonbValue::Bool(false)),
        other => Err(Error::jsonb(
            JsonbErrorKind::InvalidScalarType,
            format!("unknown JSONB literal 0x{other:02X}"),
        )),
    }
}

/// Variable-length length prefix (7 bits per byte, at most 5 bytes) and the
/// bytes it covers.
fn read_variable(data: &[u8]) -> Result<&[u8]> {
    let mut len: u64 = 0;
    for i in 0..5 {
        let byte = *data
            .get(i)
            .ok_or_else(|| corrupt("variable-length prefix is truncated"))?;
        len |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            if len > u64::from(u32::MAX) {
                return Err(Error::jsonb(
                    JsonbErrorKind::LengthOverflow,
                    format!("variable length {len} exceeds 2^32"),
                ));
            }
            let start = i + 1;
            let end = start
                .checked_add(len as usize)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    corrupt(format!("value of {len} bytes runs past the document"))
                })?;
            return Ok(&data[start..end]);
        }
    }
    Err(Error::jsonb(
        JsonbErrorKind::LengthOverflow,
        "variable-length prefix longer than 5 bytes",
    ))
}

fn read_offset(data: &[u8], at: usize, large: bool) -> Result<usize> {
    let width = if large { 4 } else { 2 };
    let bytes = data
        .get(at..at + width)
        .ok_or_else(|| corrupt("container entry is truncated"))?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b)))
}

fn is_inlined(type_byte: u8, large: bool) -> bool {
    match type_byte {
        LITERAL | INT16 | UINT16 => true,
        INT32 | UINT32 => large,
        _ => false,
    }
}

fn parse_container(type_byte: u8, data: &[u8], depth: usize) -> Result<JsonbValue> {
    let large = matches!(type_byte, LARGE_OBJECT | LARGE_ARRAY);
    let is_object = matches!(type_byte, SMALL_OBJECT | LARGE_OBJECT);
    let offset_size = if large { 4 } else { 2 };

    if data.len() < 2 * offset_size {
        return Err(corrupt("container header does not fit in the document"));
    }
    let count = read_offset(data, 0, large)?;
    let size = read_offset(data, offset_size, large)?;
    if size > data.len() {
        return Err(corrupt(format!(
            "container claims {size} bytes but only {} remain",
            data.len()
        )));
    }

    let key_entry_size = offset_size + 2;
    let value_entry_size = 1 + offset_size;
    let keys_start = 2 * offset_size;
    let values_start = keys_start + if is_object { count * key_entry_size } else { 0 };
    let header_size = count
        .checked_mul(value_entry_size)
        .and_then(|values| values.checked_add(values_start))
        .filter(|&header| header <= size)
        .ok_or_else(|| corrupt(format!("header of {count} entries exceeds container size {size}")))?;
    let data = &data[..size];

    let mut keys = Vec::with_capacity(if is_object { count } else { 0 });
    if is_object {
        for i in 0..count {
            let entry = keys_start + i * key_entry_size;
            let key_offset = read_offset(data, entry, large)?;
            let key_len = read_offset(data, entry + offset_size, false)?;
            if key_offset < header_size || key_offset + key_len > size {
                return Err(corrupt(format!("key {i} lies outside its container")));
            }
            keys.push(String::from_utf8_lossy(&data[key_offset..key_offset + key_len]).into_owned());
        }
    }

    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let entry = values_start + i * value_entry_size;
        let value_type = data[entry];
        let value = if is_inlined(value_type, large) {
            parse_scalar(value_type, &data[entry + 1..entry + value_entry_size])?
        } else {
            let offset = read_offset(data, entry + 1, large)?;
            if offset < header_size || offset >= size {
                return Err(corrupt(format!("value {i} lies outside its container")));
            }
            parse_value(value_type, &data[offset..], depth)?
        };
        values.push(value);
    }

    Ok(if is_object {
        JsonbValue::Object(keys.into_iter().zip(values).collect())
    } else {
        JsonbValue::Array(values)
    })
}

impl JsonbValue {
    /// Convert to a `serde_json` tree. Object members come out in
    /// `serde_json::Map` order; use the `Display` form to keep stored order.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            JsonbValue::Null => Json::Null,
            JsonbValue::Bool(b) => Json::Bool(*b),
            JsonbValue::Int(i) => Json::from(*i),
            JsonbValue::UInt(u) => Json::from(*u),
            JsonbValue::Double(d) => serde_json::Number::from_f64(*d).map_or(Json::Null, Json::Number),
            JsonbValue::String(s) => Json::String(s.clone()),
            JsonbValue::Opaque { field_type, data } => match render_opaque(*field_type, data) {
                Opaque::Number(text) => text
                    .parse::<serde_json::Number>()
                    .map_or(Json::String(text), Json::Number),
                Opaque::Text(text) => Json::String(text),
            },
            JsonbValue::Array(items) => Json::Array(items.iter().map(JsonbValue::to_json).collect()),
            JsonbValue::Object(members) => Json::Object(
                members
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for JsonbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonbValue::Null => f.write_str("null"),
            JsonbValue::Bool(b) => write!(f, "{b}"),
            JsonbValue::Int(i) => write!(f, "{i}"),
            JsonbValue::UInt(u) => write!(f, "{u}"),
            JsonbValue::Double(d) => {
                if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
                    write!(f, "{d:.1}")
                } else {
                    write!(f, "{d}")
                }
            }
            JsonbValue::String(s) => write_quoted(f, s),
            JsonbValue::Opaque { field_type, data } => match render_opaque(*field_type, data) {
                Opaque::Number(text) => f.write_str(&text),
                Opaque::Text(text) => write_quoted(f, &text),
            },
            JsonbValue::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_char(']')
            }
            JsonbValue::Object(members) => {
                f.write_char('{')?;
                for (i, (key, value)) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, key)?;
                    write!(f, ": {value}")?;
                }
                f.write_char('}')
            }
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
    f.write_str(&quoted)
}

enum Opaque {
    Number(String),
    Text(String),
}

fn render_opaque(field_type: u8, data: &[u8]) -> Opaque {
    let packed = || {
        data.get(..8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    };
    let rendered = match FieldType::from_u8(field_type) {
        Some(FieldType::NewDecimal) if data.len() >= 2 => {
            let mut reader = PacketReader::new(&data[2..]);
            decimal::read_decimal(&mut reader, data[0], data[1])
                .ok()
                .map(Opaque::Number)
        }
        Some(FieldType::Date) => packed().map(|p| {
            let dt = temporal::unpack_datetime(p);
            Opaque::Text(format!("{:04}-{:02}-{:02}", dt.year, dt.month, dt.day))
        }),
        Some(FieldType::Time) => packed().map(|p| {
            let t = temporal::unpack_time(p);
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if t.negative { "-" } else { "" },
                t.days * 24 + u32::from(t.hours),
                t.minutes,
                t.seconds
            );
            push_micros(&mut text, t.micros);
            Opaque::Text(text)
        }),
        Some(FieldType::DateTime | FieldType::Timestamp) => packed().map(|p| {
            let dt = temporal::unpack_datetime(p);
            let mut text = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                dt.year, dt.month, dt.day, dt.hour, dt.minute, dt.second
            );
            push_micros(&mut text, dt.micros);
            Opaque::Text(text)
        }),
        Some(FieldType::VarChar | FieldType::VarString | FieldType::String) => {
            Some(Opaque::Text(String::from_utf8_lossy(data).into_owned()))
        }
        _ => None,
    };
    rendered.unwrap_or_else(|| {
        Opaque::Text(format!("base64:type{field_type}:{}", BASE64.encode(data)))
    })
}

fn push_micros(text: &mut String, micros: u32) {
    if micros != 0 {
        let _ = write!(text, ".{micros:06}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `{"abcdefgh": 1, "b": "cat"}` as a small object.
    const OBJECT: [u8; 32] = [
        0x00, // small object
        0x02, 0x00, 0x1F, 0x00, // count 2, size 31
        0x12, 0x00, 0x08, 0x00, // key "abcdefgh" at 18
        0x1A, 0x00, 0x01, 0x00, // key "b" at 26
        0x05, 0x01, 0x00, // int16 1, inlined
        0x0C, 0x1B, 0x00, // string at 27
        b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'b', //
        0x03, b'c', b'a', b't',
    ];

    #[test]
    fn test_small_object_text() {
        assert_eq!(to_text(&OBJECT).unwrap(), r#"{"abcdefgh": 1, "b": "cat"}"#);
        assert_eq!(
            decode(&OBJECT).unwrap().to_json(),
            serde_json::json!({"abcdefgh": 1, "b": "cat"})
        );
    }

    #[test]
    fn test_array_of_scalars() {
        // [true, null, 70000, "x"]
        let mut doc = vec![0x02, 0x04, 0x00];
        let header = 4 + 4 * 3;
        let int32_at = header;
        let string_at = header + 4;
        doc.extend_from_slice(&((string_at + 2) as u16).to_le_bytes());
        doc.extend_from_slice(&[0x04, 0x01, 0x00]);
        doc.extend_from_slice(&[0x04, 0x00, 0x00]);
        doc.push(0x07);
        doc.extend_from_slice(&(int32_at as u16).to_le_bytes());
        doc.push(0x0C);
        doc.extend_from_slice(&(string_at as u16).to_le_bytes());
        doc.extend_from_slice(&70_000i32.to_le_bytes());
        doc.extend_from_slice(&[0x01, b'x']);
        assert_eq!(to_text(&doc).unwrap(), r#"[true, null, 70000, "x"]"#);
    }

    #[test]
    fn test_scalar_documents() {
        let mut doc = vec![0x0B];
        doc.extend_from_slice(&2.5f64.to_le_bytes());
        assert_eq!(to_text(&doc).unwrap(), "2.5");
        let mut doc = vec![0x0B];
        doc.extend_from_slice(&3.0f64.to_le_bytes());
        assert_eq!(to_text(&doc).unwrap(), "3.0");
        assert_eq!(to_text(&[0x04, 0x02]).unwrap(), "false");
        assert_eq!(decode(&[]).unwrap(), JsonbValue::Null);

        let mut doc = vec![0x0A];
        doc.extend_from_slice(&u64::MAX.to_le_bytes());
        assert_eq!(to_text(&doc).unwrap(), u64::MAX.to_string());
    }

    #[test]
    fn test_long_string_length_prefix() {
        let text = "y".repeat(200);
        let mut doc = vec![0x0C, 0xC8, 0x01];
        doc.extend_from_slice(text.as_bytes());
        assert_eq!(decode(&doc).unwrap(), JsonbValue::String(text));
    }

    #[test]
    fn test_opaque_rendering() {
        // DECIMAL(4,2) 12.34
        let doc = [0x0F, 0xF6, 0x04, 0x04, 0x02, 0x8C, 0x22];
        assert_eq!(to_text(&doc).unwrap(), "12.34");
        assert_eq!(decode(&doc).unwrap().to_json(), serde_json::json!(12.34));

        let ymd: i64 = ((2024 * 13 + 5) << 5) | 17;
        let hms: i64 = (8 << 12) | (30 << 6);
        let packed = (((ymd << 17) | hms) << 24) + 250_000;
        let mut doc = vec![0x0F, 0x0C, 0x08];
        doc.extend_from_slice(&packed.to_le_bytes());
        assert_eq!(to_text(&doc).unwrap(), r#""2024-05-17 08:30:00.250000""#);

        let doc = [0x0F, 0xFC, 0x02, 0xAB, 0xCD];
        assert_eq!(to_text(&doc).unwrap(), r#""base64:type252:q80=""#);
    }

    #[test]
    fn test_corrupt_documents() {
        let mut oversized = OBJECT;
        oversized[3] = 0x40;
        assert_eq!(decode(&oversized).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::Corrupt));

        let mut key_in_header = OBJECT;
        key_in_header[5] = 0x04;
        assert_eq!(decode(&key_in_header).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::Corrupt));

        let mut value_past_end = OBJECT;
        value_past_end[17] = 0x1F;
        assert_eq!(decode(&value_past_end).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::Corrupt));

        assert_eq!(decode(&[0x00, 0x01]).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::Corrupt));
        assert_eq!(
            decode(&[0x0E, 0x00]).unwrap_err().jsonb_kind(),
            Some(JsonbErrorKind::InvalidScalarType)
        );
    }

    /// `levels` small arrays, each holding the next; the innermost is empty.
    fn nested_arrays(levels: usize) -> Vec<u8> {
        let mut data = vec![0x00, 0x00, 0x04, 0x00];
        for _ in 1..levels {
            let size = (7 + data.len()) as u16;
            let mut outer = vec![0x01, 0x00];
            outer.extend_from_slice(&size.to_le_bytes());
            outer.extend_from_slice(&[SMALL_ARRAY, 0x07, 0x00]);
            outer.append(&mut data);
            data = outer;
        }
        let mut doc = vec![SMALL_ARRAY];
        doc.extend_from_slice(&data);
        doc
    }

    #[test]
    fn test_nesting_limit() {
        let text = to_text(&nested_arrays(MAX_DEPTH)).unwrap();
        assert_eq!(text, format!("{}{}", "[".repeat(MAX_DEPTH), "]".repeat(MAX_DEPTH)));

        let err = decode(&nested_arrays(MAX_DEPTH + 1)).unwrap_err();
        assert_eq!(err.jsonb_kind(), Some(JsonbErrorKind::Corrupt));
    }

    #[test]
    fn test_length_overflow() {
        let doc = [0x0C, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        assert_eq!(decode(&doc).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::LengthOverflow));
        let doc = [0x0C, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(decode(&doc).unwrap_err().jsonb_kind(), Some(JsonbErrorKind::LengthOverflow));
    }
}
