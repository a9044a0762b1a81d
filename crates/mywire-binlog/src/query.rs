//! QueryEvent and its status-variable block.

use mywire_core::error::ProtocolErrorKind;
use mywire_core::{Error, Result};
use mywire_protocol::protocol::PacketReader;

/// Fixed part of the post-header that precedes any extra bytes.
const QUERY_POST_HEADER_LEN: usize = 13;

/// UPDATED_DB_NAMES count meaning "too many databases to list".
const OVER_MAX_DBS_IN_EVENT_MTS: u8 = 254;

/// One entry of the status-variable block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusVar {
    Flags2(u32),
    SqlMode(u64),
    Catalog(String),
    AutoIncrement {
        increment: u16,
        offset: u16,
    },
    Charset {
        client: u16,
        connection: u16,
        server: u16,
    },
    TimeZone(String),
    CatalogNz(String),
    LcTimeNames(u16),
    CharsetDatabase(u16),
    TableMapForUpdate(u64),
    MasterDataWritten(u32),
    Invoker {
        user: String,
        host: String,
    },
    /// Empty when the source listed more databases than fit
    UpdatedDbNames(Vec<String>),
    Microseconds(u32),
    ExplicitDefaultsForTimestamp(bool),
    DdlXid(u64),
    DefaultCollationForUtf8mb4(u16),
    SqlRequirePrimaryKey(bool),
    DefaultTableEncryption(bool),
}

impl StatusVar {
    /// Parse the whole block.
    pub fn parse_block(block: &[u8]) -> Result<Vec<StatusVar>> {
        let mut reader = PacketReader::new(block);
        let mut vars = Vec::new();
        while !reader.is_empty() {
            vars.push(Self::parse_one(&mut reader)?);
        }
        Ok(vars)
    }

    fn parse_one(reader: &mut PacketReader<'_>) -> Result<StatusVar> {
        let code = reader.read_u8()?;
        let var = match code {
            0 => StatusVar::Flags2(reader.read_u32_le()?),
            1 => StatusVar::SqlMode(reader.read_u64_le()?),
            2 => {
                let name = read_short_string(reader)?;
                reader.skip(1)?;
                StatusVar::Catalog(name)
            }
            3 => StatusVar::AutoIncrement {
                increment: reader.read_u16_le()?,
                offset: reader.read_u16_le()?,
            },
            4 => StatusVar::Charset {
                client: reader.read_u16_le()?,
                connection: reader.read_u16_le()?,
                server: reader.read_u16_le()?,
            },
            5 => StatusVar::TimeZone(read_short_string(reader)?),
            6 => StatusVar::CatalogNz(read_short_string(reader)?),
            7 => StatusVar::LcTimeNames(reader.read_u16_le()?),
            8 => StatusVar::CharsetDatabase(reader.read_u16_le()?),
            9 => StatusVar::TableMapForUpdate(reader.read_u64_le()?),
            10 => StatusVar::MasterDataWritten(reader.read_u32_le()?),
            11 => StatusVar::Invoker {
                user: read_short_string(reader)?,
                host: read_short_string(reader)?,
            },
            12 => {
                let count = reader.read_u8()?;
                let mut names = Vec::new();
                if count != OVER_MAX_DBS_IN_EVENT_MTS {
                    for _ in 0..count {
                        names.push(reader.read_null_string()?);
                    }
                }
                StatusVar::UpdatedDbNames(names)
            }
            13 => StatusVar::Microseconds(reader.read_u24_le()?),
            16 => StatusVar::ExplicitDefaultsForTimestamp(reader.read_u8()? != 0),
            17 => StatusVar::DdlXid(reader.read_u64_le()?),
            18 => StatusVar::DefaultCollationForUtf8mb4(reader.read_u16_le()?),
            19 => StatusVar::SqlRequirePrimaryKey(reader.read_u8()? != 0),
            20 => StatusVar::DefaultTableEncryption(reader.read_u8()? != 0),
            other => {
                return Err(Error::protocol(
                    ProtocolErrorKind::UnsupportedStatusVar,
                    format!("unsupported query status variable {other}"),
                ));
            }
        };
        Ok(var)
    }
}

fn read_short_string(reader: &mut PacketReader<'_>) -> Result<String> {
    let len = reader.read_u8()?;
    Ok(String::from_utf8_lossy(reader.read_bytes(usize::from(len))?).into_owned())
}

/// A statement logged in statement format, or BEGIN / DDL in row format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    pub status_vars: Vec<StatusVar>,
    pub schema: String,
    pub query: String,
}

impl QueryEvent {
    pub fn parse(body: &[u8], post_header_len: usize) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let thread_id = reader.read_u32_le()?;
        let exec_time = reader.read_u32_le()?;
        let schema_len = reader.read_u8()?;
        let error_code = reader.read_u16_le()?;
        let status_len = reader.read_u16_le()?;
        reader.skip(post_header_len.saturating_sub(QUERY_POST_HEADER_LEN))?;

        let status_vars = StatusVar::parse_block(reader.read_bytes(usize::from(status_len))?)?;
        let schema = String::from_utf8_lossy(reader.read_bytes(usize::from(schema_len))?).into_owned();
        reader.skip(1)?;

        Ok(Self {
            thread_id,
            exec_time,
            error_code,
            status_vars,
            schema,
            query: reader.read_rest_string(),
        })
    }

    pub fn status_var(&self, pred: impl Fn(&StatusVar) -> bool) -> Option<&StatusVar> {
        self.status_vars.iter().find(|var| pred(var))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_body(status: &[u8], schema: &str, sql: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&11u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(schema.len() as u8);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(status.len() as u16).to_le_bytes());
        body.extend_from_slice(status);
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.extend_from_slice(sql.as_bytes());
        body
    }

    #[test]
    fn test_query_with_status_vars() {
        let mut status = vec![0x00];
        status.extend_from_slice(&0u32.to_le_bytes());
        status.push(0x01);
        status.extend_from_slice(&0x0000_0000_0100_0000u64.to_le_bytes());
        status.extend_from_slice(&[0x06, 3, b's', b't', b'd']);
        status.push(0x04);
        status.extend_from_slice(&[0xFF, 0x00, 0xFF, 0x00, 0x2D, 0x00]);
        status.extend_from_slice(&[0x05, 6]);
        status.extend_from_slice(b"SYSTEM");
        status.extend_from_slice(&[0x0C, 2]);
        status.extend_from_slice(b"db1\0db2\0");
        status.extend_from_slice(&[0x0B, 4]);
        status.extend_from_slice(b"root");
        status.push(9);
        status.extend_from_slice(b"localhost");
        status.push(0x12);
        status.extend_from_slice(&255u16.to_le_bytes());

        let event = QueryEvent::parse(&query_body(&status, "shop", "BEGIN"), 13).unwrap();
        assert_eq!(event.thread_id, 11);
        assert_eq!(event.schema, "shop");
        assert_eq!(event.query, "BEGIN");
        assert_eq!(event.status_vars.len(), 8);
        assert_eq!(event.status_vars[2], StatusVar::CatalogNz("std".to_string()));
        assert_eq!(
            event.status_vars[3],
            StatusVar::Charset {
                client: 255,
                connection: 255,
                server: 45
            }
        );
        assert_eq!(
            event.status_var(|v| matches!(v, StatusVar::UpdatedDbNames(_))),
            Some(&StatusVar::UpdatedDbNames(vec!["db1".into(), "db2".into()]))
        );
        assert_eq!(
            event.status_vars[6],
            StatusVar::Invoker {
                user: "root".to_string(),
                host: "localhost".to_string()
            }
        );
    }

    #[test]
    fn test_catalog_is_nul_terminated() {
        let status = [0x02, 3, b'd', b'e', b'f', 0x00, 0x0D, 0x40, 0x42, 0x0F];
        let vars = StatusVar::parse_block(&status).unwrap();
        assert_eq!(
            vars,
            vec![
                StatusVar::Catalog("def".to_string()),
                StatusVar::Microseconds(1_000_000)
            ]
        );
    }

    #[test]
    fn test_too_many_updated_dbs() {
        let vars = StatusVar::parse_block(&[0x0C, 254]).unwrap();
        assert_eq!(vars, vec![StatusVar::UpdatedDbNames(Vec::new())]);
    }

    #[test]
    fn test_unknown_status_var_is_rejected() {
        let err = StatusVar::parse_block(&[0x0E, 0, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.protocol_kind(), Some(ProtocolErrorKind::UnsupportedStatusVar));
    }

    #[test]
    fn test_extra_post_header_bytes_are_skipped() {
        let mut body = query_body(&[], "", "COMMIT");
        // Widen the post-header by two bytes after the status length.
        body.splice(13..13, [0xEE, 0xEE]);
        let event = QueryEvent::parse(&body, 15).unwrap();
        assert_eq!(event.query, "COMMIT");
        assert!(event.status_vars.is_empty());
    }
}
