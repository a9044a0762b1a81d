//! MySQL prepared statement (binary protocol) packets.
//!
//! # Protocol Flow
//!
//! 1. **Prepare**: client sends COM_STMT_PREPARE with SQL
//!    - Server returns statement ID, param count, column count
//!    - Server sends param column definitions (if any), then an EOF
//!    - Server sends result column definitions (if any), then an EOF
//!
//! 2. **Execute**: client sends COM_STMT_EXECUTE with statement ID + binary params
//!    - Server returns a binary result set or an OK packet
//!
//! 3. **Close**: client sends COM_STMT_CLOSE with statement ID
//!    - No server response
//!
//! The EOF packets after each definition block are omitted when
//! CLIENT_DEPRECATE_EOF was negotiated.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::error::EncodingErrorKind;
use mywire_core::{Error, Result, Value};

use super::{PacketReader, PacketWriter};
use crate::types::{ColumnDef, FieldType, binary_param_type, read_binary_value, write_binary_value};

/// Response from COM_STMT_PREPARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    /// Number of columns in result set (0 for non-SELECT)
    pub num_columns: u16,
    /// Number of `?` placeholders
    pub num_params: u16,
    pub warnings: u16,
}

impl StmtPrepareOk {
    /// Parse a COM_STMT_PREPARE_OK payload.
    ///
    /// - Status: 0x00 (1 byte)
    /// - Statement ID (4 bytes)
    /// - Number of columns (2 bytes)
    /// - Number of parameters (2 bytes)
    /// - Reserved: 0x00 (1 byte)
    /// - Warning count (2 bytes)
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let status = reader.read_u8()?;
        if status != 0x00 {
            return Err(Error::encoding(
                EncodingErrorKind::UnexpectedFirstByte,
                format!("prepare response starts with 0x{status:02X}"),
            ));
        }
        let statement_id = reader.read_u32_le()?;
        let num_columns = reader.read_u16_le()?;
        let num_params = reader.read_u16_le()?;
        reader.skip(1)?;
        let warnings = if reader.remaining() >= 2 {
            reader.read_u16_le()?
        } else {
            0
        };
        Ok(Self {
            statement_id,
            num_columns,
            num_params,
            warnings,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(12);
        writer.write_u8(0x00);
        writer.write_u32_le(self.statement_id);
        writer.write_u16_le(self.num_columns);
        writer.write_u16_le(self.num_params);
        writer.write_u8(0x00);
        writer.write_u16_le(self.warnings);
        writer.into_bytes()
    }
}

/// A prepared statement as seen by the client.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    /// SQL text, kept for logging
    pub sql: String,
    pub params: Vec<ColumnDef>,
    pub columns: Vec<ColumnDef>,
}

impl PreparedStatement {
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// COM_STMT_EXECUTE body (everything after the command byte).
#[derive(Debug, Clone, PartialEq)]
pub struct StmtExecute {
    pub statement_id: u32,
    /// Cursor flags; 0x00 = CURSOR_TYPE_NO_CURSOR
    pub flags: u8,
    /// Always 1 on the wire
    pub iteration_count: u32,
    pub params: Vec<Value>,
    /// Parameter wire types with unsigned flags, present when new types were bound
    pub param_types: Option<Vec<(FieldType, bool)>>,
}

impl StmtExecute {
    /// Bind `params`, deriving wire types from the values.
    pub fn new(statement_id: u32, params: Vec<Value>) -> Self {
        let param_types = Some(params.iter().map(binary_param_type).collect());
        Self {
            statement_id,
            flags: 0,
            iteration_count: 1,
            params,
            param_types,
        }
    }

    /// Encode the body:
    /// - Statement ID (4 bytes LE), flags (1), iteration count (4)
    /// - NULL bitmap of (n + 7) / 8 bytes, if n > 0
    /// - New-params-bound flag (1), then per-param type + flags if set
    /// - Non-NULL parameter values
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(64 + self.params.len() * 16);
        writer.write_u32_le(self.statement_id);
        writer.write_u8(self.flags);
        writer.write_u32_le(self.iteration_count);

        if self.params.is_empty() {
            return writer.into_bytes();
        }

        let mut null_bitmap = vec![0u8; self.params.len().div_ceil(8)];
        for (i, param) in self.params.iter().enumerate() {
            if param.is_null() {
                null_bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        writer.write_bytes(&null_bitmap);

        let types: Vec<(FieldType, bool)> = match &self.param_types {
            Some(types) => {
                writer.write_u8(1);
                for (field_type, unsigned) in types {
                    writer.write_u8(*field_type as u8);
                    writer.write_u8(if *unsigned { 0x80 } else { 0x00 });
                }
                types.clone()
            }
            None => {
                writer.write_u8(0);
                self.params.iter().map(binary_param_type).collect()
            }
        };

        for (param, (field_type, _)) in self.params.iter().zip(types) {
            write_binary_value(&mut writer, param, field_type);
        }
        writer.into_bytes()
    }

    /// Decode a body for a statement with `param_count` placeholders.
    ///
    /// `bound_types` are the types from an earlier execute; they are used
    /// when the client does not rebind.
    pub fn parse(
        body: &[u8],
        param_count: usize,
        bound_types: Option<&[(FieldType, bool)]>,
    ) -> Result<Self> {
        let mut reader = PacketReader::new(body);
        let statement_id = reader.read_u32_le()?;
        let flags = reader.read_u8()?;
        let iteration_count = reader.read_u32_le()?;

        if param_count == 0 {
            return Ok(Self {
                statement_id,
                flags,
                iteration_count,
                params: Vec::new(),
                param_types: None,
            });
        }

        let null_bitmap = reader.read_bytes(param_count.div_ceil(8))?;
        let new_params_bound = reader.read_u8()? == 1;
        let types: Vec<(FieldType, bool)> = if new_params_bound {
            (0..param_count)
                .map(|_| {
                    let field_type = FieldType::try_from_u8(reader.read_u8()?)?;
                    let unsigned = reader.read_u8()? & 0x80 != 0;
                    Ok((field_type, unsigned))
                })
                .collect::<Result<_>>()?
        } else {
            bound_types
                .filter(|types| types.len() == param_count)
                .ok_or_else(|| {
                    Error::encoding(
                        EncodingErrorKind::InvalidValue,
                        "execute without parameter types and none bound before",
                    )
                })?
                .to_vec()
        };

        let mut params = Vec::with_capacity(param_count);
        for (i, (field_type, unsigned)) in types.iter().enumerate() {
            if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
                params.push(Value::Null);
            } else {
                params.push(read_binary_value(&mut reader, *field_type, *unsigned)?);
            }
        }

        Ok(Self {
            statement_id,
            flags,
            iteration_count,
            params,
            param_types: new_params_bound.then_some(types),
        })
    }
}

/// Body of COM_STMT_CLOSE / COM_STMT_RESET.
pub fn encode_statement_id(statement_id: u32) -> [u8; 4] {
    statement_id.to_le_bytes()
}
