//! Command handlers and the response writer they fill in.

use mywire_core::error::codes;
use mywire_core::{Result, ServerError, Value};

use crate::protocol::capabilities::CLIENT_DEPRECATE_EOF;
use crate::protocol::response::encode_terminator;
use crate::protocol::resultset::{encode_binary_row, encode_text_row};
use crate::protocol::{EofPacket, ErrPacket, OkPacket, PacketWriter, StmtPrepareOk};
use crate::types::ColumnDef;

/// What the server knows about an authenticated client.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub connection_id: u32,
    pub user: String,
    /// Peer address the client connected from
    pub host: String,
    /// Current default schema
    pub schema: Option<String>,
    /// Negotiated capability flags
    pub capabilities: u32,
    pub tls: bool,
    pub attributes: Vec<(String, String)>,
}

/// Buffers the response to one command.
///
/// Each call replaces whatever was written before; the connection sends
/// the final response after the handler returns. A handler that writes
/// nothing answers with a plain OK.
#[derive(Debug)]
pub struct ResultWriter {
    capabilities: u32,
    status_flags: u16,
    warnings: u16,
    packets: Vec<Vec<u8>>,
    error: bool,
    prepared: Option<(u32, u16)>,
}

impl ResultWriter {
    pub fn new(capabilities: u32, status_flags: u16) -> Self {
        Self {
            capabilities,
            status_flags,
            warnings: 0,
            packets: Vec::new(),
            error: false,
            prepared: None,
        }
    }

    /// Status flags sent with the response.
    pub fn set_status_flags(&mut self, flags: u16) {
        self.status_flags = flags;
    }

    pub fn set_warnings(&mut self, warnings: u16) {
        self.warnings = warnings;
    }

    fn reset(&mut self) {
        self.packets.clear();
        self.error = false;
        self.prepared = None;
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & CLIENT_DEPRECATE_EOF != 0
    }

    fn eof(&self) -> Vec<u8> {
        EofPacket {
            warnings: self.warnings,
            status_flags: self.status_flags,
        }
        .encode(self.capabilities)
    }

    fn terminator(&self) -> Vec<u8> {
        encode_terminator(
            EofPacket {
                warnings: self.warnings,
                status_flags: self.status_flags,
            },
            self.capabilities,
        )
    }

    /// OK with the given row count and insert id.
    pub fn ok(&mut self, affected_rows: u64, last_insert_id: u64) {
        self.ok_with_info(affected_rows, last_insert_id, "");
    }

    pub fn ok_with_info(&mut self, affected_rows: u64, last_insert_id: u64, info: &str) {
        self.reset();
        let ok = OkPacket {
            header: 0x00,
            affected_rows,
            last_insert_id,
            status_flags: self.status_flags,
            warnings: self.warnings,
            info: info.to_string(),
            session_state_changes: None,
        };
        self.packets.push(ok.encode(self.capabilities));
    }

    pub fn error(&mut self, err: &ServerError) {
        self.reset();
        self.error = true;
        self.packets
            .push(ErrPacket::from(err).encode(self.capabilities));
    }

    /// ERR 1105 / HY000 with `message`.
    pub fn error_message(&mut self, message: impl Into<String>) {
        self.error(&ServerError::new(
            codes::ER_UNKNOWN_ERROR,
            codes::SS_GENERAL,
            message,
        ));
    }

    /// Column count, definitions and the EOF that follows them.
    fn column_block(&mut self, columns: &[ColumnDef]) {
        let mut count = PacketWriter::with_capacity(9);
        count.write_lenenc_int(columns.len() as u64);
        self.packets.push(count.into_bytes());
        for column in columns {
            self.packets.push(column.encode());
        }
        if !self.deprecate_eof() {
            self.packets.push(self.eof());
        }
    }

    /// A text-protocol result set (answer to COM_QUERY).
    pub fn text_result(&mut self, columns: &[ColumnDef], rows: &[Vec<Value>]) {
        self.reset();
        self.column_block(columns);
        for row in rows {
            self.packets.push(encode_text_row(row));
        }
        self.packets.push(self.terminator());
    }

    /// A binary-protocol result set (answer to COM_STMT_EXECUTE).
    pub fn binary_result(&mut self, columns: &[ColumnDef], rows: &[Vec<Value>]) {
        self.reset();
        self.column_block(columns);
        for row in rows {
            self.packets.push(encode_binary_row(row, columns));
        }
        self.packets.push(self.terminator());
    }

    /// Column definitions for COM_FIELD_LIST, without a count packet.
    pub fn field_list(&mut self, columns: &[ColumnDef]) {
        self.reset();
        for column in columns {
            self.packets.push(column.encode());
        }
        self.packets.push(self.terminator());
    }

    /// COM_STMT_PREPARE response for statement `statement_id`.
    pub fn prepared(&mut self, statement_id: u32, params: &[ColumnDef], columns: &[ColumnDef]) {
        self.reset();
        let header = StmtPrepareOk {
            statement_id,
            num_columns: u16::try_from(columns.len()).unwrap_or(u16::MAX),
            num_params: u16::try_from(params.len()).unwrap_or(u16::MAX),
            warnings: self.warnings,
        };
        self.packets.push(header.encode());
        for block in [params, columns] {
            if block.is_empty() {
                continue;
            }
            for column in block {
                self.packets.push(column.encode());
            }
            if !self.deprecate_eof() {
                self.packets.push(self.eof());
            }
        }
        self.prepared = Some((statement_id, header.num_params));
    }

    /// Preformatted response packets, such as the event stream answering
    /// COM_BINLOG_DUMP.
    pub fn raw_packets(&mut self, packets: impl IntoIterator<Item = Vec<u8>>) {
        self.reset();
        self.packets.extend(packets);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Statement id and parameter count of a successful prepare.
    pub fn prepared_statement(&self) -> Option<(u32, u16)> {
        self.prepared
    }

    /// The buffered packets, writing an OK first if nothing was written.
    pub fn into_packets(mut self) -> Vec<Vec<u8>> {
        if self.packets.is_empty() {
            self.ok(0, 0);
        }
        self.packets
    }
}

/// Per-connection command callbacks.
///
/// Each callback answers through the [`ResultWriter`]. Returning a server
/// error sends it as an ERR packet and keeps the connection; any other
/// error closes the connection.
pub trait Handler {
    /// Called once after authentication succeeds.
    fn on_connect(&mut self, _session: &Session) {}

    fn on_ping(&mut self, _session: &Session, writer: &mut ResultWriter) -> Result<()> {
        writer.ok(0, 0);
        Ok(())
    }

    fn on_query(&mut self, session: &Session, query: &str, writer: &mut ResultWriter)
    -> Result<()>;

    /// COM_INIT_DB; the session schema changes unless an error is written.
    fn on_init_db(&mut self, _session: &Session, _schema: &str, writer: &mut ResultWriter) -> Result<()> {
        writer.ok(0, 0);
        Ok(())
    }

    /// COM_QUIT; no response is sent.
    fn on_quit(&mut self, _session: &Session) {}

    fn on_field_list(
        &mut self,
        _session: &Session,
        _table: &str,
        _wildcard: &str,
        writer: &mut ResultWriter,
    ) -> Result<()> {
        writer.field_list(&[]);
        Ok(())
    }

    /// COM_STMT_PREPARE; answer with [`ResultWriter::prepared`] or an error.
    fn on_prepare(&mut self, _session: &Session, _query: &str, writer: &mut ResultWriter) -> Result<()> {
        writer.error(&ServerError::unknown_command(0x16));
        Ok(())
    }

    fn on_execute(
        &mut self,
        _session: &Session,
        _statement_id: u32,
        _params: &[Value],
        writer: &mut ResultWriter,
    ) -> Result<()> {
        writer.error(&ServerError::unknown_command(0x17));
        Ok(())
    }

    /// COM_STMT_CLOSE; no response is sent.
    fn on_close(&mut self, _session: &Session, _statement_id: u32) {}

    /// COM_RESET_CONNECTION; prepared statements are already dropped.
    fn on_reset(&mut self, _session: &Session, writer: &mut ResultWriter) -> Result<()> {
        writer.ok(0, 0);
        Ok(())
    }

    /// Any other command byte.
    fn on_other(
        &mut self,
        _session: &Session,
        command: u8,
        _body: &[u8],
        writer: &mut ResultWriter,
    ) -> Result<()> {
        writer.error(&ServerError::unknown_command(command));
        Ok(())
    }
}
