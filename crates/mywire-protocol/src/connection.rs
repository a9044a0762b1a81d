//! MySQL client connection.
//!
//! Implements the client side of the wire protocol over any blocking
//! `Read + Write` stream:
//! - Connection establishment: greeting, optional TLS upgrade, handshake
//!   response and the authentication exchange (auth switch, caching_sha2
//!   fast/full paths, RSA public-key exchange)
//! - Command phase: text queries, prepared statements, field lists, ping,
//!   schema changes, connection reset
//! - Replication commands used by the binlog streamer

#![allow(clippy::cast_possible_truncation)]

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use mywire_core::error::{ProtocolErrorKind, TransportErrorKind};
use mywire_core::{Error, Result, Value};

use crate::auth::{self, AuthMethod};
use crate::config::ClientConfig;
use crate::protocol::handshake::{encode_auth_more_data, parse_auth_more_data};
use crate::protocol::prepared::{PreparedStatement, encode_statement_id};
use crate::protocol::response::parse_terminator;
use crate::protocol::resultset::{parse_binary_row, parse_text_row};
use crate::protocol::{
    AuthSwitchRequest, BinlogDump, BinlogDumpGtid, Command, Framer, HandshakeResponse41,
    HandshakeV10, OkPacket, PacketContext, PacketType, QueryResult, RegisterSlave, Response,
    SslRequest, StmtExecute, StmtPrepareOk, capabilities,
};
use crate::stream::Stream;
use crate::tls;
use crate::types::ColumnDef;

/// Connection state in the client state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Exchanging greeting and credentials
    Authenticating,
    /// Ready for commands
    Ready,
    /// A binlog dump is in progress; only packet reads are valid
    Streaming,
    /// A connection-fatal error occurred
    Broken,
    /// QUIT was sent
    Closed,
}

/// Server identity captured from the greeting.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub server_version: String,
    pub connection_id: u32,
    /// Capabilities the server advertised (before negotiation)
    pub capabilities: u32,
    pub collation: u8,
    pub auth_plugin: String,
}

/// A client connection to a MySQL server.
pub struct Connection<S = TcpStream> {
    framer: Framer<Stream<S>>,
    config: ClientConfig,
    server: ServerInfo,
    /// Negotiated capability set used for every packet after the greeting
    capabilities: u32,
    state: ConnectionState,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("connection_id", &self.server.connection_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("user", &self.config.user)
            .finish_non_exhaustive()
    }
}

impl Connection<TcpStream> {
    /// Dial `config.host:config.port` and complete the handshake.
    #[tracing::instrument(skip(config), fields(addr = %config.socket_addr(), user = %config.user))]
    pub fn connect(config: ClientConfig) -> Result<Self> {
        let addr = config
            .socket_addr()
            .to_socket_addrs()
            .map_err(|e| Error::transport_io(TransportErrorKind::Connect, e))?
            .next()
            .ok_or_else(|| {
                Error::transport(
                    TransportErrorKind::Connect,
                    format!("no address for {}", config.socket_addr()),
                )
            })?;

        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|e| {
            Error::transport(
                TransportErrorKind::Connect,
                format!("Failed to connect to {}: {e}", config.socket_addr()),
            )
        })?;
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(config.read_timeout)
            .map_err(|e| Error::transport_io(TransportErrorKind::Connect, e))?;

        Self::handshake(stream, config)
    }
}

impl<S: Read + Write> Connection<S> {
    /// Complete the connection phase on an already-open stream.
    ///
    /// 1. Receive the server greeting
    /// 2. Upgrade to TLS if requested and supported
    /// 3. Send the handshake response with the initial auth data
    /// 4. Follow auth switches and AuthMoreData until OK or ERR
    pub fn handshake(stream: S, config: ClientConfig) -> Result<Self> {
        let mut framer = Framer::new(Stream::plain(stream))
            .with_max_payload(config.max_packet_size as usize);

        let greeting = HandshakeV10::parse(&framer.read_packet()?)?;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            plugin = %greeting.auth_plugin_name,
            "received server greeting"
        );
        if greeting.capabilities & capabilities::CLIENT_PROTOCOL_41 == 0 {
            return Err(Error::protocol(
                ProtocolErrorKind::UnsupportedCapability,
                "server does not support protocol 4.1",
            ));
        }

        let use_tls = tls::validate_ssl_mode(config.ssl_mode, greeting.capabilities)?;
        let mut caps = config.capability_flags() & greeting.capabilities;
        if !use_tls {
            caps &= !capabilities::CLIENT_SSL;
        }
        tracing::trace!(capabilities = ?capabilities::names(caps), "negotiated capabilities");

        let mut conn = Self {
            framer,
            server: ServerInfo {
                server_version: greeting.server_version,
                connection_id: greeting.connection_id,
                capabilities: greeting.capabilities,
                collation: greeting.collation,
                auth_plugin: greeting.auth_plugin_name,
            },
            config,
            capabilities: caps,
            state: ConnectionState::Authenticating,
            status_flags: greeting.status_flags,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
        };

        let collation = mywire_core::collation::by_id(conn.config.collation)
            .map_or(conn.config.collation as u8, |c| c.handshake_byte());

        if use_tls {
            let request = SslRequest {
                capabilities: caps,
                max_packet_size: conn.config.max_packet_size,
                collation,
            };
            conn.framer.write_packet(&request.encode())?;
            let tls_config = tls::client_config(&conn.config.tls, conn.config.ssl_mode)?;
            let server_name = conn
                .config
                .tls
                .server_name
                .clone()
                .unwrap_or_else(|| conn.config.host.clone());
            conn.framer
                .get_mut()
                .upgrade_client(tls_config, &server_name)?;
        }

        // Unknown plugins: answer with mysql_native_password and let the
        // server switch us.
        let method = AuthMethod::from_name(&conn.server.auth_plugin)
            .unwrap_or(AuthMethod::NativePassword);
        let salt = auth::normalize_salt(&greeting.auth_plugin_data).to_vec();
        let auth_response = conn.initial_auth_response(method, &salt)?;

        let response = HandshakeResponse41 {
            capabilities: caps,
            max_packet_size: conn.config.max_packet_size,
            collation,
            username: conn.config.user.clone(),
            auth_response,
            database: conn.config.default_schema.clone(),
            auth_plugin_name: Some(method.name().to_string()),
            connect_attrs: conn
                .config
                .connect_attrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        conn.framer.write_packet(&response.encode())?;

        conn.authenticate(method, salt)?;
        conn.state = ConnectionState::Ready;
        tracing::debug!(
            connection_id = conn.server.connection_id,
            tls = conn.is_tls(),
            "connection established"
        );
        Ok(conn)
    }

    /// First auth payload for `method`.
    ///
    /// sha256_password never sends a cleartext password over plaintext; it
    /// encrypts with a configured key or asks the server for one.
    fn initial_auth_response(&self, method: AuthMethod, salt: &[u8]) -> Result<Vec<u8>> {
        let password = self.config.password_str();
        if method != AuthMethod::Sha256Password || password.is_empty() || self.is_tls() {
            return Ok(method.scramble(password, salt));
        }
        match &self.config.server_public_key {
            Some(pem) => auth::encrypt_password(password, salt, pem),
            None => Ok(vec![auth::sha256::REQUEST_PUBLIC_KEY]),
        }
    }

    /// Drive the exchange after HandshakeResponse until OK or ERR.
    fn authenticate(&mut self, mut method: AuthMethod, mut salt: Vec<u8>) -> Result<()> {
        let deprecate_eof = self.deprecate_eof();
        loop {
            let payload = self.framer.read_packet()?;
            match PacketType::classify(&payload, PacketContext::Handshake, deprecate_eof) {
                PacketType::Ok => {
                    let ok = OkPacket::parse(&payload, self.capabilities)?;
                    self.status_flags = ok.status_flags;
                    return Ok(());
                }
                PacketType::Error => {
                    let err = crate::protocol::ErrPacket::parse(&payload)?;
                    tracing::warn!(code = err.error_code, "authentication rejected");
                    return Err(err.into_error());
                }
                PacketType::AuthSwitchRequest => {
                    let switch = AuthSwitchRequest::parse(&payload)?;
                    method = AuthMethod::from_name(&switch.plugin_name)?;
                    salt = auth::normalize_salt(&switch.plugin_data).to_vec();
                    tracing::debug!(plugin = %method, "auth switch");
                    let response = self.initial_auth_response(method, &salt)?;
                    self.framer.write_packet(&response)?;
                }
                PacketType::AuthMoreData => {
                    let data = parse_auth_more_data(&payload)?;
                    self.auth_more_data(method, &salt, data)?;
                }
                _ => {
                    return Err(Error::unexpected_packet(
                        "unexpected packet during authentication",
                        &payload,
                    ));
                }
            }
        }
    }

    fn auth_more_data(&mut self, method: AuthMethod, salt: &[u8], data: &[u8]) -> Result<()> {
        let password = self.config.password_str().to_string();
        match (method, data) {
            (AuthMethod::CachingSha2Password, [auth::caching_sha2::FAST_AUTH_SUCCESS]) => {
                tracing::trace!("caching_sha2 fast auth succeeded");
                Ok(())
            }
            (AuthMethod::CachingSha2Password, [auth::caching_sha2::PERFORM_FULL_AUTH]) => {
                tracing::trace!("caching_sha2 full auth requested");
                let response = if self.is_tls() {
                    AuthMethod::Sha256Password.scramble(&password, salt)
                } else if let Some(pem) = &self.config.server_public_key {
                    auth::encrypt_password(&password, salt, pem)?
                } else {
                    vec![auth::caching_sha2::REQUEST_PUBLIC_KEY]
                };
                self.framer.write_packet(&response)
            }
            (AuthMethod::CachingSha2Password | AuthMethod::Sha256Password, pem) => {
                let pem = std::str::from_utf8(pem).map_err(|_| {
                    Error::unexpected_packet("public key is not valid PEM text", pem)
                })?;
                let ciphertext = auth::encrypt_password(&password, salt, pem)?;
                self.framer.write_packet(&ciphertext)
            }
            (AuthMethod::NativePassword, _) => Err(Error::unexpected_packet(
                "AuthMoreData for mysql_native_password",
                &encode_auth_more_data(data),
            )),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    pub fn connection_id(&self) -> u32 {
        self.server.connection_id
    }

    pub fn server_version(&self) -> &str {
        &self.server.server_version
    }

    /// Negotiated capability flags.
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_tls(&self) -> bool {
        self.framer.get_ref().is_tls()
    }

    /// Status flags from the most recent OK or EOF.
    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state == ConnectionState::Ready {
            Ok(())
        } else {
            Err(Error::protocol(
                ProtocolErrorKind::UnexpectedPacket,
                format!("connection is not ready for commands ({:?})", self.state),
            ))
        }
    }

    /// Mark the connection broken when `result` carries a fatal error.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_fatal() {
                tracing::debug!(error = %e, "connection marked broken");
                self.state = ConnectionState::Broken;
            }
        }
        result
    }

    /// Send a command packet, resetting the sequence.
    pub fn send_command(&mut self, command: Command, body: &[u8]) -> Result<()> {
        tracing::trace!(?command, length = body.len(), "send command");
        let result = self.framer.write_command(command as u8, body);
        self.track(result)
    }

    /// Read the next packet of the current exchange.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let result = self.framer.read_packet();
        self.track(result)
    }

    fn record_ok(&mut self, ok: &OkPacket) {
        self.status_flags = ok.status_flags;
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
    }

    /// Read a response that must be OK (or ERR).
    fn read_ok(&mut self) -> Result<OkPacket> {
        let payload = self.framer.read_packet()?;
        match Response::parse(&payload, self.capabilities)? {
            Response::Ok(ok) => {
                self.record_ok(&ok);
                Ok(ok)
            }
            Response::Err(err) => Err(err.into_error()),
            _ => Err(Error::unexpected_packet("expected OK packet", &payload)),
        }
    }

    fn simple_command(&mut self, command: Command, body: &[u8]) -> Result<OkPacket> {
        self.ensure_ready()?;
        let result = self
            .framer
            .write_command(command as u8, body)
            .and_then(|()| self.read_ok());
        self.track(result)
    }

    /// COM_PING
    pub fn ping(&mut self) -> Result<()> {
        self.simple_command(Command::Ping, &[]).map(|_| ())
    }

    /// COM_INIT_DB
    pub fn init_db(&mut self, schema: &str) -> Result<()> {
        self.simple_command(Command::InitDb, schema.as_bytes())
            .map(|_| ())
    }

    /// COM_RESET_CONNECTION
    pub fn reset_connection(&mut self) -> Result<()> {
        self.simple_command(Command::ResetConnection, &[])
            .map(|_| ())
    }

    /// Run a text query and return its first result.
    ///
    /// Further results of a multi-statement query are read and dropped so
    /// the connection stays in sync.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.query_all(sql).map(first_result)
    }

    /// Run a text query and return every result it produced.
    #[tracing::instrument(level = "debug", skip(self), fields(connection_id = self.server.connection_id))]
    pub fn query_all(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        self.ensure_ready()?;
        let result = self
            .framer
            .write_command(Command::Query as u8, sql.as_bytes())
            .and_then(|()| self.read_results(false));
        self.track(result)
    }

    /// Read results until one arrives without MoreResultsExists.
    fn read_results(&mut self, binary: bool) -> Result<Vec<QueryResult>> {
        let mut results = Vec::new();
        loop {
            let result = self.read_result(binary)?;
            let more = result.has_more_results();
            results.push(result);
            if !more {
                return Ok(results);
            }
        }
    }

    fn read_result(&mut self, binary: bool) -> Result<QueryResult> {
        let payload = self.framer.read_packet()?;
        let column_count = match Response::parse(&payload, self.capabilities)? {
            Response::Ok(ok) => {
                self.record_ok(&ok);
                return Ok(QueryResult::from_ok(&ok));
            }
            Response::Err(err) => return Err(err.into_error()),
            Response::LocalInfile(filename) => {
                // Decline with an empty packet so the server can finish the command.
                self.framer.write_packet(&[])?;
                let reply = self.framer.read_packet()?;
                if let Ok(Response::Ok(ok)) = Response::parse(&reply, self.capabilities) {
                    self.record_ok(&ok);
                }
                return Err(Error::protocol(
                    ProtocolErrorKind::LocalInfileUnsupported,
                    format!("server requested LOCAL INFILE '{filename}'"),
                ));
            }
            Response::Eof(_) => {
                return Err(Error::unexpected_packet("EOF as first response packet", &payload));
            }
            Response::ResultSet(count) => count as usize,
        };

        let columns = self.read_column_defs(column_count)?;
        let mut result = QueryResult {
            columns,
            ..QueryResult::default()
        };

        let deprecate_eof = self.deprecate_eof();
        loop {
            let payload = self.framer.read_packet()?;
            match PacketType::classify(&payload, PacketContext::ResultSet, deprecate_eof) {
                PacketType::Eof | PacketType::Ok => {
                    let end = parse_terminator(&payload, self.capabilities)?;
                    self.status_flags = end.status_flags;
                    self.warnings = end.warnings;
                    self.affected_rows = 0;
                    result.status_flags = end.status_flags;
                    result.warnings = end.warnings;
                    return Ok(result);
                }
                PacketType::Error => {
                    return Err(crate::protocol::ErrPacket::parse(&payload)?.into_error());
                }
                _ => {
                    let row = if binary {
                        parse_binary_row(&payload, &result.columns)?
                    } else {
                        parse_text_row(&payload, column_count)?
                    };
                    result.rows.push(row);
                }
            }
        }
    }

    /// Read `count` column definitions and, without DeprecateEOF, their EOF.
    fn read_column_defs(&mut self, count: usize) -> Result<Vec<ColumnDef>> {
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(ColumnDef::parse(&self.framer.read_packet()?)?);
        }
        if count > 0 && !self.deprecate_eof() {
            let payload = self.framer.read_packet()?;
            match PacketType::classify(&payload, PacketContext::ResultSet, false) {
                PacketType::Eof => {}
                _ => {
                    return Err(Error::unexpected_packet(
                        "expected EOF after column definitions",
                        &payload,
                    ));
                }
            }
        }
        Ok(columns)
    }

    /// COM_FIELD_LIST: column definitions of `table`, filtered by `wildcard`.
    pub fn field_list(&mut self, table: &str, wildcard: &str) -> Result<Vec<ColumnDef>> {
        self.ensure_ready()?;
        let mut body = Vec::with_capacity(table.len() + wildcard.len() + 1);
        body.extend_from_slice(table.as_bytes());
        body.push(0);
        body.extend_from_slice(wildcard.as_bytes());

        let result = self
            .framer
            .write_command(Command::FieldList as u8, &body)
            .and_then(|()| self.read_field_list());
        self.track(result)
    }

    fn read_field_list(&mut self) -> Result<Vec<ColumnDef>> {
        let deprecate_eof = self.deprecate_eof();
        let mut columns = Vec::new();
        loop {
            let payload = self.framer.read_packet()?;
            match PacketType::classify(&payload, PacketContext::ResultSet, deprecate_eof) {
                PacketType::Eof | PacketType::Ok => {
                    let end = parse_terminator(&payload, self.capabilities)?;
                    self.status_flags = end.status_flags;
                    return Ok(columns);
                }
                PacketType::Error => {
                    return Err(crate::protocol::ErrPacket::parse(&payload)?.into_error());
                }
                _ => columns.push(ColumnDef::parse(&payload)?),
            }
        }
    }

    /// COM_STMT_PREPARE
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.ensure_ready()?;
        let result = self
            .framer
            .write_command(Command::StmtPrepare as u8, sql.as_bytes())
            .and_then(|()| self.read_prepare_response(sql));
        self.track(result)
    }

    fn read_prepare_response(&mut self, sql: &str) -> Result<PreparedStatement> {
        let payload = self.framer.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(crate::protocol::ErrPacket::parse(&payload)?.into_error());
        }
        let ok = StmtPrepareOk::parse(&payload)?;
        self.warnings = ok.warnings;
        let params = self.read_column_defs(usize::from(ok.num_params))?;
        let columns = self.read_column_defs(usize::from(ok.num_columns))?;
        tracing::trace!(
            statement_id = ok.statement_id,
            params = params.len(),
            columns = columns.len(),
            "statement prepared"
        );
        Ok(PreparedStatement {
            statement_id: ok.statement_id,
            sql: sql.to_string(),
            params,
            columns,
        })
    }

    /// COM_STMT_EXECUTE with `params` bound in order; rows come back typed.
    pub fn execute(&mut self, statement: &PreparedStatement, params: &[Value]) -> Result<QueryResult> {
        self.ensure_ready()?;
        if params.len() != statement.param_count() {
            return Err(Error::config(format!(
                "statement {} expects {} parameters, got {}",
                statement.statement_id,
                statement.param_count(),
                params.len()
            )));
        }
        let body = StmtExecute::new(statement.statement_id, params.to_vec()).encode();
        let result = self
            .framer
            .write_command(Command::StmtExecute as u8, &body)
            .and_then(|()| self.read_results(true));
        self.track(result).map(first_result)
    }

    /// COM_STMT_CLOSE; the server sends no reply.
    pub fn close_statement(&mut self, statement: PreparedStatement) -> Result<()> {
        self.ensure_ready()?;
        self.send_command(
            Command::StmtClose,
            &encode_statement_id(statement.statement_id),
        )
    }

    /// COM_REGISTER_SLAVE
    pub fn register_slave(&mut self, request: &RegisterSlave) -> Result<()> {
        self.simple_command(Command::RegisterSlave, &request.encode())
            .map(|_| ())
    }

    /// COM_BINLOG_DUMP; events follow via [`Connection::read_packet`].
    pub fn binlog_dump(&mut self, request: &BinlogDump) -> Result<()> {
        self.ensure_ready()?;
        self.send_command(Command::BinlogDump, &request.encode())?;
        self.state = ConnectionState::Streaming;
        Ok(())
    }

    /// COM_BINLOG_DUMP_GTID; events follow via [`Connection::read_packet`].
    pub fn binlog_dump_gtid(&mut self, request: &BinlogDumpGtid) -> Result<()> {
        self.ensure_ready()?;
        self.send_command(Command::BinlogDumpGtid, &request.encode())?;
        self.state = ConnectionState::Streaming;
        Ok(())
    }

    /// Send COM_QUIT and drop the connection.
    pub fn quit(mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Closed | ConnectionState::Broken) {
            return Ok(());
        }
        // Best effort; the server closes without replying.
        let _ = self.framer.write_command(Command::Quit as u8, &[]);
        self.state = ConnectionState::Closed;
        tracing::debug!(connection_id = self.server.connection_id, "connection closed");
        Ok(())
    }
}

fn first_result(results: Vec<QueryResult>) -> QueryResult {
    results.into_iter().next().unwrap_or_default()
}
