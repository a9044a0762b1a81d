//! One server-side connection: greeting, authentication, command loop.

use std::collections::HashMap;
use std::io::{Read, Write};

use mywire_core::collation::DEFAULT_COLLATION_ID;
use mywire_core::error::{
    AuthErrorKind, ProtocolErrorKind, TransportErrorKind, codes, server_log_line,
};
use mywire_core::{Error, Result, ServerError};

use crate::auth::{self, AuthMethod, caching_sha2, generate_salt, sha256};
use crate::protocol::capabilities::CLIENT_PROTOCOL_41;
use crate::protocol::handshake::encode_auth_more_data;
use crate::protocol::server_status::SERVER_STATUS_AUTOCOMMIT;
use crate::protocol::{
    AuthSwitchRequest, Command, ErrPacket, Framer, HandshakeResponse41, HandshakeV10, OkPacket,
    PacketReader, SslRequest, StmtExecute,
};
use crate::stream::Stream;
use crate::types::FieldType;

use super::ServerContext;
use super::config::Credential;
use super::handler::{Handler, ResultWriter, Session};

/// Parameter metadata for a statement prepared on this connection.
#[derive(Debug, Default)]
struct StatementInfo {
    params: u16,
    /// Types from the last execute that bound them
    bound_types: Option<Vec<(FieldType, bool)>>,
}

struct ServerConnection<'a, S: Read + Write> {
    framer: Framer<Stream<S>>,
    ctx: &'a ServerContext,
    salt: [u8; auth::SALT_LEN],
    session: Session,
    statements: HashMap<u32, StatementInfo>,
}

/// Serve a single client until it quits or the connection fails.
///
/// A client that disconnects between commands ends the session cleanly.
/// Authentication failures are answered with ERR 1045 and returned as
/// an authentication error.
#[tracing::instrument(level = "debug", skip_all, fields(peer = %peer_host))]
pub fn serve_connection<S, H>(
    stream: S,
    peer_host: &str,
    ctx: &ServerContext,
    handler: &mut H,
) -> Result<()>
where
    S: Read + Write,
    H: Handler + ?Sized,
{
    let mut conn = ServerConnection {
        framer: Framer::new(Stream::plain(stream)).with_max_payload(ctx.config().max_packet_size),
        ctx,
        salt: generate_salt(),
        session: Session {
            host: peer_host.to_string(),
            ..Session::default()
        },
        statements: HashMap::new(),
    };
    conn.handshake()?;
    handler.on_connect(&conn.session);
    tracing::info!(
        connection_id = conn.session.connection_id,
        user = %conn.session.user,
        tls = conn.session.tls,
        "client authenticated"
    );
    conn.command_loop(handler)
}

impl<S: Read + Write> ServerConnection<'_, S> {
    fn handshake(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let config = ctx.config();
        self.session.connection_id = ctx.next_connection_id();
        let greeting = HandshakeV10 {
            server_version: config.server_version.clone(),
            connection_id: self.session.connection_id,
            auth_plugin_data: self.salt.to_vec(),
            capabilities: ctx.capabilities(),
            collation: u8::try_from(DEFAULT_COLLATION_ID).unwrap_or(u8::MAX),
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: config.default_auth.name().to_string(),
        };
        self.framer.write_packet(&greeting.encode())?;

        let mut payload = self.framer.read_packet()?;
        if SslRequest::parse(&payload).is_some() {
            let Some(tls) = ctx.tls_config() else {
                return Err(Error::protocol(
                    ProtocolErrorKind::UnsupportedCapability,
                    "client requested TLS but it is not enabled",
                ));
            };
            self.framer.get_mut().upgrade_server(tls)?;
            self.session.tls = true;
            tracing::debug!("TLS established");
            payload = self.framer.read_packet()?;
        }

        let response = HandshakeResponse41::parse(&payload)?;
        if response.capabilities & CLIENT_PROTOCOL_41 == 0 {
            let err = ServerError::new(
                codes::ER_NOT_SUPPORTED_AUTH_MODE,
                codes::SS_NOT_SUPPORTED_AUTH,
                "Client does not support authentication protocol requested by server",
            );
            self.framer
                .write_packet(&ErrPacket::from(&err).encode(CLIENT_PROTOCOL_41))?;
            return Err(Error::protocol(
                ProtocolErrorKind::UnsupportedCapability,
                "client lacks CLIENT_PROTOCOL_41",
            ));
        }
        self.session.capabilities = greeting.capabilities & response.capabilities;
        self.session.user.clone_from(&response.username);
        self.session.schema.clone_from(&response.database);
        self.session.attributes.clone_from(&response.connect_attrs);

        if let Err(e) = self.authenticate(&response) {
            let err = ServerError::access_denied(
                &response.username,
                &self.session.host,
                !response.auth_response.is_empty(),
            );
            tracing::warn!(
                "{}",
                server_log_line(err.code, "Server", &format!("{err} ({e})"))
            );
            self.framer
                .write_packet(&ErrPacket::from(&err).encode(self.session.capabilities))?;
            return Err(Error::auth(AuthErrorKind::Mismatch, err.message));
        }

        let ok = OkPacket {
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            ..OkPacket::default()
        };
        self.framer.write_packet(&ok.encode(self.session.capabilities))
    }

    /// Verify the client's credential; any error means access denied.
    fn authenticate(&mut self, response: &HandshakeResponse41) -> Result<()> {
        let credential = self
            .ctx
            .config()
            .users
            .lookup(&response.username, &self.session.host)
            .ok_or_else(|| Error::auth(AuthErrorKind::Mismatch, "unknown user"))?;
        let method = credential.method;

        let client_method = response
            .auth_plugin_name
            .as_deref()
            .and_then(|name| AuthMethod::from_name(name).ok());
        let auth_response = if client_method == Some(method) {
            response.auth_response.clone()
        } else {
            tracing::debug!(plugin = %method, "switching client authentication plugin");
            let mut plugin_data = self.salt.to_vec();
            plugin_data.push(0);
            let switch = AuthSwitchRequest {
                plugin_name: method.name().to_string(),
                plugin_data,
            };
            self.framer.write_packet(&switch.encode())?;
            self.framer.read_packet()?
        };

        if credential.authentication_string.is_empty() {
            return method.validate("", &auth_response, &self.salt);
        }
        match method {
            AuthMethod::NativePassword => {
                method.validate(&credential.authentication_string, &auth_response, &self.salt)
            }
            AuthMethod::CachingSha2Password => self.caching_sha2(&credential, &auth_response),
            AuthMethod::Sha256Password => {
                let password = if self.session.tls {
                    auth_response
                } else if auth_response == [sha256::REQUEST_PUBLIC_KEY] {
                    self.send_public_key_and_decrypt()?
                } else {
                    self.decrypt(&auth_response)?
                };
                method.validate(&credential.authentication_string, &password, &self.salt)
            }
        }
    }

    fn caching_sha2(&mut self, credential: &Credential, scramble: &[u8]) -> Result<()> {
        let ctx = self.ctx;
        let cache = &ctx.config().cache;
        let user = self.session.user.clone();
        if let Some(stage2) = cache.get(&user, &self.session.host) {
            if auth::validate_fast(&stage2, scramble, &self.salt).is_ok() {
                tracing::trace!("caching_sha2 fast auth");
                return self
                    .framer
                    .write_packet(&encode_auth_more_data(&[caching_sha2::FAST_AUTH_SUCCESS]));
            }
            // A stale entry; full auth replaces it on success.
            tracing::debug!("caching_sha2 scramble does not match the cache");
        }

        self.framer
            .write_packet(&encode_auth_more_data(&[caching_sha2::PERFORM_FULL_AUTH]))?;
        let packet = self.framer.read_packet()?;
        let password = if self.session.tls {
            packet.strip_suffix(&[0]).unwrap_or(&packet).to_vec()
        } else if packet == [caching_sha2::REQUEST_PUBLIC_KEY] {
            self.send_public_key_and_decrypt()?
        } else {
            self.decrypt(&packet)?
        };
        AuthMethod::CachingSha2Password.validate(
            &credential.authentication_string,
            &password,
            &self.salt,
        )?;
        cache.insert(&user, &self.session.host, auth::sha2_stage2(&password));
        Ok(())
    }

    fn rsa_key(&self) -> Result<&auth::RsaKeyPair> {
        self.ctx.rsa_key().ok_or_else(|| {
            Error::auth(
                AuthErrorKind::InsecureTransport,
                "full authentication needs TLS or an RSA key",
            )
        })
    }

    fn send_public_key_and_decrypt(&mut self) -> Result<Vec<u8>> {
        let pem = self.rsa_key()?.public_key_pem().as_bytes().to_vec();
        self.framer.write_packet(&encode_auth_more_data(&pem))?;
        let ciphertext = self.framer.read_packet()?;
        self.decrypt(&ciphertext)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.rsa_key()?.decrypt_password(ciphertext, &self.salt)
    }

    fn command_loop<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        loop {
            self.framer.reset_sequence();
            let packet = match self.framer.read_packet() {
                Ok(packet) => packet,
                Err(e) if e.transport_kind() == Some(TransportErrorKind::RemoteClosed) => {
                    tracing::debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let Some((&command, body)) = packet.split_first() else {
                let err = ServerError::new(
                    codes::ER_UNKNOWN_COM_ERROR,
                    codes::SS_UNKNOWN_COM,
                    "Empty command packet",
                );
                tracing::warn!("{}", server_log_line(err.code, "Server", &err.message));
                self.framer
                    .write_packet(&ErrPacket::from(&err).encode(self.session.capabilities))?;
                return Err(Error::unexpected_packet("empty command packet", &packet));
            };
            tracing::trace!(command, "dispatch");

            let mut writer = ResultWriter::new(self.session.capabilities, SERVER_STATUS_AUTOCOMMIT);
            let outcome = match Command::from_u8(command) {
                Some(Command::Quit) => {
                    handler.on_quit(&self.session);
                    return Ok(());
                }
                Some(Command::Ping) => handler.on_ping(&self.session, &mut writer),
                Some(Command::Query) => {
                    let query = String::from_utf8_lossy(body);
                    handler.on_query(&self.session, &query, &mut writer)
                }
                Some(Command::InitDb) => {
                    let schema = String::from_utf8_lossy(body).into_owned();
                    let outcome = handler.on_init_db(&self.session, &schema, &mut writer);
                    if outcome.is_ok() && !writer.is_error() {
                        self.session.schema = Some(schema);
                    }
                    outcome
                }
                Some(Command::FieldList) => {
                    let mut reader = PacketReader::new(body);
                    let table = reader.read_null_string_or_rest();
                    let wildcard = reader.read_rest_string();
                    handler.on_field_list(&self.session, &table, &wildcard, &mut writer)
                }
                Some(Command::StmtPrepare) => {
                    let query = String::from_utf8_lossy(body);
                    handler.on_prepare(&self.session, &query, &mut writer)
                }
                Some(Command::StmtExecute) => self.execute(handler, body, &mut writer),
                Some(Command::StmtClose) => {
                    if let Some(id) = statement_id(body) {
                        self.statements.remove(&id);
                        handler.on_close(&self.session, id);
                    }
                    continue;
                }
                Some(Command::ResetConnection) => {
                    self.statements.clear();
                    handler.on_reset(&self.session, &mut writer)
                }
                _ => handler.on_other(&self.session, command, body, &mut writer),
            };

            match outcome {
                Ok(()) => {}
                Err(Error::Server(err)) => writer.error(&err),
                Err(e) if e.is_connection_fatal() => return Err(e),
                Err(e) => writer.error_message(e.to_string()),
            }
            if let Some((id, params)) = writer.prepared_statement() {
                self.statements.insert(
                    id,
                    StatementInfo {
                        params,
                        bound_types: None,
                    },
                );
            }
            for packet in writer.into_packets() {
                self.framer.write_packet(&packet)?;
            }
        }
    }

    fn execute<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        body: &[u8],
        writer: &mut ResultWriter,
    ) -> Result<()> {
        let id = statement_id(body).unwrap_or_default();
        let Some(info) = self.statements.get_mut(&id) else {
            writer.error(&ServerError::new(
                codes::ER_UNKNOWN_STMT_HANDLER,
                codes::SS_GENERAL,
                format!("Unknown prepared statement handler ({id}) given to mysqld_stmt_execute"),
            ));
            return Ok(());
        };
        let execute = match StmtExecute::parse(
            body,
            usize::from(info.params),
            info.bound_types.as_deref(),
        ) {
            Ok(execute) => execute,
            Err(e) => {
                writer.error_message(format!("malformed COM_STMT_EXECUTE: {e}"));
                return Ok(());
            }
        };
        if let Some(types) = execute.param_types {
            info.bound_types = Some(types);
        }
        handler.on_execute(&self.session, id, &execute.params, writer)
    }
}

fn statement_id(body: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = body.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}
