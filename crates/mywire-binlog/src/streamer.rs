//! Replica side of the binlog protocol: register, request a dump, and
//! iterate over the parsed events.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use mywire_core::error::BinlogErrorKind;
use mywire_core::{Error, Result, Value};
use mywire_protocol::Connection;
use mywire_protocol::protocol::replication::dump_flags;
use mywire_protocol::protocol::{BinlogDump, BinlogDumpGtid, RegisterSlave};

use crate::event::Event;
use crate::fde::ChecksumAlg;
use crate::gtid::GtidSet;
use crate::parser::Parser;

/// First event offset in every binlog file.
const BINLOG_START_POSITION: u64 = 4;

/// Where the dump starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// Binlog file and offset; an empty name starts at the oldest binlog
    File { name: String, position: u64 },
    /// Everything the source has that is not in this set
    Gtid(GtidSet),
}

impl Default for StartPosition {
    fn default() -> Self {
        StartPosition::File {
            name: String::new(),
            position: BINLOG_START_POSITION,
        }
    }
}

/// Replica identity and dump options.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Must be unique among the source's replicas
    pub server_id: u32,
    pub start: StartPosition,
    /// Ask the source for heartbeats while idle
    pub heartbeat_period: Option<Duration>,
    /// Reported in REGISTER_SLAVE (SHOW REPLICAS)
    pub report_host: String,
    pub report_port: u16,
    pub report_user: String,
    pub report_password: String,
    /// Negotiate event checksums with the source
    pub checksum: bool,
    /// End the stream at the last event instead of waiting for more
    pub non_blocking: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            server_id: 1001,
            start: StartPosition::default(),
            heartbeat_period: None,
            report_host: String::new(),
            report_port: 0,
            report_user: String::new(),
            report_password: String::new(),
            checksum: true,
            non_blocking: false,
        }
    }
}

impl ReplicationConfig {
    pub fn new(server_id: u32) -> Self {
        Self {
            server_id,
            ..Self::default()
        }
    }

    pub fn start_file(mut self, name: impl Into<String>, position: u64) -> Self {
        self.start = StartPosition::File {
            name: name.into(),
            position,
        };
        self
    }

    pub fn start_gtid(mut self, executed: GtidSet) -> Self {
        self.start = StartPosition::Gtid(executed);
        self
    }

    pub fn heartbeat_period(mut self, period: Duration) -> Self {
        self.heartbeat_period = Some(period);
        self
    }

    pub fn report_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.report_host = host.into();
        self.report_port = port;
        self
    }

    pub fn report_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.report_user = user.into();
        self.report_password = password.into();
        self
    }

    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn non_blocking(mut self, enabled: bool) -> Self {
        self.non_blocking = enabled;
        self
    }

    fn dump_flags(&self) -> u16 {
        if self.non_blocking {
            dump_flags::NON_BLOCK
        } else {
            0
        }
    }
}

/// A connection switched into binlog streaming, paired with its parser.
///
/// Iterating yields events until the source ends the stream (non-blocking
/// dumps) or an error occurs.
pub struct BinlogStreamer<S = TcpStream> {
    conn: Connection<S>,
    parser: Parser,
    finished: bool,
}

impl<S> std::fmt::Debug for BinlogStreamer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinlogStreamer")
            .field("parser", &self.parser)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> BinlogStreamer<S> {
    /// Prepare the session, register as a replica and request the dump.
    #[tracing::instrument(skip(conn, config), fields(server_id = config.server_id))]
    pub fn start(mut conn: Connection<S>, config: &ReplicationConfig) -> Result<Self> {
        let mut parser = Parser::new();
        if config.checksum {
            let alg = source_checksum(&mut conn)?;
            parser.set_checksum(alg);
            conn.query("SET @master_binlog_checksum = @@global.binlog_checksum")?;
        }
        if let Some(period) = config.heartbeat_period {
            conn.query(&format!("SET @master_heartbeat_period = {}", period.as_nanos()))?;
        }

        conn.register_slave(&RegisterSlave {
            server_id: config.server_id,
            hostname: config.report_host.clone(),
            user: config.report_user.clone(),
            password: config.report_password.clone(),
            port: config.report_port,
        })?;

        match &config.start {
            StartPosition::File { name, position } => {
                let position = u32::try_from(*position).map_err(|_| {
                    Error::config(format!(
                        "binlog position {position} does not fit COM_BINLOG_DUMP; start from a GTID set"
                    ))
                })?;
                tracing::debug!(file = %name, position, "requesting binlog dump");
                conn.binlog_dump(&BinlogDump {
                    position,
                    flags: config.dump_flags(),
                    server_id: config.server_id,
                    filename: name.clone(),
                })?;
            }
            StartPosition::Gtid(executed) => {
                tracing::debug!(executed = %executed, "requesting GTID binlog dump");
                conn.binlog_dump_gtid(&BinlogDumpGtid {
                    flags: config.dump_flags(),
                    server_id: config.server_id,
                    filename: String::new(),
                    position: BINLOG_START_POSITION,
                    sid_block: executed.encode(),
                })?;
            }
        }

        Ok(Self {
            conn,
            parser,
            finished: false,
        })
    }

    /// Next event, or `None` once the source has ended the stream.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn next_event(&mut self) -> Result<Option<Event>> {
        if self.finished {
            return Ok(None);
        }
        let packet = match self.conn.read_packet() {
            Ok(packet) => packet,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };
        match self.parser.parse_packet(&packet) {
            Ok(event) => Ok(Some(event)),
            Err(e) if e.binlog_kind() == Some(BinlogErrorKind::EndOfStream) => {
                tracing::debug!("binlog stream ended");
                self.finished = true;
                Ok(None)
            }
            Err(e) => {
                if e.is_connection_fatal() || e.is_server_error() {
                    self.finished = true;
                }
                Err(e)
            }
        }
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    /// Give back the connection; it stays in streaming state.
    pub fn into_connection(self) -> Connection<S> {
        self.conn
    }
}

impl<S: Read + Write> Iterator for BinlogStreamer<S> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

/// `@@global.binlog_checksum`, or off for sources that predate it.
fn source_checksum<S: Read + Write>(conn: &mut Connection<S>) -> Result<ChecksumAlg> {
    match conn.query("SELECT @@global.binlog_checksum") {
        Ok(result) => Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_str)
            .map_or(ChecksumAlg::Off, ChecksumAlg::from_name)),
        Err(e) if e.is_server_error() => {
            tracing::debug!(error = %e, "source has no binlog_checksum; assuming none");
            Ok(ChecksumAlg::Off)
        }
        Err(e) => Err(e),
    }
}
