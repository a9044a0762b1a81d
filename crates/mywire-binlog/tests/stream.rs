//! Binlog streams assembled from byte fixtures, fed through the parser
//! directly and through a replica session against a loopback source.

use std::thread;
use std::time::Duration;

use mywire_binlog::{
    BinlogStreamer, ChecksumAlg, EventData, EventType, Parser, ReplicationConfig, RowChange,
    StatusVar,
};
use mywire_core::error::{BinlogErrorKind, FramingErrorKind};
use mywire_core::{Result, ServerError, Value};
use mywire_protocol::auth::AuthMethod;
use mywire_protocol::protocol::{BinlogDump, Command, RegisterSlave};
use mywire_protocol::server::{RsaSource, StaticUserProvider};
use mywire_protocol::types::FieldType;
use mywire_protocol::{
    ClientConfig, ColumnDef, Connection, Handler, ResultWriter, Server, ServerConfig, Session,
};

/// Post-header lengths of an 8.0 source, indexed by event type - 1.
const POST_HEADER_LENGTHS: [u8; 41] = [
    56, 13, 0, 8, 0, 18, 0, 4, 4, 4, 4, 18, 0, 0, 98, 0, 4, 26, 8, 0, 0, 0, 8, 8, 8, 2, 0, 0, 0,
    10, 10, 10, 42, 42, 0, 18, 52, 0, 10, 40, 0,
];

const TABLE_ID: u64 = 108;

/// Builds events with increasing log positions, checksummed or not.
struct Fixture {
    crc: bool,
    log_pos: u32,
}

impl Fixture {
    fn new(crc: bool) -> Self {
        Self { crc, log_pos: 4 }
    }

    fn event(&mut self, event_type: EventType, body: &[u8]) -> Vec<u8> {
        let size = 19 + body.len() + if self.crc { 4 } else { 0 };
        self.log_pos += size as u32;
        let mut bytes = Vec::with_capacity(size);
        bytes.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        bytes.push(event_type as u8);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&(size as u32).to_le_bytes());
        bytes.extend_from_slice(&self.log_pos.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(body);
        if self.crc {
            let crc = crc32fast::hash(&bytes);
            bytes.extend_from_slice(&crc.to_le_bytes());
        }
        bytes
    }

    fn format_description(&mut self) -> Vec<u8> {
        let mut body = 4u16.to_le_bytes().to_vec();
        let mut version = b"8.0.36".to_vec();
        version.resize(50, 0);
        body.extend_from_slice(&version);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(19);
        body.extend_from_slice(&POST_HEADER_LENGTHS);
        body.push(u8::from(self.crc));
        // the checksum slot is present even when checksums are off
        if !self.crc {
            body.extend_from_slice(&[0; 4]);
        }
        self.event(EventType::FormatDescription, &body)
    }

    /// `db.t(id INT, name VARCHAR(32))`
    fn table_map(&mut self) -> Vec<u8> {
        let mut body = TABLE_ID.to_le_bytes()[..6].to_vec();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&[2, b'd', b'b', 0, 1, b't', 0]);
        body.push(2);
        body.extend_from_slice(&[FieldType::Long as u8, FieldType::VarChar as u8]);
        body.extend_from_slice(&[2, 0x80, 0x00]);
        body.push(0b10);
        // column names
        body.extend_from_slice(&[4, 8, 2, b'i', b'd', 4, b'n', b'a', b'm', b'e']);
        self.event(EventType::TableMap, &body)
    }

    fn write_rows(&mut self, rows: &[u8]) -> Vec<u8> {
        let mut body = TABLE_ID.to_le_bytes()[..6].to_vec();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.push(2);
        body.push(0x03);
        body.extend_from_slice(rows);
        self.event(EventType::WriteRowsV2, &body)
    }

    fn rotate(&mut self, next_file: &str) -> Vec<u8> {
        let mut body = 4u64.to_le_bytes().to_vec();
        body.extend_from_slice(next_file.as_bytes());
        self.event(EventType::Rotate, &body)
    }

    fn query(&mut self, schema: &str, sql: &str) -> Vec<u8> {
        let status = [0x00, 0, 0, 0, 0];
        let mut body = 9u32.to_le_bytes().to_vec();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(schema.len() as u8);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(status.len() as u16).to_le_bytes());
        body.extend_from_slice(&status);
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.extend_from_slice(sql.as_bytes());
        self.event(EventType::Query, &body)
    }
}

fn hello_row() -> Vec<u8> {
    let mut row = vec![0x00, 0x2A, 0x00, 0x00, 0x00, 0x05];
    row.extend_from_slice(b"hello");
    row
}

#[test]
fn insert_row_after_table_map() {
    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();

    let fde = parser.parse_event(&fixture.format_description()).unwrap();
    assert!(matches!(fde.data, EventData::FormatDescription(ref f) if f.checksum == ChecksumAlg::Crc32));

    let map = parser.parse_event(&fixture.table_map()).unwrap();
    let EventData::TableMap(map) = map.data else {
        panic!("expected table map");
    };
    assert_eq!(map.column_names(), vec![Some("id"), Some("name")]);
    assert!(parser.table(TABLE_ID).is_some());

    let event = parser.parse_event(&fixture.write_rows(&hello_row())).unwrap();
    assert_eq!(event.header.event_type(), Some(EventType::WriteRowsV2));
    let EventData::Rows(rows) = event.data else {
        panic!("expected rows event");
    };
    assert_eq!(rows.table_id, TABLE_ID);
    assert_eq!(rows.rows.len(), 1);
    let RowChange::Insert { row } = &rows.rows[0] else {
        panic!("expected insert");
    };
    assert_eq!(row.len(), map.column_count());
    assert_eq!(row.get(0), Some(&Value::Int(42)));
    assert_eq!(row.get_named(&rows.table, "name"), Some(&Value::Bytes(b"hello".to_vec())));

    let xid = parser
        .parse_event(&fixture.event(EventType::Xid, &77u64.to_le_bytes()))
        .unwrap();
    assert!(matches!(xid.data, EventData::Xid(x) if x.xid == 77));
}

#[test]
fn checksum_mismatch_is_not_fatal() {
    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();
    parser.parse_event(&fixture.format_description()).unwrap();
    parser.parse_event(&fixture.table_map()).unwrap();

    let mut corrupted = fixture.write_rows(&hello_row());
    let at = corrupted.len() - 6;
    corrupted[at] ^= 0x20;
    let err = parser.parse_event(&corrupted).unwrap_err();
    assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::ChecksumMismatch));
    assert!(!err.is_connection_fatal());

    let event = parser.parse_event(&fixture.write_rows(&hello_row())).unwrap();
    assert!(matches!(event.data, EventData::Rows(_)));
}

#[test]
fn event_shorter_than_header_and_checksum_is_rejected() {
    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();
    parser.parse_event(&fixture.format_description()).unwrap();

    // 21 bytes claimed: a CRC over the first 17 leaves less than a header.
    let mut runt = Vec::with_capacity(21);
    runt.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    runt.push(EventType::Xid as u8);
    runt.extend_from_slice(&1u32.to_le_bytes());
    runt.extend_from_slice(&21u32.to_le_bytes());
    runt.extend_from_slice(&0u32.to_le_bytes());
    let crc = crc32fast::hash(&runt);
    runt.extend_from_slice(&crc.to_le_bytes());
    assert_eq!(runt.len(), 21);

    let err = parser.parse_event(&runt).unwrap_err();
    assert_eq!(err.framing_kind(), Some(FramingErrorKind::ShortRead));

    let xid = parser
        .parse_event(&fixture.event(EventType::Xid, &42u64.to_le_bytes()))
        .unwrap();
    assert!(matches!(xid.data, EventData::Xid(ref x) if x.xid == 42));
}

#[test]
fn rotate_clears_table_maps() {
    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();
    parser.parse_event(&fixture.format_description()).unwrap();
    parser.parse_event(&fixture.table_map()).unwrap();

    let rotate = parser.parse_event(&fixture.rotate("binlog.000008")).unwrap();
    assert!(matches!(rotate.data, EventData::Rotate(ref r) if r.next_file == "binlog.000008"));
    assert!(parser.table(TABLE_ID).is_none());

    let err = parser
        .parse_event(&fixture.write_rows(&hello_row()))
        .unwrap_err();
    assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::MissingTableMap));
}

#[test]
fn unchecksummed_stream_with_query() {
    let mut fixture = Fixture::new(false);
    let mut parser = Parser::new();
    let fde = parser.parse_event(&fixture.format_description()).unwrap();
    assert!(matches!(fde.data, EventData::FormatDescription(ref f) if f.checksum == ChecksumAlg::Off));

    let event = parser.parse_event(&fixture.query("shop", "BEGIN")).unwrap();
    let EventData::Query(query) = event.data else {
        panic!("expected query");
    };
    assert_eq!(query.schema, "shop");
    assert_eq!(query.query, "BEGIN");
    assert_eq!(query.status_vars, vec![StatusVar::Flags2(0)]);
}

#[test]
fn previous_gtids_render_as_text() {
    let first = uuid::Uuid::parse_str("3e11fa47-71ca-11e1-9e33-c80aa9429562").unwrap();
    let second = uuid::Uuid::parse_str("5f1a9c3e-0000-11ee-8c99-0242ac120002").unwrap();
    let mut body = 2u64.to_le_bytes().to_vec();
    body.extend_from_slice(first.as_bytes());
    body.extend_from_slice(&2u64.to_le_bytes());
    for (start, end) in [(1u64, 6u64), (7, 10)] {
        body.extend_from_slice(&start.to_le_bytes());
        body.extend_from_slice(&end.to_le_bytes());
    }
    body.extend_from_slice(second.as_bytes());
    body.extend_from_slice(&1u64.to_le_bytes());
    body.extend_from_slice(&1u64.to_le_bytes());
    body.extend_from_slice(&2u64.to_le_bytes());

    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();
    parser.parse_event(&fixture.format_description()).unwrap();
    let event = parser
        .parse_event(&fixture.event(EventType::PreviousGtids, &body))
        .unwrap();
    let EventData::PreviousGtids(set) = event.data else {
        panic!("expected previous gtids");
    };
    assert_eq!(
        set.to_string(),
        "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5:7-9,5f1a9c3e-0000-11ee-8c99-0242ac120002:1"
    );
}

#[test]
fn events_need_a_format_description() {
    let mut fixture = Fixture::new(false);
    let mut parser = Parser::new();
    let err = parser.parse_event(&fixture.table_map()).unwrap_err();
    assert_eq!(err.binlog_kind(), Some(BinlogErrorKind::MissingFormatDescription));

    // the fake rotate a source sends first is accepted
    let rotate = parser.parse_event(&fixture.rotate("binlog.000001")).unwrap();
    assert!(matches!(rotate.data, EventData::Rotate(_)));
}

#[test]
fn uninterpreted_events_pass_through() {
    let mut fixture = Fixture::new(true);
    let mut parser = Parser::new();
    parser.parse_event(&fixture.format_description()).unwrap();
    let body = [0xAB; 18];
    let event = parser
        .parse_event(&fixture.event(EventType::TransactionContext, &body))
        .unwrap();
    assert!(matches!(event.data, EventData::Unparsed(ref b) if b.as_slice() == body));

    let mut unknown = fixture.event(EventType::Stop, &[]);
    unknown[4] = 0x7F;
    let crc = crc32fast::hash(&unknown[..unknown.len() - 4]);
    let at = unknown.len() - 4;
    unknown[at..].copy_from_slice(&crc.to_le_bytes());
    let event = parser.parse_event(&unknown).unwrap();
    assert_eq!(event.header.event_type(), None);
    assert!(matches!(event.data, EventData::Unparsed(ref b) if b.is_empty()));
}

/// Answers the replica handshake queries and streams canned events.
#[derive(Default)]
struct FakeSource {
    events: Vec<Vec<u8>>,
    queries: Vec<String>,
    registered: Option<RegisterSlave>,
    dump: Option<BinlogDump>,
}

impl Handler for FakeSource {
    fn on_query(&mut self, _session: &Session, query: &str, writer: &mut ResultWriter) -> Result<()> {
        self.queries.push(query.to_string());
        if query == "SELECT @@global.binlog_checksum" {
            writer.text_result(
                &[ColumnDef::new("@@global.binlog_checksum", FieldType::VarString)],
                &[vec![Value::Bytes(b"CRC32".to_vec())]],
            );
        } else {
            writer.ok(0, 0);
        }
        Ok(())
    }

    fn on_other(
        &mut self,
        _session: &Session,
        command: u8,
        body: &[u8],
        writer: &mut ResultWriter,
    ) -> Result<()> {
        match Command::from_u8(command) {
            Some(Command::RegisterSlave) => {
                self.registered = Some(RegisterSlave::parse(body)?);
                writer.ok(0, 0);
            }
            Some(Command::BinlogDump) => {
                self.dump = Some(BinlogDump::parse(body)?);
                let mut packets: Vec<Vec<u8>> = self
                    .events
                    .iter()
                    .map(|event| [&[0x00][..], event.as_slice()].concat())
                    .collect();
                packets.push(vec![0xFE, 0x00, 0x00, 0x02, 0x00]);
                writer.raw_packets(packets);
            }
            _ => writer.error(&ServerError::unknown_command(command)),
        }
        Ok(())
    }
}

#[test]
fn replica_session_streams_until_eof() {
    let mut fixture = Fixture::new(true);
    let events = vec![
        fixture.rotate("binlog.000001"),
        fixture.format_description(),
        fixture.table_map(),
        fixture.write_rows(&hello_row()),
        fixture.event(EventType::Xid, &5u64.to_le_bytes()),
    ];

    let config = ServerConfig::new()
        .bind("127.0.0.1:0")
        .default_auth(AuthMethod::NativePassword)
        .user_provider(StaticUserProvider::new().user("repl", AuthMethod::NativePassword, "secret"))
        .rsa(RsaSource::None);
    let server = Server::bind(config).unwrap();
    let port = server.local_addr().unwrap().port();
    let source = thread::spawn(move || {
        let mut handler = FakeSource {
            events,
            ..FakeSource::default()
        };
        // the replica hangs up after the stream ends
        let _ = server.serve_one(&mut handler);
        handler
    });

    let conn = Connection::connect(
        ClientConfig::new()
            .host("127.0.0.1")
            .port(port)
            .user("repl")
            .password("secret"),
    )
    .unwrap();
    let replication = ReplicationConfig::new(77)
        .start_file("binlog.000001", 4)
        .heartbeat_period(Duration::from_millis(1500))
        .report_host("replica-1", 3307)
        .non_blocking(true);
    let mut streamer = BinlogStreamer::start(conn, &replication).unwrap();
    let received: Vec<_> = streamer.by_ref().collect::<Result<_>>().unwrap();
    assert!(streamer.next().is_none());
    drop(streamer);

    let types: Vec<_> = received.iter().map(|e| e.header.event_type()).collect();
    assert_eq!(
        types,
        vec![
            Some(EventType::Rotate),
            Some(EventType::FormatDescription),
            Some(EventType::TableMap),
            Some(EventType::WriteRowsV2),
            Some(EventType::Xid),
        ]
    );
    let EventData::Rows(rows) = &received[3].data else {
        panic!("expected rows event");
    };
    assert!(matches!(&rows.rows[0], RowChange::Insert { row } if row.get(0) == Some(&Value::Int(42))));

    let handler = source.join().unwrap();
    assert_eq!(
        handler.queries,
        vec![
            "SELECT @@global.binlog_checksum".to_string(),
            "SET @master_binlog_checksum = @@global.binlog_checksum".to_string(),
            "SET @master_heartbeat_period = 1500000000".to_string(),
        ]
    );
    let registered = handler.registered.unwrap();
    assert_eq!(registered.server_id, 77);
    assert_eq!((registered.hostname.as_str(), registered.port), ("replica-1", 3307));
    let dump = handler.dump.unwrap();
    assert_eq!(dump.filename, "binlog.000001");
    assert_eq!(dump.position, 4);
    assert_eq!(dump.flags, 0x01);
}
