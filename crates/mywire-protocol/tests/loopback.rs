//! Client against server over loopback TCP.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::OnceLock;
use std::thread;

use mywire_core::error::AuthErrorKind;
use mywire_core::{Error, Result, Value};
use mywire_protocol::auth::{self, AuthMethod, RsaKeyPair, Sha2Cache};
use mywire_protocol::protocol::capabilities::{
    CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION, DEFAULT_SERVER_FLAGS,
};
use mywire_protocol::protocol::{
    ErrPacket, Framer, HandshakeResponse41, HandshakeV10, OkPacket,
};
use mywire_protocol::server::{RsaSource, StaticUserProvider};
use mywire_protocol::{
    ClientConfig, ColumnDef, Connection, FieldType, Handler, PreparedStatement, ResultWriter,
    Server, ServerConfig, Session, SslMode, TlsConfig,
};

/// Answers a handful of fixed statements.
#[derive(Default)]
struct FixtureHandler {
    connects: usize,
    closed: Vec<u32>,
}

impl Handler for FixtureHandler {
    fn on_connect(&mut self, _session: &Session) {
        self.connects += 1;
    }

    fn on_query(&mut self, session: &Session, query: &str, writer: &mut ResultWriter) -> Result<()> {
        match query {
            "SELECT 1 AS x" => writer.text_result(
                &[ColumnDef::new("x", FieldType::LongLong)],
                &[vec![Value::Int(1)]],
            ),
            "SELECT DATABASE()" => writer.text_result(
                &[ColumnDef::new("DATABASE()", FieldType::VarString)],
                &[vec![
                    session
                        .schema
                        .clone()
                        .map_or(Value::Null, |s| Value::Bytes(s.into_bytes())),
                ]],
            ),
            "UPDATE t SET a = 1" => writer.ok(3, 0),
            other => {
                return Err(Error::server(
                    1064,
                    "42000",
                    format!("You have an error in your SQL syntax near '{other}'"),
                ));
            }
        }
        Ok(())
    }

    fn on_field_list(
        &mut self,
        _session: &Session,
        table: &str,
        _wildcard: &str,
        writer: &mut ResultWriter,
    ) -> Result<()> {
        writer.field_list(&[ColumnDef::new("id", FieldType::LongLong).with_table("app", table)]);
        Ok(())
    }

    fn on_prepare(&mut self, _session: &Session, _query: &str, writer: &mut ResultWriter) -> Result<()> {
        writer.prepared(
            1,
            &[ColumnDef::new("?", FieldType::LongLong)],
            &[ColumnDef::new("v", FieldType::LongLong)],
        );
        Ok(())
    }

    fn on_execute(
        &mut self,
        _session: &Session,
        _statement_id: u32,
        params: &[Value],
        writer: &mut ResultWriter,
    ) -> Result<()> {
        writer.binary_result(&[ColumnDef::new("v", FieldType::LongLong)], &[params.to_vec()]);
        Ok(())
    }

    fn on_close(&mut self, _session: &Session, statement_id: u32) {
        self.closed.push(statement_id);
    }
}

fn shared_rsa_key() -> RsaKeyPair {
    static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
    KEY.get_or_init(|| RsaKeyPair::generate(2048).unwrap()).clone()
}

fn bind(config: ServerConfig) -> (Server, SocketAddr) {
    let server = Server::bind(config.bind("127.0.0.1:0")).unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Serve `connections` clients in order on a background thread.
fn run_server(
    server: Server,
    connections: usize,
) -> thread::JoinHandle<(FixtureHandler, Vec<Result<()>>)> {
    thread::spawn(move || {
        let mut handler = FixtureHandler::default();
        let outcomes = (0..connections).map(|_| server.serve_one(&mut handler)).collect();
        (handler, outcomes)
    })
}

fn client(addr: SocketAddr, user: &str, password: &str) -> ClientConfig {
    ClientConfig::new()
        .host("127.0.0.1")
        .port(addr.port())
        .user(user)
        .password(password)
}

#[test]
fn native_password_scramble_against_fixed_salt() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let fake = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut framer = Framer::new(stream);
        let greeting = HandshakeV10 {
            server_version: "8.0.36".to_string(),
            connection_id: 7,
            auth_plugin_data: (1..=20).collect(),
            capabilities: DEFAULT_SERVER_FLAGS,
            collation: 255,
            status_flags: 2,
            auth_plugin_name: "mysql_native_password".to_string(),
        };
        framer.write_packet(&greeting.encode()).unwrap();
        let response = HandshakeResponse41::parse(&framer.read_packet().unwrap()).unwrap();
        assert_eq!(framer.sequence(), 2);
        framer
            .write_packet(&OkPacket::default().encode(response.capabilities))
            .unwrap();
        response
    });

    let conn = Connection::connect(
        ClientConfig::new()
            .host("127.0.0.1")
            .port(port)
            .user("app")
            .password("secret"),
    )
    .unwrap();
    assert_eq!(conn.connection_id(), 7);

    let response = fake.join().unwrap();
    assert_eq!(response.username, "app");
    assert_eq!(
        hex::encode(&response.auth_response),
        "b32bb3a583e1340c0a1108d58b1be49781ad8c2f"
    );
    assert_eq!(response.auth_plugin_name.as_deref(), Some("mysql_native_password"));
}

#[test]
fn auth_switch_to_native_then_select_one() {
    let users = StaticUserProvider::new().user("app", AuthMethod::NativePassword, "secret");
    let config = ServerConfig::new()
        .user_provider(users)
        .rsa(RsaSource::None)
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut conn = Connection::connect(client(addr, "app", "secret")).unwrap();
    let result = conn.query("SELECT 1 AS x").unwrap();
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "x");
    assert_eq!(result.rows, vec![vec![Value::Bytes(b"1".to_vec())]]);
    assert_eq!(result.typed_rows().unwrap(), vec![vec![Value::Int(1)]]);
    conn.quit().unwrap();

    let (handler, outcomes) = handle.join().unwrap();
    assert_eq!(handler.connects, 1);
    assert!(outcomes[0].is_ok());
}

#[test]
fn caching_sha2_full_auth_over_rsa_then_fast_path() {
    let cache = Sha2Cache::new();
    let users = StaticUserProvider::new()
        .with_cache(cache.clone())
        .user("app", AuthMethod::CachingSha2Password, "secret");
    let config = ServerConfig::new()
        .user_provider(users)
        .rsa_key(shared_rsa_key())
        .cache(cache.clone());
    let (server, addr) = bind(config);
    let handle = run_server(server, 2);

    let mut first = Connection::connect(client(addr, "app", "secret")).unwrap();
    first.ping().unwrap();
    assert_eq!(cache.len(), 1);
    first.quit().unwrap();

    let mut second = Connection::connect(client(addr, "app", "secret")).unwrap();
    assert_eq!(second.query("SELECT 1 AS x").unwrap().rows.len(), 1);
    second.quit().unwrap();

    let (handler, outcomes) = handle.join().unwrap();
    assert_eq!(handler.connects, 2);
    assert!(outcomes.iter().all(Result::is_ok));
}

#[test]
fn stale_cache_entry_falls_back_to_full_auth() {
    let cache = Sha2Cache::new();
    let users = StaticUserProvider::new().user("app", AuthMethod::CachingSha2Password, "secret");
    // Left over from an earlier password.
    cache.insert("app", "127.0.0.1", [0xAA; 32]);
    let config = ServerConfig::new()
        .user_provider(users)
        .rsa_key(shared_rsa_key())
        .cache(cache.clone());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut conn = Connection::connect(client(addr, "app", "secret")).unwrap();
    conn.ping().unwrap();
    conn.quit().unwrap();

    assert_eq!(
        cache.get("app", "127.0.0.1"),
        Some(mywire_protocol::auth::sha2_stage2(b"secret"))
    );
    assert!(handle.join().unwrap().1[0].is_ok());
}

#[test]
fn sha256_password_requests_public_key() {
    let users = StaticUserProvider::new().user("app", AuthMethod::Sha256Password, "secret");
    let config = ServerConfig::new()
        .default_auth(AuthMethod::Sha256Password)
        .user_provider(users)
        .rsa_key(shared_rsa_key())
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut conn = Connection::connect(client(addr, "app", "secret")).unwrap();
    conn.ping().unwrap();
    conn.quit().unwrap();
    assert!(handle.join().unwrap().1[0].is_ok());
}

#[test]
fn wrong_password_is_access_denied() {
    let users = StaticUserProvider::new().user("app", AuthMethod::NativePassword, "secret");
    let config = ServerConfig::new()
        .default_auth(AuthMethod::NativePassword)
        .user_provider(users)
        .rsa(RsaSource::None)
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let err = Connection::connect(client(addr, "app", "wrong")).unwrap_err();
    assert_eq!(err.error_code(), Some(1045));
    assert_eq!(err.sql_state(), Some("28000"));
    assert!(err.to_string().contains("'app'@'127.0.0.1'"));

    let (handler, outcomes) = handle.join().unwrap();
    assert_eq!(handler.connects, 0);
    assert_eq!(
        outcomes[0].as_ref().unwrap_err().auth_kind(),
        Some(AuthErrorKind::Mismatch)
    );
}

#[test]
fn empty_command_packet_gets_err_before_close() {
    let users = StaticUserProvider::new().user("app", AuthMethod::NativePassword, "secret");
    let config = ServerConfig::new()
        .default_auth(AuthMethod::NativePassword)
        .user_provider(users)
        .rsa(RsaSource::None)
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut framer = Framer::new(TcpStream::connect(addr).unwrap());
    let greeting = HandshakeV10::parse(&framer.read_packet().unwrap()).unwrap();
    let response = HandshakeResponse41 {
        capabilities: greeting.capabilities
            & (CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH),
        max_packet_size: 1 << 24,
        collation: 255,
        username: "app".to_string(),
        auth_response: auth::scramble_native("secret", &greeting.auth_plugin_data),
        database: None,
        auth_plugin_name: Some("mysql_native_password".to_string()),
        connect_attrs: Vec::new(),
    };
    framer.write_packet(&response.encode()).unwrap();
    assert_eq!(framer.read_packet().unwrap()[0], 0x00);

    framer.reset_sequence();
    framer.write_packet(&[]).unwrap();
    let packet = framer.read_packet().unwrap();
    let err = ErrPacket::parse(&packet).unwrap();
    assert_eq!(err.error_code, 1047);
    assert_eq!(err.sql_state, "08S01");

    let (handler, outcomes) = handle.join().unwrap();
    assert_eq!(handler.connects, 1);
    assert!(outcomes[0].is_err());
}

#[test]
fn tls_upgrade_with_generated_certificates() {
    let cache = Sha2Cache::new();
    let users = StaticUserProvider::new().user("app", AuthMethod::CachingSha2Password, "secret");
    let config = ServerConfig::new()
        .user_provider(users)
        .auto_tls(None)
        .rsa(RsaSource::None)
        .cache(cache.clone());
    let (server, addr) = bind(config);
    let ca_pem = server
        .context()
        .tls_materials()
        .unwrap()
        .ca_cert_pem
        .clone();
    let handle = run_server(server, 1);

    let tls = TlsConfig::new().ca_cert_pem(ca_pem).server_name("localhost");
    let mut conn = Connection::connect(
        client(addr, "app", "secret")
            .ssl_mode(SslMode::VerifyIdentity)
            .tls_config(tls),
    )
    .unwrap();
    assert!(conn.is_tls());
    assert_eq!(
        conn.query("SELECT 1 AS x").unwrap().typed_rows().unwrap(),
        vec![vec![Value::Int(1)]]
    );
    // full authentication over TLS sends the cleartext password
    assert_eq!(cache.len(), 1);
    conn.quit().unwrap();
    assert!(handle.join().unwrap().1[0].is_ok());
}

#[test]
fn commands_and_server_errors() {
    let users = StaticUserProvider::new().user("app", AuthMethod::NativePassword, "secret");
    let config = ServerConfig::new()
        .default_auth(AuthMethod::NativePassword)
        .user_provider(users)
        .rsa(RsaSource::None)
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut conn = Connection::connect(client(addr, "app", "secret").default_schema("app")).unwrap();
    let db = conn.query("SELECT DATABASE()").unwrap();
    assert_eq!(db.rows[0][0], Value::Bytes(b"app".to_vec()));

    conn.init_db("other").unwrap();
    let db = conn.query("SELECT DATABASE()").unwrap();
    assert_eq!(db.rows[0][0], Value::Bytes(b"other".to_vec()));

    let update = conn.query("UPDATE t SET a = 1").unwrap();
    assert!(!update.is_result_set());
    assert_eq!(update.affected_rows, 3);
    assert_eq!(conn.affected_rows(), 3);

    let err = conn.query("SELEC 1").unwrap_err();
    assert_eq!(err.error_code(), Some(1064));
    assert_eq!(err.sql_state(), Some("42000"));
    conn.ping().unwrap();

    let fields = conn.field_list("users", "").unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].name, "id");
    assert_eq!(fields[0].table, "users");

    conn.reset_connection().unwrap();
    conn.quit().unwrap();
    assert!(handle.join().unwrap().1[0].is_ok());
}

#[test]
fn prepared_statement_execute_and_close() {
    let users = StaticUserProvider::new().user("app", AuthMethod::NativePassword, "secret");
    let config = ServerConfig::new()
        .default_auth(AuthMethod::NativePassword)
        .user_provider(users)
        .rsa(RsaSource::None)
        .cache(Sha2Cache::new());
    let (server, addr) = bind(config);
    let handle = run_server(server, 1);

    let mut conn = Connection::connect(client(addr, "app", "secret")).unwrap();
    let stmt = conn.prepare("SELECT ? AS v").unwrap();
    assert_eq!(stmt.statement_id, 1);
    assert_eq!(stmt.param_count(), 1);
    assert_eq!(stmt.column_count(), 1);

    let result = conn.execute(&stmt, &[Value::Int(42)]).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Int(42)]]);
    let result = conn.execute(&stmt, &[Value::Null]).unwrap();
    assert_eq!(result.rows, vec![vec![Value::Null]]);

    assert!(conn.execute(&stmt, &[]).is_err());

    let unknown = PreparedStatement {
        statement_id: 99,
        ..stmt.clone()
    };
    let err = conn.execute(&unknown, &[Value::Int(1)]).unwrap_err();
    assert_eq!(err.error_code(), Some(1243));

    conn.close_statement(stmt).unwrap();
    conn.ping().unwrap();
    conn.quit().unwrap();

    let (handler, outcomes) = handle.join().unwrap();
    assert_eq!(handler.closed, vec![1]);
    assert!(outcomes[0].is_ok());
}
