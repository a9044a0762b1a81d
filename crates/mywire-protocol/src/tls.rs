//! TLS for both ends of a connection, on top of rustls.
//!
//! The upgrade happens mid-handshake. The client answers the greeting with
//! a 32-byte SSLRequest (capabilities with `CLIENT_SSL`, max packet size,
//! collation, 23 zero bytes), both peers run the TLS handshake on the same
//! socket, and the HandshakeResponse follows inside the tunnel with
//! sequence id 2.

use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConnection, Connection, RootCertStore, ServerConnection};

use mywire_core::error::TransportErrorKind;
use mywire_core::{Error, Result};

use crate::config::{SslMode, TlsConfig};
use crate::protocol::capabilities;

/// Check if the server supports SSL/TLS.
pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

/// Validate SSL mode against server capabilities.
///
/// - `Ok(true)` if SSL should be used
/// - `Ok(false)` if SSL should not be used
/// - `Err(_)` if SSL is required but not supported by server
pub fn validate_ssl_mode(ssl_mode: SslMode, server_caps: u32) -> Result<bool> {
    let server_supports = server_supports_ssl(server_caps);

    match ssl_mode {
        SslMode::Disable => Ok(false),
        SslMode::Preferred => Ok(server_supports),
        SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if server_supports {
                Ok(true)
            } else {
                Err(tls_error("SSL required but server does not support it"))
            }
        }
    }
}

/// Validate TLS configuration for the given SSL mode.
pub fn validate_tls_config(ssl_mode: SslMode, tls_config: &TlsConfig) -> Result<()> {
    match ssl_mode {
        SslMode::Disable | SslMode::Preferred | SslMode::Required => Ok(()),
        SslMode::VerifyCa | SslMode::VerifyIdentity => {
            if !tls_config.has_ca() && !tls_config.danger_skip_verify {
                return Err(tls_error(
                    "CA certificate required for VerifyCa/VerifyIdentity mode. \
                     Set ca_cert_path or danger_skip_verify.",
                ));
            }
            if tls_config.client_cert_path.is_some() && tls_config.client_key_path.is_none() {
                return Err(tls_error(
                    "Client certificate provided without client key. \
                     Both must be set for mutual TLS.",
                ));
            }
            Ok(())
        }
    }
}

pub(crate) fn tls_error(message: impl Into<String>) -> Error {
    Error::transport(TransportErrorKind::Tls, message)
}

/// TLS wrapper over a byte stream, client or server side.
///
/// Implements `Read` and `Write` so the packet framer is unaware of it.
pub struct TlsStream<S> {
    conn: Connection,
    stream: S,
}

impl<S> fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("is_handshaking", &self.conn.is_handshaking())
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> TlsStream<S> {
    /// Client side: run the handshake against `server_name`.
    pub fn connect(
        stream: S,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Self> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| tls_error(format!("Invalid server name '{server_name}': {e}")))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))?;
        Self::handshake(Connection::Client(conn), stream)
    }

    /// Server side: run the handshake with a client that sent an SSLRequest.
    pub fn accept(stream: S, config: Arc<rustls::ServerConfig>) -> Result<Self> {
        let conn = ServerConnection::new(config)
            .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))?;
        Self::handshake(Connection::Server(conn), stream)
    }

    fn handshake(mut conn: Connection, mut stream: S) -> Result<Self> {
        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| tls_error(format!("TLS handshake read error: {e}")))?;
                if n == 0 {
                    return Err(tls_error("peer closed the connection during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| tls_error(format!("TLS handshake error: {e}")))?;
            }
        }
        while conn.wants_write() {
            conn.write_tls(&mut stream)
                .map_err(|e| tls_error(format!("TLS handshake write error: {e}")))?;
        }
        stream
            .flush()
            .map_err(|e| tls_error(format!("TLS handshake flush error: {e}")))?;

        tracing::debug!(version = ?conn.protocol_version(), "TLS established");
        Ok(Self { conn, stream })
    }

    /// Get the negotiated protocol version.
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.conn.protocol_version()
    }

    /// Check if the connection is using TLS 1.3.
    pub fn is_tls13(&self) -> bool {
        self.conn.protocol_version() == Some(rustls::ProtocolVersion::TLSv1_3)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if self.conn.wants_read() {
                let n = self.conn.read_tls(&mut self.stream)?;
                if n == 0 {
                    return Ok(0);
                }
                self.conn
                    .process_new_packets()
                    .map_err(|e| io::Error::other(format!("TLS error: {e}")))?;
            } else {
                return Ok(0);
            }
        }
    }
}

impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

const VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS12, &rustls::version::TLS13];

/// Build a rustls ClientConfig based on TLS configuration and SSL mode.
pub fn client_config(
    tls_config: &TlsConfig,
    ssl_mode: SslMode,
) -> Result<Arc<rustls::ClientConfig>> {
    if ssl_mode == SslMode::Disable {
        return Err(tls_error("TLS requested with SslMode::Disable"));
    }
    validate_tls_config(ssl_mode, tls_config)?;

    let builder = rustls::ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(VERSIONS)
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?;

    if tls_config.danger_skip_verify {
        return Ok(Arc::new(
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth(),
        ));
    }

    let mut root_store = RootCertStore::empty();
    if let Some(pem) = &tls_config.ca_cert_pem {
        add_roots(&mut root_store, parse_certs(pem.as_bytes(), "CA PEM")?)?;
    } else if let Some(path) = &tls_config.ca_cert_path {
        add_roots(&mut root_store, load_certs(path)?)?;
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let builder = builder.with_root_certificates(root_store);
    let config = if let (Some(cert_path), Some(key_path)) =
        (&tls_config.client_cert_path, &tls_config.client_key_path)
    {
        builder
            .with_client_auth_cert(load_certs(cert_path)?, load_key(key_path)?)
            .map_err(|e| tls_error(format!("Failed to configure client auth: {e}")))?
    } else {
        builder.with_no_client_auth()
    };
    Ok(Arc::new(config))
}

/// Build a rustls ServerConfig from a PEM certificate chain and private key.
pub fn server_config(cert_chain_pem: &str, key_pem: &str) -> Result<Arc<rustls::ServerConfig>> {
    let certs = parse_certs(cert_chain_pem.as_bytes(), "server certificate")?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| tls_error(format!("Failed to parse server key: {e}")))?
        .ok_or_else(|| tls_error("No private key found in server key PEM"))?;

    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(VERSIONS)
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(format!("Failed to configure server certificate: {e}")))?;
    Ok(Arc::new(config))
}

fn add_roots(store: &mut RootCertStore, certs: Vec<CertificateDer<'static>>) -> Result<()> {
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| tls_error(format!("Failed to add CA certificate: {e}")))?;
    }
    Ok(())
}

fn parse_certs(mut pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse {what}: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error(format!("No certificates found in {what}")));
    }
    Ok(certs)
}

fn open(path: &Path) -> Result<BufReader<std::fs::File>> {
    std::fs::File::open(path)
        .map(BufReader::new)
        .map_err(|e| tls_error(format!("Failed to open '{}': {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse '{}': {e}", path.display())))?;
    if certs.is_empty() {
        return Err(tls_error(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| tls_error(format!("Failed to parse key '{}': {e}", path.display())))?
        .ok_or_else(|| tls_error(format!("No private key found in '{}'", path.display())))
}

/// A certificate verifier that accepts any certificate (insecure!).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        use rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
