//! Client connection configuration.
//!
//! Provides connection parameters for establishing MySQL connections
//! including authentication, TLS, and connection options.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::protocol::capabilities;

/// SSL mode for MySQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Do not use SSL
    #[default]
    Disable,
    /// Prefer SSL if available, fall back to non-SSL
    Preferred,
    /// Require SSL connection
    Required,
    /// Require SSL and verify server certificate
    VerifyCa,
    /// Require SSL and verify server certificate matches hostname
    VerifyIdentity,
}

impl SslMode {
    /// Check if SSL should be attempted.
    pub const fn should_try_ssl(self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Check if SSL is required.
    pub const fn is_required(self) -> bool {
        matches!(
            self,
            SslMode::Required | SslMode::VerifyCa | SslMode::VerifyIdentity
        )
    }
}

/// Client-side TLS material and verification options.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// CA certificate file used to verify the server
    pub ca_cert_path: Option<PathBuf>,
    /// CA certificate PEM, used instead of a file when set
    pub ca_cert_pem: Option<String>,
    /// Client certificate for mutual TLS
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Accept any server certificate
    pub danger_skip_verify: bool,
    /// SNI / verification name; defaults to the connection host
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn ca_cert_pem(mut self, pem: impl Into<String>) -> Self {
        self.ca_cert_pem = Some(pem.into());
        self
    }

    pub fn client_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    pub fn client_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_key_path = Some(path.into());
        self
    }

    /// Skip server certificate verification.
    ///
    /// # Security Warning
    /// Only for test deployments with throwaway certificates.
    pub fn skip_verify(mut self, skip: bool) -> Self {
        self.danger_skip_verify = skip;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn has_ca(&self) -> bool {
        self.ca_cert_path.is_some() || self.ca_cert_pem.is_some()
    }
}

/// MySQL client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Schema sent in the HandshakeResponse
    pub default_schema: Option<String>,
    /// Client collation id (default: utf8mb4_0900_ai_ci)
    pub collation: u16,
    pub connect_timeout: Duration,
    /// Socket read timeout; `None` blocks indefinitely
    pub read_timeout: Option<Duration>,
    /// Max allowed packet size (default: 64MB)
    pub max_packet_size: u32,
    pub ssl_mode: SslMode,
    pub tls: TlsConfig,
    /// Connection attributes; a non-empty map requests CLIENT_CONNECT_ATTRS
    pub connect_attrs: BTreeMap<String, String>,
    /// Zone used to turn DATETIME values into instants
    pub location: Tz,
    /// Server RSA public key; skips the public key request when set
    pub server_public_key: Option<String>,
    /// Request CLIENT_DEPRECATE_EOF
    pub deprecate_eof: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: String::new(),
            password: None,
            default_schema: None,
            collation: mywire_core::collation::DEFAULT_COLLATION_ID,
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            max_packet_size: 64 * 1024 * 1024,
            ssl_mode: SslMode::default(),
            tls: TlsConfig::default(),
            connect_attrs: BTreeMap::new(),
            location: Tz::UTC,
            server_public_key: None,
            deprecate_eof: false,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn collation(mut self, collation: u16) -> Self {
        self.collation = collation;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    pub fn tls_config(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Set a connection attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_attrs.insert(key.into(), value.into());
        self
    }

    pub fn location(mut self, tz: Tz) -> Self {
        self.location = tz;
        self
    }

    pub fn server_public_key(mut self, pem: impl Into<String>) -> Self {
        self.server_public_key = Some(pem.into());
        self
    }

    pub fn deprecate_eof(mut self, enabled: bool) -> Self {
        self.deprecate_eof = enabled;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn password_str(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }

    /// Capability flags this client requests before intersecting with the server.
    pub fn capability_flags(&self) -> u32 {
        let mut flags = capabilities::DEFAULT_CLIENT_FLAGS;

        if self.default_schema.is_some() {
            flags |= capabilities::CLIENT_CONNECT_WITH_DB;
        }
        if self.ssl_mode.should_try_ssl() {
            flags |= capabilities::CLIENT_SSL;
        }
        if !self.connect_attrs.is_empty() {
            flags |= capabilities::CLIENT_CONNECT_ATTRS;
        }
        if self.deprecate_eof {
            flags |= capabilities::CLIENT_DEPRECATE_EOF;
        }

        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities::*;

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .host("db.example.com")
            .port(3307)
            .user("myuser")
            .password("secret")
            .default_schema("testdb")
            .connect_timeout(Duration::from_secs(10))
            .ssl_mode(SslMode::Required)
            .attribute("program_name", "myapp")
            .location(chrono_tz::Europe::Berlin);

        assert_eq!(config.socket_addr(), "db.example.com:3307");
        assert_eq!(config.password_str(), "secret");
        assert_eq!(config.default_schema.as_deref(), Some("testdb"));
        assert_eq!(config.ssl_mode, SslMode::Required);
        assert_eq!(
            config.connect_attrs.get("program_name").map(String::as_str),
            Some("myapp")
        );
        assert_eq!(config.location, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.port, 3306);
        assert_eq!(config.collation, 255);
        assert_eq!(config.ssl_mode, SslMode::Disable);
        assert_eq!(config.location, Tz::UTC);
        assert_eq!(config.password_str(), "");
    }

    #[test]
    fn test_ssl_mode_properties() {
        assert!(!SslMode::Disable.should_try_ssl());
        assert!(SslMode::Preferred.should_try_ssl());
        assert!(!SslMode::Preferred.is_required());
        assert!(SslMode::VerifyIdentity.is_required());
    }

    #[test]
    fn test_capability_flags() {
        let flags = ClientConfig::new().capability_flags();
        assert_eq!(flags & CLIENT_CONNECT_WITH_DB, 0);
        assert_eq!(flags & CLIENT_CONNECT_ATTRS, 0);
        assert_eq!(flags & CLIENT_SSL, 0);

        let flags = ClientConfig::new()
            .default_schema("test")
            .attribute("a", "b")
            .ssl_mode(SslMode::Preferred)
            .deprecate_eof(true)
            .capability_flags();
        assert_ne!(flags & CLIENT_CONNECT_WITH_DB, 0);
        assert_ne!(flags & CLIENT_CONNECT_ATTRS, 0);
        assert_ne!(flags & CLIENT_SSL, 0);
        assert_ne!(flags & CLIENT_DEPRECATE_EOF, 0);
        assert_ne!(flags & CLIENT_PROTOCOL_41, 0);
    }
}
