//! Server configuration and user lookup.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::auth::{AuthMethod, RsaKeyPair, Sha2Cache};
use crate::protocol::capabilities;

/// A user's stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub method: AuthMethod,
    /// Persisted hash in the method's storage form; empty for no password
    pub authentication_string: String,
}

impl Credential {
    /// Hash `password` with a fresh salt.
    pub fn from_password(method: AuthMethod, password: &str) -> Self {
        Self {
            method,
            authentication_string: method.store(password),
        }
    }

    pub fn from_stored(method: AuthMethod, authentication_string: impl Into<String>) -> Self {
        Self {
            method,
            authentication_string: authentication_string.into(),
        }
    }
}

/// Source of credentials for connecting users.
pub trait UserProvider: Send + Sync {
    /// The credential for `user` connecting from `host`, if the account exists.
    fn lookup(&self, user: &str, host: &str) -> Option<Credential>;
}

/// In-memory accounts keyed by user name, valid from any host.
///
/// Changing or removing an account evicts it from the attached
/// caching_sha2_password cache.
#[derive(Debug, Default)]
pub struct StaticUserProvider {
    users: DashMap<String, Credential>,
    cache: Option<Sha2Cache>,
}

impl StaticUserProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evict from `cache` whenever an account changes.
    pub fn with_cache(mut self, cache: Sha2Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn user(self, name: impl Into<String>, method: AuthMethod, password: &str) -> Self {
        self.set_user(name, Credential::from_password(method, password));
        self
    }

    pub fn set_user(&self, name: impl Into<String>, credential: Credential) {
        let name = name.into();
        if let Some(cache) = &self.cache {
            cache.evict_user(&name);
        }
        self.users.insert(name, credential);
    }

    pub fn remove_user(&self, name: &str) -> bool {
        if let Some(cache) = &self.cache {
            cache.evict_user(name);
        }
        self.users.remove(name).is_some()
    }
}

impl UserProvider for StaticUserProvider {
    fn lookup(&self, user: &str, _host: &str) -> Option<Credential> {
        self.users.get(user).map(|entry| entry.value().clone())
    }
}

/// Where the server's TLS material comes from.
#[derive(Debug, Clone, Default)]
pub enum TlsSource {
    /// TLS disabled; CLIENT_SSL is not advertised
    #[default]
    Disabled,
    /// Certificate and key files, with an optional CA file
    Files {
        ca: Option<PathBuf>,
        cert: PathBuf,
        key: PathBuf,
    },
    /// Self-signed CA and server/client pair, persisted to `dir` when set
    Generated { dir: Option<PathBuf> },
}

/// Where the RSA key pair for the public-key exchange comes from.
#[derive(Debug, Clone, Default)]
pub enum RsaSource {
    /// No key; full authentication then requires TLS
    None,
    /// PKCS#8 or PKCS#1 private key PEM file
    File(PathBuf),
    /// Generate a 2048-bit key at startup
    #[default]
    Generate,
    Key(Arc<RsaKeyPair>),
}

/// MySQL server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address (default: 127.0.0.1:3306)
    pub bind_addr: String,
    /// Version string in the greeting
    pub server_version: String,
    /// Plugin named in the greeting
    pub default_auth: AuthMethod,
    pub users: Arc<dyn UserProvider>,
    pub tls: TlsSource,
    pub rsa: RsaSource,
    pub cache: Sha2Cache,
    /// First connection id handed out
    pub connection_id_seed: u32,
    /// Advertised capabilities; CLIENT_SSL is added when TLS is enabled
    pub capabilities: u32,
    pub max_packet_size: usize,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("server_version", &self.server_version)
            .field("default_auth", &self.default_auth)
            .field("tls", &self.tls)
            .field("rsa", &self.rsa)
            .field("connection_id_seed", &self.connection_id_seed)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3306".to_string(),
            server_version: "8.0.36-mywire".to_string(),
            default_auth: AuthMethod::CachingSha2Password,
            users: Arc::new(StaticUserProvider::new()),
            tls: TlsSource::default(),
            rsa: RsaSource::default(),
            cache: Sha2Cache::global(),
            connection_id_seed: 1,
            capabilities: capabilities::DEFAULT_SERVER_FLAGS,
            max_packet_size: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = version.into();
        self
    }

    pub fn default_auth(mut self, method: AuthMethod) -> Self {
        self.default_auth = method;
        self
    }

    pub fn user_provider(mut self, users: impl UserProvider + 'static) -> Self {
        self.users = Arc::new(users);
        self
    }

    pub fn shared_user_provider(mut self, users: Arc<dyn UserProvider>) -> Self {
        self.users = users;
        self
    }

    pub fn tls_files(
        mut self,
        ca: Option<PathBuf>,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.tls = TlsSource::Files {
            ca,
            cert: cert.into(),
            key: key.into(),
        };
        self
    }

    /// Generate TLS material at startup, persisting it to `dir` if given.
    pub fn auto_tls(mut self, dir: Option<PathBuf>) -> Self {
        self.tls = TlsSource::Generated { dir };
        self
    }

    pub fn rsa(mut self, source: RsaSource) -> Self {
        self.rsa = source;
        self
    }

    pub fn rsa_key(mut self, key: RsaKeyPair) -> Self {
        self.rsa = RsaSource::Key(Arc::new(key));
        self
    }

    /// Use a private cache instead of the process-wide one.
    pub fn cache(mut self, cache: Sha2Cache) -> Self {
        self.cache = cache;
        self
    }

    pub fn connection_id_seed(mut self, seed: u32) -> Self {
        self.connection_id_seed = seed;
        self
    }

    pub fn capabilities(mut self, flags: u32) -> Self {
        self.capabilities = flags;
        self
    }

    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }
}
