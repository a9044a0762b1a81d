//! MySQL server side of the wire protocol.
//!
//! A [`Server`] accepts TCP connections and runs each one on its own
//! thread: greeting, optional TLS upgrade, authentication against the
//! configured [`UserProvider`], then a command loop that hands every
//! command to a [`Handler`].
//!
//! ```ignore
//! let users = StaticUserProvider::new().user("app", AuthMethod::CachingSha2Password, "secret");
//! let server = Server::bind(ServerConfig::new().bind("127.0.0.1:3306").user_provider(users))?;
//! server.run(|| MyHandler::default())?;
//! ```

pub mod config;
pub mod conn;
pub mod handler;
pub mod tls_material;

pub use config::{
    Credential, RsaSource, ServerConfig, StaticUserProvider, TlsSource, UserProvider,
};
pub use conn::serve_connection;
pub use handler::{Handler, ResultWriter, Session};
pub use tls_material::TlsMaterials;

use std::fs;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use mywire_core::error::TransportErrorKind;
use mywire_core::{Error, Result};

use crate::auth::RsaKeyPair;
use crate::protocol::capabilities::CLIENT_SSL;

/// Resolved server state shared by every connection.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    tls: Option<Arc<rustls::ServerConfig>>,
    materials: Option<TlsMaterials>,
    rsa: Option<Arc<RsaKeyPair>>,
    next_id: AtomicU32,
}

impl ServerContext {
    /// Load or generate TLS material and the RSA key named by `config`.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let materials = match &config.tls {
            TlsSource::Disabled => None,
            TlsSource::Files { ca, cert, key } => {
                Some(TlsMaterials::from_files(ca.as_deref(), cert, key)?)
            }
            TlsSource::Generated { dir } => Some(TlsMaterials::load_or_generate(dir.as_deref())?),
        };
        let tls = materials.as_ref().map(TlsMaterials::server_config).transpose()?;

        let rsa = match &config.rsa {
            RsaSource::None => None,
            RsaSource::File(path) => Some(Arc::new(RsaKeyPair::from_private_pem(
                &fs::read_to_string(path)?,
            )?)),
            RsaSource::Generate => {
                tracing::debug!("generating RSA key pair");
                Some(Arc::new(RsaKeyPair::generate(2048)?))
            }
            RsaSource::Key(key) => Some(Arc::clone(key)),
        };

        Ok(Self {
            next_id: AtomicU32::new(config.connection_id_seed),
            config,
            tls,
            materials,
            rsa,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Flags advertised in the greeting.
    pub fn capabilities(&self) -> u32 {
        if self.tls.is_some() {
            self.config.capabilities | CLIENT_SSL
        } else {
            self.config.capabilities & !CLIENT_SSL
        }
    }

    pub fn tls_config(&self) -> Option<Arc<rustls::ServerConfig>> {
        self.tls.clone()
    }

    /// Certificates in use, when TLS is enabled.
    pub fn tls_materials(&self) -> Option<&TlsMaterials> {
        self.materials.as_ref()
    }

    pub fn rsa_key(&self) -> Option<&RsaKeyPair> {
        self.rsa.as_deref()
    }

    pub fn next_connection_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A listening MySQL server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind_addr).map_err(|e| {
            Error::transport_io(TransportErrorKind::Connect, e)
        })?;
        let ctx = Arc::new(ServerContext::new(config)?);
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            tls = ctx.tls.is_some(),
            "server listening"
        );
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accept forever, one thread per connection with a fresh handler.
    pub fn run<H, F>(&self, make_handler: F) -> Result<()>
    where
        H: Handler + Send + 'static,
        F: Fn() -> H,
    {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let ctx = Arc::clone(&self.ctx);
            let mut handler = make_handler();
            thread::spawn(move || {
                let peer = peer_host(&stream);
                if let Err(e) = serve_connection(stream, &peer, &ctx, &mut handler) {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }
        Ok(())
    }

    /// Accept and serve a single connection on the calling thread.
    pub fn serve_one<H: Handler + ?Sized>(&self, handler: &mut H) -> Result<()> {
        let (stream, _) = self.listener.accept()?;
        stream.set_nodelay(true)?;
        let peer = peer_host(&stream);
        serve_connection(stream, &peer, &self.ctx, handler)
    }
}

fn peer_host(stream: &std::net::TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}
