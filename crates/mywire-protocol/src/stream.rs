//! Byte stream under the packet framer, upgradable to TLS in place.

use std::io::{self, Read, Write};
use std::sync::Arc;

use mywire_core::Result;

use crate::tls::{TlsStream, tls_error};

/// A plaintext or TLS stream.
///
/// The upgrade happens mid-connection, after the SSLRequest, without
/// touching the framer's sequence counter.
#[derive(Debug)]
pub enum Stream<S> {
    Plain(S),
    Tls(Box<TlsStream<S>>),
    /// Transient state while an upgrade is in progress, or after it failed
    Detached,
}

impl<S: Read + Write> Stream<S> {
    pub fn plain(stream: S) -> Self {
        Stream::Plain(stream)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Stream::Tls(_))
    }

    /// Run the client side of the TLS handshake on the current stream.
    pub fn upgrade_client(
        &mut self,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<()> {
        let inner = self.take_plain()?;
        *self = Stream::Tls(Box::new(TlsStream::connect(inner, config, server_name)?));
        Ok(())
    }

    /// Run the server side of the TLS handshake on the current stream.
    pub fn upgrade_server(&mut self, config: Arc<rustls::ServerConfig>) -> Result<()> {
        let inner = self.take_plain()?;
        *self = Stream::Tls(Box::new(TlsStream::accept(inner, config)?));
        Ok(())
    }

    fn take_plain(&mut self) -> Result<S> {
        match std::mem::replace(self, Stream::Detached) {
            Stream::Plain(inner) => Ok(inner),
            other => {
                *self = other;
                Err(tls_error("stream is not a plaintext stream"))
            }
        }
    }

    /// The underlying transport, when attached.
    pub fn get_ref(&self) -> Option<&S> {
        match self {
            Stream::Plain(s) => Some(s),
            Stream::Tls(tls) => Some(tls.get_ref()),
            Stream::Detached => None,
        }
    }
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream detached")
}

impl<S: Read + Write> Read for Stream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
            Stream::Detached => Err(detached()),
        }
    }
}

impl<S: Read + Write> Write for Stream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
            Stream::Detached => Err(detached()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
            Stream::Detached => Err(detached()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_plain_passthrough() {
        let mut stream = Stream::plain(Cursor::new(b"abc".to_vec()));
        assert!(!stream.is_tls());
        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn test_detached_stream_errors() {
        let mut stream: Stream<Cursor<Vec<u8>>> = Stream::Detached;
        let mut buf = [0u8; 1];
        assert_eq!(
            stream.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(stream.get_ref().is_none());
    }

    #[test]
    fn test_failed_upgrade_leaves_stream_detached() {
        // Peer closes immediately, so the client handshake cannot complete.
        let mut stream = Stream::plain(Cursor::new(Vec::new()));
        let config = crate::tls::client_config(
            &crate::config::TlsConfig::new().skip_verify(true),
            crate::config::SslMode::Required,
        )
        .unwrap();
        assert!(stream.upgrade_client(config, "localhost").is_err());
        assert!(matches!(stream, Stream::Detached));
    }
}
