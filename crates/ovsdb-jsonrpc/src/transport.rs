//! Stream transports
//!
//! OVSDB endpoints are reachable over plain TCP, TCP+TLS, or the local Unix
//! socket exposed by ovsdb-server. All three unify behind [`Stream`] so the
//! endpoint layer stays transport-agnostic.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use ovsdb_core::{Error, Result};

/// IANA-assigned OVSDB port.
pub const DEFAULT_PORT: u16 = 6640;

/// Default ovsdb-server control socket.
#[cfg(unix)]
pub const DEFAULT_UNIX_SOCKET: &str = "/var/run/openvswitch/db.sock";

/// Where and how to reach the database server.
#[derive(Clone)]
pub enum ConnectTarget {
    /// Plain TCP, "host:port"
    Tcp(String),
    /// TCP wrapped in TLS
    Tls {
        addr: String,
        server_name: String,
        config: Arc<ClientConfig>,
    },
    /// Local Unix socket
    #[cfg(unix)]
    Unix(PathBuf),
}

impl ConnectTarget {
    pub fn tcp(addr: impl Into<String>) -> Self {
        ConnectTarget::Tcp(addr.into())
    }

    pub fn tls(
        addr: impl Into<String>,
        server_name: impl Into<String>,
        config: Arc<ClientConfig>,
    ) -> Self {
        ConnectTarget::Tls {
            addr: addr.into(),
            server_name: server_name.into(),
            config,
        }
    }

    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        ConnectTarget::Unix(path.into())
    }

    /// Open the stream.
    pub async fn connect(&self) -> Result<Stream> {
        match self {
            ConnectTarget::Tcp(addr) => {
                debug!(addr = %addr, "connecting over tcp");
                let stream = TcpStream::connect(addr).await?;
                Ok(Stream::Tcp(stream))
            }
            ConnectTarget::Tls {
                addr,
                server_name,
                config,
            } => {
                debug!(addr = %addr, "connecting over tls");
                let tcp = TcpStream::connect(addr).await?;
                let name = ServerName::try_from(server_name.clone())
                    .map_err(|e| Error::transport(format!("bad TLS server name: {e}")))?;
                let connector = TlsConnector::from(Arc::clone(config));
                let tls = connector.connect(name, tcp).await?;
                Ok(Stream::Tls(Box::new(tls)))
            }
            #[cfg(unix)]
            ConnectTarget::Unix(path) => {
                debug!(path = %path.display(), "connecting over unix socket");
                let stream = UnixStream::connect(path).await?;
                Ok(Stream::Unix(stream))
            }
        }
    }

    /// Human-readable endpoint description for connection info.
    pub fn description(&self) -> String {
        match self {
            ConnectTarget::Tcp(addr) => format!("tcp:{addr}"),
            ConnectTarget::Tls { addr, .. } => format!("ssl:{addr}"),
            #[cfg(unix)]
            ConnectTarget::Unix(path) => format!("unix:{}", path.display()),
        }
    }
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description())
    }
}

/// Build a TLS client config trusting the given PEM CA bundle.
pub fn tls_config_from_ca_pem(pem: &[u8]) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    let mut reader = io::BufReader::new(pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| Error::transport(format!("bad CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| Error::transport(format!("rejected CA certificate: {e}")))?;
    }
    if roots.is_empty() {
        return Err(Error::transport("CA bundle contains no certificates"));
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// A connected transport stream.
pub enum Stream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_flush(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_descriptions() {
        assert_eq!(
            ConnectTarget::tcp("127.0.0.1:6640").description(),
            "tcp:127.0.0.1:6640"
        );
        #[cfg(unix)]
        assert_eq!(
            ConnectTarget::unix("/var/run/openvswitch/db.sock").description(),
            "unix:/var/run/openvswitch/db.sock"
        );
    }

    #[test]
    fn test_empty_ca_bundle_rejected() {
        assert!(tls_config_from_ca_pem(b"").is_err());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let result = ConnectTarget::tcp("127.0.0.1:1").connect().await;
        assert!(result.is_err());
    }
}
