//! The duplex byte-level transport: plain TCP or TLS-over-TCP, selected by
//! scheme. Opaque to everything above it — no framing, no buffering beyond
//! what the OS socket gives us.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::config::{ConnectionConfig, Scheme};
use crate::error::TransportError;

/// A connected duplex stream, plain or TLS. Implements `AsyncRead +
/// AsyncWrite` by delegating to whichever variant is active so every later
/// stage (probe, handshake, frame codec) can treat it as one opaque byte
/// channel.
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connects to `config.hostname:config.port`, performing a TLS handshake
/// first if `config.scheme` is `wss`.
pub async fn connect(config: &ConnectionConfig) -> Result<Transport, TransportError> {
    let addr = format!("{}:{}", config.hostname, config.port);
    let tcp = TcpStream::connect(&addr)
        .await
        .map_err(|source| TransportError::Connect { addr, source })?;
    tcp.set_nodelay(true).ok();

    match config.scheme {
        Scheme::Plain => Ok(Transport::Plain(tcp)),
        Scheme::Tls => {
            let connector = tls_connector();
            let server_name = ServerName::try_from(config.hostname.clone()).map_err(|e| {
                TransportError::Tls {
                    host: config.hostname.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
                }
            })?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|source| TransportError::Tls {
                    host: config.hostname.clone(),
                    source,
                })?;
            Ok(Transport::Tls(Box::new(tls)))
        }
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
