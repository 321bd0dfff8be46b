//! Transport abstraction: TCP, TLS-upgraded TCP, and WebSocket.
//!
//! The connection driver consumes a plain byte-stream interface - read bytes
//! into an accumulator, write byte slices, flush, shut down. The three
//! transports differ only in how those bytes move:
//!
//! - `nats://` - plain TCP (default port 4222)
//! - `tls://`  - plain TCP first, then an in-place TLS upgrade after `INFO`
//!   (default port 4443); the upgrade is a capability of the TCP variant only
//! - `ws://` / `wss://` - a framed message stream; binary frames are
//!   concatenated into the byte stream, outbound writes become binary frames
//!
//! URL parsing happens here too, so the driver deals in [`ServerAddr`]
//! values instead of strings. Credentials are never read from URLs.

use std::sync::Arc;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::errors::{Error, Result};

/// URL scheme of a server address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP.
    Nats,
    /// TCP with a TLS upgrade after `INFO`.
    Tls,
    /// Plain WebSocket.
    Ws,
    /// WebSocket over TLS.
    Wss,
}

impl Scheme {
    /// Whether this scheme encrypts the transport by itself.
    #[must_use]
    pub fn is_encrypted(self) -> bool {
        matches!(self, Self::Tls | Self::Wss)
    }
}

/// A parsed server address.
#[derive(Debug, Clone)]
pub struct ServerAddr {
    /// Transport selector.
    pub scheme: Scheme,
    /// Host name (also the TLS server name).
    pub host: String,
    /// Resolved port, scheme default applied.
    pub port: u16,
    /// Original URL, kept for the WebSocket handshake.
    pub url: Url,
}

impl ServerAddr {
    /// Parse a server URL.
    ///
    /// # Errors
    ///
    /// Fails on unparseable URLs, missing hosts, and unknown schemes.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::InvalidUrl(format!("{input}: {e}")))?;

        let scheme = match url.scheme() {
            "nats" => Scheme::Nats,
            "tls" => Scheme::Tls,
            "ws" => Scheme::Ws,
            "wss" => Scheme::Wss,
            other => return Err(Error::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(format!("{input}: missing host")))?
            .to_string();

        let port = url.port().unwrap_or(match scheme {
            Scheme::Nats => 4222,
            Scheme::Tls => 4443,
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        });

        Ok(Self { scheme, host, port, url })
    }
}

/// An open transport carrying the protocol byte stream.
pub(crate) enum Transport {
    Tcp(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<MaybeTlsStream<TcpStream>>>),
}

impl Transport {
    /// Open the transport selected by `addr` (without any TLS upgrade -
    /// that happens after `INFO`, driven by the handshake).
    pub(crate) async fn open(addr: &ServerAddr) -> Result<Self> {
        match addr.scheme {
            Scheme::Nats | Scheme::Tls => {
                let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            },
            Scheme::Ws | Scheme::Wss => {
                let (ws, _response) = tokio_tungstenite::connect_async(addr.url.as_str())
                    .await
                    .map_err(ws_io_error)?;
                Ok(Self::Ws(Box::new(ws)))
            },
        }
    }

    /// Whether an in-place TLS upgrade is possible from the current variant.
    pub(crate) fn is_plain_tcp(&self) -> bool {
        matches!(self, Self::Tcp(_))
    }

    /// Upgrade a plain TCP transport to TLS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TlsMismatch`] for non-TCP variants and
    /// [`Error::Tls`] when the handshake fails. Both are fatal to the
    /// connection loop.
    pub(crate) async fn upgrade_tls(
        self,
        host: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<Self> {
        let Self::Tcp(stream) = self else {
            return Err(Error::TlsMismatch);
        };
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| Error::Tls(format!("invalid server name {host:?}: {e}")))?;
        let tls = TlsConnector::from(config)
            .connect(server_name, stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Self::Tls(Box::new(tls)))
    }

    /// Read more bytes into `buf`; `Ok(0)` means the peer closed.
    pub(crate) async fn read_buf(&mut self, buf: &mut BytesMut) -> std::io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read_buf(buf).await,
            Self::Tls(stream) => stream.read_buf(buf).await,
            Self::Ws(ws) => loop {
                match ws.next().await {
                    Some(Ok(tungstenite::Message::Binary(data))) => {
                        buf.extend_from_slice(&data);
                        return Ok(data.len());
                    },
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        buf.extend_from_slice(text.as_bytes());
                        return Ok(text.len());
                    },
                    // Ping/pong are handled by the WebSocket layer itself.
                    Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => {
                        continue;
                    },
                    Some(Ok(tungstenite::Message::Close(_))) | None => return Ok(0),
                    Some(Ok(tungstenite::Message::Frame(_))) => continue,
                    Some(Err(e)) => return Err(ws_io_error(e)),
                }
            },
        }
    }

    /// Write and flush a block of protocol bytes.
    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await
            },
            Self::Tls(stream) => {
                stream.write_all(bytes).await?;
                stream.flush().await
            },
            Self::Ws(ws) => ws
                .send(tungstenite::Message::Binary(bytes.to_vec()))
                .await
                .map_err(ws_io_error),
        }
    }

    /// Shut the transport down; errors are irrelevant at this point.
    pub(crate) async fn shutdown(&mut self) {
        match self {
            Self::Tcp(stream) => {
                let _ = stream.shutdown().await;
            },
            Self::Tls(stream) => {
                let _ = stream.shutdown().await;
            },
            Self::Ws(ws) => {
                let _ = ws.close(None).await;
            },
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            Self::Tcp(_) => "Tcp",
            Self::Tls(_) => "Tls",
            Self::Ws(_) => "Ws",
        };
        f.debug_tuple("Transport").field(&variant).finish()
    }
}

fn ws_io_error(e: tungstenite::Error) -> std::io::Error {
    match e {
        tungstenite::Error::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}

/// TLS configuration trusting the bundled webpki roots.
pub(crate) fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_default_ports() {
        assert_eq!(ServerAddr::parse("nats://example.com").unwrap().port, 4222);
        assert_eq!(ServerAddr::parse("tls://example.com").unwrap().port, 4443);
        assert_eq!(ServerAddr::parse("ws://example.com").unwrap().port, 80);
        assert_eq!(ServerAddr::parse("wss://example.com").unwrap().port, 443);
    }

    #[test]
    fn explicit_port_wins() {
        let addr = ServerAddr::parse("nats://localhost:14222").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 14222);
        assert_eq!(addr.scheme, Scheme::Nats);
    }

    #[test]
    fn unknown_scheme_rejected() {
        assert!(matches!(
            ServerAddr::parse("http://example.com"),
            Err(Error::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn garbage_url_rejected() {
        assert!(matches!(ServerAddr::parse("not a url"), Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn only_tls_schemes_are_encrypted() {
        assert!(Scheme::Tls.is_encrypted());
        assert!(Scheme::Wss.is_encrypted());
        assert!(!Scheme::Nats.is_encrypted());
        assert!(!Scheme::Ws.is_encrypted());
    }
}
