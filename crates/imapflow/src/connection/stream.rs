//! Stream types for IMAP connections.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout_at};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::client::Connection;
use super::config::{Config, Security};
use super::framed::FramedStream;
use crate::types::Capability;
use crate::{Error, Result};

/// A stream that can be either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Upgrades a plaintext stream to TLS.
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let connector = create_tls_connector();
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector trusting the webpki root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Opens a connection as configured and reads the greeting.
///
/// The TCP connect, the TLS handshake and, with [`Security::StartTls`], the
/// STARTTLS upgrade must all finish within the connect timeout.
pub async fn connect(config: &Config) -> Result<Connection<ImapStream>> {
    let limit = config.connect_timeout;
    let deadline = Instant::now() + limit;
    let stream = timeout_at(deadline, open(config))
        .await
        .map_err(|_| Error::Timeout(limit))??;

    let connection = Connection::from_stream(stream, config.options).await?;
    match config.security {
        Security::StartTls => timeout_at(deadline, connection.starttls(&config.host))
            .await
            .map_err(|_| Error::Timeout(limit))?,
        Security::None | Security::Implicit => Ok(connection),
    }
}

async fn open(config: &Config) -> Result<ImapStream> {
    let addr = format!("{}:{}", config.host, config.port);
    debug!(addr = %addr, security = ?config.security, "Connecting");
    let tcp = TcpStream::connect(&addr).await?;
    match config.security {
        Security::Implicit => ImapStream::Plain(tcp).upgrade_to_tls(&config.host).await,
        Security::None | Security::StartTls => Ok(ImapStream::Plain(tcp)),
    }
}

impl Connection<ImapStream> {
    /// Upgrades the connection with STARTTLS.
    ///
    /// Refuses to upgrade if the server sent anything after the tagged OK,
    /// since those bytes would be read as if they had come over TLS.
    /// Capabilities are discarded and must be asked for again.
    pub async fn starttls(mut self, host: &str) -> Result<Self> {
        self.require_capability(&Capability::StartTls).await?;
        self.run_command("STARTTLS", &[]).await?;
        if self.stream.has_buffered() {
            return Err(Error::Protocol(
                "data received after STARTTLS completion".to_string(),
            ));
        }

        let Self {
            stream,
            tags,
            state,
            idle,
            idle_tag,
            pushed,
            options,
            greeting,
            poisoned,
            ..
        } = self;
        let tls = stream.into_inner().upgrade_to_tls(host).await?;
        debug!(host, "Upgraded to TLS");

        Ok(Self {
            stream: FramedStream::new(tls),
            tags,
            capabilities: Vec::new(),
            state,
            idle,
            idle_tag,
            pushed,
            options,
            greeting,
            poisoned,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_create_tls_connector() {
        let _connector = create_tls_connector();
    }

    #[tokio::test]
    async fn test_connect_plain_reads_greeting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"* OK [CAPABILITY IMAP4rev1] test server\r\n")
                .await
                .unwrap();
        });

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .connect_timeout(Duration::from_secs(5))
            .build();
        let connection = connect(&config).await.unwrap();
        assert!(!connection.stream.get_ref().is_tls());
        assert_eq!(connection.greeting(), "[CAPABILITY IMAP4rev1] test server");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_starttls_bounded_by_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"* OK [CAPABILITY IMAP4rev1 STARTTLS] slow server\r\n")
                .await
                .unwrap();
            // Read the STARTTLS command and never answer it.
            let mut buf = [0_u8; 64];
            let _ = socket.read(&mut buf).await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::StartTls)
            .connect_timeout(Duration::from_millis(300))
            .build();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Timeout(limit) if limit == Duration::from_millis(300)));
        server.abort();
    }

    #[tokio::test]
    async fn test_starttls_refuses_without_capability() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"* OK [CAPABILITY IMAP4rev1] no tls here\r\n")
                .await
                .unwrap();
        });

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::StartTls)
            .build();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Capability(ref e) if e.capability == "STARTTLS"));
        server.await.unwrap();
    }
}
