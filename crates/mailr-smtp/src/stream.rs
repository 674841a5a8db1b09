//! Transport-level connection to the SMTP server.

use std::sync::{Arc, LazyLock};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Error, Result};
use crate::reply::{self, Reply};

/// Client TLS settings, trusting the webpki roots. Built on first use.
static TLS_CONFIG: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    Arc::new(
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

/// Buffered connection, plain or encrypted.
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP, before STARTTLS or when security is off.
    Tcp(BufReader<TcpStream>),
    /// Implicit TLS or upgraded via STARTTLS.
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

impl SmtpStream {
    /// Reads one complete reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the reply is malformed.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        match self {
            Self::Tcp(reader) => reply::read_reply(reader).await,
            Self::Tls(reader) => reply::read_reply(&mut **reader).await,
        }
    }

    /// Writes and flushes `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer: &mut (dyn AsyncWrite + Unpin + Send) = match self {
            Self::Tcp(reader) => reader.get_mut(),
            Self::Tls(reader) => reader.get_mut(),
        };
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Performs the TLS handshake on a plain connection after STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already encrypted or the handshake
    /// fails.
    pub async fn upgrade_to_tls(self, hostname: &str) -> Result<Self> {
        match self {
            Self::Tcp(reader) => tls(hostname, reader.into_inner()).await,
            Self::Tls(_) => Err(Error::Protocol("STARTTLS on an encrypted stream".into())),
        }
    }
}

/// Opens a plain TCP connection.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    Ok(SmtpStream::Tcp(BufReader::new(tcp)))
}

/// Opens an implicit TLS connection (usually port 465).
///
/// # Errors
///
/// Returns an error if the connection or the handshake fails.
pub async fn connect_tls(hostname: &str, port: u16) -> Result<SmtpStream> {
    let tcp = TcpStream::connect((hostname, port)).await?;
    tls(hostname, tcp).await
}

async fn tls(hostname: &str, tcp: TcpStream) -> Result<SmtpStream> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|_| Error::Protocol(format!("Invalid hostname: {hostname}")))?;
    let stream = TlsConnector::from(Arc::clone(&TLS_CONFIG))
        .connect(server_name, tcp)
        .await?;
    Ok(SmtpStream::Tls(Box::new(BufReader::new(stream))))
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
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220-mail.test\r\n220 ready\r\n").await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = connect("127.0.0.1", port).await.unwrap();
        let reply = stream.read_reply().await.unwrap();
        assert_eq!(reply.code, Reply::SERVICE_READY);
        stream.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"QUIT\r\n");
    }
}
