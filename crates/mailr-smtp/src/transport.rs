//! SMTP implementation of [`mailr::Transport`].

use async_trait::async_trait;
use mailr::{OutgoingMessage, Transport, TransportError};
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::attachment::{self, Part};
use crate::client::{Client, Connected};
use crate::compose::render_message;
use crate::config::{Security, SmtpConfig};
use crate::error::{Error, Result};
use crate::stream::{connect, connect_tls};

/// Delivers messages over SMTP, one connection per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    config: SmtpConfig,
    http: reqwest::Client,
}

impl SmtpTransport {
    /// Creates a transport for the given server.
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Returns the server configuration.
    #[must_use]
    pub const fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Delivers one message, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if an address or header would corrupt the session,
    /// an attachment cannot be loaded, the envelope is empty, the server
    /// rejects a command, or the timeout elapses. Address and header checks
    /// happen before connecting.
    pub async fn deliver(&self, message: &OutgoingMessage) -> Result<()> {
        tokio::time::timeout(self.config.timeout, self.exchange(message))
            .await
            .map_err(|_| Error::Timeout(self.config.timeout))?
    }

    async fn exchange(&self, message: &OutgoingMessage) -> Result<()> {
        let from = message
            .from
            .first()
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidAddress("no sender".into()))
            .and_then(Address::from_mailbox)?;
        let recipients = message
            .recipients()
            .map(Address::from_mailbox)
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            return Err(Error::InvalidAddress("no recipients".into()));
        }

        let mut parts: Vec<Part> = Vec::with_capacity(message.attachments.len());
        for item in &message.attachments {
            parts.push(attachment::load(item, &self.http).await?);
        }
        let data = render_message(message, &parts, &self.config.client_hostname)?;

        let client = self.open().await?;
        let mut envelope = client.mail_from(&from, data.len()).await?;
        for recipient in &recipients {
            envelope = envelope.rcpt_to(recipient).await?;
        }
        let client = envelope.data().await?.send_message(data.as_bytes()).await?;

        if let Err(e) = client.quit().await {
            warn!(%e, "QUIT failed after the message was accepted");
        }
        debug!(recipients = recipients.len(), "SMTP transaction completed");
        Ok(())
    }

    async fn open(&self) -> Result<Client<Connected>> {
        let SmtpConfig {
            host,
            port,
            security,
            credentials,
            client_hostname,
            ..
        } = &self.config;

        debug!(%host, port, ?security, "Connecting to SMTP server");
        let stream = match security {
            Security::Tls => connect_tls(host, *port).await?,
            Security::StartTls | Security::None => connect(host, *port).await?,
        };

        let mut client = Client::from_stream(stream)
            .await?
            .ehlo(client_hostname)
            .await?;
        if *security == Security::StartTls {
            client = client.starttls(host, client_hostname).await?;
        }
        if let Some(credentials) = credentials {
            client = client.auth_plain(credentials).await?;
        }
        Ok(client)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send_mail(&self, message: &OutgoingMessage) -> std::result::Result<(), TransportError> {
        self.deliver(message).await?;
        info!(
            host = %self.config.host,
            subject = %message.subject,
            "Message delivered"
        );
        Ok(())
    }

    async fn close(&self) {
        info!(host = %self.config.host, "SMTP transport closed");
    }
}
