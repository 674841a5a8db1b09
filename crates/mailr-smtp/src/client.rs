//! Type-state SMTP client.
//!
//! ```text
//! ┌───────────┐ mail_from() ┌──────────┐ data() ┌──────┐
//! │ Connected │ ──────────→ │ Envelope │ ─────→ │ Data │
//! └───────────┘             └──────────┘        └──────┘
//!       ↑                                           │
//!       └──────────────── send_message() ───────────┘
//! ```

use std::collections::HashSet;
use std::marker::PhantomData;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::address::Address;
use crate::command::Command;
use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::reply::Reply;
use crate::stream::SmtpStream;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for an open mail transaction.
#[derive(Debug)]
pub struct Envelope;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// Server capabilities from the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Advertised extension keywords, uppercased.
    pub extensions: HashSet<String>,
    /// Advertised AUTH mechanisms, uppercased.
    pub auth_mechanisms: HashSet<String>,
    /// Advertised maximum message size.
    pub max_size: Option<usize>,
}

impl ServerInfo {
    /// Checks if the server advertised an extension keyword.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions.contains(&keyword.to_ascii_uppercase())
    }

    fn from_ehlo(hostname: String, reply: &Reply) -> Self {
        let mut info = Self {
            hostname,
            ..Self::default()
        };

        // First line is the greeting.
        for line in reply.message.iter().skip(1) {
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };
            // Some servers still announce `AUTH=PLAIN LOGIN`.
            let (keyword, first_arg) = match keyword.split_once('=') {
                Some((keyword, arg)) => (keyword.to_ascii_uppercase(), Some(arg)),
                None => (keyword.to_ascii_uppercase(), None),
            };
            let args: Vec<&str> = first_arg.into_iter().chain(parts).collect();

            match keyword.as_str() {
                "AUTH" => info
                    .auth_mechanisms
                    .extend(args.iter().map(|m| m.to_ascii_uppercase())),
                "SIZE" => info.max_size = args.first().and_then(|s| s.parse().ok()),
                _ => {}
            }
            info.extensions.insert(keyword);
        }

        info
    }
}

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    _state: PhantomData<State>,
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = stream.read_reply().await?.expect(Reply::SERVICE_READY)?;

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(%hostname, "SMTP greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                ..ServerInfo::default()
            },
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        let cmd = Command::Ehlo {
            hostname: client_hostname.to_string(),
        };
        let reply = self.send_command(&cmd).await?.expect_success()?;

        let hostname = std::mem::take(&mut self.server_info.hostname);
        self.server_info = ServerInfo::from_ehlo(hostname, &reply);
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(mut self, hostname: &str, client_hostname: &str) -> Result<Self> {
        if !self.server_info.supports("STARTTLS") {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.send_command(&Command::StartTls)
            .await?
            .expect(Reply::SERVICE_READY)?;
        self.stream = self.stream.upgrade_to_tls(hostname).await?;
        debug!("Connection upgraded to TLS");

        self.ehlo(client_hostname).await
    }

    /// Authenticates using the PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not offer PLAIN or rejects the
    /// credentials.
    pub async fn auth_plain(mut self, credentials: &Credentials) -> Result<Self> {
        if !self.server_info.auth_mechanisms.contains("PLAIN") {
            return Err(Error::NotSupported("AUTH PLAIN".into()));
        }

        let token = format!("\0{}\0{}", credentials.username, credentials.password);
        let cmd = Command::AuthPlain {
            initial_response: STANDARD.encode(token.as_bytes()),
        };
        self.send_command(&cmd).await?.expect(Reply::AUTH_OK)?;
        debug!(username = %credentials.username, "Authenticated");
        Ok(self)
    }

    /// Starts a mail transaction.
    ///
    /// The SIZE parameter is sent when the server advertised the extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(mut self, from: &Address, size: usize) -> Result<Client<Envelope>> {
        let size = self.server_info.supports("SIZE").then_some(size);
        if let (Some(size), Some(max)) = (size, self.server_info.max_size)
            && max > 0
            && size > max
        {
            return Err(Error::Protocol(format!(
                "Message of {size} bytes exceeds server limit of {max}"
            )));
        }

        let cmd = Command::MailFrom {
            from: from.clone(),
            size,
        };
        self.send_command(&cmd).await?.expect_success()?;
        Ok(self.transition())
    }
}

impl Client<Envelope> {
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: &Address) -> Result<Self> {
        let cmd = Command::RcptTo { to: to.clone() };
        self.send_command(&cmd).await?.expect_success()?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        self.send_command(&Command::Data)
            .await?
            .expect(Reply::START_DATA)?;
        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed and the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        self.stream.write_all(&dot_stuff(message)).await?;
        self.stream.read_reply().await?.expect_success()?;
        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Returns the server information.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        debug!(command = %cmd.redacted(), "C:");
        self.stream.write_all(&cmd.serialize()).await?;
        let reply = self.stream.read_reply().await?;
        debug!(code = reply.code, "S:");
        Ok(reply)
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            _state: PhantomData,
        }
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        self.send_command(&Command::Quit).await?.expect_success()?;
        Ok(())
    }
}

/// Normalizes line endings to CRLF, dot-stuffs and terminates the body.
fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 40 + 5);
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let body = body.strip_suffix(b"\r").unwrap_or(body);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
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

    #[test]
    fn test_dot_stuffing() {
        let out = dot_stuff(b"Subject: x\r\n\r\n.hidden\n..double\nlast");
        assert_eq!(
            out,
            b"Subject: x\r\n\r\n..hidden\r\n...double\r\nlast\r\n.\r\n".to_vec()
        );
    }

    #[test]
    fn test_dot_stuffing_trailing_newline() {
        assert_eq!(dot_stuff(b"body\r\n"), b"body\r\n.\r\n".to_vec());
        assert_eq!(dot_stuff(b""), b".\r\n".to_vec());
    }

    #[test]
    fn test_server_info_from_ehlo() {
        let reply = Reply::new(
            250,
            vec![
                "mail.local greets you".into(),
                "STARTTLS".into(),
                "AUTH LOGIN plain".into(),
                "SIZE 1048576".into(),
                "8BITMIME".into(),
            ],
        );
        let info = ServerInfo::from_ehlo("mail.local".into(), &reply);
        assert!(info.supports("starttls"));
        assert!(info.supports("8BITMIME"));
        assert!(info.auth_mechanisms.contains("PLAIN"));
        assert_eq!(info.max_size, Some(1048576));
    }

    #[test]
    fn test_legacy_auth_announcement() {
        let reply = Reply::new(250, vec!["mail.local".into(), "AUTH=PLAIN LOGIN".into()]);
        let info = ServerInfo::from_ehlo("mail.local".into(), &reply);
        assert!(info.auth_mechanisms.contains("PLAIN"));
        assert!(info.auth_mechanisms.contains("LOGIN"));
    }
}
