//! SMTP reply types and parser.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: u16,
    /// Reply message lines.
    pub message: Vec<String>,
}

impl Reply {
    /// 220 Service ready
    pub const SERVICE_READY: u16 = 220;
    /// 221 Service closing transmission channel
    pub const CLOSING: u16 = 221;
    /// 235 Authentication succeeded
    pub const AUTH_OK: u16 = 235;
    /// 250 Requested mail action okay, completed
    pub const OK: u16 = 250;
    /// 354 Start mail input
    pub const START_DATA: u16 = 354;

    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: u16, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true if this is a success reply (2xx).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Returns the full message as a single string.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Fails unless the reply carries `code`.
    ///
    /// # Errors
    ///
    /// Returns the reply as [`Error::SmtpError`] otherwise.
    pub fn expect(self, code: u16) -> Result<Self> {
        if self.code == code {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Fails unless the reply is a 2xx.
    ///
    /// # Errors
    ///
    /// Returns the reply as [`Error::SmtpError`] otherwise.
    pub fn expect_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    fn into_error(self) -> Error {
        Error::smtp_error(self.code, self.message_text())
    }
}

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code = first
        .get(0..3)
        .ok_or_else(|| Error::Protocol(format!("Reply too short: {first}")))?;
    let code = code
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {code}")))?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        match line.get(4..) {
            Some(text) => message.push(text.to_string()),
            None if line.len() == 3 => message.push(String::new()),
            None => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(code, message))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last line.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    match line.as_bytes().get(3) {
        Some(separator) => *separator == b' ',
        None => line.len() == 3,
    }
}

/// Reads one complete (possibly multi-line) reply.
///
/// # Errors
///
/// Returns an error if the read fails, the server closes the connection
/// mid-reply, or the reply is malformed.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::Protocol("Connection closed by server".into()));
        }

        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(line);
        lines.push(line.to_string());

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
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
    use tokio::io::BufReader;
    use tokio_test::io::Builder;

    #[test]
    fn test_parse_single_line_reply() {
        let lines = vec!["250 OK".to_string()];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, Reply::OK);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_multi_line_reply() {
        let lines = vec![
            "250-mail.local".to_string(),
            "250-STARTTLS".to_string(),
            "250 AUTH PLAIN LOGIN".to_string(),
        ];
        let reply = parse_reply(&lines).unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message, vec!["mail.local", "STARTTLS", "AUTH PLAIN LOGIN"]);
        assert_eq!(reply.message_text(), "mail.local\nSTARTTLS\nAUTH PLAIN LOGIN");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_reply(&[]).is_err());
        assert!(parse_reply(&["25".to_string()]).is_err());
        assert!(parse_reply(&["ABC OK".to_string()]).is_err());
    }

    #[test]
    fn test_code_only_reply() {
        let reply = parse_reply(&["354".to_string()]).unwrap();
        assert_eq!(reply.code, Reply::START_DATA);
        assert!(is_last_reply_line("354"));
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_expect() {
        let reply = Reply::new(550, vec!["No such user".into()]);
        let err = reply.clone().expect_success().unwrap_err();
        assert!(err.is_permanent());
        assert!(reply.expect(550).is_ok());
    }

    #[tokio::test]
    async fn test_read_multi_line_reply() {
        let mock = Builder::new()
            .read(b"250-mail.local greets you\r\n250-SIZE 1000\r\n")
            .read(b"250 8BITMIME\r\n")
            .build();
        let mut reader = BufReader::new(mock);

        let reply = read_reply(&mut reader).await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message.len(), 3);
    }

    #[tokio::test]
    async fn test_read_reply_on_closed_connection() {
        let mock = Builder::new().read(b"250-partial\r\n").build();
        let mut reader = BufReader::new(mock);

        let err = read_reply(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
