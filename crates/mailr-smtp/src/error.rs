//! Error types for SMTP delivery.

use std::io;
use std::time::Duration;

use mailr::TransportError;

/// Result type alias for SMTP delivery.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Server returned an error reply.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected or malformed reply).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),

    /// The exchange did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Envelope address missing or unusable.
    #[error("Invalid envelope address: {0}")]
    InvalidAddress(String),

    /// Header name or value that would corrupt the message.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Attachment content could not be loaded.
    #[error("Cannot load attachment `{filename}`: {source}")]
    Attachment {
        /// Attachment display name (or source when unnamed).
        filename: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote attachment fetch failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Creates an attachment loading error.
    #[must_use]
    pub fn attachment(
        filename: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Attachment {
            filename: filename.into(),
            source: source.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx) or a timeout.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
            || matches!(self, Self::Timeout(_))
    }
}

impl From<Error> for TransportError {
    fn from(error: Error) -> Self {
        Self::new(error)
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
    use super::*;

    #[test]
    fn test_reply_classification() {
        assert!(Error::smtp_error(550, "no such user").is_permanent());
        assert!(Error::smtp_error(421, "try later").is_transient());
        assert!(Error::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!Error::Protocol("bad".into()).is_permanent());
    }

    #[test]
    fn test_into_transport_error_keeps_source() {
        let transport: TransportError = Error::smtp_error(554, "rejected").into();
        assert_eq!(transport.to_string(), "transport: SMTP error 554: rejected");
        let inner = transport.downcast_ref::<Error>().unwrap();
        assert!(inner.is_permanent());
    }
}
