//! # mailr-smtp
//!
//! SMTP delivery for [`mailr`] messages.
//!
//! [`SmtpTransport`] implements [`mailr::Transport`]: each delivered
//! [`mailr::OutgoingMessage`] is assembled into an RFC 5322 / MIME message
//! and sent over its own SMTP session.
//!
//! ## Features
//!
//! - **Security modes**: plain TCP, implicit TLS (port 465) and STARTTLS
//! - **Authentication**: AUTH PLAIN
//! - **MIME assembly**: text + HTML alternatives, attachments from files,
//!   inline content, remote URLs and raw parts, `cid:` inline images
//! - **Bounded delivery**: the whole exchange runs under one timeout
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailr::{Mailer, MailerConfig};
//! use mailr_smtp::{SmtpConfig, SmtpTransport};
//!
//! #[tokio::main]
//! async fn main() -> mailr::Result<()> {
//!     let transport = SmtpTransport::new(SmtpConfig::new("localhost", 1025));
//!     let mailer = Mailer::from_config(Arc::new(transport), MailerConfig::default());
//!
//!     mailer
//!         .create_message()
//!         .to("receiver@example.com")
//!         .subject("A simple email")
//!         .send_template("simple", serde_json::json!({ "title": "A great title" }))
//!         .await
//! }
//! ```
//!
//! ## Session
//!
//! ```text
//! connect ─→ greeting ─→ EHLO ─→ [STARTTLS ─→ EHLO] ─→ [AUTH PLAIN]
//!         ─→ MAIL FROM ─→ RCPT TO (to, cc, bcc) ─→ DATA ─→ QUIT
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
pub mod attachment;
pub mod client;
pub mod command;
pub mod compose;
mod config;
mod error;
pub mod reply;
pub mod stream;
mod transport;

pub use address::Address;
pub use config::{Credentials, Security, SmtpConfig};
pub use error::{Error, Result};
pub use transport::SmtpTransport;
