//! # mailr
//!
//! Fluent, template-driven email composition.
//!
//! A [`Mailer`] owns a delivery [`Transport`] and a template [`Renderer`] and
//! hands out [`Message`] drafts. A draft accumulates recipients, a subject, a
//! template reference with its context, attachments and custom headers. On
//! send the draft goes through the [`SendPipeline`]: recipient lists are
//! filtered against the address pattern and deduplicated, default addresses
//! are applied, the HTML (required) and text (optional) bodies are rendered,
//! and the resulting [`OutgoingMessage`] is handed to the transport.
//!
//! ## Features
//!
//! - **Fluent drafts**: chained mutators that never fail, except attachment
//!   ingestion which reports unreadable files immediately
//! - **Attachment resolution**: local files, streamed files, inline strings,
//!   remote references and raw MIME parts normalized into one descriptor
//! - **Send-time validation**: address syntax filtering, deduplication,
//!   default sender and default CC fallbacks
//! - **Pluggable collaborators**: any [`Transport`] and any [`Renderer`];
//!   a Jinja-family renderer, an in-memory transport and a JSON file
//!   transport ship with the crate
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailr::{JinjaRenderer, Mailer, MailerConfig, MemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> mailr::Result<()> {
//!     let config = MailerConfig::default();
//!     let renderer = JinjaRenderer::from_dir(&config.template_path);
//!     let mailer = Mailer::new(Arc::new(MemoryTransport::new()), Arc::new(renderer), config);
//!
//!     mailer
//!         .create_message()
//!         .to("receiver@example.com")
//!         .subject("A simple email")
//!         .template("simple")
//!         .param("title", "A great title")
//!         .send()
//!         .await
//! }
//! ```
//!
//! ## Message lifecycle
//!
//! ```text
//! ┌─────────┐  send()   ┌─────────┐  delivered   ┌──────┐
//! │  Draft  │ ────────→ │ Sending │ ───────────→ │ Sent │
//! └─────────┘           └─────────┘              └──────┘
//!      ↑                     │
//!      └── validation ───────┤ render / transport error
//!          error             ↓
//!                       ┌────────┐
//!                       │ Failed │
//!                       └────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
pub mod attachment;
mod config;
mod error;
mod mailer;
mod message;
pub mod pipeline;
pub mod renderer;
pub mod transport;

pub use address::{AddressValidator, DEFAULT_ADDRESS_PATTERN, IntoAddresses};
pub use attachment::{
    Attachment, AttachmentError, AttachmentKind, AttachmentOptions, AttachmentResolver,
    AttachmentSource, AttachmentSpec, FileAccess, LocalFiles,
};
pub use config::{MailerConfig, MessageConfig};
pub use error::{Error, Result};
pub use mailer::Mailer;
pub use message::{Draft, Message, MessageState};
pub use pipeline::{OutgoingMessage, SendPipeline, ValidationError};
pub use renderer::{Context, JinjaRenderer, RenderError, Renderer};
pub use transport::{JsonFileTransport, MemoryTransport, Transport, TransportError};
