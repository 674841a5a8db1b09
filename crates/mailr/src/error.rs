//! Error types for the mailer.

use thiserror::Error;

use crate::attachment::AttachmentError;
use crate::pipeline::ValidationError;
use crate::renderer::RenderError;
use crate::transport::TransportError;

/// Errors that can occur while composing or sending a message.
///
/// Every variant displays the component that produced it (`attachment:`,
/// `send pipeline:`, `renderer:`, `transport:` ...).
#[derive(Debug, Error)]
pub enum Error {
    /// Attachment ingestion failed.
    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    /// Required fields are missing after normalization.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The mandatory HTML body could not be rendered.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// The transport reported a delivery failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Callback delivery was requested outside of a Tokio runtime.
    #[error("send: no async runtime available for callback delivery")]
    NoRuntime,

    /// Configuration file could not be read.
    #[error("config: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON.
    #[error("config: invalid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
