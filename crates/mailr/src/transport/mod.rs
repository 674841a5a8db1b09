//! Delivery transports.
//!
//! A [`Transport`] receives the final [`OutgoingMessage`] and delivers it.
//! The pipeline never interprets delivery failures; they reach the caller
//! wrapped in an opaque [`TransportError`].

mod file;
mod memory;

pub use file::JsonFileTransport;
pub use memory::MemoryTransport;

use async_trait::async_trait;

use crate::pipeline::OutgoingMessage;

/// Opaque delivery failure reported by a transport.
#[derive(Debug, thiserror::Error)]
#[error("transport: {source}")]
pub struct TransportError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// Wraps a transport-specific error.
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Returns the transport-specific error if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Unwraps the transport-specific error.
    #[must_use]
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync> {
        self.source
    }
}

/// Message delivery mechanism.
///
/// Transports are shared by every message created from the same
/// [`Mailer`](crate::Mailer) and may be used concurrently.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one message.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    async fn send_mail(&self, message: &OutgoingMessage) -> Result<(), TransportError>;

    /// Releases transport resources.
    async fn close(&self) {}
}
