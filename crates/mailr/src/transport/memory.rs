//! In-memory transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Transport, TransportError};
use crate::pipeline::OutgoingMessage;

/// Transport that keeps delivered messages in memory.
///
/// Useful in tests and for dry runs. It can be primed to fail every delivery
/// and remembers whether it was closed.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    failure: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following delivery fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Makes deliveries succeed again.
    pub fn recover(&self) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a copy of every delivered message, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the most recently delivered message.
    #[must_use]
    pub fn last(&self) -> Option<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Returns true once [`Transport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_mail(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = failure {
            debug!(%reason, "Memory transport rejecting message");
            return Err(TransportError::new(reason));
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        debug!(subject = %message.subject, "Memory transport stored message");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        info!("Memory transport closed");
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

    fn message(subject: &str) -> OutgoingMessage {
        OutgoingMessage {
            from: vec!["a@x.dev".into()],
            to: vec!["b@x.dev".into()],
            subject: subject.into(),
            html: "<p>hi</p>".into(),
            ..OutgoingMessage::default()
        }
    }

    #[tokio::test]
    async fn test_records_messages() {
        let transport = MemoryTransport::new();
        transport.send_mail(&message("one")).await.unwrap();
        transport.send_mail(&message("two")).await.unwrap();

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.last().unwrap().subject, "two");
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_primed_failure() {
        let transport = MemoryTransport::new();
        transport.fail_with("mailbox full");

        let err = transport.send_mail(&message("one")).await.unwrap_err();
        assert_eq!(err.to_string(), "transport: mailbox full");
        assert!(transport.sent().is_empty());

        transport.recover();
        transport.send_mail(&message("two")).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_close() {
        let transport = MemoryTransport::new();
        transport.close().await;
        assert!(transport.is_closed());
    }
}
