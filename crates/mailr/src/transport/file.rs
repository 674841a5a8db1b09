//! JSON file transport.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{Transport, TransportError};
use crate::pipeline::OutgoingMessage;

/// Transport that writes each message as a pretty-printed JSON document.
///
/// Files are named `<UTC timestamp>-<uuid>.json` inside the target
/// directory, which is created on first delivery. Nothing is sent over the
/// network.
#[derive(Debug, Clone)]
pub struct JsonFileTransport {
    dir: PathBuf,
}

impl JsonFileTransport {
    /// Creates a transport writing into `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the output directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Transport for JsonFileTransport {
    async fn send_mail(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(TransportError::new)?;

        let name = format!(
            "{}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let json = serde_json::to_vec_pretty(message).map_err(TransportError::new)?;

        tokio::fs::write(&path, json)
            .await
            .map_err(TransportError::new)?;
        info!(path = %path.display(), "Wrote message");
        Ok(())
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

    #[tokio::test]
    async fn test_writes_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let transport = JsonFileTransport::new(dir.path().join("outbox"));

        let message = OutgoingMessage {
            from: vec!["a@x.dev".into()],
            to: vec!["b@x.dev".into()],
            subject: "hi".into(),
            html: "<p>hi</p>".into(),
            ..OutgoingMessage::default()
        };
        transport.send_mail(&message).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(transport.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].extension().unwrap(), "json");

        let written: OutgoingMessage =
            serde_json::from_slice(&std::fs::read(&entries[0]).unwrap()).unwrap();
        assert_eq!(written, message);
    }
}
