//! Mailer facade.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::attachment::{AttachmentResolver, FileAccess, LocalFiles};
use crate::config::{MailerConfig, MessageConfig};
use crate::message::Message;
use crate::pipeline::SendPipeline;
use crate::renderer::{JinjaRenderer, Renderer};
use crate::transport::Transport;

/// Entry point owning the transport and renderer shared by every message.
///
/// Cloning is cheap; clones share the same collaborators.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    renderer: Arc<dyn Renderer>,
    files: Arc<dyn FileAccess>,
    config: MailerConfig,
}

impl Mailer {
    /// Creates a mailer from explicit collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn Renderer>,
        config: MailerConfig,
    ) -> Self {
        Self {
            transport,
            renderer,
            files: Arc::new(LocalFiles),
            config,
        }
    }

    /// Creates a mailer rendering templates from `config.template_path`.
    #[must_use]
    pub fn from_config(transport: Arc<dyn Transport>, config: MailerConfig) -> Self {
        let renderer = JinjaRenderer::from_dir(&config.template_path);
        Self::new(transport, Arc::new(renderer), config)
    }

    /// Replaces the file access used to probe attachment paths.
    #[must_use]
    pub fn with_files(mut self, files: Arc<dyn FileAccess>) -> Self {
        self.files = files;
        self
    }

    /// Creates an empty message using the configured message defaults.
    #[must_use]
    pub fn create_message(&self) -> Message {
        self.create_message_with(self.config.message.clone())
    }

    /// Creates an empty message with specific defaults.
    #[must_use]
    pub fn create_message_with(&self, defaults: MessageConfig) -> Message {
        let pipeline = SendPipeline::new(Arc::clone(&self.renderer), &self.config, defaults);
        let resolver = AttachmentResolver::new(Arc::clone(&self.files));
        Message::new(pipeline, Arc::clone(&self.transport), resolver)
    }

    /// Returns the shared transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MailerConfig {
        &self.config
    }

    /// Closes the transport.
    pub async fn close(&self) {
        self.transport.close().await;
        info!("Mailer closed");
    }
}

impl fmt::Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailer")
            .field("config", &self.config)
            .finish_non_exhaustive()
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
    use crate::message::MessageState;
    use crate::transport::MemoryTransport;

    #[tokio::test]
    async fn test_concurrent_sends_share_transport() {
        let transport = Arc::new(MemoryTransport::new());
        let renderer = JinjaRenderer::from_templates([("t.html", "hi")]).unwrap();
        let mailer = Mailer::new(transport.clone(), Arc::new(renderer), MailerConfig::default());

        let mut first = mailer.create_message();
        first.to("a@x.dev").subject("one").template("t");
        let mut second = mailer.clone().create_message();
        second.to("b@x.dev").subject("two").template("t");

        let (first_sent, second_sent) = tokio::join!(first.send(), second.send());
        first_sent.unwrap();
        second_sent.unwrap();

        let mut subjects: Vec<String> = transport.sent().into_iter().map(|m| m.subject).collect();
        subjects.sort();
        assert_eq!(subjects, ["one", "two"]);
        assert_eq!(first.state(), &MessageState::Sent);
        assert_eq!(second.state(), &MessageState::Sent);

        mailer.close().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_create_message_with_defaults() {
        let transport = Arc::new(MemoryTransport::new());
        let renderer = JinjaRenderer::from_templates([("t.html", "hi")]).unwrap();
        let mailer = Mailer::new(transport.clone(), Arc::new(renderer), MailerConfig::default());

        let mut message =
            mailer.create_message_with(MessageConfig::default().default_from("ops@x.dev"));
        message.to("a@x.dev").subject("s").template("t");
        message.send().await.unwrap();
        assert_eq!(transport.last().unwrap().from, vec!["ops@x.dev".to_string()]);
    }

    #[tokio::test]
    async fn test_from_config_reads_template_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("welcome.html"), "<p>Hi {{ name }}</p>").unwrap();
        std::fs::write(dir.path().join("welcome.txt"), "Hi {{ name }}").unwrap();

        let transport = Arc::new(MemoryTransport::new());
        let config = MailerConfig {
            template_path: dir.path().to_path_buf(),
            ..MailerConfig::default()
        };
        let mailer = Mailer::from_config(transport.clone(), config);

        let mut message = mailer.create_message();
        message
            .to("a@x.dev")
            .subject("Welcome")
            .send_template("welcome", serde_json::json!({"name": "Ada"}))
            .await
            .unwrap();

        let sent = transport.last().unwrap();
        assert_eq!(sent.html, "<p>Hi Ada</p>");
        assert_eq!(sent.text.as_deref(), Some("Hi Ada"));
    }
}
