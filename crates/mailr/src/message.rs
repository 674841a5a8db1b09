//! Fluent message drafts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::address::IntoAddresses;
use crate::attachment::{Attachment, AttachmentError, AttachmentOptions, AttachmentResolver, AttachmentSpec};
use crate::error::{Error, Result};
use crate::pipeline::{OutgoingMessage, SendPipeline};
use crate::renderer::Context;
use crate::transport::{Transport, TransportError};

/// Fields accumulated by a [`Message`] before it is sent.
///
/// Recipient lists keep duplicates and invalid entries; they are only
/// filtered when the message is prepared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    /// Sender addresses.
    pub from: Vec<String>,
    /// Primary recipients.
    pub to: Vec<String>,
    /// Carbon copy recipients.
    pub cc: Vec<String>,
    /// Blind carbon copy recipients.
    pub bcc: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Template reference, without extension.
    pub template: String,
    /// Template parameters.
    pub context: Context,
    /// Resolved attachments.
    pub attachments: Vec<Attachment>,
    /// Custom headers.
    pub headers: BTreeMap<String, String>,
}

/// Lifecycle of a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageState {
    /// Accepting mutations.
    #[default]
    Draft,
    /// Handed to the pipeline.
    Sending,
    /// Delivered by the transport.
    Sent,
    /// Rendering or delivery failed.
    Failed(String),
}

impl MessageState {
    /// Returns true once a send attempt has finished, successfully or not.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed(_))
    }
}

/// A message under construction.
///
/// Created by [`Mailer::create_message`](crate::Mailer::create_message).
/// Mutators return `&mut Self` so calls can be chained; none of them fail
/// except attachment ingestion.
pub struct Message {
    pipeline: SendPipeline,
    transport: Arc<dyn Transport>,
    resolver: AttachmentResolver,
    draft: Draft,
    state: MessageState,
}

impl Message {
    pub(crate) fn new(
        pipeline: SendPipeline,
        transport: Arc<dyn Transport>,
        resolver: AttachmentResolver,
    ) -> Self {
        Self {
            pipeline,
            transport,
            resolver,
            draft: Draft::default(),
            state: MessageState::Draft,
        }
    }

    /// Appends sender addresses.
    pub fn from(&mut self, addresses: impl IntoAddresses) -> &mut Self {
        self.draft.from.extend(addresses.into_addresses());
        self
    }

    /// Appends primary recipients.
    pub fn to(&mut self, addresses: impl IntoAddresses) -> &mut Self {
        self.draft.to.extend(addresses.into_addresses());
        self
    }

    /// Appends carbon copy recipients.
    pub fn cc(&mut self, addresses: impl IntoAddresses) -> &mut Self {
        self.draft.cc.extend(addresses.into_addresses());
        self
    }

    /// Appends blind carbon copy recipients.
    pub fn bcc(&mut self, addresses: impl IntoAddresses) -> &mut Self {
        self.draft.bcc.extend(addresses.into_addresses());
        self
    }

    /// Sets the subject. An empty subject is ignored.
    pub fn subject(&mut self, subject: impl Into<String>) -> &mut Self {
        let subject = subject.into();
        if subject.is_empty() {
            debug!("Ignoring empty subject");
        } else {
            self.draft.subject = subject;
        }
        self
    }

    /// Sets the template reference. An empty reference is ignored.
    pub fn template(&mut self, template: impl Into<String>) -> &mut Self {
        let template = template.into();
        if template.is_empty() {
            debug!("Ignoring empty template");
        } else {
            self.draft.template = template;
        }
        self
    }

    /// Merges template parameters into the context; later keys win.
    ///
    /// `params` must serialize to an object. Anything else is logged and
    /// ignored.
    pub fn params(&mut self, params: impl Serialize) -> &mut Self {
        match serde_json::to_value(params) {
            Ok(Value::Object(map)) => self.draft.context.extend(map),
            Ok(Value::Null) => {}
            Ok(other) => warn!(%other, "Ignoring template parameters that are not an object"),
            Err(e) => warn!(%e, "Ignoring template parameters that do not serialize"),
        }
        self
    }

    /// Sets one template parameter.
    pub fn param(&mut self, key: impl Into<String>, value: impl Serialize) -> &mut Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.draft.context.insert(key, value);
            }
            Err(e) => warn!(%key, %e, "Ignoring template parameter that does not serialize"),
        }
        self
    }

    /// Sets a custom header, replacing any previous value.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.draft.headers.insert(name.into(), value.into());
        self
    }

    /// Sets several custom headers.
    pub fn headers<I, K, V>(&mut self, headers: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.draft
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Resolves and appends one attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the attachment cannot be resolved. The attachment
    /// list is left unchanged.
    pub fn attachment(
        &mut self,
        content: &str,
        name: Option<&str>,
        options: &AttachmentOptions,
    ) -> std::result::Result<&mut Self, AttachmentError> {
        let attachment = self.resolver.resolve(content, name, options)?;
        self.draft.attachments.push(attachment);
        Ok(self)
    }

    /// Resolves and appends several attachments, in order.
    ///
    /// # Errors
    ///
    /// Returns the first resolution error. Nothing is appended unless every
    /// attachment resolves.
    pub fn attachments(
        &mut self,
        specs: impl IntoIterator<Item = AttachmentSpec>,
    ) -> std::result::Result<&mut Self, AttachmentError> {
        let resolved = specs
            .into_iter()
            .map(|spec| {
                self.resolver
                    .resolve(&spec.content, spec.name.as_deref(), &spec.options)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.draft.attachments.extend(resolved);
        Ok(self)
    }

    /// Returns the accumulated draft.
    #[must_use]
    pub const fn draft(&self) -> &Draft {
        &self.draft
    }

    /// Returns the message state.
    #[must_use]
    pub const fn state(&self) -> &MessageState {
        &self.state
    }

    /// Normalizes and renders the draft without sending it.
    ///
    /// # Errors
    ///
    /// Returns a validation or render error, see [`SendPipeline::prepare`].
    pub fn prepare(&self) -> Result<OutgoingMessage> {
        self.pipeline.prepare(&self.draft)
    }

    /// Prepares the message and hands it to the transport.
    ///
    /// The draft is kept, so the message can be sent again.
    ///
    /// # Errors
    ///
    /// Returns a validation, render or transport error.
    pub async fn send(&mut self) -> Result<()> {
        let outgoing = self.begin()?;
        let result = self.transport.send_mail(&outgoing).await;
        self.finish(&outgoing, result)
    }

    /// Prepares the message and delivers it in the background, passing the
    /// transport outcome to `callback`.
    ///
    /// Delivery runs on the current Tokio runtime. The message stays in
    /// [`MessageState::Sending`] since the outcome is only seen by the
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns a validation or render error before anything is spawned, or
    /// [`Error::NoRuntime`] outside of a Tokio runtime.
    pub fn send_with<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<(), TransportError>) + Send + 'static,
    {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let outgoing = self.begin()?;
        let transport = Arc::clone(&self.transport);

        handle.spawn(async move {
            let result = transport.send_mail(&outgoing).await;
            match &result {
                Ok(()) => info!(subject = %outgoing.subject, "Message sent"),
                Err(e) => warn!(%e, "Message delivery failed"),
            }
            callback(result);
        });
        Ok(())
    }

    /// Sends the message, then closes the transport if delivery succeeded.
    ///
    /// The transport is left open when sending fails.
    ///
    /// # Errors
    ///
    /// Returns a validation, render or transport error.
    pub async fn send_and_close(&mut self) -> Result<()> {
        self.send().await?;
        self.transport.close().await;
        Ok(())
    }

    /// Sets the template, merges `params` and sends.
    ///
    /// # Errors
    ///
    /// Returns a validation, render or transport error.
    pub async fn send_template(
        &mut self,
        template: impl Into<String>,
        params: impl Serialize,
    ) -> Result<()> {
        self.template(template).params(params);
        self.send().await
    }

    fn begin(&mut self) -> Result<OutgoingMessage> {
        self.state = MessageState::Sending;
        self.pipeline.prepare(&self.draft).inspect_err(|e| self.fail(e))
    }

    fn finish(
        &mut self,
        outgoing: &OutgoingMessage,
        result: std::result::Result<(), TransportError>,
    ) -> Result<()> {
        match result {
            Ok(()) => {
                info!(subject = %outgoing.subject, "Message sent");
                self.state = MessageState::Sent;
                Ok(())
            }
            Err(e) => {
                let error = Error::from(e);
                self.fail(&error);
                Err(error)
            }
        }
    }

    fn fail(&mut self, error: &Error) {
        warn!(%error, "Send failed");
        self.state = match error {
            Error::Validation(_) => MessageState::Draft,
            other => MessageState::Failed(other.to_string()),
        };
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("draft", &self.draft)
            .field("state", &self.state)
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
    use crate::config::MailerConfig;
    use crate::renderer::JinjaRenderer;
    use crate::transport::MemoryTransport;
    use crate::{AttachmentKind, Mailer};
    use serde_json::json;

    fn mailer(transport: Arc<MemoryTransport>) -> Mailer {
        let renderer = JinjaRenderer::from_templates([("t.html", "<b>{{ title }}</b>")]).unwrap();
        Mailer::new(transport, Arc::new(renderer), MailerConfig::default())
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_recipients_accumulate_in_order() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message
            .to("a@x.dev")
            .to(["b@x.dev", "a@x.dev"])
            .cc(vec!["c@x.dev".to_string()])
            .bcc("d@x.dev")
            .from("me@x.dev");

        let draft = message.draft();
        assert_eq!(draft.to, strings(&["a@x.dev", "b@x.dev", "a@x.dev"]));
        assert_eq!(draft.cc, strings(&["c@x.dev"]));
        assert_eq!(draft.bcc, strings(&["d@x.dev"]));
        assert_eq!(draft.from, strings(&["me@x.dev"]));
    }

    #[test]
    fn test_empty_subject_and_template_are_ignored() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message.subject("hi").template("t").subject("").template("");
        assert_eq!(message.draft().subject, "hi");
        assert_eq!(message.draft().template, "t");
    }

    #[test]
    fn test_params_merge_and_param_overwrite() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message
            .params(json!({"a": 1, "b": 1}))
            .params(json!({"a": 2}))
            .param("c", "three")
            .param("c", 3)
            .params(json!(["not", "an", "object"]));

        assert_eq!(
            Value::Object(message.draft().context.clone()),
            json!({"a": 2, "b": 1, "c": 3})
        );
    }

    #[test]
    fn test_headers() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message
            .header("X-Priority", "1")
            .headers([("X-Campaign", "spring"), ("X-Priority", "3")]);
        let headers = &message.draft().headers;
        assert_eq!(headers.get("X-Priority").map(String::as_str), Some("3"));
        assert_eq!(headers.get("X-Campaign").map(String::as_str), Some("spring"));
    }

    #[test]
    fn test_attachment_failure_keeps_list() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message
            .attachment(
                "hello",
                Some("hello.txt"),
                &AttachmentOptions::new().kind(AttachmentKind::Inline),
            )
            .unwrap();

        let err = message
            .attachment("missing/file.png", None, &AttachmentOptions::new())
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Unreadable { .. }));
        assert_eq!(message.draft().attachments.len(), 1);
    }

    #[test]
    fn test_attachments_batch_is_atomic() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        let inline = AttachmentOptions::new().kind(AttachmentKind::Inline);
        let err = message
            .attachments([
                AttachmentSpec::new("a").name("a.txt").options(inline.clone()),
                AttachmentSpec::new(""),
            ])
            .unwrap_err();
        assert!(matches!(err, AttachmentError::MissingContent));
        assert!(message.draft().attachments.is_empty());

        message
            .attachments([
                AttachmentSpec::new("a").name("a.txt").options(inline.clone()),
                AttachmentSpec::new("b").name("b.txt").options(inline),
            ])
            .unwrap();
        let names: Vec<_> = message
            .draft()
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let transport = Arc::new(MemoryTransport::new());
        let mut message = mailer(Arc::clone(&transport)).create_message();
        assert_eq!(message.state(), &MessageState::Draft);

        message.subject("hi").template("t");
        let err = message.send().await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(message.state(), &MessageState::Draft);

        message.to("a@x.dev");
        transport.fail_with("connection refused");
        message.send().await.unwrap_err();
        assert_eq!(
            message.state(),
            &MessageState::Failed("transport: connection refused".into())
        );
        assert!(message.state().is_finished());

        transport.recover();
        message.send().await.unwrap();
        assert_eq!(message.state(), &MessageState::Sent);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_send_with_requires_runtime() {
        let mut message = mailer(Arc::new(MemoryTransport::new())).create_message();
        message.to("a@x.dev").subject("hi").template("t");
        let err = message.send_with(|_| {}).unwrap_err();
        assert!(matches!(err, Error::NoRuntime));
        assert_eq!(message.state(), &MessageState::Draft);
    }
}
