//! Send-time normalization, rendering and assembly.
//!
//! [`SendPipeline::prepare`] turns a [`Draft`] into the [`OutgoingMessage`]
//! handed to the transport:
//!
//! 1. an empty `from` list receives the configured default sender;
//! 2. every recipient list is filtered through the address pattern and
//!    deduplicated, keeping first occurrences;
//! 3. an empty `cc` list receives the configured default CC before it is
//!    filtered, so an invalid default is dropped;
//! 4. `from`, `to`, template and subject must be non-empty;
//! 5. the HTML body is rendered (required), then the text body (optional:
//!    a missing text template yields no text body);
//! 6. headers are completed with the subject.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::AddressValidator;
use crate::attachment::Attachment;
use crate::config::{MailerConfig, MessageConfig};
use crate::error::Result;
use crate::message::Draft;
use crate::renderer::Renderer;

/// Required field missing after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No valid sender remains.
    #[error("send pipeline: no valid `from` address")]
    EmptyFrom,
    /// No valid primary recipient remains.
    #[error("send pipeline: no valid `to` address")]
    EmptyTo,
    /// No template was set.
    #[error("send pipeline: missing `template`")]
    MissingTemplate,
    /// No subject was set.
    #[error("send pipeline: missing `subject`")]
    MissingSubject,
}

impl ValidationError {
    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyFrom => "from",
            Self::EmptyTo => "to",
            Self::MissingTemplate => "template",
            Self::MissingSubject => "subject",
        }
    }
}

/// Final message descriptor handed to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
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
    /// Rendered HTML body.
    pub html: String,
    /// Rendered plain text body, if a text template exists.
    pub text: Option<String>,
    /// Attachments in the order they were added.
    pub attachments: Vec<Attachment>,
    /// Message headers; always contains `subject`.
    pub headers: BTreeMap<String, String>,
}

impl OutgoingMessage {
    /// Returns every envelope recipient (to, cc, bcc) in order.
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

struct Recipients {
    from: Vec<String>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
}

/// Normalizes and renders drafts.
///
/// Built once per message from the mailer configuration; the renderer is
/// shared with every other message of the same mailer.
#[derive(Clone)]
pub struct SendPipeline {
    renderer: Arc<dyn Renderer>,
    validator: AddressValidator,
    defaults: MessageConfig,
    html_extension: String,
    text_extension: String,
}

impl SendPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>, config: &MailerConfig, defaults: MessageConfig) -> Self {
        Self {
            renderer,
            validator: AddressValidator::new(&defaults.address_pattern),
            defaults,
            html_extension: config.html_extension.clone(),
            text_extension: config.text_extension.clone(),
        }
    }

    /// Returns the message defaults in effect.
    #[must_use]
    pub const fn defaults(&self) -> &MessageConfig {
        &self.defaults
    }

    /// Builds the final descriptor from a draft. The draft is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if a required field is empty after
    /// normalization, or [`RenderError`](crate::RenderError) if the HTML
    /// template cannot be rendered or the text template fails for any reason
    /// other than being absent.
    pub fn prepare(&self, draft: &Draft) -> Result<OutgoingMessage> {
        let Recipients { from, to, cc, bcc } = self.normalize(draft)?;

        if draft.template.is_empty() {
            return Err(ValidationError::MissingTemplate.into());
        }
        if draft.subject.is_empty() {
            return Err(ValidationError::MissingSubject.into());
        }

        let html_template = template_file(&draft.template, &self.html_extension);
        let html = self.renderer.render(&html_template, &draft.context)?;

        let text_template = template_file(&draft.template, &self.text_extension);
        let text = match self.renderer.render(&text_template, &draft.context) {
            Ok(text) => Some(text),
            Err(e) if e.is_not_found() => {
                debug!(template = %text_template, "No text template, sending HTML only");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut headers = draft.headers.clone();
        headers.insert("subject".to_string(), draft.subject.clone());

        Ok(OutgoingMessage {
            from,
            to,
            cc,
            bcc,
            subject: draft.subject.clone(),
            html,
            text,
            attachments: draft.attachments.clone(),
            headers,
        })
    }

    fn normalize(&self, draft: &Draft) -> std::result::Result<Recipients, ValidationError> {
        let from = if draft.from.is_empty() {
            debug!(default = %self.defaults.default_from, "Using default sender");
            self.validator
                .normalize(std::slice::from_ref(&self.defaults.default_from))
        } else {
            self.validator.normalize(&draft.from)
        };
        if from.is_empty() {
            return Err(ValidationError::EmptyFrom);
        }

        let to = self.validator.normalize(&draft.to);
        if to.is_empty() {
            return Err(ValidationError::EmptyTo);
        }

        let cc = match (&self.defaults.default_cc, draft.cc.is_empty()) {
            (Some(default_cc), true) => self.validator.normalize(std::slice::from_ref(default_cc)),
            _ => self.validator.normalize(&draft.cc),
        };

        let bcc = self.validator.normalize(&draft.bcc);

        Ok(Recipients { from, to, cc, bcc })
    }
}

impl std::fmt::Debug for SendPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendPipeline")
            .field("defaults", &self.defaults)
            .field("html_extension", &self.html_extension)
            .field("text_extension", &self.text_extension)
            .finish_non_exhaustive()
    }
}

/// Appends the extension unless the reference already carries it.
fn template_file(template: &str, extension: &str) -> String {
    if template.ends_with(extension) {
        template.to_string()
    } else {
        format!("{template}{extension}")
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
    use crate::Error;
    use crate::renderer::{Context, JinjaRenderer, RenderError};
    use proptest::prelude::*;

    fn pipeline(defaults: MessageConfig) -> SendPipeline {
        let renderer = JinjaRenderer::from_templates([
            ("t.html", "<p>{{ greeting }}</p>"),
            ("t.txt", "{{ greeting }}"),
            ("html-only.html", "<p>only</p>"),
        ])
        .unwrap();
        SendPipeline::new(Arc::new(renderer), &MailerConfig::default(), defaults)
    }

    fn draft() -> Draft {
        Draft {
            to: vec!["a@x.dev".into()],
            subject: "hi".into(),
            template: "t".into(),
            ..Draft::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_default_from_applied() {
        let defaults = MessageConfig::default().default_from("no-reply@x.dev");
        let message = pipeline(defaults).prepare(&draft()).unwrap();
        assert_eq!(message.from, strings(&["no-reply@x.dev"]));
        assert_eq!(message.to, strings(&["a@x.dev"]));
        assert!(message.cc.is_empty());
    }

    #[test]
    fn test_malformed_default_from() {
        let defaults = MessageConfig::default().default_from("nobody");
        let err = pipeline(defaults).prepare(&draft()).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyFrom)));
    }

    #[test]
    fn test_explicit_from_skips_default() {
        let mut draft = draft();
        draft.from = strings(&["me@x.dev", "me@x.dev"]);
        let message = pipeline(MessageConfig::default()).prepare(&draft).unwrap();
        assert_eq!(message.from, strings(&["me@x.dev"]));
    }

    #[test]
    fn test_missing_to() {
        let mut draft = draft();
        draft.to.clear();
        let err = pipeline(MessageConfig::default()).prepare(&draft).unwrap_err();
        match err {
            Error::Validation(e) => assert_eq!(e.field(), "to"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_to_only() {
        let mut draft = draft();
        draft.to = strings(&["nope", ""]);
        let err = pipeline(MessageConfig::default()).prepare(&draft).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::EmptyTo)));
    }

    #[test]
    fn test_missing_template_and_subject() {
        let mut no_template = draft();
        no_template.template.clear();
        let err = pipeline(MessageConfig::default())
            .prepare(&no_template)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingTemplate)));

        let mut no_subject = draft();
        no_subject.subject.clear();
        let err = pipeline(MessageConfig::default())
            .prepare(&no_subject)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::MissingSubject)));
        assert_eq!(err.to_string(), "send pipeline: missing `subject`");
    }

    #[test]
    fn test_default_cc_only_when_empty() {
        let defaults = MessageConfig::default().default_cc("audit@x.dev");
        let message = pipeline(defaults.clone()).prepare(&draft()).unwrap();
        assert_eq!(message.cc, strings(&["audit@x.dev"]));

        let mut with_cc = draft();
        with_cc.cc = strings(&["boss@x.dev"]);
        let message = pipeline(defaults).prepare(&with_cc).unwrap();
        assert_eq!(message.cc, strings(&["boss@x.dev"]));
    }

    #[test]
    fn test_invalid_default_cc_is_dropped() {
        let defaults = MessageConfig::default().default_cc("not an address");
        let message = pipeline(defaults).prepare(&draft()).unwrap();
        assert!(message.cc.is_empty());
    }

    #[test]
    fn test_renders_both_bodies() {
        let mut draft = draft();
        draft
            .context
            .insert("greeting".into(), serde_json::json!("hello"));
        draft.headers.insert("X-Campaign".into(), "spring".into());

        let message = pipeline(MessageConfig::default()).prepare(&draft).unwrap();
        assert_eq!(message.html, "<p>hello</p>");
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert_eq!(message.headers.get("subject").map(String::as_str), Some("hi"));
        assert_eq!(
            message.headers.get("X-Campaign").map(String::as_str),
            Some("spring")
        );
    }

    #[test]
    fn test_missing_text_template_is_optional() {
        let mut draft = draft();
        draft.template = "html-only".into();
        let message = pipeline(MessageConfig::default()).prepare(&draft).unwrap();
        assert_eq!(message.html, "<p>only</p>");
        assert!(message.text.is_none());
    }

    #[test]
    fn test_missing_html_template_is_fatal() {
        let mut draft = draft();
        draft.template = "absent".into();
        let err = pipeline(MessageConfig::default()).prepare(&draft).unwrap_err();
        assert!(matches!(err, Error::Render(ref e) if e.is_not_found()));
    }

    struct BrokenText;

    impl Renderer for BrokenText {
        fn render(&self, template: &str, _context: &Context) -> std::result::Result<String, RenderError> {
            if template.ends_with(".html") {
                Ok("<p>ok</p>".into())
            } else {
                Err(RenderError::render(template, "undefined filter"))
            }
        }
    }

    #[test]
    fn test_text_render_failure_propagates() {
        let pipeline = SendPipeline::new(
            Arc::new(BrokenText),
            &MailerConfig::default(),
            MessageConfig::default(),
        );
        let err = pipeline.prepare(&draft()).unwrap_err();
        assert!(matches!(err, Error::Render(ref e) if !e.is_not_found()));
    }

    #[test]
    fn test_template_file() {
        assert_eq!(template_file("simple", ".html"), "simple.html");
        assert_eq!(template_file("simple.html", ".html"), "simple.html");
        assert_eq!(template_file("mail/welcome", ".txt"), "mail/welcome.txt");
    }

    #[test]
    fn test_recipients_iterates_all_lists() {
        let message = OutgoingMessage {
            to: strings(&["a@x.dev"]),
            cc: strings(&["b@x.dev"]),
            bcc: strings(&["c@x.dev"]),
            ..OutgoingMessage::default()
        };
        assert_eq!(
            message.recipients().collect::<Vec<_>>(),
            vec!["a@x.dev", "b@x.dev", "c@x.dev"]
        );
    }

    proptest! {
        #[test]
        fn prop_dedup_keeps_first_occurrence(picks in proptest::collection::vec(0usize..5, 1..20)) {
            let pool = ["a@x.dev", "b@x.dev", "c@x.dev", "d@x.dev", "e@x.dev"];
            let mut draft = draft();
            draft.to = picks.iter().map(|i| pool[*i].to_string()).collect();

            let message = pipeline(MessageConfig::default()).prepare(&draft).unwrap();

            let mut expected: Vec<String> = Vec::new();
            for address in &draft.to {
                if !expected.contains(address) {
                    expected.push(address.clone());
                }
            }
            prop_assert_eq!(message.to, expected);
        }
    }
}
