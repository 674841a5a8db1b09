//! Integration tests for the mailer.
//!
//! These tests drive the public API end to end against an in-memory
//! renderer and the memory transport.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use serde_json::json;
use tokio::sync::oneshot;

use mailr::{
    AttachmentError, AttachmentKind, AttachmentOptions, AttachmentSource, AttachmentSpec, Error,
    JinjaRenderer, JsonFileTransport, Mailer, MailerConfig, MemoryTransport, MessageConfig,
    MessageState, OutgoingMessage, Transport,
};

fn renderer() -> JinjaRenderer {
    JinjaRenderer::from_templates([
        ("t.html", "<h1>{{ title }}</h1>"),
        ("t.txt", "{{ title }}"),
        ("html-only.html", "<p>{{ body }}</p>"),
    ])
    .unwrap()
}

fn setup(defaults: MessageConfig) -> (Mailer, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let config = MailerConfig {
        message: defaults,
        ..MailerConfig::default()
    };
    let mailer = Mailer::new(transport.clone(), Arc::new(renderer()), config);
    (mailer, transport)
}

#[test]
fn test_default_sender_is_applied() {
    let (mailer, _) = setup(MessageConfig::default().default_from("no-reply@x.dev"));
    let mut message = mailer.create_message();
    message.to("a@x.dev").subject("hi").template("t");

    let prepared = message.prepare().unwrap();
    assert_eq!(prepared.from, vec!["no-reply@x.dev".to_string()]);
    assert_eq!(prepared.to, vec!["a@x.dev".to_string()]);
}

#[test]
fn test_missing_recipient_is_reported() {
    let (mailer, _) = setup(MessageConfig::default());
    let mut message = mailer.create_message();
    message.subject("hi").template("t");

    match message.prepare().unwrap_err() {
        Error::Validation(e) => assert_eq!(e.field(), "to"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unreadable_attachment_fails_immediately() {
    let (mailer, _) = setup(MessageConfig::default());
    let mut message = mailer.create_message();

    let err = message
        .attachment("missing/file.png", None, &AttachmentOptions::new())
        .unwrap_err();
    assert!(matches!(err, AttachmentError::Unreadable { .. }));
    assert!(message.draft().attachments.is_empty());
}

#[test]
fn test_text_body_is_optional_but_html_is_not() {
    let (mailer, _) = setup(MessageConfig::default());

    let mut message = mailer.create_message();
    message
        .to("a@x.dev")
        .subject("hi")
        .template("html-only")
        .param("body", "only html");
    let prepared = message.prepare().unwrap();
    assert_eq!(prepared.html, "<p>only html</p>");
    assert!(prepared.text.is_none());

    let mut message = mailer.create_message();
    message.to("a@x.dev").subject("hi").template("text-only");
    assert!(matches!(
        message.prepare().unwrap_err(),
        Error::Render(ref e) if e.is_not_found()
    ));
}

#[tokio::test]
async fn test_send_delivers_final_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.csv");
    std::fs::write(&report, "a,b\n1,2\n").unwrap();

    let (mailer, transport) = setup(MessageConfig::default().default_cc("audit@x.dev"));
    let mut message = mailer.create_message();
    message
        .from("Sender <sender@x.dev>")
        .to(["a@x.dev", "invalid", "b@x.dev", "a@x.dev"])
        .bcc("hidden@x.dev")
        .subject("Report")
        .template("t")
        .params(json!({"title": "Weekly"}))
        .header("X-Campaign", "weekly")
        .attachment(report.to_str().unwrap(), None, &AttachmentOptions::new())
        .unwrap();
    message.send().await.unwrap();

    let sent = transport.last().unwrap();
    assert_eq!(sent.from, vec!["Sender <sender@x.dev>".to_string()]);
    assert_eq!(sent.to, vec!["a@x.dev".to_string(), "b@x.dev".to_string()]);
    assert_eq!(sent.cc, vec!["audit@x.dev".to_string()]);
    assert_eq!(sent.bcc, vec!["hidden@x.dev".to_string()]);
    assert_eq!(sent.html, "<h1>Weekly</h1>");
    assert_eq!(sent.text.as_deref(), Some("Weekly"));
    assert_eq!(sent.headers.get("subject").map(String::as_str), Some("Report"));
    assert_eq!(sent.headers.get("X-Campaign").map(String::as_str), Some("weekly"));
    assert_eq!(sent.attachments.len(), 1);
    assert_eq!(sent.attachments[0].filename, "report.csv");
    assert_eq!(
        sent.attachments[0].source,
        AttachmentSource::LocalPath { path: report }
    );
    assert_eq!(message.state(), &MessageState::Sent);
}

#[tokio::test]
async fn test_params_are_idempotent() {
    let (mailer, transport) = setup(MessageConfig::default());
    let mut message = mailer.create_message();
    message
        .to("a@x.dev")
        .subject("hi")
        .template("t")
        .params(json!({"title": 1}))
        .params(json!({"title": 2}));
    message.send().await.unwrap();
    assert_eq!(transport.last().unwrap().html, "<h1>2</h1>");

    message.param("title", 1).param("title", 2);
    message.send().await.unwrap();
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(transport.last().unwrap().html, "<h1>2</h1>");
}

#[tokio::test]
async fn test_send_and_close_closes_on_success_only() {
    let (mailer, transport) = setup(MessageConfig::default());
    transport.fail_with("421 service not available");

    let mut message = mailer.create_message();
    message.to("a@x.dev").subject("hi").template("t");
    let err = message.send_and_close().await.unwrap_err();
    let Error::Transport(inner) = err else {
        panic!("expected a transport error");
    };
    assert_eq!(inner.to_string(), "transport: 421 service not available");
    assert!(!transport.is_closed());

    transport.recover();
    message.send_and_close().await.unwrap();
    assert!(transport.is_closed());
}

#[tokio::test]
async fn test_send_with_reports_through_callback() {
    let (mailer, transport) = setup(MessageConfig::default());
    let mut message = mailer.create_message();
    message.to("a@x.dev").subject("hi").template("t");

    let (tx, rx) = oneshot::channel();
    message
        .send_with(move |result| {
            let _ = tx.send(result.is_ok());
        })
        .unwrap();
    assert_eq!(message.state(), &MessageState::Sending);
    assert!(rx.await.unwrap());
    assert_eq!(transport.sent().len(), 1);

    transport.fail_with("boom");
    let (tx, rx) = oneshot::channel();
    message
        .send_with(move |result| {
            let _ = tx.send(result.map_err(|e| e.to_string()));
        })
        .unwrap();
    assert_eq!(rx.await.unwrap(), Err("transport: boom".to_string()));
}

#[tokio::test]
async fn test_send_with_returns_preparation_errors() {
    let (mailer, transport) = setup(MessageConfig::default());
    let mut message = mailer.create_message();
    message.to("a@x.dev").template("t");

    let err = message.send_with(|_| panic!("callback must not run")).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_batch_attachments_from_json() {
    let (mailer, transport) = setup(MessageConfig::default());
    let specs: Vec<AttachmentSpec> = serde_json::from_value(json!([
        {"content": "hello", "name": "hello.txt", "options": {"type": "string"}},
        {"content": "https://example.com/logo.png", "name": "logo.png",
         "options": {"type": "href", "cid": "logo", "unknown": true}},
        {"options": {"raw": "Content-Type: text/plain\r\n\r\nraw part"}}
    ]))
    .unwrap();

    let mut message = mailer.create_message();
    message
        .to("a@x.dev")
        .subject("hi")
        .template("t")
        .attachments(specs)
        .unwrap();
    message.send().await.unwrap();

    let sent = transport.last().unwrap();
    let kinds: Vec<_> = sent
        .attachments
        .iter()
        .map(|a| match &a.source {
            AttachmentSource::Inline { .. } => AttachmentKind::Inline.as_str(),
            AttachmentSource::Remote { .. } => AttachmentKind::Href.as_str(),
            AttachmentSource::Raw { .. } => "raw",
            _ => "file",
        })
        .collect();
    assert_eq!(kinds, vec!["string", "href", "raw"]);
    assert_eq!(sent.attachments[1].cid.as_deref(), Some("logo"));
}

#[tokio::test]
async fn test_json_file_transport_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(JsonFileTransport::new(dir.path().join("outbox")));
    let mailer = Mailer::new(transport.clone(), Arc::new(renderer()), MailerConfig::default());

    mailer
        .create_message()
        .to("a@x.dev")
        .subject("hi")
        .send_template("t", json!({"title": "Stored"}))
        .await
        .unwrap();
    transport.close().await;

    let entry = std::fs::read_dir(transport.dir())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let stored: OutgoingMessage =
        serde_json::from_slice(&std::fs::read(entry.path()).unwrap()).unwrap();
    assert_eq!(stored.html, "<h1>Stored</h1>");
    assert_eq!(stored.from, vec!["no-reply@localhost.local".to_string()]);
}
