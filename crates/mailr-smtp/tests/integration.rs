//! Integration tests for the SMTP transport.
//!
//! These tests run the transport against a scripted SMTP server bound to a
//! local port.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mailr::{
    AttachmentKind, AttachmentOptions, Error as MailError, JinjaRenderer, Mailer, MailerConfig,
    MessageConfig, MessageState, OutgoingMessage, Transport,
};
use mailr_smtp::{Error, SmtpConfig, SmtpTransport};

/// Server behaviour for one session.
#[derive(Clone)]
struct Script {
    greeting: &'static str,
    ehlo: &'static [&'static str],
    reject_rcpt: Option<&'static str>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: "220 mail.test ESMTP ready",
            ehlo: &["250-mail.test", "250-SIZE 10485760", "250 AUTH PLAIN LOGIN"],
            reject_rcpt: None,
        }
    }
}

/// What the server saw.
#[derive(Debug, Default)]
struct Transcript {
    commands: Vec<String>,
    data: Vec<String>,
}

async fn serve(script: Script) -> (u16, JoinHandle<Transcript>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut transcript = Transcript::default();

        write
            .write_all(format!("{}\r\n", script.greeting).as_bytes())
            .await
            .unwrap();
        if !script.greeting.starts_with("220") {
            return transcript;
        }

        while let Some(line) = lines.next_line().await.unwrap() {
            transcript.commands.push(line.clone());
            let verb = line.split([' ', ':']).next().unwrap_or_default().to_uppercase();
            let reply = match verb.as_str() {
                "EHLO" => script.ehlo.join("\r\n"),
                "AUTH" => "235 2.7.0 Authentication successful".to_string(),
                "MAIL" => "250 2.1.0 Ok".to_string(),
                "RCPT" => match script.reject_rcpt {
                    Some(rejected) if line.contains(rejected) => {
                        "550 5.1.1 No such user".to_string()
                    }
                    _ => "250 2.1.5 Ok".to_string(),
                },
                "DATA" => {
                    write.write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await.unwrap();
                    while let Some(data_line) = lines.next_line().await.unwrap() {
                        if data_line == "." {
                            break;
                        }
                        transcript.data.push(data_line);
                    }
                    "250 2.0.0 Queued".to_string()
                }
                "QUIT" => {
                    write.write_all(b"221 2.0.0 Bye\r\n").await.unwrap();
                    break;
                }
                _ => "502 5.5.2 Command not recognized".to_string(),
            };
            write.write_all(format!("{reply}\r\n").as_bytes()).await.unwrap();
        }

        transcript
    });

    (port, handle)
}

fn config(port: u16) -> SmtpConfig {
    SmtpConfig::new("127.0.0.1", port)
        .credentials("user@local.dev", "secret")
        .timeout(Duration::from_secs(5))
        .client_hostname("client.test")
}

fn mailer(transport: SmtpTransport) -> Mailer {
    let renderer = JinjaRenderer::from_templates([
        ("report.html", "<h1>{{ title }}</h1><img src=\"cid:{{ cid }}\">"),
        ("report.txt", "{{ title }}\n.signature"),
    ])
    .unwrap();
    let config = MailerConfig {
        message: MessageConfig::default().default_from("No-reply <no-reply@local.dev>"),
        ..MailerConfig::default()
    };
    Mailer::new(Arc::new(transport), Arc::new(renderer), config)
}

fn outgoing() -> OutgoingMessage {
    let mut headers = BTreeMap::new();
    headers.insert("subject".to_string(), "Ping".to_string());
    OutgoingMessage {
        from: vec!["sender@local.dev".into()],
        to: vec!["a@x.dev".into()],
        subject: "Ping".into(),
        html: "<p>ping</p>".into(),
        headers,
        ..OutgoingMessage::default()
    }
}

#[tokio::test]
async fn test_full_delivery() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let (port, server) = serve(Script::default()).await;
    let mailer = mailer(SmtpTransport::new(config(port)));

    let mut message = mailer.create_message();
    message
        .to(["a@x.dev", "a@x.dev"])
        .cc("c@x.dev")
        .bcc("hidden@x.dev")
        .subject("Mon super email avec pièce jointe")
        .template("report")
        .params(serde_json::json!({"title": "Weekly", "cid": "rick_morty_img"}))
        .attachment(
            "R0lGODlhAQABAAAAACw=",
            Some("Rick_Morty.gif"),
            &AttachmentOptions::new()
                .kind(AttachmentKind::Inline)
                .encoding("base64")
                .cid("rick_morty_img"),
        )
        .unwrap();
    message.send().await.unwrap();
    assert_eq!(message.state(), &MessageState::Sent);

    let transcript = server.await.unwrap();
    let commands = &transcript.commands;
    assert_eq!(commands[0], "EHLO client.test");
    // "\0user@local.dev\0secret"
    assert_eq!(commands[1], "AUTH PLAIN AHVzZXJAbG9jYWwuZGV2AHNlY3JldA==");
    assert!(commands[2].starts_with("MAIL FROM:<no-reply@local.dev> SIZE="));
    assert_eq!(
        &commands[3..6],
        &["RCPT TO:<a@x.dev>", "RCPT TO:<c@x.dev>", "RCPT TO:<hidden@x.dev>"]
    );
    assert_eq!(commands[6], "DATA");
    assert_eq!(commands.last().unwrap(), "QUIT");

    let data = transcript.data.join("\r\n");
    assert!(data.starts_with("From: No-reply <no-reply@local.dev>\r\nTo: a@x.dev\r\nCc: c@x.dev\r\n"));
    assert!(data.contains("Subject: =?utf-8?B?"));
    assert!(!data.contains("hidden@x.dev"));
    assert!(data.contains("multipart/mixed"));
    assert!(data.contains("multipart/alternative"));
    assert!(data.contains("Content-ID: <rick_morty_img>"));
    assert!(data.contains("Content-Type: image/gif; name=\"Rick_Morty.gif\""));
    assert!(data.contains("R0lGODlhAQABAAAAACw="));
    // Dot-stuffed on the wire.
    assert!(transcript.data.iter().any(|line| line == "..signature"));
}

#[tokio::test]
async fn test_rejected_recipient_is_permanent() {
    let script = Script {
        reject_rcpt: Some("nobody@x.dev"),
        ..Script::default()
    };
    let (port, server) = serve(script).await;
    let mailer = mailer(SmtpTransport::new(config(port)));

    let mut message = mailer.create_message();
    message
        .to(["a@x.dev", "nobody@x.dev"])
        .subject("hi")
        .template("report");
    let err = message.send().await.unwrap_err();

    let MailError::Transport(transport_error) = err else {
        panic!("expected a transport error");
    };
    let smtp_error = transport_error.downcast_ref::<Error>().unwrap();
    assert!(smtp_error.is_permanent());
    assert!(matches!(message.state(), MessageState::Failed(reason) if reason.contains("550")));

    drop(mailer);
    let transcript = server.await.unwrap();
    assert!(!transcript.commands.iter().any(|c| c == "DATA"));
}

#[tokio::test]
async fn test_rejected_greeting() {
    let script = Script {
        greeting: "554 5.3.2 No service",
        ..Script::default()
    };
    let (port, server) = serve(script).await;

    let err = SmtpTransport::new(config(port))
        .deliver(&outgoing())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 554, .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn test_auth_plain_not_offered() {
    let script = Script {
        ehlo: &["250-mail.test", "250 AUTH LOGIN"],
        ..Script::default()
    };
    let (port, _server) = serve(script).await;

    let err = SmtpTransport::new(config(port))
        .deliver(&outgoing())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotSupported(ref what) if what == "AUTH PLAIN"));
}

#[tokio::test]
async fn test_anonymous_delivery_without_size() {
    let script = Script {
        ehlo: &["250 mail.test"],
        ..Script::default()
    };
    let (port, server) = serve(script).await;
    let transport = SmtpTransport::new(SmtpConfig::new("127.0.0.1", port));

    transport.send_mail(&outgoing()).await.unwrap();
    transport.close().await;

    let transcript = server.await.unwrap();
    assert_eq!(transcript.commands[1], "MAIL FROM:<sender@local.dev>");
    assert!(transcript.data.iter().any(|line| line == "<p>ping</p>"));
}

#[tokio::test]
async fn test_timeout_bounds_the_exchange() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        // Accept and never greet.
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(socket);
    });

    let transport =
        SmtpTransport::new(SmtpConfig::new("127.0.0.1", port).timeout(Duration::from_millis(200)));
    let err = transport.deliver(&outgoing()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(err.is_transient());
    server.abort();
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = SmtpTransport::new(SmtpConfig::new("127.0.0.1", port))
        .deliver(&outgoing())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test]
async fn test_line_breaks_in_addresses_never_reach_the_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mailer = mailer(SmtpTransport::new(config(port)));

    // Passes the unanchored address pattern, so only the transport can stop it.
    let mut message = mailer.create_message();
    message
        .to("a@x.dev>\r\nRCPT TO:<evil@y.dev")
        .subject("hi")
        .template("report");
    assert_eq!(message.prepare().unwrap().to.len(), 1);

    let err = message.send().await.unwrap_err();
    let MailError::Transport(transport_error) = err else {
        panic!("expected a transport error");
    };
    assert!(matches!(
        transport_error.downcast_ref::<Error>(),
        Some(Error::InvalidAddress(_))
    ));

    let mut message = mailer.create_message();
    message
        .from("Name\r\nBcc: spy@evil.dev <no-reply@local.dev>")
        .to("a@x.dev")
        .subject("hi")
        .template("report");
    assert!(message.send().await.is_err());

    let connection = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(connection.is_err(), "no connection should have been opened");
}

#[tokio::test]
async fn test_header_injection_rejected_before_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut message = outgoing();
    message
        .headers
        .insert("X-Tag\r\nBcc".into(), "spy@evil.dev".into());
    let err = SmtpTransport::new(config(port))
        .deliver(&message)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidHeader(_)));

    let connection = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(connection.is_err());
}
