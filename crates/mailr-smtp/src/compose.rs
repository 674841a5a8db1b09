//! RFC 5322 / MIME assembly of outgoing messages.
//!
//! Body layout:
//!
//! ```text
//! multipart/mixed                (only with attachments)
//! ├── multipart/alternative      (only with a text body)
//! │   ├── text/plain
//! │   └── text/html
//! └── attachment parts
//! ```
//!
//! Text bodies are quoted-printable, attachments base64 at 76 columns.
//! `Bcc` recipients never appear in the headers.

use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use mailr::OutgoingMessage;
use uuid::Uuid;

use crate::address::has_line_break;
use crate::attachment::Part;
use crate::error::{Error, Result};

/// Maximum encoded line length.
const MAX_LINE_LENGTH: usize = 76;

/// Headers written by the composer; custom headers with these names are
/// skipped.
const RESERVED_HEADERS: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "subject",
    "date",
    "message-id",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// Builds the message text for `message` with the given loaded attachments.
///
/// `hostname` is the right-hand side of the generated Message-ID.
///
/// # Errors
///
/// Returns [`Error::InvalidHeader`] if a header name is not printable ASCII
/// without `:`, or an address, content type, disposition, Content-ID or
/// attachment header value contains a line break or NUL.
pub fn render_message(message: &OutgoingMessage, parts: &[Part], hostname: &str) -> Result<String> {
    render_message_at(message, parts, hostname, Utc::now())
}

fn render_message_at(
    message: &OutgoingMessage,
    parts: &[Part],
    hostname: &str,
    date: DateTime<Utc>,
) -> Result<String> {
    let mut out = String::new();

    push_header(&mut out, "From", &mailbox_list("From", &message.from)?);
    push_header(&mut out, "To", &mailbox_list("To", &message.to)?);
    if !message.cc.is_empty() {
        push_header(&mut out, "Cc", &mailbox_list("Cc", &message.cc)?);
    }
    push_header(&mut out, "Subject", &encode_rfc2047(&message.subject));
    push_header(&mut out, "Date", &date.to_rfc2822());
    push_header(
        &mut out,
        "Message-ID",
        &format!("<{}@{hostname}>", Uuid::new_v4().simple()),
    );
    push_header(&mut out, "MIME-Version", "1.0");
    for (name, value) in &message.headers {
        if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        push_header(&mut out, header_name(name)?, &encode_rfc2047(value));
    }

    if parts.is_empty() {
        push_body(&mut out, message);
    } else {
        let boundary = boundary();
        push_header(
            &mut out,
            "Content-Type",
            &format!("multipart/mixed; boundary=\"{boundary}\""),
        );
        out.push_str("\r\n");

        let _ = write!(out, "--{boundary}\r\n");
        push_body(&mut out, message);
        for part in parts {
            let _ = write!(out, "\r\n--{boundary}\r\n");
            push_attachment(&mut out, part)?;
        }
        let _ = write!(out, "\r\n--{boundary}--\r\n");
    }

    Ok(out)
}

/// Writes the text/html entity, headers included.
fn push_body(out: &mut String, message: &OutgoingMessage) {
    match &message.text {
        Some(text) => {
            let boundary = boundary();
            push_header(
                out,
                "Content-Type",
                &format!("multipart/alternative; boundary=\"{boundary}\""),
            );
            out.push_str("\r\n");
            let _ = write!(out, "--{boundary}\r\n");
            push_text(out, "text/plain", text);
            let _ = write!(out, "\r\n--{boundary}\r\n");
            push_text(out, "text/html", &message.html);
            let _ = write!(out, "\r\n--{boundary}--\r\n");
        }
        None => push_text(out, "text/html", &message.html),
    }
}

fn push_text(out: &mut String, mime: &str, body: &str) {
    push_header(out, "Content-Type", &format!("{mime}; charset=utf-8"));
    push_header(out, "Content-Transfer-Encoding", "quoted-printable");
    out.push_str("\r\n");
    out.push_str(&encode_quoted_printable(body));
}

fn push_attachment(out: &mut String, part: &Part) -> Result<()> {
    let (filename, content_type, disposition, cid, headers, body) = match part {
        Part::Raw(raw) => {
            out.push_str(raw.trim_end_matches(['\r', '\n']));
            return Ok(());
        }
        Part::File {
            filename,
            content_type,
            disposition,
            cid,
            headers,
            body,
        } => (filename, content_type, disposition, cid, headers, body),
    };

    let content_type = header_value("Content-Type", content_type)?;
    let disposition = header_value("Content-Disposition", disposition)?;
    if filename.is_empty() {
        push_header(out, "Content-Type", content_type);
        push_header(out, "Content-Disposition", disposition);
    } else {
        let name = quote(&encode_rfc2047(filename));
        push_header(out, "Content-Type", &format!("{content_type}; name={name}"));
        push_header(
            out,
            "Content-Disposition",
            &format!("{disposition}; filename={name}"),
        );
    }
    if let Some(cid) = cid {
        push_header(out, "Content-ID", &format!("<{}>", header_value("Content-ID", cid)?));
    }
    for (name, value) in headers {
        push_header(out, header_name(name)?, header_value(name, value)?);
    }
    push_header(out, "Content-Transfer-Encoding", "base64");
    out.push_str("\r\n");
    out.push_str(&encode_base64_lines(body));
    Ok(())
}

fn push_header(out: &mut String, name: &str, value: &str) {
    let _ = write!(out, "{name}: {value}\r\n");
}

/// Accepts RFC 5322 field names: printable ASCII except `:`.
fn header_name(name: &str) -> Result<&str> {
    if !name.is_empty() && name.bytes().all(|b| matches!(b, b'!'..=b'9' | b';'..=b'~')) {
        Ok(name)
    } else {
        Err(Error::InvalidHeader(format!("field name {name:?}")))
    }
}

fn header_value<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    if has_line_break(value) {
        Err(Error::InvalidHeader(format!("{name} value contains a line break or NUL")))
    } else {
        Ok(value)
    }
}

fn mailbox_list(name: &str, mailboxes: &[String]) -> Result<String> {
    for mailbox in mailboxes {
        header_value(name, mailbox)?;
    }
    Ok(mailboxes.join(", "))
}

fn boundary() -> String {
    format!("mailr-{}", Uuid::new_v4().simple())
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Encodes data as base64 wrapped at 76 columns, CRLF terminated.
#[must_use]
pub fn encode_base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2 + 2);
    for line in encoded.as_bytes().chunks(MAX_LINE_LENGTH) {
        out.push_str(&String::from_utf8_lossy(line));
        out.push_str("\r\n");
    }
    out
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks are kept as CRLF; long lines get soft breaks.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut lines = Vec::new();

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line).as_bytes();
        let mut encoded = String::with_capacity(line.len());
        let mut line_length = 0;

        for (i, &byte) in line.iter().enumerate() {
            // Trailing whitespace must be encoded.
            let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
                || (matches!(byte, b' ' | b'\t') && i + 1 < line.len());
            let width = if literal { 1 } else { 3 };

            // Soft line break keeps room for the trailing '='.
            if line_length + width > MAX_LINE_LENGTH - 1 {
                encoded.push_str("=\r\n");
                line_length = 0;
            }
            if literal {
                encoded.push(char::from(byte));
            } else {
                let _ = write!(encoded, "={byte:02X}");
            }
            line_length += width;
        }
        lines.push(encoded);
    }

    lines.join("\r\n")
}

/// Encodes a header value using RFC 2047 `B` encoding when it is not plain
/// ASCII. Long values are split into several encoded words.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if text.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) && !text.contains("=?") {
        return text.to_string();
    }

    // 45 bytes of input keep each encoded word within 75 characters.
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > 45 {
            words.push(format!("=?utf-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(format!("=?utf-8?B?{}?=", STANDARD.encode(chunk.as_bytes())));
    }
    words.join("\r\n ")
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
    use std::collections::BTreeMap;

    fn message() -> OutgoingMessage {
        let mut headers = BTreeMap::new();
        headers.insert("subject".to_string(), "Hello".to_string());
        headers.insert("X-Campaign".to_string(), "spring".to_string());
        OutgoingMessage {
            from: vec!["No-reply <no-reply@local.dev>".into()],
            to: vec!["a@x.dev".into(), "b@x.dev".into()],
            cc: vec!["c@x.dev".into()],
            bcc: vec!["hidden@x.dev".into()],
            subject: "Hello".into(),
            html: "<p>Hi</p>".into(),
            text: None,
            attachments: Vec::new(),
            headers,
        }
    }

    #[test]
    fn test_headers() {
        let date = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let out = render_message_at(&message(), &[], "mail.local", date).unwrap();

        assert!(out.starts_with("From: No-reply <no-reply@local.dev>\r\nTo: a@x.dev, b@x.dev\r\nCc: c@x.dev\r\nSubject: Hello\r\n"));
        assert!(out.contains("Date: Wed, "));
        assert!(out.contains("May 2024 10:00:00 +0000\r\n"));
        assert!(out.contains("@mail.local>\r\n"));
        assert!(out.contains("MIME-Version: 1.0\r\n"));
        assert!(out.contains("X-Campaign: spring\r\n"));
        assert!(!out.contains("hidden@x.dev"));
        assert_eq!(out.matches("Subject:").count(), 1);
    }

    #[test]
    fn test_html_only_body() {
        let out = render_message(&message(), &[], "localhost").unwrap();
        assert!(out.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(out.contains("Content-Transfer-Encoding: quoted-printable\r\n\r\n<p>Hi</p>"));
        assert!(!out.contains("multipart"));
    }

    #[test]
    fn test_alternative_body() {
        let mut message = message();
        message.text = Some("Hi".into());
        let out = render_message(&message, &[], "localhost").unwrap();

        assert!(out.contains("Content-Type: multipart/alternative; boundary=\"mailr-"));
        let plain = out.find("text/plain").unwrap();
        let html = out.find("text/html").unwrap();
        assert!(plain < html);
        assert!(!out.contains("multipart/mixed"));
    }

    #[test]
    fn test_mixed_with_attachments() {
        let mut message = message();
        message.text = Some("Hi".into());
        let parts = vec![
            Part::File {
                filename: "Rick_Morty.png".into(),
                content_type: "image/png".into(),
                disposition: "inline".into(),
                cid: Some("rick_morty_img".into()),
                headers: BTreeMap::new(),
                body: vec![0u8; 100],
            },
            Part::Raw("Content-Type: text/plain\r\n\r\nraw part\r\n".into()),
        ];
        let out = render_message(&message, &parts, "localhost").unwrap();

        assert!(out.contains("Content-Type: multipart/mixed; boundary=\"mailr-"));
        assert!(out.contains("Content-Type: image/png; name=\"Rick_Morty.png\"\r\n"));
        assert!(out.contains("Content-Disposition: inline; filename=\"Rick_Morty.png\"\r\n"));
        assert!(out.contains("Content-ID: <rick_morty_img>\r\n"));
        assert!(out.contains("Content-Type: text/plain\r\n\r\nraw part\r\n--mailr-"));
        assert!(out.trim_end().ends_with("--"));

        let base64_lines: Vec<&str> = out
            .lines()
            .filter(|l| l.starts_with("AAAA"))
            .collect();
        assert_eq!(base64_lines.len(), 2);
        assert!(base64_lines.iter().all(|l| l.len() <= MAX_LINE_LENGTH));
    }

    #[test]
    fn test_quoted_printable() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
        assert_eq!(encode_quoted_printable("Héllo"), "H=C3=A9llo");
        assert_eq!(encode_quoted_printable("line one\nline two\n"), "line one\r\nline two\r\n");
        assert_eq!(encode_quoted_printable("trailing "), "trailing=20");

        let long = "x".repeat(200);
        let encoded = encode_quoted_printable(&long);
        assert!(encoded.lines().all(|l| l.len() <= MAX_LINE_LENGTH));
        assert_eq!(encoded.replace("=\r\n", ""), long);
    }

    #[test]
    fn test_rfc2047() {
        assert_eq!(encode_rfc2047("Hello"), "Hello");
        assert_eq!(
            encode_rfc2047("Mon super email avec pièce jointe"),
            format!(
                "=?utf-8?B?{}?=",
                STANDARD.encode("Mon super email avec pièce jointe")
            )
        );

        let long = "é".repeat(60);
        let encoded = encode_rfc2047(&long);
        assert!(encoded.split("\r\n ").count() > 1);
        assert!(encoded.split("\r\n ").all(|w| w.len() <= 75));
    }

    fn file_part() -> Part {
        Part::File {
            filename: "report.csv".into(),
            content_type: "text/csv".into(),
            disposition: "attachment".into(),
            cid: None,
            headers: BTreeMap::new(),
            body: b"a,b".to_vec(),
        }
    }

    fn render_err(message: &OutgoingMessage, parts: &[Part]) -> Error {
        render_message(message, parts, "localhost").unwrap_err()
    }

    #[test]
    fn test_rejects_line_breaks_in_headers() {
        let mut bad_name = message();
        bad_name
            .headers
            .insert("X-Tag\r\nBcc: spy@evil.dev".into(), "1".into());
        assert!(matches!(render_err(&bad_name, &[]), Error::InvalidHeader(_)));

        let mut colon_name = message();
        colon_name.headers.insert("X-Tag: 1".into(), "2".into());
        assert!(matches!(render_err(&colon_name, &[]), Error::InvalidHeader(_)));

        let mut bad_to = message();
        bad_to.to.push("a@x.dev\r\nBcc: spy@evil.dev".into());
        assert!(matches!(render_err(&bad_to, &[]), Error::InvalidHeader(_)));
    }

    #[test]
    fn test_rejects_line_breaks_in_part_headers() {
        let with = |edit: fn(&mut Part)| {
            let mut part = file_part();
            edit(&mut part);
            render_err(&message(), &[part])
        };

        let err = with(|part| {
            if let Part::File { cid, .. } = part {
                *cid = Some("img>\r\nContent-Type: text/html".into());
            }
        });
        assert!(matches!(err, Error::InvalidHeader(ref what) if what.starts_with("Content-ID")));

        let err = with(|part| {
            if let Part::File { headers, .. } = part {
                headers.insert("X-Report".into(), "weekly\r\nX-Forged: 1".into());
            }
        });
        assert!(matches!(err, Error::InvalidHeader(_)));

        let err = with(|part| {
            if let Part::File { headers, .. } = part {
                headers.insert("X-Report\n".into(), "weekly".into());
            }
        });
        assert!(matches!(err, Error::InvalidHeader(_)));

        let err = with(|part| {
            if let Part::File { content_type, .. } = part {
                *content_type = "text/csv\r\n\r\nbody".into();
            }
        });
        assert!(matches!(err, Error::InvalidHeader(_)));
    }

    #[test]
    fn test_header_values_are_encoded_not_rejected() {
        let mut message = message();
        message
            .headers
            .insert("X-Note".into(), "one\r\nBcc: spy@evil.dev".into());
        let out = render_message(&message, &[file_part()], "localhost").unwrap();
        assert!(out.contains("X-Note: =?utf-8?B?"));
        assert!(!out.contains("\r\nBcc:"));
    }
}
