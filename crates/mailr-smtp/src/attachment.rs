//! Materializing attachment descriptors into MIME parts.

use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mailr::{Attachment, AttachmentSource};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Attachment ready to be written into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Attachment built from content bytes.
    File {
        /// Display name; may be empty.
        filename: String,
        /// MIME type.
        content_type: String,
        /// `attachment` or `inline`.
        disposition: String,
        /// Content-ID, without angle brackets.
        cid: Option<String>,
        /// Extra part headers.
        headers: BTreeMap<String, String>,
        /// Decoded content.
        body: Vec<u8>,
    },
    /// Pre-built MIME part inserted verbatim.
    Raw(String),
}

/// Fetches the bytes of an attachment from wherever its descriptor points.
///
/// # Errors
///
/// Returns an error if a file cannot be read, a remote resource cannot be
/// fetched, or base64 inline content does not decode.
pub async fn load(attachment: &Attachment, http: &reqwest::Client) -> Result<Part> {
    let body = match &attachment.source {
        AttachmentSource::Raw { raw } => return Ok(Part::Raw(raw.clone())),
        AttachmentSource::LocalPath { path } => tokio::fs::read(path)
            .await
            .map_err(|e| Error::attachment(display_name(attachment), e))?,
        AttachmentSource::StreamPath { path } => read_stream(path)
            .await
            .map_err(|e| Error::attachment(display_name(attachment), e))?,
        AttachmentSource::Inline { content } => decode_inline(attachment, content)?,
        AttachmentSource::Remote { href } => {
            debug!(%href, "Fetching remote attachment");
            http.get(href)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec()
        }
    };

    let content_type = attachment
        .content_type
        .clone()
        .unwrap_or_else(|| guess_content_type(attachment));
    let disposition = attachment.content_disposition.clone().unwrap_or_else(|| {
        if attachment.cid.is_some() {
            "inline".to_string()
        } else {
            "attachment".to_string()
        }
    });

    Ok(Part::File {
        filename: attachment.filename.clone(),
        content_type,
        disposition,
        cid: attachment.cid.clone(),
        headers: attachment.headers.clone().unwrap_or_default(),
        body,
    })
}

async fn read_stream(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut body = Vec::new();
    file.read_to_end(&mut body).await?;
    Ok(body)
}

fn decode_inline(attachment: &Attachment, content: &str) -> Result<Vec<u8>> {
    match attachment.encoding.as_deref() {
        Some(encoding) if encoding.eq_ignore_ascii_case("base64") => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| Error::attachment(display_name(attachment), e))
        }
        _ => Ok(content.as_bytes().to_vec()),
    }
}

/// Guesses the MIME type from the display name, then from the path.
fn guess_content_type(attachment: &Attachment) -> String {
    let from_name = (!attachment.filename.is_empty())
        .then(|| mime_guess::from_path(&attachment.filename).first())
        .flatten();
    let from_path = || match &attachment.source {
        AttachmentSource::LocalPath { path } | AttachmentSource::StreamPath { path } => {
            mime_guess::from_path(path).first()
        }
        AttachmentSource::Remote { href } => mime_guess::from_path(href).first(),
        AttachmentSource::Inline { .. } => Some(mime_guess::mime::TEXT_PLAIN_UTF_8),
        AttachmentSource::Raw { .. } => None,
    };

    from_name
        .or_else(from_path)
        .map_or_else(|| "application/octet-stream".to_string(), |m| m.to_string())
}

fn display_name(attachment: &Attachment) -> String {
    if !attachment.filename.is_empty() {
        return attachment.filename.clone();
    }
    match &attachment.source {
        AttachmentSource::LocalPath { path } | AttachmentSource::StreamPath { path } => {
            path.display().to_string()
        }
        AttachmentSource::Remote { href } => href.clone(),
        AttachmentSource::Inline { .. } | AttachmentSource::Raw { .. } => "inline".to_string(),
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
    use mailr::{AttachmentKind, AttachmentOptions, AttachmentResolver};

    fn resolve(content: &str, name: Option<&str>, options: &AttachmentOptions) -> Attachment {
        AttachmentResolver::default()
            .resolve(content, name, options)
            .unwrap()
    }

    #[tokio::test]
    async fn test_local_file_with_guessed_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img_1.png");
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let attachment = resolve(
            path.to_str().unwrap(),
            Some("Rick_Morty.png"),
            &AttachmentOptions::new().cid("rick_morty_img"),
        );
        let part = load(&attachment, &reqwest::Client::new()).await.unwrap();

        let Part::File {
            filename,
            content_type,
            disposition,
            cid,
            body,
            ..
        } = part
        else {
            panic!("expected a file part");
        };
        assert_eq!(filename, "Rick_Morty.png");
        assert_eq!(content_type, "image/png");
        assert_eq!(disposition, "inline");
        assert_eq!(cid.as_deref(), Some("rick_morty_img"));
        assert_eq!(body, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_stream_file_read_at_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "first").unwrap();

        let attachment = resolve(
            path.to_str().unwrap(),
            None,
            &AttachmentOptions::new().kind(AttachmentKind::Stream),
        );
        std::fs::write(&path, "second").unwrap();

        let part = load(&attachment, &reqwest::Client::new()).await.unwrap();
        assert!(matches!(part, Part::File { ref body, .. } if body == b"second"));

        std::fs::remove_file(&path).unwrap();
        let err = load(&attachment, &reqwest::Client::new()).await.unwrap_err();
        assert!(err.to_string().starts_with("Cannot load attachment `notes.txt`"));
    }

    #[tokio::test]
    async fn test_inline_content_and_base64() {
        let options = AttachmentOptions::new().kind(AttachmentKind::Inline);
        let plain = resolve("hello", Some("hello.txt"), &options);
        let part = load(&plain, &reqwest::Client::new()).await.unwrap();
        assert!(matches!(
            part,
            Part::File { ref body, ref content_type, ref disposition, .. }
                if body == b"hello" && content_type == "text/plain" && disposition == "attachment"
        ));

        let encoded = resolve("aGVs\nbG8=", None, &options.clone().encoding("base64"));
        let part = load(&encoded, &reqwest::Client::new()).await.unwrap();
        assert!(matches!(part, Part::File { ref body, .. } if body == b"hello"));

        let broken = resolve("!!!", None, &options.encoding("base64"));
        assert!(load(&broken, &reqwest::Client::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_raw_and_explicit_options() {
        let raw = resolve("", None, &AttachmentOptions::new().raw("Content-Type: text/plain\r\n\r\nraw"));
        assert_eq!(
            load(&raw, &reqwest::Client::new()).await.unwrap(),
            Part::Raw("Content-Type: text/plain\r\n\r\nraw".into())
        );

        let options = AttachmentOptions::new()
            .kind(AttachmentKind::Inline)
            .content_type("text/csv")
            .content_disposition("attachment")
            .cid("report")
            .header("X-Report", "weekly");
        let csv = resolve("a,b", Some("report.csv"), &options);
        let Part::File {
            content_type,
            disposition,
            headers,
            ..
        } = load(&csv, &reqwest::Client::new()).await.unwrap()
        else {
            panic!("expected a file part");
        };
        assert_eq!(content_type, "text/csv");
        assert_eq!(disposition, "attachment");
        assert_eq!(headers.get("X-Report").map(String::as_str), Some("weekly"));
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let attachment = resolve(
            "blob",
            Some("data.zzz-unknown"),
            &AttachmentOptions::new().kind(AttachmentKind::Href),
        );
        assert_eq!(guess_content_type(&attachment), "application/octet-stream");
    }
}
