//! Attachment resolution.
//!
//! An attachment is specified as a path or inline content, an optional
//! display name and a set of [`AttachmentOptions`]. The [`AttachmentResolver`]
//! turns that specification into an [`Attachment`] descriptor carrying exactly
//! one content source, so the transport can deliver it without interpreting
//! options again.
//!
//! Local and streamed paths are probed once at resolution time; the file is
//! not held open. Reading a streamed file during delivery is the transport's
//! job.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors raised while ingesting an attachment.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    /// No content or path was given and no raw part was supplied.
    #[error("attachment: missing content")]
    MissingContent,

    /// The `type` option names an unsupported source kind.
    #[error("attachment: unknown type `{0}`")]
    UnknownType(String),

    /// A local or streamed path could not be read.
    #[error("attachment: cannot read `{}`: {}", .path.display(), .source)]
    Unreadable {
        /// Path that failed the probe.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Kind of content an attachment specification refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachmentKind {
    /// A file on disk, attached from its path.
    #[default]
    Local,
    /// A file on disk the transport streams at delivery time.
    Stream,
    /// The specification itself is the attachment content.
    Inline,
    /// A remote URL the transport fetches.
    Href,
}

impl AttachmentKind {
    /// Returns the option value naming this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Stream => "stream",
            Self::Inline => "string",
            Self::Href => "href",
        }
    }
}

impl FromStr for AttachmentKind {
    type Err = AttachmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "stream" => Ok(Self::Stream),
            "string" => Ok(Self::Inline),
            "href" => Ok(Self::Href),
            other => Err(AttachmentError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options accompanying an attachment specification.
///
/// Only the keys below are recognized; anything else found while
/// deserializing is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttachmentOptions {
    /// Source kind (`local`, `stream`, `string`, `href`); `local` when absent.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Complete pre-built MIME part. Short-circuits every other source.
    pub raw: Option<String>,
    /// Explicit content type.
    pub content_type: Option<String>,
    /// Explicit content disposition.
    pub content_disposition: Option<String>,
    /// Content-ID for inline references (`cid:`).
    pub cid: Option<String>,
    /// Encoding of inline content (e.g. `base64`).
    pub encoding: Option<String>,
    /// Extra part headers.
    pub headers: Option<BTreeMap<String, String>>,
}

impl AttachmentOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source kind.
    #[must_use]
    pub fn kind(mut self, kind: AttachmentKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    /// Supplies a raw MIME part.
    #[must_use]
    pub fn raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the content disposition.
    #[must_use]
    pub fn content_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }

    /// Sets the Content-ID.
    #[must_use]
    pub fn cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    /// Sets the inline content encoding.
    #[must_use]
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Adds a part header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Where the bytes of an attachment come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AttachmentSource {
    /// File on disk, read by the transport.
    LocalPath {
        /// Path to the file.
        path: PathBuf,
    },
    /// File on disk, streamed by the transport.
    StreamPath {
        /// Path to the file.
        path: PathBuf,
    },
    /// Content carried in the descriptor.
    Inline {
        /// Attachment content.
        content: String,
    },
    /// Remote resource fetched by the transport.
    Remote {
        /// Resource URL.
        href: String,
    },
    /// Complete MIME part inserted verbatim.
    Raw {
        /// Raw part.
        raw: String,
    },
}

/// Normalized, transport-ready attachment descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Display name. Empty for raw parts and unnamed inline or remote content.
    pub filename: String,
    /// Content source.
    #[serde(flatten)]
    pub source: AttachmentSource,
    /// Content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Content disposition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    /// Content-ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    /// Content encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    /// Extra part headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Attachment {
    fn new(filename: String, source: AttachmentSource) -> Self {
        Self {
            filename,
            source,
            content_type: None,
            content_disposition: None,
            cid: None,
            encoding: None,
            headers: None,
        }
    }

    /// Copies the allow-listed options onto the descriptor without touching
    /// fields that are already set.
    fn merge(mut self, options: &AttachmentOptions) -> Self {
        fill(&mut self.content_type, options.content_type.as_ref());
        fill(&mut self.content_disposition, options.content_disposition.as_ref());
        fill(&mut self.cid, options.cid.as_ref());
        fill(&mut self.encoding, options.encoding.as_ref());
        fill(&mut self.headers, options.headers.as_ref());
        self
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: Option<&T>) {
    if slot.is_none() {
        *slot = value.cloned();
    }
}

/// One entry of a batch attachment call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttachmentSpec {
    /// Path or inline content.
    #[serde(default)]
    pub content: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Options.
    #[serde(default)]
    pub options: AttachmentOptions,
}

impl AttachmentSpec {
    /// Creates a spec from a path or inline content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the options.
    #[must_use]
    pub fn options(mut self, options: AttachmentOptions) -> Self {
        self.options = options;
        self
    }
}

/// Read access to local files, used to probe attachment paths.
pub trait FileAccess: Send + Sync {
    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`FileAccess`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFiles;

impl FileAccess for LocalFiles {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// Converts attachment specifications into descriptors.
#[derive(Clone)]
pub struct AttachmentResolver {
    files: Arc<dyn FileAccess>,
}

impl AttachmentResolver {
    /// Creates a resolver probing paths through `files`.
    #[must_use]
    pub fn new(files: Arc<dyn FileAccess>) -> Self {
        Self { files }
    }

    /// Resolves one attachment specification.
    ///
    /// With `options.raw` set, the descriptor carries only the raw part and
    /// the name, content and path checks are skipped. Otherwise `content`
    /// must be non-empty and is interpreted according to `options.kind`.
    /// An empty or missing `name` is inferred from the path's file name for
    /// local and streamed files and left empty for other kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if content is missing, the kind is unknown, or a
    /// local/streamed path cannot be read.
    pub fn resolve(
        &self,
        content: &str,
        name: Option<&str>,
        options: &AttachmentOptions,
    ) -> Result<Attachment, AttachmentError> {
        if let Some(raw) = options.raw.as_deref().filter(|raw| !raw.is_empty()) {
            debug!("Resolved raw attachment");
            let source = AttachmentSource::Raw {
                raw: raw.to_string(),
            };
            return Ok(Attachment::new(String::new(), source).merge(options));
        }

        if content.is_empty() {
            return Err(AttachmentError::MissingContent);
        }

        let kind = options
            .kind
            .as_deref()
            .map_or(Ok(AttachmentKind::default()), str::parse::<AttachmentKind>)?;

        let source = match kind {
            AttachmentKind::Local => AttachmentSource::LocalPath {
                path: self.probe(content)?,
            },
            AttachmentKind::Stream => AttachmentSource::StreamPath {
                path: self.probe(content)?,
            },
            AttachmentKind::Inline => AttachmentSource::Inline {
                content: content.to_string(),
            },
            AttachmentKind::Href => AttachmentSource::Remote {
                href: content.to_string(),
            },
        };

        let filename = match name.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => infer_filename(kind, content),
        };

        debug!(%kind, %filename, "Resolved attachment");
        Ok(Attachment::new(filename, source).merge(options))
    }

    /// Reads the path once to make sure it is readable.
    fn probe(&self, path: &str) -> Result<PathBuf, AttachmentError> {
        let path = PathBuf::from(path);
        match self.files.read(&path) {
            Ok(_) => Ok(path),
            Err(source) => Err(AttachmentError::Unreadable { path, source }),
        }
    }
}

impl Default for AttachmentResolver {
    fn default() -> Self {
        Self::new(Arc::new(LocalFiles))
    }
}

impl fmt::Debug for AttachmentResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentResolver").finish_non_exhaustive()
    }
}

fn infer_filename(kind: AttachmentKind, content: &str) -> String {
    match kind {
        AttachmentKind::Local | AttachmentKind::Stream => Path::new(content)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        AttachmentKind::Inline | AttachmentKind::Href => String::new(),
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
    use std::collections::HashMap;

    /// In-memory file table.
    struct Files(HashMap<PathBuf, Vec<u8>>);

    impl FileAccess for Files {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
        }
    }

    fn resolver() -> AttachmentResolver {
        let mut files = HashMap::new();
        files.insert(PathBuf::from("examples/assets/img_1.png"), vec![0x89, 0x50]);
        AttachmentResolver::new(Arc::new(Files(files)))
    }

    #[test]
    fn test_local_attachment_infers_name() {
        let attachment = resolver()
            .resolve("examples/assets/img_1.png", None, &AttachmentOptions::new())
            .unwrap();
        assert_eq!(attachment.filename, "img_1.png");
        assert_eq!(
            attachment.source,
            AttachmentSource::LocalPath {
                path: PathBuf::from("examples/assets/img_1.png")
            }
        );
    }

    #[test]
    fn test_explicit_name_wins() {
        let attachment = resolver()
            .resolve(
                "examples/assets/img_1.png",
                Some("Rick_and_Morty.pdf"),
                &AttachmentOptions::new(),
            )
            .unwrap();
        assert_eq!(attachment.filename, "Rick_and_Morty.pdf");
    }

    #[test]
    fn test_empty_name_is_inferred() {
        let attachment = resolver()
            .resolve("examples/assets/img_1.png", Some(""), &AttachmentOptions::new())
            .unwrap();
        assert_eq!(attachment.filename, "img_1.png");
    }

    #[test]
    fn test_unreadable_path() {
        let err = resolver()
            .resolve("missing/file.png", None, &AttachmentOptions::new())
            .unwrap_err();
        assert!(matches!(err, AttachmentError::Unreadable { ref path, .. } if path == Path::new("missing/file.png")));
        assert!(err.to_string().starts_with("attachment: cannot read `missing/file.png`"));
    }

    #[test]
    fn test_stream_attachment_records_path() {
        let options = AttachmentOptions::new().kind(AttachmentKind::Stream);
        let attachment = resolver()
            .resolve("examples/assets/img_1.png", None, &options)
            .unwrap();
        assert_eq!(attachment.filename, "img_1.png");
        assert!(matches!(attachment.source, AttachmentSource::StreamPath { .. }));

        let err = resolver().resolve("nope.bin", None, &options).unwrap_err();
        assert!(matches!(err, AttachmentError::Unreadable { .. }));
    }

    #[test]
    fn test_inline_and_href_have_empty_default_name() {
        let inline = resolver()
            .resolve("hello", None, &AttachmentOptions::new().kind(AttachmentKind::Inline))
            .unwrap();
        assert_eq!(inline.filename, "");
        assert_eq!(
            inline.source,
            AttachmentSource::Inline {
                content: "hello".into()
            }
        );

        let remote = resolver()
            .resolve(
                "https://example.com/logo.png",
                Some("logo.png"),
                &AttachmentOptions::new().kind(AttachmentKind::Href),
            )
            .unwrap();
        assert_eq!(remote.filename, "logo.png");
        assert_eq!(
            remote.source,
            AttachmentSource::Remote {
                href: "https://example.com/logo.png".into()
            }
        );
    }

    #[test]
    fn test_raw_short_circuits() {
        let options = AttachmentOptions::new()
            .raw("Content-Type: text/plain\r\n\r\nhi")
            .kind(AttachmentKind::Local)
            .cid("raw-cid");
        let attachment = resolver()
            .resolve("missing/file.png", Some("ignored.txt"), &options)
            .unwrap();
        assert_eq!(attachment.filename, "");
        assert_eq!(
            attachment.source,
            AttachmentSource::Raw {
                raw: "Content-Type: text/plain\r\n\r\nhi".into()
            }
        );
        assert_eq!(attachment.cid.as_deref(), Some("raw-cid"));
    }

    #[test]
    fn test_missing_content() {
        let err = resolver()
            .resolve("", Some("a.txt"), &AttachmentOptions::new())
            .unwrap_err();
        assert!(matches!(err, AttachmentError::MissingContent));
        assert_eq!(err.to_string(), "attachment: missing content");
    }

    #[test]
    fn test_unknown_type() {
        let options = AttachmentOptions {
            kind: Some("ftp".into()),
            ..AttachmentOptions::default()
        };
        let err = resolver().resolve("a.txt", None, &options).unwrap_err();
        assert!(matches!(err, AttachmentError::UnknownType(ref kind) if kind == "ftp"));
    }

    #[test]
    fn test_options_are_merged() {
        let options = AttachmentOptions::new()
            .kind(AttachmentKind::Inline)
            .content_type("text/csv")
            .content_disposition("inline")
            .cid("report")
            .encoding("utf-8")
            .header("X-Report", "weekly");
        let attachment = resolver()
            .resolve("a,b\n1,2", Some("report.csv"), &options)
            .unwrap();
        assert_eq!(attachment.content_type.as_deref(), Some("text/csv"));
        assert_eq!(attachment.content_disposition.as_deref(), Some("inline"));
        assert_eq!(attachment.cid.as_deref(), Some("report"));
        assert_eq!(attachment.encoding.as_deref(), Some("utf-8"));
        assert_eq!(
            attachment.headers.unwrap().get("X-Report").map(String::as_str),
            Some("weekly")
        );
    }

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut attachment = Attachment::new(
            "a.txt".into(),
            AttachmentSource::Inline {
                content: "a".into(),
            },
        );
        attachment.content_type = Some("text/plain".into());
        let merged = attachment.merge(&AttachmentOptions::new().content_type("application/json"));
        assert_eq!(merged.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_options_drop_unknown_keys() {
        let options: AttachmentOptions = serde_json::from_str(
            r#"{"type": "string", "cid": "logo", "contentType": "image/png", "bogus": 1}"#,
        )
        .unwrap();
        assert_eq!(options.kind.as_deref(), Some("string"));
        assert_eq!(options.cid.as_deref(), Some("logo"));
        assert_eq!(options.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_descriptor_serializes_tagged_source() {
        let attachment = resolver()
            .resolve("examples/assets/img_1.png", None, &AttachmentOptions::new().cid("img"))
            .unwrap();
        let json = serde_json::to_value(&attachment).unwrap();
        assert_eq!(json["kind"], "localPath");
        assert_eq!(json["path"], "examples/assets/img_1.png");
        assert_eq!(json["filename"], "img_1.png");
        assert_eq!(json["cid"], "img");
        assert!(json.get("contentType").is_none());
    }
}
