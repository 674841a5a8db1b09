//! Mailer and message configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::address::DEFAULT_ADDRESS_PATTERN;
use crate::error::Result;

/// Per-message defaults, fixed when the message is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    /// Sender used when a message has no `from` address.
    pub default_from: String,
    /// Carbon copy used when a message has no `cc` address.
    pub default_cc: Option<String>,
    /// Pattern every recipient must match.
    pub address_pattern: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            default_from: "no-reply@localhost.local".to_string(),
            default_cc: None,
            address_pattern: DEFAULT_ADDRESS_PATTERN.to_string(),
        }
    }
}

impl MessageConfig {
    /// Sets the default sender.
    #[must_use]
    pub fn default_from(mut self, address: impl Into<String>) -> Self {
        self.default_from = address.into();
        self
    }

    /// Sets the default carbon copy.
    #[must_use]
    pub fn default_cc(mut self, address: impl Into<String>) -> Self {
        self.default_cc = Some(address.into());
        self
    }

    /// Sets the address pattern.
    #[must_use]
    pub fn address_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.address_pattern = pattern.into();
        self
    }
}

/// Mailer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailerConfig {
    /// Directory holding the message templates.
    pub template_path: PathBuf,
    /// Extension of the HTML template (required at send time).
    pub html_extension: String,
    /// Extension of the plain text template (optional at send time).
    pub text_extension: String,
    /// Defaults applied to every message.
    pub message: MessageConfig,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("./templates"),
            html_extension: ".html".to_string(),
            text_extension: ".txt".to_string(),
            message: MessageConfig::default(),
        }
    }
}

impl MailerConfig {
    /// Loads the configuration from a JSON file. Missing keys take their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
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

    #[test]
    fn test_defaults() {
        let config = MailerConfig::default();
        assert_eq!(config.template_path, PathBuf::from("./templates"));
        assert_eq!(config.html_extension, ".html");
        assert_eq!(config.text_extension, ".txt");
        assert_eq!(config.message.default_from, "no-reply@localhost.local");
        assert!(config.message.default_cc.is_none());
    }

    #[test]
    fn test_partial_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailer.json");
        std::fs::write(
            &path,
            r#"{"template_path": "/srv/mail", "message": {"default_from": "contact@local.dev"}}"#,
        )
        .unwrap();

        let config = MailerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.template_path, PathBuf::from("/srv/mail"));
        assert_eq!(config.html_extension, ".html");
        assert_eq!(config.message.default_from, "contact@local.dev");
        assert_eq!(config.message.address_pattern, DEFAULT_ADDRESS_PATTERN);
    }

    #[test]
    fn test_invalid_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailer.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = MailerConfig::from_json_file(&path).unwrap_err();
        assert!(err.to_string().starts_with("config: invalid JSON"));
        assert!(MailerConfig::from_json_file(dir.path().join("absent.json")).is_err());
    }
}
