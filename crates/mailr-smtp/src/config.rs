//! SMTP server configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// No encryption.
    #[default]
    None,
    /// Implicit TLS (connect directly with TLS).
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get default port for the security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::StartTls => 587,
            Self::Tls => 465,
        }
    }
}

/// Username and password for AUTH PLAIN.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SMTP server configuration.
///
/// Defaults target a local development server: `localhost:1025`, no TLS,
/// no authentication, 30 second timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Credentials; authentication is skipped when absent.
    pub credentials: Option<Credentials>,
    /// Bound on a whole delivery, from connect to QUIT.
    #[serde(rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,
    /// Name announced in EHLO and used for Message-IDs.
    pub client_hostname: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1025,
            security: Security::None,
            credentials: None,
            timeout: Duration::from_secs(30),
            client_hostname: "localhost".to_string(),
        }
    }
}

impl SmtpConfig {
    /// Creates a configuration for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets the delivery timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the EHLO hostname.
    #[must_use]
    pub fn client_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.client_hostname = hostname.into();
        self
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
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
        let config = SmtpConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1025);
        assert_eq!(config.security, Security::None);
        assert!(config.credentials.is_none());
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let config = SmtpConfig::new("smtp.example.com", Security::Tls.default_port())
            .security(Security::Tls)
            .credentials("user", "secret")
            .timeout(Duration::from_secs(5));
        assert_eq!(config.port, 465);
        assert_eq!(config.credentials.as_ref().unwrap().username, "user");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SmtpConfig = serde_json::from_str(
            r#"{"host": "mail.local", "security": "starttls", "timeout_secs": 2.5}"#,
        )
        .unwrap();
        assert_eq!(config.host, "mail.local");
        assert_eq!(config.port, 1025);
        assert_eq!(config.security, Security::StartTls);
        assert_eq!(config.timeout, Duration::from_millis(2500));
    }
}
