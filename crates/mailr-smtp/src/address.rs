//! Envelope addresses.

use std::fmt;

use crate::error::{Error, Result};

/// Address used in `MAIL FROM` and `RCPT TO`.
///
/// Always holds exactly one `@` with non-empty local and domain parts, and
/// never a control character or angle bracket, so it cannot break out of
/// the command line it is written into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates an envelope address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is not usable on the
    /// wire.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        validate(&address)?;
        Ok(Self(address))
    }

    /// Creates the envelope address of a header mailbox such as
    /// `Name <user@example.com>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the mailbox contains a line break
    /// or NUL, or its address part is not usable on the wire.
    pub fn from_mailbox(mailbox: &str) -> Result<Self> {
        if has_line_break(mailbox) {
            return Err(invalid(mailbox, "contains a line break or NUL"));
        }
        Self::new(envelope_address(mailbox))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduces a mailbox to its envelope form: the part inside `<...>` when
/// present, the trimmed mailbox otherwise.
#[must_use]
pub fn envelope_address(mailbox: &str) -> &str {
    match (mailbox.rfind('<'), mailbox.rfind('>')) {
        (Some(start), Some(end)) if start < end => mailbox[start + 1..end].trim(),
        _ => mailbox.trim(),
    }
}

/// Returns true if `value` would end the line it is written on.
pub(crate) fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n', '\0'])
}

fn validate(address: &str) -> Result<()> {
    if address.chars().any(|c| c.is_control() || c == '<' || c == '>') {
        return Err(invalid(address, "contains a control character or angle bracket"));
    }
    let Some((local, domain)) = address.split_once('@') else {
        return Err(invalid(address, "must contain @"));
    };
    if domain.contains('@') {
        return Err(invalid(address, "must have exactly one @"));
    }
    if local.is_empty() || domain.is_empty() {
        return Err(invalid(address, "local and domain parts cannot be empty"));
    }
    Ok(())
}

fn invalid(address: &str, reason: &str) -> Error {
    Error::InvalidAddress(format!("{address:?} {reason}"))
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
    fn test_valid_address() {
        let address = Address::new("user@example.com").unwrap();
        assert_eq!(address.as_str(), "user@example.com");
        assert_eq!(address.to_string(), "user@example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        for address in [
            "",
            "no-at-sign",
            "@example.com",
            "user@",
            "a@b@c.dev",
            "a@x.dev\r\nRCPT TO:<evil@y.dev",
            "a@x.dev>",
            "a\0@x.dev",
        ] {
            let err = Address::new(address).unwrap_err();
            assert!(matches!(err, Error::InvalidAddress(_)), "{address:?}");
        }
    }

    #[test]
    fn test_from_mailbox() {
        assert_eq!(
            Address::from_mailbox("No-reply <no-reply@local.dev>").unwrap().as_str(),
            "no-reply@local.dev"
        );
        assert_eq!(Address::from_mailbox("  a@x.dev ").unwrap().as_str(), "a@x.dev");
        assert!(Address::from_mailbox("a@x.dev>\r\nRCPT TO:<evil@y.dev").is_err());
        assert!(Address::from_mailbox("Name\r\nBcc: x@y.dev <a@x.dev>").is_err());
    }

    #[test]
    fn test_envelope_address() {
        assert_eq!(envelope_address("No-reply <no-reply@local.dev>"), "no-reply@local.dev");
        assert_eq!(envelope_address("  a@x.dev "), "a@x.dev");
        assert_eq!(envelope_address("broken> <"), "broken> <");
    }
}
