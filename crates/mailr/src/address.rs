//! Address syntax checking and recipient list normalization.
//!
//! Validation is syntax-only: no DNS or mailbox verification is performed.
//!
//! The default pattern matches case-insensitively, so mixed-case addresses
//! such as `User@Example.COM` are accepted. The classic lowercase-only form
//! of the same expression rejects them; configure
//! [`DEFAULT_ADDRESS_PATTERN`] without its `(?i)` prefix through
//! `MessageConfig::address_pattern` to get that stricter behavior.

use std::collections::HashSet;

use regex::Regex;
use tracing::{debug, warn};

/// Default address pattern (RFC 5322 general syntax, case-insensitive).
///
/// The pattern is unanchored, so a display-name mailbox such as
/// `No-reply <no-reply@example.com>` is accepted as long as it contains a
/// well-formed `local@domain` part.
pub const DEFAULT_ADDRESS_PATTERN: &str = r##"(?i)(?:[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*|"(?:[\x01-\x08\x0b\x0c\x0e-\x1f\x21\x23-\x5b\x5d-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])*")@(?:(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?|\[(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?|[a-z0-9-]*[a-z0-9]:(?:[\x01-\x08\x0b\x0c\x0e-\x1f\x21-\x5a\x53-\x7f]|\\[\x01-\x09\x0b\x0c\x0e-\x7f])+)\])"##;

/// Checks a single address against a pattern.
///
/// A pattern that fails to compile rejects the address instead of raising.
#[must_use]
pub fn is_valid(address: &str, pattern: &str) -> bool {
    AddressValidator::new(pattern).is_valid(address)
}

/// Address matcher compiled once from the configured pattern.
#[derive(Debug, Clone)]
pub struct AddressValidator {
    pattern: Option<Regex>,
}

impl AddressValidator {
    /// Compiles the validator.
    ///
    /// A malformed pattern is logged and yields a validator that rejects
    /// every address, so a configuration mistake surfaces as a validation
    /// error on send rather than a panic.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let pattern = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(%e, "Address pattern does not compile, rejecting every address");
                None
            }
        };
        Self { pattern }
    }

    /// Returns true if the address matches the pattern.
    #[must_use]
    pub fn is_valid(&self, address: &str) -> bool {
        !address.is_empty()
            && self
                .pattern
                .as_ref()
                .is_some_and(|regex| regex.is_match(address))
    }

    /// Filters a recipient list to valid addresses and removes duplicates,
    /// keeping the first occurrence of each address in place.
    #[must_use]
    pub fn normalize(&self, addresses: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(addresses.len());

        for address in addresses {
            if !self.is_valid(address) {
                debug!(%address, "Dropping invalid address");
                continue;
            }
            if !seen.insert(address.as_str()) {
                debug!(%address, "Dropping duplicate address");
                continue;
            }
            normalized.push(address.clone());
        }

        normalized
    }
}

impl Default for AddressValidator {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS_PATTERN)
    }
}

/// Conversion into one or many recipient addresses.
///
/// Lets the recipient mutators accept a single address as well as a
/// collection, which is flattened into the list.
pub trait IntoAddresses {
    /// Converts into an ordered list of addresses.
    fn into_addresses(self) -> Vec<String>;
}

impl IntoAddresses for &str {
    fn into_addresses(self) -> Vec<String> {
        vec![self.to_owned()]
    }
}

impl IntoAddresses for String {
    fn into_addresses(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoAddresses for &String {
    fn into_addresses(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<S: Into<String>> IntoAddresses for Vec<S> {
    fn into_addresses(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<S: Into<String>, const N: usize> IntoAddresses for [S; N] {
    fn into_addresses(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<S: AsRef<str>> IntoAddresses for &[S] {
    fn into_addresses(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_owned()).collect()
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

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_valid_addresses() {
        let validator = AddressValidator::default();
        assert!(validator.is_valid("user@example.com"));
        assert!(validator.is_valid("user.name+tag@sub.example.com"));
        assert!(validator.is_valid("No-reply <no-reply@local.dev>"));
        assert!(validator.is_valid("User@Example.COM"));
    }

    #[test]
    fn test_case_sensitive_pattern() {
        let strict = AddressValidator::new(DEFAULT_ADDRESS_PATTERN.trim_start_matches("(?i)"));
        assert!(strict.is_valid("user@example.com"));
        assert!(!strict.is_valid("User@Example.COM"));
    }

    #[test]
    fn test_invalid_addresses() {
        let validator = AddressValidator::default();
        assert!(!validator.is_valid(""));
        assert!(!validator.is_valid("user"));
        assert!(!validator.is_valid("@example.com"));
        assert!(!validator.is_valid("user@"));
        assert!(!validator.is_valid("user@localhost"));
    }

    #[test]
    fn test_malformed_pattern_rejects() {
        assert!(!is_valid("user@example.com", "(unclosed"));
        let validator = AddressValidator::new("[z-a]");
        assert!(!validator.is_valid("user@example.com"));
    }

    #[test]
    fn test_custom_pattern() {
        assert!(is_valid("anything", "^any"));
        assert!(!is_valid("user@example.com", "^admin@"));
    }

    #[test]
    fn test_normalize_filters_and_dedupes() {
        let validator = AddressValidator::default();
        let list = strings(&[
            "b@example.com",
            "not-an-address",
            "a@example.com",
            "b@example.com",
            "",
            "a@example.com",
        ]);
        assert_eq!(
            validator.normalize(&list),
            strings(&["b@example.com", "a@example.com"])
        );
    }

    #[test]
    fn test_normalize_with_broken_pattern_is_empty() {
        let validator = AddressValidator::new("(");
        assert!(validator.normalize(&strings(&["a@example.com"])).is_empty());
    }

    #[test]
    fn test_into_addresses() {
        assert_eq!("a@x.dev".into_addresses(), strings(&["a@x.dev"]));
        assert_eq!(
            ["a@x.dev", "b@x.dev"].into_addresses(),
            strings(&["a@x.dev", "b@x.dev"])
        );
        let owned = vec!["c@x.dev".to_string()];
        assert_eq!(owned.as_slice().into_addresses(), owned);
        assert_eq!(owned.clone().into_addresses(), owned);
    }
}
