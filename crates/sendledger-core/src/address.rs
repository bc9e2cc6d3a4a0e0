//! Recipient address normalization and the owned-domain set.
//!
//! The normalized form (lowercased envelope address, no display name) is the
//! identity key used by ledgers, exclusion sets and the quota guard.

use std::collections::BTreeSet;

/// Normalizes a raw address field.
///
/// Accepts bare addresses and `Display Name <addr@host>` forms. Returns `None`
/// for anything that is not a single `local@domain` token.
#[must_use]
pub fn normalize_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let inner = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(open), Some(close)) if open < close => &raw[open + 1..close],
        _ => raw,
    };
    let candidate = inner.trim();

    if candidate.is_empty() || candidate.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return None;
    }

    let (local, domain) = candidate.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }

    Some(candidate.to_lowercase())
}

/// Returns the domain part of a normalized address.
#[must_use]
pub fn domain_of(address: &str) -> Option<&str> {
    address.split_once('@').map(|(_, domain)| domain)
}

/// Domains owned by the campaign operator.
///
/// An address is *external* iff its domain is not in this set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedDomains(BTreeSet<String>);

impl OwnedDomains {
    /// Creates the set from domain names (trimmed, lowercased, blanks dropped).
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            domains
                .into_iter()
                .map(|d| d.as_ref().trim().trim_start_matches('@').to_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        )
    }

    /// Parses a comma-separated list.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Returns true if the normalized address belongs to a domain outside the set.
    #[must_use]
    pub fn is_external(&self, address: &str) -> bool {
        domain_of(address).is_some_and(|domain| !self.0.contains(domain))
    }

    /// Returns true if no domains are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the domains in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_and_named() {
        assert_eq!(
            normalize_address("  Reader@Example.ORG ").as_deref(),
            Some("reader@example.org")
        );
        assert_eq!(
            normalize_address("Jane Doe <Jane.Doe@Example.com>").as_deref(),
            Some("jane.doe@example.com")
        );
        assert_eq!(
            normalize_address("\"Doe, Jane\" <jane@example.com>").as_deref(),
            Some("jane@example.com")
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert_eq!(normalize_address(""), None);
        assert_eq!(normalize_address("   "), None);
        assert_eq!(normalize_address("not an address"), None);
        assert_eq!(normalize_address("missing-at.example.com"), None);
        assert_eq!(normalize_address("@example.com"), None);
        assert_eq!(normalize_address("user@"), None);
        assert_eq!(normalize_address("a@b@c"), None);
    }

    #[test]
    fn test_is_external() {
        let owned = OwnedDomains::parse("Example.com, partner.example.net ,");
        assert!(!owned.is_external("me@example.com"));
        assert!(!owned.is_external("you@partner.example.net"));
        assert!(owned.is_external("reader@example.org"));
        assert!(!owned.is_external("no-domain"));
        assert_eq!(owned.iter().count(), 2);
    }

    #[test]
    fn test_empty_domains_make_everything_external() {
        let owned = OwnedDomains::default();
        assert!(owned.is_empty());
        assert!(owned.is_external("anyone@example.com"));
    }
}
