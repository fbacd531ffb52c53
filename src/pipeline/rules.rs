//! Pre-classification sender filter.
//!
//! Runs before the classifier to short-circuit internal and excluded senders:
//! - exact excluded address → filtered
//! - sender ending with an excluded domain suffix → filtered
//!
//! A filtered message is only marked read; the classifier is never called.
//! Matching is case-insensitive and limited to exact or suffix comparison.

use tracing::debug;

/// Why a sender was filtered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterMatch {
    Address(String),
    DomainSuffix(String),
}

/// Immutable exclusion lists loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct SenderFilter {
    addresses: Vec<String>,
    domain_suffixes: Vec<String>,
}

impl SenderFilter {
    pub fn new<A, D>(addresses: A, domain_suffixes: D) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        Self {
            addresses: normalize(addresses),
            domain_suffixes: normalize(domain_suffixes),
        }
    }

    /// A filter that lets every sender through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check a sender address against the exclusion lists.
    pub fn evaluate(&self, sender: &str) -> Option<FilterMatch> {
        let sender = sender.trim().to_lowercase();

        if let Some(address) = self.addresses.iter().find(|a| **a == sender) {
            debug!(sender = %sender, "Sender matched excluded address");
            return Some(FilterMatch::Address(address.clone()));
        }

        if let Some(suffix) = self
            .domain_suffixes
            .iter()
            .find(|d| sender.ends_with(d.as_str()))
        {
            debug!(sender = %sender, suffix = %suffix, "Sender matched excluded domain");
            return Some(FilterMatch::DomainSuffix(suffix.clone()));
        }

        None
    }

    pub fn is_filtered(&self, sender: &str) -> bool {
        self.evaluate(sender).is_some()
    }
}

fn normalize<I>(entries: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    entries
        .into_iter()
        .map(|e| e.as_ref().trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_filter() -> SenderFilter {
        SenderFilter::new(["boss@partner.com"], ["@reyoungh.com", "@reyoung.com"])
    }

    #[test]
    fn filters_exact_address() {
        assert_eq!(
            default_filter().evaluate("boss@partner.com"),
            Some(FilterMatch::Address("boss@partner.com".into()))
        );
    }

    #[test]
    fn filters_domain_suffix() {
        assert_eq!(
            default_filter().evaluate("sales@reyoung.com"),
            Some(FilterMatch::DomainSuffix("@reyoung.com".into()))
        );
        assert!(default_filter().is_filtered("it@reyoungh.com"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let filter = SenderFilter::new(["Boss@Partner.COM"], ["@Example.COM"]);
        assert!(filter.is_filtered("BOSS@partner.com"));
        assert!(filter.is_filtered("user@EXAMPLE.com"));
        assert!(filter.is_filtered("  user@example.com "));
    }

    #[test]
    fn address_must_match_exactly() {
        let filter = default_filter();
        assert!(!filter.is_filtered("other.boss@partner.com.evil"));
        assert!(!filter.is_filtered("boss@partner.co"));
    }

    #[test]
    fn suffix_is_not_a_substring_match() {
        let filter = default_filter();
        assert!(!filter.is_filtered("buyer@reyoung.com.br"));
        assert!(!filter.is_filtered("reyoung.com@gmail.com"));
    }

    #[test]
    fn passes_through_external_sender() {
        assert!(default_filter().evaluate("buyer@gmail.com").is_none());
    }

    #[test]
    fn empty_filter_passes_everything() {
        assert!(!SenderFilter::empty().is_filtered("boss@partner.com"));
    }

    #[test]
    fn blank_entries_are_ignored() {
        let filter = SenderFilter::new(["", "  "], [""]);
        assert!(!filter.is_filtered("anyone@example.com"));
    }
}
