//! Eligibility Resolver.
//!
//! Turns a campaign's recipient list plus the exclusion sets into the ordered
//! pending list for one run. [`resolve`] is pure; [`sources`] loads the sets
//! from disk.
//!
//! Exclusion files are read once when a run starts. Addresses appended to
//! them by other processes during the run are only seen by the next run.

mod sources;

use std::collections::HashSet;

use crate::address::normalize_address;
use crate::campaign::RecipientRecord;

pub use sources::{
    CampaignFiles, ExclusionSources, GlobalDedupe, load_account_map, load_exclusions,
    recipient_addresses,
};

/// Why a recipient was left out, in reporting priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// This campaign's own ledger has `SENT` or `INVALID` for the address.
    AlreadyContacted,
    /// Listed in the unsubscribe file.
    Unsubscribed,
    /// Listed in the suppression file.
    Suppressed,
    /// Another campaign's ledger has `SENT` or `INVALID` for the address.
    GloballyContacted,
    /// Queued in another campaign's recipient list.
    ///
    /// This claims the address for the other campaign even if it never sends
    /// to it; operators should know a stale recipient list keeps blocking.
    ReservedElsewhere,
}

impl SkipReason {
    /// All reasons in priority order.
    pub const ALL: [Self; 5] = [
        Self::AlreadyContacted,
        Self::Unsubscribed,
        Self::Suppressed,
        Self::GloballyContacted,
        Self::ReservedElsewhere,
    ];

    /// Short label for reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AlreadyContacted => "already_contacted",
            Self::Unsubscribed => "unsubscribed",
            Self::Suppressed => "suppressed",
            Self::GloballyContacted => "globally_contacted",
            Self::ReservedElsewhere => "reserved_elsewhere",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// The exclusion sets, all holding normalized addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    /// `SENT`/`INVALID` in this campaign's ledger.
    pub already_contacted: HashSet<String>,
    /// Unsubscribe list.
    pub unsubscribed: HashSet<String>,
    /// Suppression list.
    pub suppressed: HashSet<String>,
    /// `SENT`/`INVALID` in other campaigns' ledgers (cross-account dedupe).
    pub globally_contacted: HashSet<String>,
    /// Addresses in other campaigns' recipient lists (cross-account dedupe).
    pub reserved_elsewhere: HashSet<String>,
}

impl Exclusions {
    /// The set backing a reason.
    #[must_use]
    pub const fn set(&self, reason: SkipReason) -> &HashSet<String> {
        match reason {
            SkipReason::AlreadyContacted => &self.already_contacted,
            SkipReason::Unsubscribed => &self.unsubscribed,
            SkipReason::Suppressed => &self.suppressed,
            SkipReason::GloballyContacted => &self.globally_contacted,
            SkipReason::ReservedElsewhere => &self.reserved_elsewhere,
        }
    }

    /// First matching reason in priority order.
    #[must_use]
    pub fn reason_for(&self, address: &str) -> Option<SkipReason> {
        SkipReason::ALL
            .into_iter()
            .find(|reason| self.set(*reason).contains(address))
    }
}

/// Output of [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Eligible recipients in input order, with normalized addresses.
    pub pending: Vec<RecipientRecord>,
    /// Input rows.
    pub total: usize,
    /// Rows whose address could not be parsed.
    pub unparsable: usize,
    /// Repeats of an address earlier in the input.
    pub duplicates: usize,
    skipped: [usize; 5],
}

impl Resolution {
    /// Rows skipped for a reason.
    #[must_use]
    pub const fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped[reason.index()]
    }

    /// Rows skipped for any exclusion reason.
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.iter().sum()
    }
}

/// Resolves the pending list.
///
/// Normalizes each address, drops unparsable rows, keeps the first of any
/// repeated address, then drops addresses found in any exclusion set,
/// attributing each to the first matching [`SkipReason`]. Deterministic for
/// identical inputs.
#[must_use]
pub fn resolve(recipients: Vec<RecipientRecord>, exclusions: &Exclusions) -> Resolution {
    let mut resolution = Resolution {
        total: recipients.len(),
        ..Resolution::default()
    };
    let mut seen = HashSet::with_capacity(recipients.len());

    for mut record in recipients {
        let Some(address) = normalize_address(&record.address) else {
            resolution.unparsable += 1;
            continue;
        };
        if !seen.insert(address.clone()) {
            resolution.duplicates += 1;
            continue;
        }
        if let Some(reason) = exclusions.reason_for(&address) {
            resolution.skipped[reason.index()] += 1;
            continue;
        }
        record.address = address;
        resolution.pending.push(record);
    }

    resolution
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn records(addrs: &[&str]) -> Vec<RecipientRecord> {
        addrs.iter().map(|a| RecipientRecord::new(*a)).collect()
    }

    fn addresses(resolution: &Resolution) -> Vec<&str> {
        resolution.pending.iter().map(|r| r.address.as_str()).collect()
    }

    fn set(addrs: &[&str]) -> HashSet<String> {
        addrs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let resolution = resolve(
            records(&["a@example.org", "b@example.org", "A@Example.org", "c@example.org"]),
            &Exclusions::default(),
        );
        assert_eq!(addresses(&resolution), vec!["a@example.org", "b@example.org", "c@example.org"]);
        assert_eq!(resolution.duplicates, 1);
        assert_eq!(resolution.total, 4);
    }

    #[test]
    fn test_unparsable_rows_dropped() {
        let resolution = resolve(records(&["", "nope", "ok@example.org"]), &Exclusions::default());
        assert_eq!(addresses(&resolution), vec!["ok@example.org"]);
        assert_eq!(resolution.unparsable, 2);
    }

    #[test]
    fn test_reasons_reported_in_priority_order() {
        let exclusions = Exclusions {
            already_contacted: set(&["a@example.org"]),
            unsubscribed: set(&["a@example.org", "b@example.org"]),
            suppressed: set(&["b@example.org", "c@example.org"]),
            globally_contacted: set(&["d@example.org"]),
            reserved_elsewhere: set(&["d@example.org", "e@example.org"]),
        };
        let resolution = resolve(
            records(&[
                "a@example.org",
                "b@example.org",
                "c@example.org",
                "d@example.org",
                "e@example.org",
                "f@example.org",
            ]),
            &exclusions,
        );

        assert_eq!(addresses(&resolution), vec!["f@example.org"]);
        assert_eq!(resolution.skipped(SkipReason::AlreadyContacted), 1);
        assert_eq!(resolution.skipped(SkipReason::Unsubscribed), 1);
        assert_eq!(resolution.skipped(SkipReason::Suppressed), 1);
        assert_eq!(resolution.skipped(SkipReason::GloballyContacted), 1);
        assert_eq!(resolution.skipped(SkipReason::ReservedElsewhere), 1);
        assert_eq!(resolution.skipped_total(), 5);
    }

    #[test]
    fn test_pending_addresses_are_normalized() {
        let resolution = resolve(records(&["Jane <JANE@example.org>"]), &Exclusions::default());
        assert_eq!(addresses(&resolution), vec!["jane@example.org"]);
    }

    fn address_strategy() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "a@example.org",
            "b@example.org",
            "C@example.org",
            "c@example.org",
            "d@example.net",
            "Eve <e@example.net>",
            "broken",
            "",
        ])
        .prop_map(str::to_string)
    }

    fn exclusion_strategy() -> impl Strategy<Value = HashSet<String>> {
        prop::collection::hash_set(
            prop::sample::select(vec![
                "a@example.org",
                "b@example.org",
                "c@example.org",
                "d@example.net",
                "e@example.net",
            ])
            .prop_map(str::to_string),
            0..4,
        )
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic(
            input in prop::collection::vec(address_strategy(), 0..20),
            excluded in exclusion_strategy(),
        ) {
            let exclusions = Exclusions { suppressed: excluded, ..Exclusions::default() };
            let first = resolve(records(&input.iter().map(String::as_str).collect::<Vec<_>>()), &exclusions);
            let second = resolve(records(&input.iter().map(String::as_str).collect::<Vec<_>>()), &exclusions);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_more_exclusions_only_shrink(
            input in prop::collection::vec(address_strategy(), 0..20),
            base in exclusion_strategy(),
            extra in exclusion_strategy(),
        ) {
            let raw: Vec<&str> = input.iter().map(String::as_str).collect();
            let narrow = Exclusions { unsubscribed: base.clone(), ..Exclusions::default() };
            let wide = Exclusions {
                unsubscribed: base,
                reserved_elsewhere: extra,
                ..Exclusions::default()
            };

            let before = resolve(records(&raw), &narrow);
            let after = resolve(records(&raw), &wide);
            let before_set: HashSet<&str> = addresses(&before).into_iter().collect();
            prop_assert!(addresses(&after).iter().all(|a| before_set.contains(a)));
            prop_assert!(after.pending.len() <= before.pending.len());
        }

        #[test]
        fn prop_pending_is_unique_and_not_excluded(
            input in prop::collection::vec(address_strategy(), 0..20),
            excluded in exclusion_strategy(),
        ) {
            let exclusions = Exclusions { globally_contacted: excluded.clone(), ..Exclusions::default() };
            let raw: Vec<&str> = input.iter().map(String::as_str).collect();
            let resolution = resolve(records(&raw), &exclusions);
            let pending = addresses(&resolution);
            let unique: HashSet<&str> = pending.iter().copied().collect();
            prop_assert_eq!(unique.len(), pending.len());
            prop_assert!(pending.iter().all(|a| !excluded.contains(*a)));
            prop_assert_eq!(
                resolution.total,
                pending.len() + resolution.unparsable + resolution.duplicates + resolution.skipped_total()
            );
        }
    }
}
