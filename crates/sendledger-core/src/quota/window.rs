//! Window statistics over ledger rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::policy::QuotaPolicy;
use crate::ledger::{LedgerEntry, Status};

/// Occupancy of one trailing window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowStats {
    /// Events occupying the window (`SLOT` plus unsettled `SENT`).
    pub occupancy: u32,
    /// Oldest occupying event.
    pub oldest: Option<DateTime<Utc>>,
    /// When the oldest occupying event leaves the window.
    pub resume_messages: Option<DateTime<Utc>>,
    /// Last send time per distinct external recipient in the window.
    pub external_last_send: HashMap<String, DateTime<Utc>>,
    /// Earliest "last send" among counted external recipients, plus the window.
    pub resume_unique_external: Option<DateTime<Utc>>,
}

impl WindowStats {
    /// Distinct external recipients in the window.
    #[must_use]
    pub fn unique_external(&self) -> u32 {
        u32::try_from(self.external_last_send.len()).unwrap_or(u32::MAX)
    }

    /// Returns true if the recipient is already counted in the window.
    #[must_use]
    pub fn counts_recipient(&self, address: &str) -> bool {
        self.external_last_send.contains_key(address)
    }
}

/// Computes window statistics for `policy` at `now`.
///
/// Rows without a parsable timestamp are ignored.
#[must_use]
pub fn window_stats(entries: &[LedgerEntry], policy: &QuotaPolicy, now: DateTime<Utc>) -> WindowStats {
    let cutoff = now - policy.window;
    let mut stats = WindowStats::default();

    for entry in entries {
        let Some(ts) = entry.timestamp.filter(|ts| *ts >= cutoff) else {
            continue;
        };

        if entry.occupies_window() {
            stats.occupancy += 1;
            stats.oldest = Some(stats.oldest.map_or(ts, |oldest| oldest.min(ts)));
        }

        if entry.status == Status::Sent
            && !entry.recipient.is_empty()
            && policy.owned_domains.is_external(&entry.recipient)
        {
            stats
                .external_last_send
                .entry(entry.recipient.clone())
                .and_modify(|last| *last = (*last).max(ts))
                .or_insert(ts);
        }
    }

    stats.resume_messages = stats.oldest.map(|oldest| oldest + policy.window);
    stats.resume_unique_external = stats
        .external_last_send
        .values()
        .min()
        .map(|earliest| *earliest + policy.window);
    stats
}
