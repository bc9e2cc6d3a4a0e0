//! Read-only reports over ledgers: window health per ledger and pending
//! counts per campaign.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::classify::{Category, classify};
use crate::eligibility::{CampaignFiles, recipient_addresses};
use crate::error::Result;
use crate::ledger::{Ledger, Status};
use crate::quota::{QuotaPolicy, WindowStats, window_stats};
use crate::table::read_address_file;

/// Formats a resume time, or `n/a`.
#[must_use]
pub fn format_resume(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "n/a".to_string(),
        |ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Time left until `at` as `Xh Ym`, `now` if already passed, or `n/a`.
#[must_use]
pub fn remaining(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "n/a".to_string();
    };
    let secs = (at - now).num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
}

/// Health of one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// Room left.
    Ok,
    /// A cap is reached.
    AtCap,
    /// The last error was an authentication failure.
    AuthFailed,
    /// The last error was a provider hard limit.
    HardLimited,
}

impl Health {
    /// Label used in reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::AtCap => "AT/NEAR CAP",
            Self::AuthFailed => "AUTH FAILED",
            Self::HardLimited => "HARD LIMITED",
        }
    }

    /// Derives the health from window stats and the last `ERROR` info.
    #[must_use]
    pub fn assess(stats: &WindowStats, policy: &QuotaPolicy, last_error: Option<&str>) -> Self {
        if let Some(info) = last_error {
            if info.starts_with("auth_failed") {
                return Self::AuthFailed;
            }
            if classify(None, info) == Category::HardLimit {
                return Self::HardLimited;
            }
        }
        let messages_full = policy.max_events.is_some_and(|max| stats.occupancy >= max);
        let unique_full = policy
            .max_unique_external
            .is_some_and(|max| stats.unique_external() >= max);
        if messages_full || unique_full {
            Self::AtCap
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHealth {
    /// Ledger file.
    pub path: PathBuf,
    /// Window statistics.
    pub stats: WindowStats,
    /// `Info` of the most recent `ERROR` row.
    pub last_error: Option<String>,
    /// Derived health.
    pub health: Health,
}

impl LedgerHealth {
    /// Reads one ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub fn read(path: &Path, policy: &QuotaPolicy, now: DateTime<Utc>) -> Result<Self> {
        let entries = Ledger::new(path).read_all()?;
        let stats = window_stats(&entries, policy, now);
        let last_error = entries
            .iter()
            .rev()
            .find(|e| e.status == Status::Error)
            .map(|e| e.info.clone());
        let health = Health::assess(&stats, policy, last_error.as_deref());
        Ok(Self {
            path: path.to_path_buf(),
            stats,
            last_error,
            health,
        })
    }

    /// When the binding cap frees up.
    #[must_use]
    pub fn resume_at(&self) -> Option<DateTime<Utc>> {
        match (self.stats.resume_messages, self.stats.resume_unique_external) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Window health across ledgers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// One row per distinct ledger.
    pub rows: Vec<LedgerHealth>,
}

impl StatusReport {
    /// Reads every ledger once, in the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger cannot be read.
    pub fn build(ledgers: &[PathBuf], policy: &QuotaPolicy, now: DateTime<Utc>) -> Result<Self> {
        let mut seen: Vec<Ledger> = Vec::new();
        let mut rows = Vec::new();
        for path in ledgers {
            let ledger = Ledger::new(path);
            if seen.iter().any(|s| s.same_file(&ledger)) {
                continue;
            }
            rows.push(LedgerHealth::read(path, policy, now)?);
            seen.push(ledger);
        }
        Ok(Self { rows })
    }

    /// Rows needing attention.
    pub fn issues(&self) -> impl Iterator<Item = &LedgerHealth> {
        self.rows.iter().filter(|r| r.health != Health::Ok)
    }

    /// Healthy rows.
    pub fn healthy(&self) -> impl Iterator<Item = &LedgerHealth> {
        self.rows.iter().filter(|r| r.health == Health::Ok)
    }

    /// `SUMMARY: ok=… | issues=… | total=…`.
    #[must_use]
    pub fn summary(&self) -> String {
        let issues = self.issues().count();
        format!(
            "SUMMARY: ok={} | issues={issues} | total={}",
            self.rows.len() - issues,
            self.rows.len()
        )
    }
}

/// Pending counts for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Distinct recipients.
    pub total: usize,
    /// Recipients already `SENT` or `INVALID` in the campaign ledger.
    pub handled: usize,
    /// Recipients on the unsubscribe list.
    pub unsubscribed: usize,
    /// Recipients on the suppression list.
    pub suppressed: usize,
    /// Pending addresses, sorted.
    pub pending: Vec<String>,
}

/// One row of the pending report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    /// Campaign files.
    pub campaign: CampaignFiles,
    /// `None` when the recipient file is missing.
    pub counts: Option<PendingCounts>,
}

/// Counts what is left to send for each campaign.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read.
pub fn pending_report(
    campaigns: &[CampaignFiles],
    unsubscribe_file: &Path,
    suppress_file: &Path,
) -> Result<Vec<PendingRow>> {
    let unsubscribed = read_address_file(unsubscribe_file)?;
    let suppressed = read_address_file(suppress_file)?;

    campaigns
        .iter()
        .map(|campaign| {
            if !campaign.recipients.is_file() {
                return Ok(PendingRow {
                    campaign: campaign.clone(),
                    counts: None,
                });
            }
            let recipients = recipient_addresses(&campaign.recipients)?;
            let handled = Ledger::new(&campaign.ledger).contacted()?;
            let count = |set: &HashSet<String>| recipients.intersection(set).count();

            let mut pending: Vec<String> = recipients
                .iter()
                .filter(|a| !handled.contains(*a) && !unsubscribed.contains(*a) && !suppressed.contains(*a))
                .cloned()
                .collect();
            pending.sort();

            Ok(PendingRow {
                campaign: campaign.clone(),
                counts: Some(PendingCounts {
                    total: recipients.len(),
                    handled: count(&handled),
                    unsubscribed: count(&unsubscribed),
                    suppressed: count(&suppressed),
                    pending,
                }),
            })
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::address::OwnedDomains;
    use crate::ledger::LedgerEntry;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_remaining_format() {
        assert_eq!(remaining(None, now()), "n/a");
        assert_eq!(remaining(Some(now() - TimeDelta::minutes(1)), now()), "now");
        assert_eq!(
            remaining(Some(now() + TimeDelta::minutes(135) + TimeDelta::seconds(30)), now()),
            "2h 15m"
        );
        assert_eq!(format_resume(Some(now())), "2026-02-01 12:00:00 UTC");
    }

    #[test]
    fn test_health_precedence() {
        let policy = QuotaPolicy::daily(Some(2), None, OwnedDomains::default());
        let full = WindowStats {
            occupancy: 2,
            ..WindowStats::default()
        };
        assert_eq!(
            Health::assess(&full, &policy, Some("auth_failed: 535 bad credentials")),
            Health::AuthFailed
        );
        assert_eq!(
            Health::assess(&WindowStats::default(), &policy, Some("550 5.4.5 Daily user sending limit exceeded")),
            Health::HardLimited
        );
        assert_eq!(Health::assess(&full, &policy, Some("421 try again later")), Health::AtCap);
        assert_eq!(Health::assess(&WindowStats::default(), &policy, None), Health::Ok);
    }

    #[test]
    fn test_status_report_dedupes_ledgers() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a_log.csv");
        let b = dir.path().join("b_log.csv");
        let ledger = Ledger::new(&a);
        for m in [10, 20] {
            ledger
                .append(&LedgerEntry::new(now() - TimeDelta::minutes(m), "x@example.org", Status::Sent, ""))
                .unwrap();
        }
        Ledger::new(&b)
            .append(&LedgerEntry::new(now(), "y@example.org", Status::Error, "auth_failed: 535"))
            .unwrap();

        let report = StatusReport::build(&[a.clone(), b.clone(), a.clone()], &QuotaPolicy::hourly(2), now()).unwrap();
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].health, Health::AtCap);
        assert_eq!(report.rows[0].resume_at(), Some(now() + TimeDelta::minutes(40)));
        assert_eq!(report.rows[1].health, Health::AuthFailed);
        assert_eq!(report.summary(), "SUMMARY: ok=0 | issues=2 | total=2");
    }

    #[test]
    fn test_pending_report_counts() {
        let dir = tempfile::tempdir().unwrap();
        let recipients = dir.path().join("recipients_1.csv");
        std::fs::write(
            &recipients,
            "Email\na@example.org\nb@example.org\nc@example.org\nd@example.org\n",
        )
        .unwrap();
        let ledger = dir.path().join("one_log.csv");
        Ledger::new(&ledger)
            .append(&LedgerEntry::new(now(), "a@example.org", Status::Sent, ""))
            .unwrap();
        let unsub = dir.path().join("unsubscribed.csv");
        std::fs::write(&unsub, "Email\nb@example.org\n").unwrap();
        let supp = dir.path().join("suppressed.csv");

        let campaigns = [
            CampaignFiles {
                recipients: recipients.clone(),
                ledger: ledger.clone(),
            },
            CampaignFiles {
                recipients: dir.path().join("recipients_2.csv"),
                ledger: dir.path().join("two_log.csv"),
            },
        ];
        let rows = pending_report(&campaigns, &unsub, &supp).unwrap();
        let counts = rows[0].counts.as_ref().unwrap();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.handled, 1);
        assert_eq!(counts.unsubscribed, 1);
        assert_eq!(counts.suppressed, 0);
        assert_eq!(counts.pending, vec!["c@example.org", "d@example.org"]);
        assert!(rows[1].counts.is_none());
    }
}
