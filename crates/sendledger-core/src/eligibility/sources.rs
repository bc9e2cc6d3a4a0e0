//! Loading exclusion sets from disk.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::Exclusions;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::table::{column_index, read_address_file, reader};

const RECIPIENTS_COLUMNS: [&str; 3] = ["recipientscsv", "recipients", "recipients_csv"];
const LOG_COLUMNS: [&str; 3] = ["logcsv", "log", "log_csv"];

/// One campaign listed in an account map: its recipient file and ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignFiles {
    /// Recipient list.
    pub recipients: PathBuf,
    /// Campaign ledger.
    pub ledger: PathBuf,
}

/// Reads an account map. Relative paths resolve against the map's directory.
///
/// A missing map yields no entries. Rows missing either column are skipped.
///
/// # Errors
///
/// Returns an error if the map exists but cannot be read as CSV.
pub fn load_account_map(path: &Path) -> Result<Vec<CampaignFiles>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut rdr = reader(File::open(path)?);
    let headers = rdr.headers().map_err(|e| Error::csv(path, e))?.clone();
    let (Some(recipients_col), Some(log_col)) = (
        column_index(&headers, &RECIPIENTS_COLUMNS),
        column_index(&headers, &LOG_COLUMNS),
    ) else {
        warn!(path = %path.display(), "Account map lacks recipients/log columns");
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        let recipients = record.get(recipients_col).unwrap_or_default();
        let ledger = record.get(log_col).unwrap_or_default();
        if recipients.is_empty() || ledger.is_empty() {
            continue;
        }
        out.push(CampaignFiles {
            recipients: resolve_against(base, recipients),
            ledger: resolve_against(base, ledger),
        });
    }
    Ok(out)
}

fn resolve_against(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// The files consulted for cross-account dedupe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalDedupe {
    /// Ledgers whose `SENT`/`INVALID` addresses are globally contacted.
    pub ledgers: Vec<PathBuf>,
    /// Recipient lists whose addresses are reserved for their campaign.
    pub recipient_lists: Vec<PathBuf>,
}

impl GlobalDedupe {
    /// Uses every campaign in an account map.
    #[must_use]
    pub fn from_account_map(entries: &[CampaignFiles]) -> Self {
        Self {
            ledgers: entries.iter().map(|e| e.ledger.clone()).collect(),
            recipient_lists: entries.iter().map(|e| e.recipients.clone()).collect(),
        }
    }

    /// Finds sibling files in `dir` by single-`*` wildcard patterns, e.g.
    /// `*_log.csv` and `recipients_*.csv`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be listed.
    pub fn discover(dir: &Path, ledger_pattern: &str, recipients_pattern: &str) -> Result<Self> {
        Ok(Self {
            ledgers: matching_files(dir, ledger_pattern)?,
            recipient_lists: matching_files(dir, recipients_pattern)?,
        })
    }

    /// Returns true if nothing is consulted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ledgers.is_empty() && self.recipient_lists.is_empty()
    }
}

fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.file_type()?.is_file() && wildcard_match(pattern, &name.to_string_lossy()) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Matches a name against a pattern with at most one `*`.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

/// Where a run's exclusion sets come from.
#[derive(Debug, Clone, Copy)]
pub struct ExclusionSources<'a> {
    /// This campaign's ledger.
    pub ledger: &'a Ledger,
    /// This campaign's recipient file, never treated as reserved elsewhere.
    pub recipients: &'a Path,
    /// Unsubscribe file (`Email` column).
    pub unsubscribed: &'a Path,
    /// Suppression file (`Email` column).
    pub suppressed: &'a Path,
    /// Cross-account dedupe files, if enabled.
    pub global: Option<&'a GlobalDedupe>,
}

/// Snapshots every exclusion set.
///
/// Missing files contribute nothing.
///
/// # Errors
///
/// Returns an error if an existing file cannot be read.
pub fn load_exclusions(sources: &ExclusionSources<'_>) -> Result<Exclusions> {
    let mut exclusions = Exclusions {
        already_contacted: sources.ledger.contacted()?,
        unsubscribed: read_address_file(sources.unsubscribed)?,
        suppressed: read_address_file(sources.suppressed)?,
        ..Exclusions::default()
    };

    if let Some(global) = sources.global {
        for path in &global.ledgers {
            exclusions.globally_contacted.extend(Ledger::new(path).contacted()?);
        }

        let own = canonical(sources.recipients);
        for path in &global.recipient_lists {
            if canonical(path) == own {
                continue;
            }
            exclusions.reserved_elsewhere.extend(read_address_file(path)?);
        }
        debug!(
            globally_contacted = exclusions.globally_contacted.len(),
            reserved_elsewhere = exclusions.reserved_elsewhere.len(),
            "Cross-account dedupe loaded"
        );
    }

    Ok(exclusions)
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Addresses of a recipient file as a set (used by reports).
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn recipient_addresses(path: &Path) -> Result<HashSet<String>> {
    read_address_file(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerEntry, Status};
    use chrono::Utc;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*_log.csv", "acct1_log.csv"));
        assert!(wildcard_match("recipients_*.csv", "recipients_1.csv"));
        assert!(!wildcard_match("recipients_*.csv", "recipients.csv"));
        assert!(!wildcard_match("*_log.csv", "acct1_log.csv.bak"));
        assert!(wildcard_match("exact.csv", "exact.csv"));
    }

    #[test]
    fn test_account_map_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("account_map.csv");
        write(
            &map,
            "\u{feff}RecipientsCSV,LogCSV\nrecipients_1.csv,acct1_log.csv\n/abs/r.csv,/abs/l.csv\n,missing.csv\n",
        );

        let entries = load_account_map(&map).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].recipients, dir.path().join("recipients_1.csv"));
        assert_eq!(entries[0].ledger, dir.path().join("acct1_log.csv"));
        assert_eq!(entries[1].ledger, PathBuf::from("/abs/l.csv"));
    }

    #[test]
    fn test_missing_account_map_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_account_map(&dir.path().join("nope.csv")).unwrap().is_empty());
    }

    #[test]
    fn test_discover_sorts_matches() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_log.csv", "a_log.csv", "recipients_2.csv", "notes.txt"] {
            write(&dir.path().join(name), "Email\n");
        }
        let found = GlobalDedupe::discover(dir.path(), "*_log.csv", "recipients_*.csv").unwrap();
        assert_eq!(
            found.ledgers,
            vec![dir.path().join("a_log.csv"), dir.path().join("b_log.csv")]
        );
        assert_eq!(found.recipient_lists, vec![dir.path().join("recipients_2.csv")]);
    }

    #[test]
    fn test_discover_without_matches_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("notes.txt"), "Email\n");
        let found = GlobalDedupe::discover(dir.path(), "*_log.csv", "recipients_*.csv").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_load_exclusions_skips_own_recipient_file() {
        let dir = tempfile::tempdir().unwrap();
        let own_recipients = dir.path().join("recipients_1.csv");
        let other_recipients = dir.path().join("recipients_2.csv");
        write(&own_recipients, "Email\nmine@example.org\n");
        write(&other_recipients, "Email\ntheirs@example.org\n");
        write(&dir.path().join("unsubscribed.csv"), "Email\nGone@Example.org\n");

        let own_ledger = Ledger::new(dir.path().join("acct1_log.csv"));
        own_ledger
            .append(&LedgerEntry::new(Utc::now(), "done@example.org", Status::Sent, ""))
            .unwrap();
        let other_ledger = Ledger::new(dir.path().join("acct2_log.csv"));
        other_ledger
            .append(&LedgerEntry::new(Utc::now(), "bad@example.org", Status::Invalid, "550"))
            .unwrap();
        other_ledger
            .append(&LedgerEntry::new(Utc::now(), "retry@example.org", Status::Error, "421"))
            .unwrap();

        let global = GlobalDedupe::discover(dir.path(), "*_log.csv", "recipients_*.csv").unwrap();
        let sources = ExclusionSources {
            ledger: &own_ledger,
            recipients: &own_recipients,
            unsubscribed: &dir.path().join("unsubscribed.csv"),
            suppressed: &dir.path().join("suppressed.csv"),
            global: Some(&global),
        };
        let exclusions = load_exclusions(&sources).unwrap();

        assert!(exclusions.already_contacted.contains("done@example.org"));
        assert!(exclusions.unsubscribed.contains("gone@example.org"));
        assert!(exclusions.suppressed.is_empty());
        assert!(exclusions.globally_contacted.contains("bad@example.org"));
        assert!(!exclusions.globally_contacted.contains("retry@example.org"));
        assert!(exclusions.reserved_elsewhere.contains("theirs@example.org"));
        assert!(!exclusions.reserved_elsewhere.contains("mine@example.org"));
    }

    #[test]
    fn test_load_exclusions_without_global_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("log.csv"));
        let sources = ExclusionSources {
            ledger: &ledger,
            recipients: &dir.path().join("r.csv"),
            unsubscribed: &dir.path().join("u.csv"),
            suppressed: &dir.path().join("s.csv"),
            global: None,
        };
        assert_eq!(load_exclusions(&sources).unwrap(), Exclusions::default());
    }
}
