//! File-backed, append-only ledger shared between processes.
//!
//! Every mutation happens under an exclusive advisory lock on the ledger file
//! and is fsynced before the lock is released.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use csv::{Terminator, WriterBuilder};
use tracing::trace;

use super::entry::{LedgerEntry, Status, format_timestamp, parse_timestamp};
use crate::address::normalize_address;
use crate::error::{Error, Result};
use crate::table;

/// Ledger header, in column order.
pub const HEADER: [&str; 4] = ["TimestampUTC", "Email", "Status", "Info"];

/// Handle to one ledger file (one quota scope or one campaign log).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Creates a handle. The file is created lazily on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if both handles resolve to the same file.
    #[must_use]
    pub fn same_file(&self, other: &Self) -> bool {
        match (self.path.canonicalize(), other.path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.path == other.path,
        }
    }

    /// Reads every row. A missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] if the file cannot be opened or locked, or
    /// [`Error::Csv`] if it is not valid CSV.
    pub fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).map_err(|e| Error::ledger(&self.path, e))?;
        file.lock_shared()
            .map_err(|e| Error::ledger(&self.path, e))?;
        let entries = parse_entries(&file, &self.path);
        file.unlock().map_err(|e| Error::ledger(&self.path, e))?;
        entries
    }

    /// Appends one row, creating the file with its header if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] if the row cannot be durably written.
    pub fn append(&self, entry: &LedgerEntry) -> Result<()> {
        self.transaction(|txn| txn.append(entry.clone()))
    }

    /// Runs `f` inside the ledger's exclusive critical section.
    ///
    /// The closure sees every row as of lock acquisition and may append more;
    /// no other process can read-for-quota or write until it returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] on open/lock/write failures, or whatever
    /// `f` returns.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut LedgerTxn<'_>) -> Result<T>) -> Result<T> {
        let file = open_locked(&self.path, &HEADER.join(","))?;
        let result = parse_entries(&file, &self.path).and_then(|entries| {
            let mut txn = LedgerTxn {
                file: &file,
                path: &self.path,
                entries,
            };
            f(&mut txn)
        });
        file.unlock().map_err(|e| Error::ledger(&self.path, e))?;
        result
    }

    /// Recipients this ledger marks as handled (`SENT` or `INVALID`).
    ///
    /// # Errors
    ///
    /// Same as [`Ledger::read_all`].
    pub fn contacted(&self) -> Result<HashSet<String>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.status.is_terminal() && !e.recipient.is_empty())
            .map(|e| e.recipient)
            .collect())
    }
}

/// Open critical section on a ledger.
#[derive(Debug)]
pub struct LedgerTxn<'a> {
    file: &'a File,
    path: &'a Path,
    entries: Vec<LedgerEntry>,
}

impl LedgerTxn<'_> {
    /// Rows as of lock acquisition plus rows appended in this section.
    #[must_use]
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// Appends and fsyncs one row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ledger`] if the write or fsync fails.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<()> {
        let row = encode_row(&[
            entry.timestamp.map(format_timestamp).unwrap_or_default().as_str(),
            entry.recipient.as_str(),
            entry.status.as_str(),
            entry.info.as_str(),
        ])
        .map_err(|e| Error::ledger(self.path, e))?;
        write_durably(self.file, &row).map_err(|e| Error::ledger(self.path, e))?;
        trace!(ledger = %self.path.display(), status = %entry.status, "Ledger row appended");
        self.entries.push(entry);
        Ok(())
    }
}

/// Appends an address to an `Email`-column exclusion file (e.g. the
/// suppression list), creating it with its header if needed.
///
/// # Errors
///
/// Returns [`Error::Ledger`] if the file cannot be locked or written.
pub fn append_suppressed(path: &Path, address: &str) -> Result<()> {
    if address.is_empty() {
        return Ok(());
    }
    let file = open_locked(path, "Email")?;
    let written = encode_row(&[address]).and_then(|row| write_durably(&file, &row));
    file.unlock().map_err(|e| Error::ledger(path, e))?;
    written.map_err(|e| Error::ledger(path, e))
}

/// Opens (creating parents and file as needed), locks exclusively, and writes
/// `header` if the file is empty.
fn open_locked(path: &Path, header: &str) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::ledger(path, e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| Error::ledger(path, e))?;
    file.lock().map_err(|e| Error::ledger(path, e))?;

    let len = file.metadata().map_err(|e| Error::ledger(path, e))?.len();
    if len == 0 {
        write_durably(&file, format!("{header}\r\n").as_bytes())
            .map_err(|e| Error::ledger(path, e))?;
    }
    Ok(file)
}

fn write_durably(mut file: &File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()
}

fn encode_row(fields: &[&str]) -> std::io::Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(Vec::new());
    writer.write_record(fields).map_err(std::io::Error::other)?;
    writer.into_inner().map_err(|e| e.into_error())
}

fn parse_entries(mut file: &File, path: &Path) -> Result<Vec<LedgerEntry>> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::ledger(path, e))?;
    parse_from(file, path)
}

fn parse_from<R: Read>(source: R, path: &Path) -> Result<Vec<LedgerEntry>> {
    let mut rdr = table::reader(source);
    let headers = rdr.headers().map_err(|e| Error::csv(path, e))?.clone();
    let ts_col = table::column_index(&headers, &["TimestampUTC"]);
    let email_col = table::column_index(&headers, &["Email"]);
    let status_col = table::column_index(&headers, &["Status"]);
    let info_col = table::column_index(&headers, &["Info"]);

    let mut entries = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        let field = |col: Option<usize>| col.and_then(|i| record.get(i)).unwrap_or("");
        let Some(status) = Status::parse(field(status_col)) else {
            continue;
        };
        entries.push(LedgerEntry {
            timestamp: parse_timestamp(field(ts_col)),
            recipient: normalize_address(field(email_col)).unwrap_or_default(),
            status,
            info: field(info_col).to_string(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn ts(h: u32, m: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_missing_ledger_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("nope.csv"));
        assert!(ledger.read_all().unwrap().is_empty());
        assert!(ledger.contacted().unwrap().is_empty());
    }

    #[test]
    fn test_append_creates_header_and_crlf_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("campaign_log.csv");
        let ledger = Ledger::new(&path);

        ledger
            .append(&LedgerEntry::new(ts(9, 0), "a@example.org", Status::Sent, ""))
            .unwrap();
        ledger
            .append(&LedgerEntry::new(ts(9, 1), "b@example.org", Status::Error, "421, try again"))
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            raw,
            "TimestampUTC,Email,Status,Info\r\n\
             2026-02-01T09:00:00.000000Z,a@example.org,SENT,\r\n\
             2026-02-01T09:01:00.000000Z,b@example.org,ERROR,\"421, try again\"\r\n"
        );

        let entries = ledger.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].info, "421, try again");
        assert_eq!(entries[0].timestamp, Some(ts(9, 0)));
    }

    #[test]
    fn test_read_legacy_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy_log.csv");
        std::fs::write(
            &path,
            "\u{feff}TimestampUTC,Email,Status,Info\n\
             2026-02-01T09:00:00.123456+00:00,A@Example.org,sent,\n\
             garbage,b@example.org,INVALID,550 5.1.1\n\
             2026-02-01T09:05:00Z,c@example.org,BOUNCED,\n\
             2026-02-01T09:06:00Z,,SLOT,reserve\n",
        )
        .unwrap();

        let entries = Ledger::new(&path).read_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].recipient, "a@example.org");
        assert_eq!(entries[0].status, Status::Sent);
        assert_eq!(entries[1].timestamp, None);
        assert_eq!(entries[2].status, Status::Slot);

        let contacted = Ledger::new(&path).contacted().unwrap();
        assert_eq!(contacted.len(), 2);
        assert!(contacted.contains("b@example.org"));
    }

    #[test]
    fn test_transaction_sees_own_appends() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("domain_log.csv"));
        ledger.append(&LedgerEntry::reservation(ts(8, 0))).unwrap();

        let seen = ledger
            .transaction(|txn| {
                assert_eq!(txn.entries().len(), 1);
                txn.append(LedgerEntry::reservation(ts(8, 1)))?;
                Ok(txn.entries().len())
            })
            .unwrap();
        assert_eq!(seen, 2);
        assert_eq!(ledger.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_append_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suppressed.csv");
        append_suppressed(&path, "x@example.org").unwrap();
        append_suppressed(&path, "y@example.org").unwrap();
        append_suppressed(&path, "").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, "Email\r\nx@example.org\r\ny@example.org\r\n");
        assert_eq!(table::read_address_file(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "TimestampUTC,Email,Status,Info\r\n").unwrap();
        let direct = Ledger::new(&path);
        let dotted = Ledger::new(dir.path().join(".").join("a.csv"));
        assert!(direct.same_file(&dotted));
        assert!(!direct.same_file(&Ledger::new(dir.path().join("b.csv"))));
    }
}
