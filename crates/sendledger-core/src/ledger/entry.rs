//! Ledger rows.

use chrono::{DateTime, SecondsFormat, Utc};

/// Maximum stored length of the `Info` column, in characters.
pub const INFO_MAX_CHARS: usize = 300;

/// Prefix of the `Info` token that ties a `SENT` row to its `SLOT` reservation.
pub const SLOT_TOKEN: &str = "slot=";

/// Status column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Message accepted by the provider.
    Sent,
    /// Quota reservation placeholder.
    Slot,
    /// Attempt failed.
    Error,
    /// Recipient refused as unknown.
    Invalid,
    /// Dry run; nothing was sent.
    DryRun,
}

impl Status {
    /// Parse from the ledger representation (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SENT" => Some(Self::Sent),
            "SLOT" => Some(Self::Slot),
            "ERROR" => Some(Self::Error),
            "INVALID" => Some(Self::Invalid),
            "DRYRUN" => Some(Self::DryRun),
            _ => None,
        }
    }

    /// Convert to the ledger representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Slot => "SLOT",
            Self::Error => "ERROR",
            Self::Invalid => "INVALID",
            Self::DryRun => "DRYRUN",
        }
    }

    /// `SENT` and `INVALID` permanently mark a recipient as handled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Invalid)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Event time. `None` when the stored timestamp could not be parsed; such
    /// rows still count for dedupe but never for windows.
    pub timestamp: Option<DateTime<Utc>>,
    /// Normalized recipient, empty for reservations.
    pub recipient: String,
    /// Row status.
    pub status: Status,
    /// Free text, single line, at most [`INFO_MAX_CHARS`] characters.
    pub info: String,
}

impl LedgerEntry {
    /// Creates an entry, sanitizing `info`.
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        recipient: impl Into<String>,
        status: Status,
        info: &str,
    ) -> Self {
        Self {
            timestamp: Some(timestamp),
            recipient: recipient.into(),
            status,
            info: sanitize_info(info),
        }
    }

    /// A `SLOT` reservation row.
    #[must_use]
    pub fn reservation(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, "", Status::Slot, "reserve")
    }

    /// Returns the reservation timestamp this row settles, if it carries one.
    #[must_use]
    pub fn settled_slot(&self) -> Option<DateTime<Utc>> {
        self.info
            .split_whitespace()
            .find_map(|token| token.strip_prefix(SLOT_TOKEN))
            .and_then(parse_timestamp)
    }

    /// Returns true if this row occupies a window position: every `SLOT`, and
    /// `SENT` rows that do not settle a reservation.
    #[must_use]
    pub fn occupies_window(&self) -> bool {
        match self.status {
            Status::Slot => true,
            Status::Sent => self.settled_slot().is_none(),
            Status::Error | Status::Invalid | Status::DryRun => false,
        }
    }
}

/// Builds the `Info` token for a settled reservation.
#[must_use]
pub fn slot_token(reserved_at: DateTime<Utc>) -> String {
    format!("{SLOT_TOKEN}{}", format_timestamp(reserved_at))
}

/// Formats a timestamp as RFC 3339 with microseconds and a `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses `Z`, `+00:00` and other offset forms, plus offset-less ISO
/// timestamps (taken as UTC).
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Collapses whitespace to single spaces and truncates to [`INFO_MAX_CHARS`].
#[must_use]
pub fn sanitize_info(info: &str) -> String {
    info.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(INFO_MAX_CHARS)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_parse() {
        assert_eq!(Status::parse(" sent "), Some(Status::Sent));
        assert_eq!(Status::parse("DryRun"), Some(Status::DryRun));
        assert_eq!(Status::parse("BOUNCED"), None);
        assert!(Status::Invalid.is_terminal());
        assert!(!Status::Error.is_terminal());
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp("2026-01-02T03:04:05Z"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-02T03:04:05+00:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-02T11:04:05+08:00"), Some(expected));
        assert_eq!(parse_timestamp("2026-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_format_timestamp_uses_z_and_micros() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(ts), "2026-01-02T03:04:05.000000Z");
    }

    #[test]
    fn test_info_sanitized() {
        let long = "x".repeat(400);
        let entry = LedgerEntry::new(Utc::now(), "a@b.c", Status::Error, &long);
        assert_eq!(entry.info.chars().count(), INFO_MAX_CHARS);

        let multi = LedgerEntry::new(Utc::now(), "a@b.c", Status::Error, "550 5.1.1\r\n  user   unknown");
        assert_eq!(multi.info, "550 5.1.1 user unknown");
    }

    #[test]
    fn test_settlement_token() {
        let reserved = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let info = format!("reconnect_ok {}", slot_token(reserved));
        let sent = LedgerEntry::new(Utc::now(), "a@b.c", Status::Sent, &info);
        assert_eq!(sent.settled_slot(), Some(reserved));
        assert!(!sent.occupies_window());

        let legacy = LedgerEntry::new(Utc::now(), "a@b.c", Status::Sent, "");
        assert!(legacy.occupies_window());
        assert!(LedgerEntry::reservation(reserved).occupies_window());
        assert!(!LedgerEntry::new(reserved, "a@b.c", Status::Error, "x").occupies_window());
    }
}
