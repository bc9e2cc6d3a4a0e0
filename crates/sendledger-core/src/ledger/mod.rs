//! Ledger Store.
//!
//! An append-only CSV table (`TimestampUTC,Email,Status,Info`) per quota
//! scope or campaign. Ledgers are the source of truth for who was contacted
//! and for how much of a rolling window is used; nothing is ever deleted.

mod entry;
mod store;

pub use entry::{
    INFO_MAX_CHARS, LedgerEntry, SLOT_TOKEN, Status, format_timestamp, parse_timestamp,
    sanitize_info, slot_token,
};
pub use store::{HEADER, Ledger, LedgerTxn, append_suppressed};
