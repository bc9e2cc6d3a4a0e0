//! Helpers for the CSV tables the scheduler reads (ledgers, exclusion lists,
//! recipient lists, account maps).
//!
//! Headers are matched case-insensitively after trimming whitespace and a
//! UTF-8 byte order mark.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::address::normalize_address;
use crate::error::{Error, Result};

/// Builds a lenient reader: flexible row lengths, trimmed fields.
pub(crate) fn reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source)
}

/// Cleans a header cell.
pub(crate) fn header_key(raw: &str) -> String {
    raw.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Finds the first header matching any of `names` (case-insensitive).
pub(crate) fn column_index(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    let keys: Vec<String> = headers.iter().map(header_key).collect();
    names.iter().find_map(|name| {
        let wanted = name.to_lowercase();
        keys.iter().position(|key| *key == wanted)
    })
}

/// Reads the normalized addresses of an `Email`-column file.
///
/// A missing file yields an empty set; unparsable addresses are skipped.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read as CSV.
pub fn read_address_file(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let file = File::open(path)?;
    let mut rdr = reader(file);
    let headers = rdr.headers().map_err(|e| Error::csv(path, e))?.clone();
    let Some(column) = column_index(&headers, &["Email"]) else {
        tracing::warn!(path = %path.display(), "No Email column; file ignored");
        return Ok(HashSet::new());
    };

    let mut out = HashSet::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        if let Some(address) = record.get(column).and_then(normalize_address) {
            out.insert(address);
        }
    }
    Ok(out)
}
