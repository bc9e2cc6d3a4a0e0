//! Recipient lists.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use crate::error::{Error, Result};
use crate::table::{column_index, header_key, reader};

/// One row of a recipient list.
///
/// `address` is the raw `Email` cell until the eligibility resolver
/// normalizes it; `fields` holds every column for template substitution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientRecord {
    /// Recipient address.
    pub address: String,
    /// All columns by header, as written in the file.
    pub fields: BTreeMap<String, String>,
}

impl RecipientRecord {
    /// Creates a record with only an address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Looks up a column, exact header first, then case-insensitively.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .or_else(|| {
                let wanted = name.to_lowercase();
                self.fields
                    .iter()
                    .find(|(key, _)| header_key(key) == wanted)
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }
}

/// Reads a recipient list. The file needs an `Email` column.
///
/// # Errors
///
/// Returns [`Error::Config`] if the file is missing or has no `Email`
/// column, or [`Error::Csv`] if it cannot be parsed.
pub fn load_recipients(path: &Path) -> Result<Vec<RecipientRecord>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("recipient list {}: {e}", path.display())))?;
    let mut rdr = reader(file);
    let headers = rdr.headers().map_err(|e| Error::csv(path, e))?.clone();
    let email = column_index(&headers, &["Email"]).ok_or_else(|| {
        Error::Config(format!("recipient list {} has no Email column", path.display()))
    })?;
    let names: Vec<String> = headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| Error::csv(path, e))?;
        let fields = names
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        out.push(RecipientRecord {
            address: record.get(email).unwrap_or_default().to_string(),
            fields,
        });
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_load_keeps_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recipients_1.csv");
        std::fs::write(
            &path,
            "\u{feff}Email,AuthorName,BookTitle\r\nJane@Example.org, Jane ,Rivers\r\nshort@example.org\r\n",
        )
        .unwrap();

        let records = load_recipients(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, "Jane@Example.org");
        assert_eq!(records[0].field("AuthorName"), Some("Jane"));
        assert_eq!(records[0].field("booktitle"), Some("Rivers"));
        assert_eq!(records[1].field("AuthorName"), None);
    }

    #[test]
    fn test_missing_email_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.csv");
        std::fs::write(&path, "Name\nx\n").unwrap();
        assert!(matches!(load_recipients(&path), Err(Error::Config(_))));
        assert!(matches!(
            load_recipients(&dir.path().join("missing.csv")),
            Err(Error::Config(_))
        ));
    }
}
