//! Error types for the core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::campaign::ValidationError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A ledger could not be opened, locked, read or written.
    ///
    /// Quota decisions depend on the ledger, so this always stops the run.
    #[error("Ledger {} unavailable: {source}", .path.display())]
    Ledger {
        /// Ledger file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A CSV file could not be parsed.
    #[error("Malformed CSV in {}: {source}", .path.display())]
    Csv {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Campaign file could not be parsed.
    #[error("Invalid campaign file: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resolved campaign configuration failed validation.
    #[error("Invalid campaign configuration: {}", join_messages(.0))]
    Validation(Vec<ValidationError>),

    /// A message could not be rendered.
    #[error("Rendering failed: {0}")]
    Render(String),
}

impl Error {
    pub(crate) fn ledger(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Ledger {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field(), e.message()))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
