//! Error types for reconstruction requests
//!
//! Request-level failures abort a reconstruction with no partial output. Per-item
//! findings (incomplete spans and friends) are not errors; they travel as
//! [`crate::diagnostics::Diagnostic`] values next to the result.

use thiserror::Error;

/// Errors raised by an [`crate::store::EventStore`] implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid row in {table} (id {id}): {reason}")]
    InvalidRow {
        table: &'static str,
        id: i64,
        reason: String,
    },

    #[error("Invalid fn_tag pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Errors that abort a whole reconstruction request
#[derive(Error, Debug)]
pub enum ReconstructError {
    #[error("Could not find enough details in db for {subject}: {detail}")]
    InsufficientData { subject: String, detail: String },

    #[error("Conflicting options: {0}")]
    ConflictingOptions(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReconstructError {
    pub fn insufficient(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        ReconstructError::InsufficientData {
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for reconstruction operations
pub type Result<T> = std::result::Result<T, ReconstructError>;
