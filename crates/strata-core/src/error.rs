//! Error types for the migration engine.

use strata_sql::ParseError;
use thiserror::Error;

/// Errors raised while classifying, stepping or intercepting statements.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Error reported by SQLite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The statement could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The statement cannot run against a table that is still migrating.
    #[error("unsupported statement on migrating table {table}: {reason}")]
    Unsupported {
        /// The migrating table.
        table: String,
        /// What the caller has to change.
        reason: String,
    },

    /// A migration source was declared that can never be valid.
    #[error("invalid migration source for {table}: {reason}")]
    InvalidSource {
        /// The destination table.
        table: String,
        /// Why the source was rejected.
        reason: String,
    },

    /// The caller tried to bind a parameter slot reserved for migration.
    #[error("parameter index {index} is reserved for migration")]
    ReservedParameter {
        /// The reserved index.
        index: usize,
    },

    /// The engine was used in a way it does not support.
    #[error("misuse: {0}")]
    Misuse(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading a plan file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A plan file is not valid JSON for a plan.
    #[error("plan error: {0}")]
    Plan(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    pub(crate) fn unsupported(table: &str, reason: impl Into<String>) -> Self {
        MigrationError::Unsupported {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}
