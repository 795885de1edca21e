//! Recovery from schema errors raised while preparing rewritten statements.
//!
//! SQLite only reports a missing table or column through its error message,
//! so this module is the single place that reads those messages.

use std::fmt;

use rusqlite::Connection;

use crate::error::{MigrationError, Result};

/// A table or column SQLite reported as missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingSchema {
    Table {
        schema: Option<String>,
        table: String,
    },
    Column {
        table: Option<String>,
        column: String,
    },
}

impl MissingSchema {
    /// Parse `no such table: [schema.]t`, `no such column: [t.]c` and
    /// `table t has no column named c`.
    pub fn from_message(message: &str) -> Option<Self> {
        let message = message.trim();
        if let Some(rest) = message.strip_prefix("no such table: ") {
            let name = first_word(rest)?;
            let (schema, table) = match name.split_once('.') {
                Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
                None => (None, name.to_string()),
            };
            return Some(MissingSchema::Table { schema, table });
        }
        if let Some(rest) = message.strip_prefix("no such column: ") {
            let name = first_word(rest)?;
            let (table, column) = match name.rsplit_once('.') {
                Some((table, column)) => (Some(table.to_string()), column.to_string()),
                None => (None, name.to_string()),
            };
            return Some(MissingSchema::Column { table, column });
        }
        let rest = message.strip_prefix("table ")?;
        let (table, column) = rest.split_once(" has no column named ")?;
        Some(MissingSchema::Column {
            table: Some(table.to_string()),
            column: first_word(column)?.to_string(),
        })
    }

    /// The missing schema element behind an SQLite error, if that is what it is.
    pub fn from_error(error: &MigrationError) -> Option<Self> {
        match error {
            MigrationError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(message))) => {
                Self::from_message(message)
            }
            _ => None,
        }
    }
}

fn first_word(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

impl fmt::Display for MissingSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingSchema::Table {
                schema: Some(schema),
                table,
            } => write!(f, "table {}.{}", schema, table),
            MissingSchema::Table { schema: None, table } => write!(f, "table {}", table),
            MissingSchema::Column {
                table: Some(table),
                column,
            } => write!(f, "column {}.{}", table, column),
            MissingSchema::Column {
                table: None,
                column,
            } => write!(f, "column {}", column),
        }
    }
}

/// Hook that repairs the schema before a failed prepare is retried.
pub trait SchemaRecovery: Send + Sync {
    fn recover(&self, conn: &Connection, missing: &MissingSchema) -> Result<()>;
}

impl<F> SchemaRecovery for F
where
    F: Fn(&Connection, &MissingSchema) -> Result<()> + Send + Sync,
{
    fn recover(&self, conn: &Connection, missing: &MissingSchema) -> Result<()> {
        self(conn, missing)
    }
}
