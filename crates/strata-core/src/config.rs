//! Handle and stepper configuration, and JSON migration plans.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::Filter;
use crate::error::{MigrationError, Result};
use crate::info::{is_builtin_table, MigrationUserInfo};

/// Default time a connection waits on a locked database.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// SQLite's default upper bound on bind parameter indices.
pub const DEFAULT_MAX_VARIABLE_NUMBER: usize = 32766;
/// Default target duration of one stepping transaction, commit included.
pub const DEFAULT_MAX_EXPECTING_DURATION: Duration = Duration::from_millis(10);
/// Row copy budget used until enough samples have been taken.
pub const DEFAULT_INITIAL_DURATION: Duration = Duration::from_millis(5);

/// Configuration of a [`MigratingHandle`](crate::MigratingHandle).
#[derive(Debug, Clone)]
pub struct HandleConfig {
    /// Busy timeout of the underlying connection.
    pub busy_timeout: Duration,
    /// Highest bind parameter index the engine accepts. Migration reserves
    /// this index for the rowid of rewritten statements.
    pub max_variable_number: usize,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_variable_number: DEFAULT_MAX_VARIABLE_NUMBER,
        }
    }
}

impl HandleConfig {
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_max_variable_number(mut self, max_variable_number: usize) -> Self {
        self.max_variable_number = max_variable_number;
        self
    }
}

/// Configuration of a [`StepperHandle`](crate::StepperHandle).
#[derive(Debug, Clone)]
pub struct StepperConfig {
    /// Busy timeout of the underlying connection.
    pub busy_timeout: Duration,
    /// How long one stepping transaction should take, commit included.
    pub max_expecting_duration: Duration,
    /// Budget for copying rows before any timing has been sampled.
    pub initial_duration: Duration,
}

impl Default for StepperConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            max_expecting_duration: DEFAULT_MAX_EXPECTING_DURATION,
            initial_duration: DEFAULT_INITIAL_DURATION,
        }
    }
}

impl StepperConfig {
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_max_expecting_duration(mut self, duration: Duration) -> Self {
        self.max_expecting_duration = duration;
        self
    }

    pub fn with_initial_duration(mut self, duration: Duration) -> Self {
        self.initial_duration = duration;
        self
    }
}

/// Where the rows of one destination table come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Destination table.
    pub table: String,
    /// Source table.
    pub source_table: String,
    /// Path of the source database. Absent means the destination database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_database: Option<String>,
}

/// A declarative set of table mappings.
///
/// ```json
/// {
///   "tables": [
///     { "table": "orders", "source_table": "orders_v1" },
///     { "table": "users", "source_table": "users", "source_database": "legacy.db" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(default)]
    pub tables: Vec<TableMapping>,
}

impl MigrationPlan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a plan from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check the plan against the destination database at `database`.
    pub fn validate(&self, database: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for mapping in &self.tables {
            if mapping.table.is_empty() {
                return Err(MigrationError::Config(
                    "table mapping with an empty table name".to_string(),
                ));
            }
            if !seen.insert(mapping.table.as_str()) {
                return Err(MigrationError::Config(format!(
                    "table {} is mapped more than once",
                    mapping.table
                )));
            }
            if is_builtin_table(&mapping.table) {
                return Err(MigrationError::InvalidSource {
                    table: mapping.table.clone(),
                    reason: "builtin tables cannot be migrated".to_string(),
                });
            }
            if mapping.source_table.is_empty() {
                return Err(MigrationError::InvalidSource {
                    table: mapping.table.clone(),
                    reason: "empty source table".to_string(),
                });
            }
            let same_database = match mapping.source_database.as_deref() {
                None | Some("") => true,
                Some(path) => path == database,
            };
            if same_database && mapping.source_table == mapping.table {
                return Err(MigrationError::InvalidSource {
                    table: mapping.table.clone(),
                    reason: "a table cannot migrate into itself".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate the plan and turn it into a table filter.
    pub fn into_filter(self, database: &str) -> Result<Filter> {
        self.validate(database)?;
        let mappings: BTreeMap<String, TableMapping> = self
            .tables
            .into_iter()
            .map(|mapping| (mapping.table.clone(), mapping))
            .collect();
        Ok(Arc::new(move |user_info: &mut MigrationUserInfo| {
            if let Some(mapping) = mappings.get(user_info.table()) {
                user_info.set_source(
                    mapping.source_table.clone(),
                    mapping.source_database.as_deref(),
                );
            }
        }))
    }
}
