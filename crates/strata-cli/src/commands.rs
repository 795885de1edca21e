//! Subcommand implementations.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::Serialize;
use strata_core::introspect;
use strata_core::{
    Migration, MigrationError, MigrationInfo, MigrationPlan, StepperConfig, StepperHandle,
};
use thiserror::Error;
use tracing::{info, warn};

/// Steps between progress logs.
const PROGRESS_INTERVAL: u64 = 1000;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A migration coordinator driven by one stepper connection.
pub struct Session {
    migration: Arc<Migration>,
    stepper: StepperHandle,
    plan: MigrationPlan,
}

impl Session {
    pub fn open(
        database: &str,
        plan: MigrationPlan,
        config: StepperConfig,
    ) -> Result<Self, CliError> {
        let migration = Arc::new(Migration::new());
        migration.filter_table(Some(plan.clone().into_filter(database)?));
        let stepper = StepperHandle::open(database, config)?;
        Ok(Self {
            migration,
            stepper,
            plan,
        })
    }

    pub fn migration(&self) -> &Arc<Migration> {
        &self.migration
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    pub interval: Duration,
    pub max_steps: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub steps: u64,
    pub elapsed: Duration,
    pub finished: bool,
    /// Tables still migrating when the run stopped early.
    pub remaining: Vec<String>,
}

/// Step the migration until it finishes or the step limit is hit.
pub fn migrate(session: &mut Session, options: &MigrateOptions) -> Result<MigrateReport, CliError> {
    let started = Instant::now();
    let mut steps = 0;
    loop {
        if session.stepper.step(&session.migration)? {
            info!(steps, "all tables migrated");
            return Ok(MigrateReport {
                steps,
                elapsed: started.elapsed(),
                finished: true,
                remaining: Vec::new(),
            });
        }
        steps += 1;

        if options.max_steps.is_some_and(|max| steps >= max) {
            let remaining = session.migration().status().migrating;
            warn!(steps, ?remaining, "step limit reached");
            return Ok(MigrateReport {
                steps,
                elapsed: started.elapsed(),
                finished: false,
                remaining,
            });
        }
        if steps % PROGRESS_INTERVAL == 0 {
            let status = session.migration().status();
            info!(
                steps,
                migrating = ?status.migrating,
                pending_drop = ?status.pending_drop,
                "still migrating"
            );
        }
        if !options.interval.is_zero() {
            thread::sleep(options.interval);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    /// Rows are still being copied.
    Migrating,
    /// Every row is copied; the source table has not been dropped yet.
    PendingDrop,
    /// The destination table does not exist yet.
    WillBeCreated,
    /// Nothing left to do: the source is gone or never existed.
    Migrated,
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableState::Migrating => write!(f, "migrating"),
            TableState::PendingDrop => write!(f, "pending drop"),
            TableState::WillBeCreated => write!(f, "will be created"),
            TableState::Migrated => write!(f, "migrated"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub table: String,
    pub source_table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_database: Option<String>,
    pub state: TableState,
    /// Rows left in the source table, for migrating tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_rows: Option<i64>,
}

/// Classify every planned table.
pub fn status(session: &Session) -> Result<Vec<TableStatus>, CliError> {
    let mut rows = Vec::with_capacity(session.plan.tables.len());
    for mapping in &session.plan.tables {
        let reference = session
            .migration
            .get_or_init_info(&session.stepper, &mapping.table)?;
        let (state, remaining_rows) = match &reference {
            Some(info) => (
                TableState::Migrating,
                Some(remaining_rows(session.stepper.connection(), info)?),
            ),
            None => {
                let status = session.migration.status();
                if status.pending_drop.contains(&mapping.table) {
                    (TableState::PendingDrop, None)
                } else if status.hinted.contains(&mapping.table) {
                    (TableState::WillBeCreated, None)
                } else {
                    (TableState::Migrated, None)
                }
            }
        };
        rows.push(TableStatus {
            table: mapping.table.clone(),
            source_table: mapping.source_table.clone(),
            source_database: mapping.source_database.clone(),
            state,
            remaining_rows,
        });
    }
    Ok(rows)
}

fn remaining_rows(conn: &Connection, info: &MigrationInfo) -> Result<i64, CliError> {
    introspect::attach_source(conn, info)?;
    if !introspect::table_exists(conn, info.schema(), info.source_table())? {
        return Ok(0);
    }
    let sql = format!("SELECT count(*) FROM {}", info.source_table_name());
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::TableMapping;

    fn database(dir: &tempfile::TempDir, rows: i64) -> String {
        let path = dir.path().join("app.db").to_string_lossy().into_owned();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);
             CREATE TABLE orders_v1(id INTEGER PRIMARY KEY, total REAL);",
        )
        .unwrap();
        for id in 1..=rows {
            conn.execute("INSERT INTO orders_v1(id, total) VALUES (?1, 1.0)", [id])
                .unwrap();
        }
        path
    }

    fn plan() -> MigrationPlan {
        MigrationPlan {
            tables: vec![
                TableMapping {
                    table: "orders".to_string(),
                    source_table: "orders_v1".to_string(),
                    source_database: None,
                },
                TableMapping {
                    table: "users".to_string(),
                    source_table: "users_v1".to_string(),
                    source_database: None,
                },
            ],
        }
    }

    #[test]
    fn test_status_then_migrate() {
        let dir = tempfile::tempdir().unwrap();
        let path = database(&dir, 25);
        let mut session = Session::open(&path, plan(), StepperConfig::default()).unwrap();

        let rows = status(&session).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].state, TableState::Migrating);
        assert_eq!(rows[0].remaining_rows, Some(25));
        assert_eq!(rows[1].state, TableState::Migrated);

        let report = migrate(&mut session, &MigrateOptions::default()).unwrap();
        assert!(report.finished);
        assert!(report.remaining.is_empty());
        assert!(session.migration().is_migrated());

        let rows = status(&session).unwrap();
        assert_eq!(rows[0].state, TableState::Migrated);
        assert_eq!(rows[0].remaining_rows, None);
    }

    #[test]
    fn test_step_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = database(&dir, 10);
        let mut session = Session::open(&path, plan(), StepperConfig::default()).unwrap();

        let options = MigrateOptions {
            max_steps: Some(1),
            ..Default::default()
        };
        let report = migrate(&mut session, &options).unwrap();
        assert!(!report.finished);
        assert_eq!(report.steps, 1);
    }

    #[test]
    fn test_invalid_plan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = database(&dir, 0);
        let plan = MigrationPlan {
            tables: vec![TableMapping {
                table: "orders".to_string(),
                source_table: "orders".to_string(),
                source_database: None,
            }],
        };
        assert!(matches!(
            Session::open(&path, plan, StepperConfig::default()),
            Err(CliError::Migration(MigrationError::InvalidSource { .. }))
        ));
    }
}
