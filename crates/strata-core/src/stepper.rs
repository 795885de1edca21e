//! The connection that copies rows in the background.

use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::debug;

use crate::config::StepperConfig;
use crate::coordinator::{InfoInitializer, Migration, Stepper};
use crate::error::Result;
use crate::info::{MigrationInfo, MigrationUserInfo, TableColumns};
use crate::introspect;

/// Number of recent transactions the copy budget is derived from.
const MAX_SAMPLES: usize = 10;

/// A dedicated connection implementing [`Stepper`].
///
/// Each [`Migration::step`] that copies rows runs one write transaction.
/// The time spent copying inside it is adapted so that the whole
/// transaction, commit included, stays near
/// [`StepperConfig::max_expecting_duration`].
pub struct StepperHandle {
    conn: Connection,
    path: String,
    config: StepperConfig,
    /// (copying, copying + commit) of recent transactions.
    samples: VecDeque<(Duration, Duration)>,
}

impl StepperHandle {
    pub fn open(path: impl AsRef<Path>, config: StepperConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_string_lossy(), config)
    }

    pub fn with_connection(
        conn: Connection,
        path: impl Into<String>,
        config: StepperConfig,
    ) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        Ok(Self {
            conn,
            path: path.into(),
            config,
            samples: VecDeque::with_capacity(MAX_SAMPLES),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run one step of `migration` on this connection.
    pub fn step(&mut self, migration: &Migration) -> Result<bool> {
        migration.step(self)
    }

    /// How long the next transaction may spend copying rows.
    pub fn copy_budget(&self) -> Duration {
        let (within, whole) = self
            .samples
            .iter()
            .fold((Duration::ZERO, Duration::ZERO), |(within, whole), sample| {
                (within + sample.0, whole + sample.1)
            });
        let initial = self.config.initial_duration;
        if whole.is_zero() {
            return initial;
        }
        let max = self.config.max_expecting_duration.as_secs_f64();
        let budget = max * within.as_secs_f64() / whole.as_secs_f64();
        if !budget.is_finite() || budget <= 0.0 || budget > max {
            return initial;
        }
        Duration::from_secs_f64(budget)
    }

    fn record_sample(&mut self, within: Duration, whole: Duration) {
        if self.samples.len() == MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back((within, whole));
    }
}

impl InfoInitializer for StepperHandle {
    fn database_path(&self) -> &str {
        &self.path
    }

    fn source_table_exists(&self, user_info: &MigrationUserInfo) -> Result<bool> {
        introspect::source_table_exists(&self.conn, user_info)
    }

    fn columns_of_user_info(&self, user_info: &MigrationUserInfo) -> Result<TableColumns> {
        introspect::destination_columns(&self.conn, user_info)
    }
}

impl Stepper for StepperHandle {
    fn all_tables(&mut self) -> Result<BTreeSet<String>> {
        introspect::user_tables(&self.conn)
    }

    fn drop_source_table(&mut self, info: &MigrationInfo) -> Result<()> {
        introspect::attach_source(&self.conn, info)?;
        self.conn
            .execute_batch(info.statement_for_dropping_source_table())?;
        Ok(())
    }

    fn migrate_rows(&mut self, info: &MigrationInfo) -> Result<bool> {
        if !introspect::table_exists(&self.conn, "main", info.table())? {
            return Ok(true);
        }
        introspect::attach_source(&self.conn, info)?;
        if !introspect::table_exists(&self.conn, info.schema(), info.source_table())? {
            return Ok(true);
        }

        let budget = self.copy_budget();
        let started = Instant::now();
        let tx = self.conn.transaction()?;
        let mut done = false;
        let mut rows = 0usize;
        {
            for sql in info.statements_for_updating_sequence() {
                tx.prepare_cached(sql)?.execute([])?;
            }
            let mut migrate = tx.prepare_cached(info.statement_for_migrating_one_row())?;
            let mut delete = tx.prepare_cached(info.statement_for_deleting_migrated_one_row())?;
            loop {
                migrate.execute([])?;
                if delete.execute([])? == 0 {
                    done = true;
                    break;
                }
                rows += 1;
                if started.elapsed() >= budget {
                    break;
                }
            }
        }
        let within = started.elapsed();
        tx.commit()?;
        let whole = started.elapsed();
        self.record_sample(within, whole);

        debug!(
            table = info.table(),
            rows,
            done,
            budget_us = budget.as_micros() as u64,
            elapsed_us = whole.as_micros() as u64,
            "copied rows"
        );
        Ok(done)
    }
}
