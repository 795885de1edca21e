//! Statements prepared through a [`MigratingHandle`].
//!
//! A statement touching a migrating table may need several physical
//! statements. [`MigratingStatement`] keeps them together: parameters are
//! bound to each of them and execution runs them in one savepoint.

use rusqlite::types::Null;
use rusqlite::{Row, Rows, Statement, ToSql};
use strata_sql::Parameters;

use crate::coordinator::RecyclableInfo;
use crate::error::{MigrationError, Result};
use crate::handle::MigratingHandle;

/// How the physical statements of a [`MigratingStatement`] run together.
pub(crate) enum Strategy<'conn> {
    /// Only the primary statement.
    Direct,
    /// The primary statement inserts into the source table; `migrate` copies
    /// the row into the destination and `delete` removes it from the source.
    /// `update_sequence` runs first for `AUTOINCREMENT` destinations.
    Insert {
        update_sequence: Vec<Statement<'conn>>,
        migrate: Statement<'conn>,
        delete: Statement<'conn>,
        /// Parameter of `migrate` that receives the inserted rowid.
        rowid_index: Option<usize>,
    },
    /// The primary statement, then `additional`.
    Split { additional: Statement<'conn> },
    /// The primary statement drops the table, then `empty_source` deletes
    /// the rows still waiting in the source.
    Drop { empty_source: Statement<'conn> },
    /// The primary statement selects rowids; each selected row is then
    /// written in both physical tables through `reserved`.
    Limited {
        source: Statement<'conn>,
        destination: Statement<'conn>,
        reserved: usize,
    },
}

/// A prepared statement that keeps working while its tables migrate.
pub struct MigratingStatement<'conn> {
    handle: &'conn MigratingHandle,
    primary: Statement<'conn>,
    strategy: Strategy<'conn>,
    parameters: Option<Parameters>,
    sql: Vec<String>,
    // Declared last: statements are finalized before their infos are released.
    references: Vec<RecyclableInfo>,
}

impl<'conn> MigratingStatement<'conn> {
    pub(crate) fn new(
        handle: &'conn MigratingHandle,
        primary: Statement<'conn>,
        strategy: Strategy<'conn>,
        parameters: Option<Parameters>,
        sql: Vec<String>,
        references: Vec<RecyclableInfo>,
    ) -> Self {
        Self {
            handle,
            primary,
            strategy,
            parameters,
            sql,
            references,
        }
    }

    /// SQL of the physical statements, primary first.
    pub fn physical_sql(&self) -> &[String] {
        &self.sql
    }

    /// Whether the statement was rewritten into more than one physical statement.
    pub fn is_split(&self) -> bool {
        !matches!(self.strategy, Strategy::Direct)
    }

    /// Tables this statement keeps from finishing their migration.
    pub fn referenced_tables(&self) -> Vec<&str> {
        self.references.iter().map(|info| info.table()).collect()
    }

    /// Number of parameters the caller can bind.
    pub fn parameter_count(&self) -> usize {
        match &self.parameters {
            Some(parameters) => parameters.count as usize,
            None => self.primary.parameter_count(),
        }
    }

    /// Index of a named parameter such as `:id`.
    pub fn bind_parameter_index(&self, name: &str) -> Option<usize> {
        match &self.parameters {
            Some(parameters) => parameters.index_of(name).map(|index| index as usize),
            None => self.primary.parameter_index(name).ok().flatten(),
        }
    }

    fn reserved_index(&self) -> Option<usize> {
        match &self.strategy {
            Strategy::Insert { rowid_index, .. } => *rowid_index,
            Strategy::Limited { reserved, .. } => Some(*reserved),
            _ => None,
        }
    }

    /// Physical statements that take the caller's parameters.
    fn user_statements(&mut self) -> Vec<&mut Statement<'conn>> {
        let mut statements = vec![&mut self.primary];
        match &mut self.strategy {
            Strategy::Direct | Strategy::Drop { .. } => {}
            Strategy::Insert { migrate, .. } => statements.push(migrate),
            Strategy::Split { additional } => statements.push(additional),
            Strategy::Limited {
                source,
                destination,
                ..
            } => {
                statements.push(source);
                statements.push(destination);
            }
        }
        statements
    }

    /// Bind `value` to the 1-based parameter `index` of every physical
    /// statement that has it.
    pub fn bind<T: ToSql>(&mut self, index: usize, value: T) -> Result<()> {
        if self.reserved_index() == Some(index) {
            return Err(MigrationError::ReservedParameter { index });
        }
        let count = self.parameter_count();
        if index == 0 || index > count {
            return Err(rusqlite::Error::InvalidParameterCount(index, count).into());
        }
        for statement in self.user_statements() {
            if index <= statement.parameter_count() {
                statement.raw_bind_parameter(index, &value)?;
            }
        }
        Ok(())
    }

    /// Bind `value` to the parameter called `name`.
    pub fn bind_named<T: ToSql>(&mut self, name: &str, value: T) -> Result<()> {
        let index = self
            .bind_parameter_index(name)
            .ok_or_else(|| rusqlite::Error::InvalidParameterName(name.to_string()))?;
        self.bind(index, value)
    }

    fn bind_all(&mut self, params: &[&dyn ToSql]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            self.bind(i + 1, *param)?;
        }
        Ok(())
    }

    /// Reset every parameter to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        for statement in self.user_statements() {
            for index in 1..=statement.parameter_count() {
                statement.raw_bind_parameter(index, Null)?;
            }
        }
        Ok(())
    }

    /// Run the statement with the parameters bound so far.
    ///
    /// Returns the number of rows changed across the physical tables.
    pub fn execute(&mut self) -> Result<usize> {
        if matches!(self.strategy, Strategy::Direct) {
            return Ok(self.primary.raw_execute()?);
        }
        let handle = self.handle;
        handle.run_nested_transaction(|| self.execute_physical())
    }

    pub fn execute_with(&mut self, params: &[&dyn ToSql]) -> Result<usize> {
        self.bind_all(params)?;
        self.execute()
    }

    fn execute_physical(&mut self) -> Result<usize> {
        let handle = self.handle;
        let conn = handle.connection();
        let Self {
            primary, strategy, ..
        } = self;
        match strategy {
            Strategy::Direct => Ok(primary.raw_execute()?),
            Strategy::Insert {
                update_sequence,
                migrate,
                delete,
                rowid_index,
            } => {
                for statement in update_sequence.iter_mut() {
                    statement.raw_execute()?;
                }
                if primary.raw_execute()? == 0 {
                    return Ok(0);
                }
                let rowid = conn.last_insert_rowid();
                if let Some(index) = *rowid_index {
                    migrate.raw_bind_parameter(index, rowid)?;
                }
                // The row the caller sees is the one in the destination; an
                // OR IGNORE that skipped it there changed nothing.
                let changes = migrate.raw_execute()?;
                delete.raw_bind_parameter(1, rowid)?;
                delete.raw_execute()?;
                Ok(changes)
            }
            Strategy::Split { additional } => {
                let changes = primary.raw_execute()?;
                Ok(changes + additional.raw_execute()?)
            }
            Strategy::Drop { empty_source } => {
                primary.raw_execute()?;
                Ok(empty_source.raw_execute()?)
            }
            Strategy::Limited {
                source,
                destination,
                reserved,
            } => {
                let rowids = {
                    let mut rows = primary.raw_query();
                    let mut rowids = Vec::new();
                    while let Some(row) = rows.next()? {
                        rowids.push(row.get::<_, i64>(0)?);
                    }
                    rowids
                };
                let mut changes = 0;
                for rowid in rowids {
                    source.raw_bind_parameter(*reserved, rowid)?;
                    changes += source.raw_execute()?;
                    destination.raw_bind_parameter(*reserved, rowid)?;
                    changes += destination.raw_execute()?;
                }
                Ok(changes)
            }
        }
    }

    /// Run a reading statement with the parameters bound so far.
    pub fn query(&mut self) -> Result<Rows<'_>> {
        if self.is_split() {
            return Err(MigrationError::Misuse(
                "a statement writing a migrating table returns no rows".to_string(),
            ));
        }
        Ok(self.primary.raw_query())
    }

    pub fn query_with(&mut self, params: &[&dyn ToSql]) -> Result<Rows<'_>> {
        self.bind_all(params)?;
        self.query()
    }

    /// Run a reading statement and map its first row.
    pub fn query_row<T, F>(&mut self, params: &[&dyn ToSql], f: F) -> Result<T>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut rows = self.query_with(params)?;
        let row = rows.next()?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        Ok(f(row)?)
    }

    /// Finalize the physical statements and release the tables.
    pub fn finalize(self) {}
}
