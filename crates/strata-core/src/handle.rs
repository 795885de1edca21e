//! Connections whose statements keep working while tables migrate.
//!
//! A [`MigratingHandle`] parses every statement it prepares. Reads of a
//! migrating table are redirected to a temp view over the union of the
//! destination and source tables, and writes are split into physical
//! statements against both tables. Statements on tables that do not migrate
//! are prepared exactly as written.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, Row, ToSql};
use strata_sql::{
    parse_with_parameters, referenced_tables, rewrite, BinaryOperator, Delete, DropTable, Expr,
    Insert, Parameters, ParseError, ReadReplacement, Select, Statement, Update,
};
use tracing::{debug, warn};

use crate::binder::{Binder, BoundInfos};
use crate::config::HandleConfig;
use crate::coordinator::{InfoInitializer, Migration, RecyclableInfo};
use crate::error::{MigrationError, Result};
use crate::info::{MigrationInfo, MigrationUserInfo, TableColumns};
use crate::introspect;
use crate::recovery::{MissingSchema, SchemaRecovery};
use crate::statement::{MigratingStatement, Strategy};

/// A connection to the destination database that intercepts statements on
/// migrating tables.
///
/// A handle is used from one thread at a time. Any number of handles, on
/// any threads, may share one [`Migration`].
pub struct MigratingHandle {
    conn: Connection,
    path: String,
    config: HandleConfig,
    migration: Arc<Migration>,
    binder: RefCell<Binder>,
    /// Union views this connection created, keyed by view name.
    views: RefCell<BoundInfos>,
    recovery: Option<Arc<dyn SchemaRecovery>>,
    savepoint_depth: Cell<usize>,
}

impl MigratingHandle {
    /// Open the destination database at `path`.
    ///
    /// `path` is also the name the migration filter sees as the destination
    /// database, so every handle and stepper of one migration should use the
    /// same spelling of it.
    pub fn open(
        path: impl AsRef<Path>,
        migration: Arc<Migration>,
        config: HandleConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::with_connection(conn, path.to_string_lossy(), migration, config)
    }

    /// Wrap an already open connection to the database at `path`.
    pub fn with_connection(
        conn: Connection,
        path: impl Into<String>,
        migration: Arc<Migration>,
        config: HandleConfig,
    ) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        Ok(Self {
            conn,
            path: path.into(),
            config,
            binder: RefCell::new(Binder::new(Arc::clone(&migration))),
            migration,
            views: RefCell::new(BoundInfos::new()),
            recovery: None,
            savepoint_depth: Cell::new(0),
        })
    }

    /// Install a hook that repairs missing tables or columns before a failed
    /// prepare is retried.
    pub fn with_schema_recovery(mut self, recovery: Arc<dyn SchemaRecovery>) -> Self {
        self.recovery = Some(recovery);
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn migration(&self) -> &Arc<Migration> {
        &self.migration
    }

    pub fn config(&self) -> &HandleConfig {
        &self.config
    }

    /// Prepare `sql`, rewriting it if it touches a migrating table.
    ///
    /// If the rewritten statement refers to a table or column that does
    /// not exist, the connection's union views are rebuilt, the schema
    /// recovery hook runs, and the prepare is tried once more.
    pub fn prepare(&self, sql: &str) -> Result<MigratingStatement<'_>> {
        if !self.migration.should_migrate() {
            return self.prepare_direct(sql, Vec::new());
        }
        match self.try_prepare(sql) {
            Err(err) => {
                let Some(missing) = MissingSchema::from_error(&err) else {
                    return Err(err);
                };
                warn!(sql, missing = %missing, "prepare failed on missing schema, retrying");
                self.drop_union_views()?;
                self.binder.borrow_mut().mark_need_rebind();
                if let Some(recovery) = &self.recovery {
                    recovery.recover(&self.conn, &missing)?;
                }
                self.try_prepare(sql)
            }
            prepared => prepared,
        }
    }

    /// Prepare and run `sql` once.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        self.prepare(sql)?.execute_with(params)
    }

    /// Prepare `sql` and map its first row.
    pub fn query_row<T, F>(&self, sql: &str, params: &[&dyn ToSql], f: F) -> Result<T>
    where
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.prepare(sql)?.query_row(params, f)
    }

    /// Run `f` inside a savepoint, releasing it on success and rolling back
    /// to it on failure.
    pub fn run_nested_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let depth = self.savepoint_depth.get();
        let savepoint = format!("strata_migrating_{}", depth);
        self.conn.execute_batch(&format!("SAVEPOINT {}", savepoint))?;
        self.savepoint_depth.set(depth + 1);
        let result = f().and_then(|value| {
            self.conn.execute_batch(&format!("RELEASE {}", savepoint))?;
            Ok(value)
        });
        self.savepoint_depth.set(depth);

        if result.is_err() {
            let rollback = format!("ROLLBACK TO {0}; RELEASE {0}", savepoint);
            if let Err(err) = self.conn.execute_batch(&rollback) {
                warn!(savepoint, error = %err, "failed to roll back savepoint");
            }
        }
        result
    }

    fn prepare_direct(
        &self,
        sql: &str,
        references: Vec<RecyclableInfo>,
    ) -> Result<MigratingStatement<'_>> {
        let primary = self.conn.prepare(sql)?;
        Ok(MigratingStatement::new(
            self,
            primary,
            Strategy::Direct,
            None,
            vec![sql.to_string()],
            references,
        ))
    }

    fn try_prepare(&self, sql: &str) -> Result<MigratingStatement<'_>> {
        let (statement, parameters) = match parse_with_parameters(sql) {
            Ok(parsed) => parsed,
            Err(err) => return self.prepare_unparsed(sql, err),
        };
        match &statement {
            Statement::CreateTable(create) => {
                if !create.temporary && create.table.is_main() {
                    self.binder
                        .borrow()
                        .hint_that_table_will_be_created(self, &create.table.name)?;
                }
                return self.prepare_direct(sql, Vec::new());
            }
            Statement::Other(_) => return self.prepare_direct(sql, Vec::new()),
            _ => {}
        }

        let references = self.bind_tables(&referenced_tables(&statement))?;
        if references.is_empty() {
            return self.prepare_direct(sql, references);
        }

        let infos: BoundInfos = references
            .iter()
            .map(|reference| (reference.table().to_string(), Arc::clone(reference.info())))
            .collect();
        let plan = plan(&statement, &infos, &parameters, self.config.max_variable_number)?;
        debug!(sql, rewritten = %plan.primary, "rewrote statement on migrating tables");
        self.prepare_plan(plan, parameters, references)
    }

    /// Prepare a statement the parser does not understand.
    ///
    /// SQLite reports the tables it touches. With none of them migrating the
    /// statement runs as written; otherwise it cannot be rewritten.
    fn prepare_unparsed(
        &self,
        sql: &str,
        parse_error: ParseError,
    ) -> Result<MigratingStatement<'_>> {
        let tables: Vec<String> = introspect::tables_of_statement(&self.conn, sql)?
            .into_iter()
            .collect();
        let references = self.bind_tables(&tables)?;
        if let Some(reference) = references.first() {
            return Err(MigrationError::unsupported(
                reference.table(),
                format!("statement could not be parsed: {}", parse_error),
            ));
        }
        debug!(sql, error = %parse_error, "preparing unparsed statement as written");
        self.prepare_direct(sql, references)
    }

    /// Resolve `tables` and set the connection up for the migrating ones.
    fn bind_tables(&self, tables: &[String]) -> Result<Vec<RecyclableInfo>> {
        let mut binder = self.binder.borrow_mut();
        binder.start_binding();
        let bound = tables
            .iter()
            .try_for_each(|table| binder.bind_table(self, table).map(|_| ()));
        match bound {
            Ok(()) => binder.stop_binding(true, |infos| self.bind_infos(infos)),
            Err(err) => {
                binder.stop_binding(false, |_| Ok(()))?;
                Err(err)
            }
        }
    }

    /// Make the connection's schemas and union views match `infos`.
    fn bind_infos(&self, infos: &BoundInfos) -> Result<()> {
        let mut views = self.views.borrow_mut();
        let wanted: BTreeMap<&str, &Arc<MigrationInfo>> = infos
            .values()
            .map(|info| (info.union_view(), info))
            .collect();

        let existing = introspect::union_views(&self.conn)?;
        views.retain(|view, _| existing.contains(view));
        for view in &existing {
            let current = match (wanted.get(view.as_str()), views.get(view)) {
                (Some(wanted), Some(created)) => Arc::ptr_eq(wanted, created),
                _ => false,
            };
            if !current {
                introspect::drop_view(&self.conn, view)?;
                views.remove(view);
                debug!(view = view.as_str(), "dropped stale union view");
            }
        }

        let needed: BTreeSet<&str> = infos
            .values()
            .filter(|info| info.is_cross_database())
            .map(|info| info.schema())
            .collect();
        for info in infos.values() {
            introspect::attach_source(&self.conn, info)?;
        }
        // DETACH fails inside a transaction; unused schemas wait for the next bind.
        if self.conn.is_autocommit() {
            for schema in introspect::migration_schemas(&self.conn)? {
                if needed.contains(schema.as_str()) {
                    continue;
                }
                if let Err(err) = introspect::detach(&self.conn, &schema) {
                    warn!(schema, error = %err, "failed to detach unused source database");
                }
            }
        }

        for (view, info) in wanted {
            if views.contains_key(view) {
                continue;
            }
            self.conn
                .execute_batch(info.statement_for_creating_union_view())?;
            views.insert(view.to_string(), Arc::clone(info));
            debug!(view, table = info.table(), "created union view");
        }
        Ok(())
    }

    fn drop_union_views(&self) -> Result<()> {
        for view in introspect::union_views(&self.conn)? {
            introspect::drop_view(&self.conn, &view)?;
        }
        self.views.borrow_mut().clear();
        Ok(())
    }

    fn prepare_plan(
        &self,
        plan: Plan,
        parameters: Parameters,
        references: Vec<RecyclableInfo>,
    ) -> Result<MigratingStatement<'_>> {
        let primary = self.conn.prepare(&plan.primary)?;
        let mut sql = vec![plan.primary];
        let strategy = match plan.strategy {
            PlannedStrategy::Direct => Strategy::Direct,
            PlannedStrategy::Insert {
                update_sequence,
                migrate,
                delete,
                rowid_index,
            } => {
                let strategy = Strategy::Insert {
                    update_sequence: update_sequence
                        .iter()
                        .map(|sql| self.conn.prepare(sql))
                        .collect::<rusqlite::Result<_>>()?,
                    migrate: self.conn.prepare(&migrate)?,
                    delete: self.conn.prepare(&delete)?,
                    rowid_index,
                };
                sql.extend([migrate, delete]);
                strategy
            }
            PlannedStrategy::Split { additional } => {
                let strategy = Strategy::Split {
                    additional: self.conn.prepare(&additional)?,
                };
                sql.push(additional);
                strategy
            }
            PlannedStrategy::Drop { empty_source } => {
                let strategy = Strategy::Drop {
                    empty_source: self.conn.prepare(&empty_source)?,
                };
                sql.push(empty_source);
                strategy
            }
            PlannedStrategy::Limited {
                source,
                destination,
                reserved,
            } => {
                let strategy = Strategy::Limited {
                    source: self.conn.prepare(&source)?,
                    destination: self.conn.prepare(&destination)?,
                    reserved,
                };
                sql.extend([source, destination]);
                strategy
            }
        };
        Ok(MigratingStatement::new(
            self,
            primary,
            strategy,
            Some(parameters),
            sql,
            references,
        ))
    }
}

impl InfoInitializer for MigratingHandle {
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

/// SQL of the physical statements one statement is rewritten into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Plan {
    primary: String,
    strategy: PlannedStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedStrategy {
    Direct,
    Insert {
        /// Run before the primary statement; empty unless AUTOINCREMENT.
        update_sequence: Vec<String>,
        migrate: String,
        delete: String,
        rowid_index: Option<usize>,
    },
    Split {
        additional: String,
    },
    Drop {
        empty_source: String,
    },
    Limited {
        source: String,
        destination: String,
        reserved: usize,
    },
}

impl Plan {
    fn direct(statement: &Statement) -> Self {
        Self {
            primary: statement.to_string(),
            strategy: PlannedStrategy::Direct,
        }
    }
}

/// Rewrite `statement` against the migrating tables in `infos`.
///
/// `reserved` is the parameter index the rewrite may use for rowids; the
/// statement's own parameters must stay below it.
pub(crate) fn plan(
    statement: &Statement,
    infos: &BoundInfos,
    parameters: &Parameters,
    reserved: usize,
) -> Result<Plan> {
    let replacements: BTreeMap<String, ReadReplacement> = infos
        .iter()
        .map(|(table, info)| (table.clone(), info.read_replacement()))
        .collect();
    let rewritten = rewrite(statement, &replacements).statement;

    match &rewritten {
        Statement::Insert(insert) => match migrating_target(infos, &insert.table) {
            Some(info) => {
                check_parameters(info, parameters, reserved)?;
                if !insert.upsert.is_empty() {
                    return Err(MigrationError::unsupported(
                        info.table(),
                        "INSERT ... ON CONFLICT DO is not supported",
                    ));
                }
                check_returning(info, &insert.returning)?;
                plan_insert(info, insert, reserved)
            }
            None => Ok(Plan::direct(&rewritten)),
        },
        Statement::Update(update) => match migrating_target(infos, &update.table) {
            Some(info) => {
                check_parameters(info, parameters, reserved)?;
                check_returning(info, &update.returning)?;
                Ok(plan_update(info, update, reserved))
            }
            None => Ok(Plan::direct(&rewritten)),
        },
        Statement::Delete(delete) => match migrating_target(infos, &delete.table) {
            Some(info) => {
                check_parameters(info, parameters, reserved)?;
                check_returning(info, &delete.returning)?;
                Ok(plan_delete(info, delete, reserved))
            }
            None => Ok(Plan::direct(&rewritten)),
        },
        Statement::DropTable(drop) => match migrating_target(infos, &drop.table) {
            Some(info) => Ok(plan_drop(info, drop)),
            None => Ok(Plan::direct(&rewritten)),
        },
        _ => Ok(Plan::direct(&rewritten)),
    }
}

fn migrating_target<'a>(
    infos: &'a BoundInfos,
    table: &strata_sql::QualifiedName,
) -> Option<&'a Arc<MigrationInfo>> {
    if table.is_main() {
        infos.get(&table.name)
    } else {
        None
    }
}

fn check_parameters(info: &MigrationInfo, parameters: &Parameters, reserved: usize) -> Result<()> {
    if parameters.count as usize >= reserved {
        return Err(MigrationError::unsupported(
            info.table(),
            format!("parameter index {} is reserved for migration", reserved),
        ));
    }
    Ok(())
}

/// Rows written to a migrating table land in two physical tables, so there
/// is no single set of rows to return.
fn check_returning(info: &MigrationInfo, returning: &[strata_sql::ResultColumn]) -> Result<()> {
    if returning.is_empty() {
        Ok(())
    } else {
        Err(MigrationError::unsupported(
            info.table(),
            "RETURNING is not supported on a migrating table",
        ))
    }
}

fn plan_insert(info: &MigrationInfo, insert: &Insert, reserved: usize) -> Result<Plan> {
    let fallback = Insert {
        table: info.source_table_name(),
        ..insert.clone()
    };
    let (migrate, rowid_index) = info.statement_for_migrating(&fallback, reserved)?;
    Ok(Plan {
        primary: fallback.to_string(),
        strategy: PlannedStrategy::Insert {
            update_sequence: info.statements_for_updating_sequence().to_vec(),
            migrate: migrate.to_string(),
            delete: info.statement_for_deleting_specified_row().to_string(),
            rowid_index,
        },
    })
}

fn rowid_is(reserved: usize) -> Option<Expr> {
    Some(Expr::binary(
        Expr::rowid(),
        BinaryOperator::Equal,
        Expr::parameter(reserved as u32),
    ))
}

fn plan_update(info: &MigrationInfo, update: &Update, reserved: usize) -> Plan {
    let alias = update
        .alias
        .clone()
        .unwrap_or_else(|| info.table().to_string());

    if update.order_by.is_empty() && update.limit.is_none() {
        let filter = info.filter_for_rows(update.filter.as_ref(), &alias);
        let source = Update {
            table: info.source_table_name(),
            alias: Some(alias.clone()),
            indexed: None,
            filter: filter.clone(),
            ..update.clone()
        };
        // The filter now selects by rowid, which an index hint may not serve.
        let destination = Update {
            table: info.destination_table_name(),
            alias: Some(alias),
            indexed: None,
            filter,
            ..update.clone()
        };
        return Plan {
            primary: source.to_string(),
            strategy: PlannedStrategy::Split {
                additional: destination.to_string(),
            },
        };
    }

    let selection = Select {
        with: update.with.clone(),
        ..info.selection_of_rows(
            update.filter.as_ref(),
            &update.order_by,
            update.limit.as_ref(),
            &alias,
        )
    };
    let by_rowid = |table| Update {
        table,
        alias: Some(alias.clone()),
        indexed: None,
        filter: rowid_is(reserved),
        order_by: Vec::new(),
        limit: None,
        ..update.clone()
    };
    Plan {
        primary: selection.to_string(),
        strategy: PlannedStrategy::Limited {
            source: by_rowid(info.source_table_name()).to_string(),
            destination: by_rowid(info.destination_table_name()).to_string(),
            reserved,
        },
    }
}

fn plan_delete(info: &MigrationInfo, delete: &Delete, reserved: usize) -> Plan {
    let alias = delete
        .alias
        .clone()
        .unwrap_or_else(|| info.table().to_string());

    if delete.order_by.is_empty() && delete.limit.is_none() {
        let filter = info.filter_for_rows(delete.filter.as_ref(), &alias);
        let source = Delete {
            table: info.source_table_name(),
            alias: Some(alias.clone()),
            indexed: None,
            filter: filter.clone(),
            ..delete.clone()
        };
        let destination = Delete {
            table: info.destination_table_name(),
            alias: Some(alias),
            indexed: None,
            filter,
            ..delete.clone()
        };
        return Plan {
            primary: source.to_string(),
            strategy: PlannedStrategy::Split {
                additional: destination.to_string(),
            },
        };
    }

    let selection = Select {
        with: delete.with.clone(),
        ..info.selection_of_rows(
            delete.filter.as_ref(),
            &delete.order_by,
            delete.limit.as_ref(),
            &alias,
        )
    };
    let by_rowid = |table| Delete {
        table,
        alias: Some(alias.clone()),
        indexed: None,
        filter: rowid_is(reserved),
        order_by: Vec::new(),
        limit: None,
        ..delete.clone()
    };
    Plan {
        primary: selection.to_string(),
        strategy: PlannedStrategy::Limited {
            source: by_rowid(info.source_table_name()).to_string(),
            destination: by_rowid(info.destination_table_name()).to_string(),
            reserved,
        },
    }
}

/// Dropping a migrating table also empties its source, so the rows do not
/// come back through the union once the table is recreated.
fn plan_drop(info: &MigrationInfo, drop: &DropTable) -> Plan {
    Plan {
        primary: drop.to_string(),
        strategy: PlannedStrategy::Drop {
            empty_source: Delete::all(info.source_table_name()).to_string(),
        },
    }
}
