//! Per-table migration metadata and the SQL derived from it.
//!
//! A [`MigrationInfo`] is built once for a (destination, source) pair and
//! never changes afterwards. Every statement the engine needs for that pair
//! is generated up front, so stepping and statement interception only ever
//! read from it.

use std::ops::Deref;

use strata_sql::{
    quote_ident, quote_string, BinaryOperator, CompoundOperator, ConflictAction, Delete, DropTable, Expr,
    FromClause, Insert, InsertSource, Limit, OrderingTerm, QualifiedName, QueryCore,
    ReadReplacement, ResultColumn, Select, SelectCore, SortDirection, Statement, TableOrSubquery,
};
use tracing::warn;

use crate::error::{MigrationError, Result};

/// Prefix of the temp views exposing the union of destination and source.
pub const UNION_VIEW_PREFIX: &str = "wcdb_union_";
/// Prefix of the schema names source databases are attached as.
pub const SCHEMA_PREFIX: &str = "wcdb_migration_";

/// Tables owned by SQLite or by the engine itself. They never migrate.
pub fn is_builtin_table(table: &str) -> bool {
    let lower = table.to_ascii_lowercase();
    lower.starts_with("sqlite_") || lower.starts_with("wcdb_")
}

/// Name of the union view of `table`.
pub fn union_view_name(table: &str) -> String {
    format!("{}{}", UNION_VIEW_PREFIX, table)
}

/// Schema name a source database at `path` is attached as.
pub fn schema_for_source_database(path: &str) -> String {
    let hash = blake3::hash(path.as_bytes());
    format!("{}{}", SCHEMA_PREFIX, hex::encode(&hash.as_bytes()[..8]))
}

/// A destination table and where its rows come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationBaseInfo {
    database: String,
    table: String,
    source_database: String,
    source_table: String,
}

impl MigrationBaseInfo {
    /// Path of the database the destination table lives in.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The destination table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Path of the database the source table lives in.
    pub fn source_database(&self) -> &str {
        &self.source_database
    }

    pub fn source_table(&self) -> &str {
        &self.source_table
    }

    /// Whether a source has been declared.
    pub fn should_migrate(&self) -> bool {
        !self.table.is_empty() && !self.source_table.is_empty()
    }

    /// Whether the source table lives in another database file.
    pub fn is_cross_database(&self) -> bool {
        self.source_database != self.database
    }

    /// Schema the source table is reachable under from the destination database.
    pub fn schema_for_source(&self) -> String {
        if self.is_cross_database() {
            schema_for_source_database(&self.source_database)
        } else {
            "main".to_string()
        }
    }
}

/// The mutable view of a table handed to the user filter.
///
/// The filter declares migration intent by calling [`set_source`]. Leaving
/// the source unset means the table does not migrate.
///
/// [`set_source`]: MigrationUserInfo::set_source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUserInfo {
    base: MigrationBaseInfo,
}

impl MigrationUserInfo {
    /// Describe `table` of the database at `database`, with no source yet.
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        let database = database.into();
        Self {
            base: MigrationBaseInfo {
                source_database: database.clone(),
                database,
                table: table.into(),
                source_table: String::new(),
            },
        }
    }

    /// Declare that rows of this table come from `source_table`.
    ///
    /// `source_database` is the path of the database holding the source;
    /// `None` or an empty path means the destination's own database. A table
    /// cannot migrate into itself: debug builds panic, release builds leave
    /// the table non-migrating.
    pub fn set_source(&mut self, source_table: impl Into<String>, source_database: Option<&str>) {
        let source_table = source_table.into();
        let source_database = match source_database {
            Some(path) if !path.is_empty() => path.to_string(),
            _ => self.base.database.clone(),
        };

        let into_itself =
            source_database == self.base.database && source_table == self.base.table;
        debug_assert!(
            !into_itself,
            "table {} cannot migrate into itself",
            self.base.table
        );
        if into_itself {
            warn!(table = %self.base.table, "ignoring migration source equal to the table itself");
            return;
        }

        self.base.source_table = source_table;
        self.base.source_database = source_database;
    }
}

impl Deref for MigrationUserInfo {
    type Target = MigrationBaseInfo;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Columns of a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns {
    /// The column aliasing the rowid, if the table has one.
    pub integer_primary_key: Option<String>,
    /// Column names in declaration order. Empty when the table does not exist.
    pub columns: Vec<String>,
    /// Whether the rowid alias was declared `AUTOINCREMENT`.
    pub autoincrement: bool,
}

/// Everything needed to migrate one table, fixed at construction.
#[derive(Debug)]
pub struct MigrationInfo {
    base: MigrationBaseInfo,
    integer_primary_key: Option<String>,
    columns: Vec<String>,
    autoincrement: bool,
    schema: String,
    union_view: String,
    create_union_view: String,
    migrate_one_row: String,
    delete_migrated_one_row: String,
    delete_specified_row: String,
    drop_source_table: String,
    update_sequence: Vec<String>,
    attach_schema: Option<String>,
}

impl MigrationInfo {
    /// Build the info for a user declaration and the destination's columns.
    pub fn new(user_info: MigrationUserInfo, columns: TableColumns) -> Self {
        let base = user_info.base;
        let schema = base.schema_for_source();
        let union_view = union_view_name(&base.table);

        let destination = QualifiedName::with_schema("main", base.table.as_str());
        let source = QualifiedName::with_schema(schema.as_str(), base.source_table.as_str());

        let attach_schema = base
            .is_cross_database()
            .then(|| format!("ATTACH DATABASE ?1 AS {}", quote_ident(&schema)));

        let create_union_view = {
            let projection = |table: &QualifiedName| QueryCore {
                distinct: false,
                columns: Self::projection(&columns.columns, true),
                from: Some(FromClause {
                    first: TableOrSubquery::table(table.clone()),
                    joins: Vec::new(),
                }),
                filter: None,
                group_by: Vec::new(),
                having: None,
                windows: Vec::new(),
            };
            // UNION ALL over an attached schema hits an engine bug; the
            // cross-database view pays for deduplication instead.
            let op = if base.is_cross_database() {
                CompoundOperator::Union
            } else {
                CompoundOperator::UnionAll
            };
            let union = Select {
                with: None,
                core: SelectCore::Query(projection(&destination)),
                compound: vec![(op, SelectCore::Query(projection(&source)))],
                order_by: vec![Self::by_rowid(SortDirection::Asc)],
                limit: None,
            };
            format!(
                "CREATE TEMP VIEW IF NOT EXISTS {} AS {}",
                quote_ident(&union_view),
                union
            )
        };

        let migrate_one_row = {
            let mut insert_columns = vec!["rowid".to_string()];
            insert_columns.extend(columns.columns.iter().cloned());
            let select = Select::from_table(
                Self::projection(&columns.columns, false),
                TableOrSubquery::table(source.clone()),
            )
            .with_order_by(vec![Self::by_rowid(SortDirection::Desc)])
            .with_limit(Some(Self::limit_one()));
            Statement::Insert(Insert {
                with: None,
                or_action: Some(ConflictAction::Replace),
                table: destination.clone(),
                columns: insert_columns,
                source: InsertSource::Select(Box::new(select)),
                upsert: Vec::new(),
                returning: Vec::new(),
            })
            .to_string()
        };

        // Bundled SQLite is built without DELETE ... LIMIT, so the last row
        // is addressed through a rowid subquery.
        let delete_migrated_one_row = {
            let last_row = Select::from_table(
                vec![Self::rowid_column()],
                TableOrSubquery::table(source.clone()),
            )
            .with_order_by(vec![Self::by_rowid(SortDirection::Desc)])
            .with_limit(Some(Self::limit_one()));
            let mut delete = Delete::all(source.clone());
            delete.filter = Some(Expr::in_select(Expr::rowid(), last_row));
            Statement::Delete(delete).to_string()
        };

        let delete_specified_row = {
            let mut delete = Delete::all(source.clone());
            delete.filter = Some(Expr::binary(
                Expr::rowid(),
                BinaryOperator::Equal,
                Expr::parameter(1),
            ));
            Statement::Delete(delete).to_string()
        };

        // The destination's sequence must stay ahead of every rowid still
        // waiting in the source, or AUTOINCREMENT would hand one out again.
        let update_sequence = if columns.autoincrement {
            let name = quote_string(&base.table);
            let source_max = format!("(SELECT max(rowid) FROM {})", source);
            vec![
                format!(
                    "UPDATE main.sqlite_sequence SET seq = {max} WHERE name = {name} AND seq < {max}",
                    max = source_max,
                    name = name,
                ),
                format!(
                    "INSERT INTO main.sqlite_sequence(name, seq) SELECT {name}, ifnull({max}, 0) \
                     WHERE NOT EXISTS (SELECT 1 FROM main.sqlite_sequence WHERE name = {name})",
                    max = source_max,
                    name = name,
                ),
            ]
        } else {
            Vec::new()
        };

        let drop_source_table = Statement::DropTable(DropTable {
            if_exists: true,
            table: source,
        })
        .to_string();

        Self {
            base,
            integer_primary_key: columns.integer_primary_key,
            columns: columns.columns,
            autoincrement: columns.autoincrement,
            schema,
            union_view,
            create_union_view,
            migrate_one_row,
            delete_migrated_one_row,
            delete_specified_row,
            drop_source_table,
            update_sequence,
            attach_schema,
        }
    }

    fn projection(columns: &[String], alias_rowid: bool) -> Vec<ResultColumn> {
        let rowid = ResultColumn::Expr {
            expr: Expr::rowid(),
            alias: alias_rowid.then(|| "rowid".to_string()),
        };
        std::iter::once(rowid)
            .chain(columns.iter().map(|column| ResultColumn::Expr {
                expr: Expr::column(column.as_str()),
                alias: None,
            }))
            .collect()
    }

    fn rowid_column() -> ResultColumn {
        ResultColumn::Expr {
            expr: Expr::rowid(),
            alias: None,
        }
    }

    fn by_rowid(direction: SortDirection) -> OrderingTerm {
        OrderingTerm {
            expr: Expr::rowid(),
            direction: Some(direction),
            nulls: None,
        }
    }

    fn limit_one() -> Limit {
        Limit {
            limit: Expr::integer(1),
            offset: None,
        }
    }

    /// Column aliasing the rowid of the destination table, if any.
    pub fn integer_primary_key(&self) -> Option<&str> {
        self.integer_primary_key.as_deref()
    }

    /// Destination columns in declaration order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether the destination's rowid alias is `AUTOINCREMENT`.
    pub fn is_autoincrement(&self) -> bool {
        self.autoincrement
    }

    /// Schema the source table is reachable under.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Unqualified name of the union view.
    pub fn union_view(&self) -> &str {
        &self.union_view
    }

    pub fn union_view_name(&self) -> QualifiedName {
        QualifiedName::with_schema("temp", self.union_view.as_str())
    }

    pub fn source_table_name(&self) -> QualifiedName {
        QualifiedName::with_schema(self.schema.as_str(), self.base.source_table.as_str())
    }

    pub fn destination_table_name(&self) -> QualifiedName {
        QualifiedName::with_schema("main", self.base.table.as_str())
    }

    pub fn statement_for_creating_union_view(&self) -> &str {
        &self.create_union_view
    }

    /// Copies the source row with the largest rowid into the destination.
    pub fn statement_for_migrating_one_row(&self) -> &str {
        &self.migrate_one_row
    }

    /// Deletes the source row with the largest rowid.
    pub fn statement_for_deleting_migrated_one_row(&self) -> &str {
        &self.delete_migrated_one_row
    }

    /// Deletes the source row whose rowid is bound to `?1`.
    pub fn statement_for_deleting_specified_row(&self) -> &str {
        &self.delete_specified_row
    }

    pub fn statement_for_dropping_source_table(&self) -> &str {
        &self.drop_source_table
    }

    /// Raise the destination's `sqlite_sequence` entry to the largest source
    /// rowid. Empty unless the destination is `AUTOINCREMENT`.
    pub fn statements_for_updating_sequence(&self) -> &[String] {
        &self.update_sequence
    }

    /// `ATTACH DATABASE ?1 AS <schema>` for cross-database sources.
    pub fn statement_for_attaching_schema(&self) -> Option<&str> {
        self.attach_schema.as_deref()
    }

    pub fn statement_for_detaching_schema(schema: &str) -> String {
        format!("DETACH DATABASE {}", quote_ident(schema))
    }

    /// How reads of the destination table are redirected to the union view.
    pub fn read_replacement(&self) -> ReadReplacement {
        ReadReplacement {
            table: self.union_view_name(),
            alias: self.base.table.clone(),
            columns: self.columns.clone(),
        }
    }

    /// Whether an INSERT with these columns supplies the rowid itself.
    pub fn insert_supplies_rowid(&self, columns: &[String]) -> bool {
        columns.iter().any(|column| {
            ["rowid", "oid", "_rowid_"]
                .iter()
                .any(|alias| column.eq_ignore_ascii_case(alias))
                || self
                    .integer_primary_key
                    .as_deref()
                    .is_some_and(|pk| column.eq_ignore_ascii_case(pk))
        })
    }

    /// Turn an INSERT into the source table into the matching INSERT into
    /// the destination, with the rowid prepended.
    ///
    /// When the caller supplies the rowid, it is bound to `reserved_index`
    /// (returned as `Some`) from the rowid the source insert produced.
    /// Otherwise the new rowid is one past the largest rowid in the union
    /// view, so it can collide with neither table. An `AUTOINCREMENT`
    /// destination picks the rowid itself from its updated sequence.
    pub fn statement_for_migrating(
        &self,
        fallback: &Insert,
        reserved_index: usize,
    ) -> Result<(Insert, Option<usize>)> {
        if fallback.columns.is_empty() {
            return Err(MigrationError::unsupported(
                &self.base.table,
                "INSERT needs an explicit column list",
            ));
        }
        let row = match &fallback.source {
            InsertSource::Values(rows) if rows.len() == 1 => &rows[0],
            InsertSource::Values(_) => {
                return Err(MigrationError::unsupported(
                    &self.base.table,
                    "INSERT may only insert a single VALUES row",
                ))
            }
            InsertSource::Select(_) => {
                return Err(MigrationError::unsupported(
                    &self.base.table,
                    "INSERT ... SELECT is not supported",
                ))
            }
            InsertSource::DefaultValues => {
                return Err(MigrationError::unsupported(
                    &self.base.table,
                    "INSERT ... DEFAULT VALUES is not supported",
                ))
            }
        };

        let supplies_rowid = self.insert_supplies_rowid(&fallback.columns);
        if self.autoincrement && !supplies_rowid {
            let insert = Insert {
                table: self.destination_table_name(),
                ..fallback.clone()
            };
            return Ok((insert, None));
        }

        let (rowid, rowid_index) = if supplies_rowid {
            (Expr::parameter(reserved_index as u32), Some(reserved_index))
        } else {
            let max_rowid = Select::from_table(
                vec![ResultColumn::Expr {
                    expr: Expr::binary(
                        Expr::function("max", vec![Expr::rowid()]),
                        BinaryOperator::Add,
                        Expr::integer(1),
                    ),
                    alias: None,
                }],
                TableOrSubquery::table(self.union_view_name()),
            );
            (Expr::Subquery(Box::new(max_rowid)), None)
        };

        let mut columns = Vec::with_capacity(fallback.columns.len() + 1);
        columns.push("rowid".to_string());
        columns.extend(fallback.columns.iter().cloned());

        let mut values = Vec::with_capacity(row.len() + 1);
        values.push(rowid);
        values.extend(row.iter().cloned());

        let insert = Insert {
            table: self.destination_table_name(),
            columns,
            source: InsertSource::Values(vec![values]),
            ..fallback.clone()
        };
        Ok((insert, rowid_index))
    }

    /// `rowid IN (SELECT rowid FROM <view> AS <alias> WHERE <filter>)`, or
    /// no filter at all when the statement had none.
    pub fn filter_for_rows(&self, filter: Option<&Expr>, alias: &str) -> Option<Expr> {
        let filter = filter?;
        let selection = self.selection_of_rows(Some(filter), &[], None, alias);
        Some(Expr::in_select(Expr::rowid(), selection))
    }

    /// `SELECT rowid FROM <view> AS <alias> [WHERE ..] [ORDER BY ..] [LIMIT ..]`.
    pub fn selection_of_rows(
        &self,
        filter: Option<&Expr>,
        order_by: &[OrderingTerm],
        limit: Option<&Limit>,
        alias: &str,
    ) -> Select {
        let view = TableOrSubquery::Table {
            name: self.union_view_name(),
            alias: Some(alias.to_string()),
            indexed: None,
        };
        Select {
            with: None,
            core: SelectCore::Query(QueryCore {
                distinct: false,
                columns: vec![Self::rowid_column()],
                from: Some(FromClause {
                    first: view,
                    joins: Vec::new(),
                }),
                filter: filter.cloned(),
                group_by: Vec::new(),
                having: None,
                windows: Vec::new(),
            }),
            compound: Vec::new(),
            order_by: order_by.to_vec(),
            limit: limit.cloned(),
        }
    }
}

impl Deref for MigrationInfo {
    type Target = MigrationBaseInfo;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}
