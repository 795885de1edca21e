//! Schema queries against a live connection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use strata_sql::lexer::{tokenize, Token};
use strata_sql::quote_ident;
use tracing::debug;

use crate::error::{MigrationError, Result};
use crate::info::{MigrationBaseInfo, MigrationInfo, TableColumns, SCHEMA_PREFIX};

/// Whether `schema.table` exists as a table.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.exists([table])?)
}

/// Whether `schema.table` was declared `WITHOUT ROWID`.
pub fn is_without_rowid(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let without_rowid = conn
        .query_row(
            "SELECT wr FROM pragma_table_list WHERE schema = ?1 AND name = ?2 AND type = 'table'",
            params![schema, table],
            |row| row.get::<_, bool>(0),
        )
        .optional()?;
    Ok(without_rowid.unwrap_or(false))
}

/// Columns of `schema.table` in declaration order, with its rowid alias.
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<TableColumns> {
    let sql = format!(
        "PRAGMA {}.table_info({})",
        quote_ident(schema),
        quote_ident(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            row.get::<_, i64>(5)?,
        ))
    })?;

    let mut columns = Vec::new();
    let mut primary_key = Vec::new();
    for row in rows {
        let (name, declared_type, pk) = row?;
        if pk > 0 {
            primary_key.push((name.clone(), declared_type));
        }
        columns.push(name);
    }

    // Only a lone column declared exactly INTEGER aliases the rowid.
    let integer_primary_key = match primary_key.as_slice() {
        [(name, declared_type)] if declared_type.eq_ignore_ascii_case("INTEGER") => {
            Some(name.clone())
        }
        _ => None,
    };
    let autoincrement = match integer_primary_key {
        Some(_) => is_autoincrement(conn, schema, table)?,
        None => false,
    };
    Ok(TableColumns {
        integer_primary_key,
        columns,
        autoincrement,
    })
}

/// Whether the declaration of `schema.table` carries `AUTOINCREMENT`.
///
/// SQLite only accepts the keyword on an `INTEGER PRIMARY KEY`, so callers
/// ask only for tables that have one.
fn is_autoincrement(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    let sql = format!(
        "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    let declaration = conn
        .query_row(&sql, [table], |row| row.get::<_, Option<String>>(0))
        .optional()?
        .flatten();
    Ok(declaration.is_some_and(|declaration| {
        tokenize(&declaration).iter().any(|token| {
            matches!(&token.token, Token::Ident(word) if word.eq_ignore_ascii_case("autoincrement"))
        })
    }))
}

/// Tables of the main schema that `sql` reads or writes.
///
/// SQLite reports every table access to the authorizer while compiling, so
/// this works for statements the interception parser does not understand.
/// Preparing fails exactly when SQLite itself would reject the statement.
pub fn tables_of_statement(conn: &Connection, sql: &str) -> Result<BTreeSet<String>> {
    let tables = Arc::new(Mutex::new(BTreeSet::new()));
    let seen = Arc::clone(&tables);
    conn.authorizer(Some(move |context: AuthContext<'_>| {
        let table = match context.action {
            AuthAction::Read { table_name, .. }
            | AuthAction::Insert { table_name }
            | AuthAction::Update { table_name, .. }
            | AuthAction::Delete { table_name } => Some(table_name),
            _ => None,
        };
        if let (Some(table), Some("main")) = (table, context.database_name) {
            seen.lock().insert(table.to_string());
        }
        Authorization::Allow
    }));
    let prepared = conn.prepare(sql).map(drop);
    conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
    prepared?;

    let tables = std::mem::take(&mut *tables.lock());
    Ok(tables)
}

/// Every user table of the main schema.
pub fn user_tables(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM main.sqlite_master WHERE type = 'table' \
         AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' \
         AND name NOT LIKE 'wcdb\\_%' ESCAPE '\\'",
    )?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut tables = BTreeSet::new();
    for name in names {
        tables.insert(name?);
    }
    Ok(tables)
}

/// Attached schemas by name, with their file paths.
pub fn attached_schemas(conn: &Connection) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        ))
    })?;
    let mut schemas = BTreeMap::new();
    for row in rows {
        let (name, file) = row?;
        schemas.insert(name, file);
    }
    Ok(schemas)
}

/// Attach the source database of `info` unless it already is.
pub fn attach_source(conn: &Connection, info: &MigrationInfo) -> Result<bool> {
    let Some(attach) = info.statement_for_attaching_schema() else {
        return Ok(false);
    };
    if attached_schemas(conn)?.contains_key(info.schema()) {
        return Ok(false);
    }
    conn.execute(attach, [info.source_database()])?;
    debug!(
        schema = info.schema(),
        path = info.source_database(),
        "attached source database"
    );
    Ok(true)
}

pub fn detach(conn: &Connection, schema: &str) -> Result<()> {
    conn.execute_batch(&MigrationInfo::statement_for_detaching_schema(schema))?;
    debug!(schema, "detached source database");
    Ok(())
}

/// Attached schemas that were attached for migration.
pub fn migration_schemas(conn: &Connection) -> Result<BTreeSet<String>> {
    Ok(attached_schemas(conn)?
        .into_keys()
        .filter(|name| name.starts_with(SCHEMA_PREFIX))
        .collect())
}

/// Union views present on this connection.
pub fn union_views(conn: &Connection) -> Result<BTreeSet<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM temp.sqlite_master WHERE type = 'view' \
         AND name LIKE 'wcdb\\_union\\_%' ESCAPE '\\'",
    )?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut views = BTreeSet::new();
    for name in names {
        views.insert(name?);
    }
    Ok(views)
}

pub fn drop_view(conn: &Connection, view: &str) -> Result<()> {
    conn.execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_ident(view)))?;
    Ok(())
}

/// Whether the declared source table exists.
///
/// A cross-database source is looked up through the already attached
/// schema if there is one, otherwise through a read-only connection to the
/// source file. A missing file means a missing table.
pub fn source_table_exists(conn: &Connection, info: &MigrationBaseInfo) -> Result<bool> {
    let schema = info.schema_for_source();
    let table = info.source_table();
    if !info.is_cross_database() || attached_schemas(conn)?.contains_key(&schema) {
        return checked_source_exists(conn, &schema, table);
    }

    if !Path::new(info.source_database()).exists() {
        return Ok(false);
    }
    let source = Connection::open_with_flags(
        info.source_database(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    checked_source_exists(&source, "main", table)
}

fn checked_source_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool> {
    if !table_exists(conn, schema, table)? {
        return Ok(false);
    }
    if is_without_rowid(conn, schema, table)? {
        return Err(MigrationError::Misuse(format!(
            "migrating from a table without rowid is not supported: {}",
            table
        )));
    }
    Ok(true)
}

/// Columns of the destination table, empty if it does not exist yet.
pub fn destination_columns(conn: &Connection, info: &MigrationBaseInfo) -> Result<TableColumns> {
    let table = info.table();
    if !table_exists(conn, "main", table)? {
        return Ok(TableColumns::default());
    }
    if is_without_rowid(conn, "main", table)? {
        return Err(MigrationError::Misuse(format!(
            "migrating to a table without rowid is not supported: {}",
            table
        )));
    }
    table_columns(conn, "main", table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::MigrationUserInfo;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL, note TEXT);
             CREATE TABLE orders_old(id INTEGER PRIMARY KEY, total REAL, note TEXT);
             CREATE TABLE tags(name TEXT PRIMARY KEY, color) WITHOUT ROWID;
             CREATE TABLE pairs(a INT, b INT, PRIMARY KEY(a, b));
             CREATE TABLE wcdb_internal(x);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_table_exists() {
        let conn = conn();
        assert!(table_exists(&conn, "main", "orders").unwrap());
        assert!(!table_exists(&conn, "main", "missing").unwrap());
        assert!(!table_exists(&conn, "temp", "orders").unwrap());
    }

    #[test]
    fn test_table_columns() {
        let conn = conn();
        let columns = table_columns(&conn, "main", "orders").unwrap();
        assert_eq!(columns.columns, vec!["id", "total", "note"]);
        assert_eq!(columns.integer_primary_key.as_deref(), Some("id"));

        let pairs = table_columns(&conn, "main", "pairs").unwrap();
        assert_eq!(pairs.integer_primary_key, None);
        // INT is not INTEGER.
        conn.execute_batch("CREATE TABLE loose(id INT PRIMARY KEY)").unwrap();
        let loose = table_columns(&conn, "main", "loose").unwrap();
        assert_eq!(loose.integer_primary_key, None);
    }

    #[test]
    fn test_autoincrement_is_detected() {
        let conn = conn();
        conn.execute_batch(
            "CREATE TABLE events(id INTEGER PRIMARY KEY AutoIncrement, payload);
             CREATE TABLE notes(id INTEGER PRIMARY KEY, \"autoincrement\" TEXT);",
        )
        .unwrap();
        assert!(table_columns(&conn, "main", "events").unwrap().autoincrement);
        assert!(!table_columns(&conn, "main", "notes").unwrap().autoincrement);
        assert!(!table_columns(&conn, "main", "orders").unwrap().autoincrement);
    }

    #[test]
    fn test_tables_of_statement() {
        let conn = conn();
        let tables = tables_of_statement(
            &conn,
            "WITH recent AS (SELECT * FROM orders) \
             SELECT r.id, count(*) OVER () FROM recent AS r JOIN pairs ON pairs.a = r.id",
        )
        .unwrap();
        assert_eq!(
            tables.into_iter().collect::<Vec<_>>(),
            vec!["orders".to_string(), "pairs".to_string()]
        );

        let tables = tables_of_statement(
            &conn,
            "INSERT INTO orders_old(id) VALUES (1) ON CONFLICT(id) DO UPDATE SET total = 0",
        )
        .unwrap();
        assert!(tables.contains("orders_old"));

        let err = tables_of_statement(&conn, "SELECT * FROM missing").unwrap_err();
        assert!(matches!(err, MigrationError::Sqlite(_)), "{err}");

        // The authorizer is gone afterwards.
        conn.execute_batch("CREATE TEMP TABLE scratch(x)").unwrap();
        assert!(tables_of_statement(&conn, "SELECT * FROM temp.scratch")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_user_tables_skip_builtins() {
        let conn = conn();
        let tables = user_tables(&conn).unwrap();
        assert!(tables.contains("orders"));
        assert!(tables.contains("tags"));
        assert!(!tables.contains("wcdb_internal"));
    }

    #[test]
    fn test_without_rowid_source_is_rejected() {
        let conn = conn();
        assert!(is_without_rowid(&conn, "main", "tags").unwrap());
        assert!(!is_without_rowid(&conn, "main", "orders").unwrap());

        let mut user = MigrationUserInfo::new("", "orders");
        user.set_source("tags", None);
        let err = source_table_exists(&conn, &user).unwrap_err();
        assert!(matches!(err, MigrationError::Misuse(_)));
    }

    #[test]
    fn test_source_lookup() {
        let conn = conn();
        let mut user = MigrationUserInfo::new("", "orders");
        user.set_source("orders_old", None);
        assert!(source_table_exists(&conn, &user).unwrap());

        user.set_source("gone", None);
        assert!(!source_table_exists(&conn, &user).unwrap());

        user.set_source("orders_old", Some("/nonexistent/legacy.db"));
        assert!(!source_table_exists(&conn, &user).unwrap());
    }

    #[test]
    fn test_destination_columns_of_missing_table() {
        let conn = conn();
        let user = MigrationUserInfo::new("", "later");
        assert_eq!(
            destination_columns(&conn, &user).unwrap(),
            TableColumns::default()
        );
    }

    #[test]
    fn test_attached_schemas() {
        let conn = conn();
        let schemas = attached_schemas(&conn).unwrap();
        assert!(schemas.contains_key("main"));
        assert!(migration_schemas(&conn).unwrap().is_empty());
        assert!(union_views(&conn).unwrap().is_empty());
    }
}
