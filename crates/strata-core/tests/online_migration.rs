//! End-to-end tests: a handle keeps serving statements while a stepper moves
//! rows between real database files.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use strata_core::introspect::{migration_schemas, table_exists, union_views};
use strata_core::{
    Filter, HandleConfig, MigratingHandle, Migration, MigrationError, MigrationEvent,
    MigrationInfo, MigrationPlan, MigrationUserInfo, MissingSchema, SchemaRecovery,
    StepperConfig, StepperHandle,
};

struct TestContext {
    path: String,
    migration: Arc<Migration>,
    dir: tempfile::TempDir,
}

impl TestContext {
    /// A database prepared by `schema`, with `orders` migrating from `orders_old`.
    fn new(schema: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.db").to_string_lossy().into_owned();
        Connection::open(&path).unwrap().execute_batch(schema).unwrap();

        let migration = Arc::new(Migration::new());
        let filter: Filter = Arc::new(|user_info: &mut MigrationUserInfo| {
            if user_info.table() == "orders" {
                user_info.set_source("orders_old", None);
            }
        });
        migration.filter_table(Some(filter));
        Self {
            path,
            migration,
            dir,
        }
    }

    /// `orders_old` holds ids 1..=source, `orders` holds the next `destination` ids.
    fn with_orders(source: i64, destination: i64) -> Self {
        let ctx = Self::new(
            "CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);
             CREATE TABLE orders_old(id INTEGER PRIMARY KEY, total REAL);",
        );
        let raw = ctx.raw();
        seed(&raw, "orders_old", 1, source);
        seed(&raw, "orders", source + 1, source + destination);
        ctx
    }

    fn raw(&self) -> Connection {
        Connection::open(&self.path).unwrap()
    }

    fn handle(&self) -> MigratingHandle {
        MigratingHandle::open(&self.path, Arc::clone(&self.migration), HandleConfig::default())
            .unwrap()
    }

    /// Replace the filter with one migrating `table` from `source`.
    fn migrate_table(&self, table: &'static str, source: &'static str) {
        let filter: Filter = Arc::new(move |user_info: &mut MigrationUserInfo| {
            if user_info.table() == table {
                user_info.set_source(source, None);
            }
        });
        self.migration.filter_table(Some(filter));
    }

    fn stepper(&self) -> StepperHandle {
        StepperHandle::open(&self.path, StepperConfig::default()).unwrap()
    }

    /// Step until the migration reports completion.
    fn migrate_all(&self, stepper: &mut StepperHandle) -> usize {
        let mut steps = 0;
        while !stepper.step(&self.migration).unwrap() {
            steps += 1;
            assert!(steps < 100_000, "migration did not converge");
        }
        steps
    }
}

fn seed(conn: &Connection, table: &str, first: i64, last: i64) {
    if last < first {
        return;
    }
    conn.execute_batch(&format!(
        "WITH RECURSIVE seq(n) AS (SELECT {first} UNION ALL SELECT n + 1 FROM seq WHERE n < {last}) \
         INSERT INTO {table}(id, total) SELECT n, n * 1.5 FROM seq"
    ))
    .unwrap();
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT count(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

fn handle_count(handle: &MigratingHandle) -> i64 {
    handle
        .query_row("SELECT count(*) FROM orders", &[], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_reads_see_both_tables() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();
    assert_eq!(handle_count(&handle), 15);

    let mut stmt = handle.prepare("SELECT * FROM orders ORDER BY id").unwrap();
    assert!(!stmt.is_split());
    assert_eq!(stmt.referenced_tables(), vec!["orders"]);
    let mut ids = Vec::new();
    let mut rows = stmt.query().unwrap();
    while let Some(row) = rows.next().unwrap() {
        ids.push(row.get::<_, i64>(0).unwrap());
    }
    assert_eq!(ids, (1..=15).collect::<Vec<_>>());
}

#[test]
fn test_insert_before_stepping() {
    let ctx = TestContext::with_orders(1000, 0);
    let handle = ctx.handle();

    let changes = handle
        .execute("INSERT INTO orders(total) VALUES (?)", &[&99.0])
        .unwrap();
    assert_eq!(changes, 1);
    assert_eq!(handle_count(&handle), 1001);

    // The new row lands in the destination with a rowid no source row uses.
    let raw = ctx.raw();
    assert_eq!(count(&raw, "orders"), 1);
    assert_eq!(count(&raw, "orders_old"), 1000);
    let id: i64 = raw
        .query_row("SELECT id FROM orders", [], |row| row.get(0))
        .unwrap();
    assert!(id > 1000);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    assert!(ctx.migration.is_migrated());
    assert_eq!(count(&raw, "orders"), 1001);
    assert!(!table_exists(&raw, "main", "orders_old").unwrap());
    let distinct: i64 = raw
        .query_row("SELECT count(DISTINCT id) FROM orders", [], |row| row.get(0))
        .unwrap();
    assert_eq!(distinct, 1001);
    assert_eq!(handle_count(&handle), 1001);
}

#[test]
fn test_insert_with_key_and_named_parameters() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();

    let mut stmt = handle
        .prepare("INSERT INTO orders(id, total) VALUES (:id, :total)")
        .unwrap();
    assert!(stmt.is_split());
    assert_eq!(stmt.parameter_count(), 2);
    assert_eq!(stmt.bind_parameter_index(":total"), Some(2));
    assert!(matches!(
        stmt.bind(HandleConfig::default().max_variable_number, 1),
        Err(MigrationError::ReservedParameter { .. })
    ));

    stmt.bind_named(":id", 500).unwrap();
    stmt.bind_named(":total", 7.5).unwrap();
    assert_eq!(stmt.execute().unwrap(), 1);
    stmt.finalize();

    let raw = ctx.raw();
    let total: f64 = raw
        .query_row("SELECT total FROM orders WHERE id = 500", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 7.5);
    assert_eq!(count(&raw, "orders_old"), 10);

    // A duplicate key fails in the source and leaves both tables untouched.
    let err = handle
        .execute("INSERT INTO orders(id, total) VALUES (?, ?)", &[&3, &1.0])
        .unwrap_err();
    assert!(matches!(err, MigrationError::Sqlite(_)));
    assert_eq!(handle_count(&handle), 16);
}

#[test]
fn test_update_touches_both_tables() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();

    let changes = handle
        .execute("UPDATE orders SET total = 0 WHERE id % 5 = 0", &[])
        .unwrap();
    assert_eq!(changes, 3);

    let raw = ctx.raw();
    let zeroed = |table: &str| -> i64 {
        raw.query_row(
            &format!("SELECT count(*) FROM {} WHERE total = 0", table),
            [],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(zeroed("orders_old"), 2);
    assert_eq!(zeroed("orders"), 1);
}

#[test]
fn test_limited_delete() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();

    let changes = handle
        .execute("DELETE FROM orders ORDER BY rowid LIMIT 1", &[])
        .unwrap();
    assert_eq!(changes, 1);
    let raw = ctx.raw();
    let min: i64 = raw
        .query_row("SELECT min(id) FROM orders_old", [], |row| row.get(0))
        .unwrap();
    assert_eq!(min, 2);

    let changes = handle
        .execute("DELETE FROM orders ORDER BY id DESC LIMIT ?", &[&2])
        .unwrap();
    assert_eq!(changes, 2);
    assert_eq!(count(&raw, "orders"), 3);
    assert_eq!(handle_count(&handle), 12);
}

#[test]
fn test_unsupported_inserts() {
    let ctx = TestContext::with_orders(10, 0);
    let handle = ctx.handle();
    for sql in [
        "INSERT INTO orders VALUES (100, 1.0)",
        "INSERT INTO orders(id, total) VALUES (100, 1.0), (101, 2.0)",
        "INSERT INTO orders(id, total) SELECT id + 100, total FROM orders",
    ] {
        assert!(
            matches!(handle.prepare(sql), Err(MigrationError::Unsupported { .. })),
            "{}",
            sql
        );
    }
    // Tables that do not migrate are left alone.
    handle
        .execute("CREATE TABLE archive(id INTEGER PRIMARY KEY, total REAL)", &[])
        .unwrap();
    handle
        .execute("INSERT INTO archive SELECT * FROM orders", &[])
        .unwrap();
    assert_eq!(count(&ctx.raw(), "archive"), 10);
}

#[test]
fn test_source_kept_while_referenced() {
    let ctx = TestContext::with_orders(300, 0);
    let handle = ctx.handle();
    let mut stmt = handle.prepare("SELECT count(*) FROM orders").unwrap();

    let mut stepper = ctx.stepper();
    let mut steps = 0;
    while !ctx.migration.status().migrating.is_empty() {
        assert!(!stepper.step(&ctx.migration).unwrap());
        steps += 1;
        assert!(steps < 100_000);
    }
    for _ in 0..3 {
        assert!(!stepper.step(&ctx.migration).unwrap());
    }

    let raw = ctx.raw();
    assert!(table_exists(&raw, "main", "orders_old").unwrap());
    assert_eq!(count(&raw, "orders_old"), 0);
    assert_eq!(ctx.migration.status().referenced, vec!["orders".to_string()]);
    let total: i64 = stmt.query_row(&[], |row| row.get(0)).unwrap();
    assert_eq!(total, 300);

    drop(stmt);
    ctx.migrate_all(&mut stepper);
    assert!(!table_exists(&raw, "main", "orders_old").unwrap());
    assert_eq!(count(&raw, "orders"), 300);
}

#[test]
fn test_migration_is_idempotent() {
    let ctx = TestContext::with_orders(50, 0);
    let tables = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let event: Arc<dyn MigrationEvent> = {
        let tables = Arc::clone(&tables);
        let finished = Arc::clone(&finished);
        Arc::new(move |info: Option<&MigrationInfo>| match info {
            Some(_) => {
                tables.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                finished.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    ctx.migration.set_event(Some(event));

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    for _ in 0..3 {
        assert!(stepper.step(&ctx.migration).unwrap());
    }
    assert_eq!(tables.load(Ordering::SeqCst), 1);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cross_database() {
    let ctx = TestContext::new("CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);");
    let legacy = ctx.dir.path().join("legacy.db").to_string_lossy().into_owned();
    {
        let conn = Connection::open(&legacy).unwrap();
        conn.execute_batch("CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);")
            .unwrap();
        seed(&conn, "orders", 1, 50);
    }
    let plan = MigrationPlan::from_json(&format!(
        r#"{{"tables": [{{"table": "orders", "source_table": "orders", "source_database": "{}"}}]}}"#,
        legacy
    ))
    .unwrap();
    ctx.migration
        .filter_table(Some(plan.into_filter(&ctx.path).unwrap()));

    let handle = ctx.handle();
    assert_eq!(handle_count(&handle), 50);
    assert!(ctx.migration.paths_of_source_databases().contains(&legacy));

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    assert!(ctx.migration.paths_of_source_databases().is_empty());
    assert_eq!(count(&ctx.raw(), "orders"), 50);
    let conn = Connection::open(&legacy).unwrap();
    assert!(!table_exists(&conn, "main", "orders").unwrap());
}

#[test]
fn test_created_table_is_picked_up() {
    let ctx = TestContext::new("CREATE TABLE orders_old(id INTEGER PRIMARY KEY, total REAL);");
    seed(&ctx.raw(), "orders_old", 1, 20);

    let handle = ctx.handle();
    handle
        .execute("CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL)", &[])
        .unwrap();
    assert_eq!(ctx.migration.status().hinted, vec!["orders".to_string()]);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    assert_eq!(count(&ctx.raw(), "orders"), 20);
    assert!(ctx.migration.status().hinted.is_empty());
}

#[test]
fn test_recovers_dropped_union_view() {
    let ctx = TestContext::with_orders(10, 5);
    let recovered = Arc::new(AtomicUsize::new(0));
    let recovery: Arc<dyn SchemaRecovery> = {
        let recovered = Arc::clone(&recovered);
        Arc::new(move |_: &Connection, missing: &MissingSchema| -> strata_core::Result<()> {
            assert!(matches!(missing, MissingSchema::Table { .. }));
            recovered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let handle = ctx.handle().with_schema_recovery(recovery);
    assert_eq!(handle_count(&handle), 15);

    handle
        .connection()
        .execute_batch("DROP VIEW temp.wcdb_union_orders")
        .unwrap();
    assert_eq!(handle_count(&handle), 15);
    assert_eq!(recovered.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_table_empties_source() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();
    // Only the rows deleted from the source are counted.
    assert_eq!(handle.execute("DROP TABLE orders", &[]).unwrap(), 10);

    let raw = ctx.raw();
    assert!(!table_exists(&raw, "main", "orders").unwrap());
    assert_eq!(count(&raw, "orders_old"), 0);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    assert!(!table_exists(&raw, "main", "orders_old").unwrap());
}

#[test]
fn test_statements_pass_through_without_filter() {
    let ctx = TestContext::with_orders(10, 5);
    ctx.migration.filter_table(None);
    let handle = ctx.handle();
    let stmt = handle.prepare("SELECT * FROM orders").unwrap();
    assert!(!stmt.is_split());
    assert_eq!(stmt.physical_sql(), ["SELECT * FROM orders".to_string()]);
    assert!(stmt.referenced_tables().is_empty());
    drop(stmt);
    assert_eq!(handle_count(&handle), 5);
}

#[test]
fn test_ignored_insert_reports_no_change() {
    let ctx = TestContext::with_orders(10, 5);
    let handle = ctx.handle();

    // Id 12 only exists in the destination, so the source accepts the row.
    let changes = handle
        .execute("INSERT OR IGNORE INTO orders(id, total) VALUES (?, ?)", &[&12, &0.0])
        .unwrap();
    assert_eq!(changes, 0);
    let raw = ctx.raw();
    assert_eq!(count(&raw, "orders_old"), 10);
    let total: f64 = raw
        .query_row("SELECT total FROM orders WHERE id = 12", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 18.0);

    let changes = handle
        .execute("INSERT OR IGNORE INTO orders(id, total) VALUES (?, ?)", &[&3, &0.0])
        .unwrap();
    assert_eq!(changes, 0);
    assert_eq!(
        handle
            .execute("INSERT OR IGNORE INTO orders(id, total) VALUES (?, ?)", &[&20, &0.0])
            .unwrap(),
        1
    );
    assert_eq!(handle_count(&handle), 16);
}

#[test]
fn test_newer_statement_forms_keep_working() {
    let ctx = TestContext::with_orders(10, 5);
    ctx.raw()
        .execute_batch(
            "CREATE TABLE archive(id INTEGER PRIMARY KEY, total REAL);
             CREATE INDEX archive_total ON archive(total);
             INSERT INTO archive(id, total) VALUES (1, 1.0), (2, NULL), (3, 3.0);",
        )
        .unwrap();
    let handle = ctx.handle();
    let single = |sql: &str| -> i64 {
        handle
            .query_row(sql, &[], |row| row.get(0))
            .unwrap_or_else(|err| panic!("{}: {}", sql, err))
    };

    // Tables that do not migrate.
    assert_eq!(
        single("WITH big AS (SELECT * FROM archive WHERE total > 1) SELECT count(*) FROM big"),
        1
    );
    assert_eq!(
        single("SELECT max(n) FROM (SELECT row_number() OVER (ORDER BY id) AS n FROM archive)"),
        3
    );
    assert_eq!(single("SELECT count(*) FROM json_each('[1, 2, 3]')"), 3);
    assert_eq!(
        single("SELECT count(*) FROM archive INDEXED BY archive_total WHERE total > 0"),
        2
    );
    assert_eq!(
        single("SELECT count(*) FROM archive WHERE total IS NOT DISTINCT FROM NULL"),
        1
    );
    handle
        .execute(
            "INSERT INTO archive(id, total) VALUES (1, 9.0) \
             ON CONFLICT(id) DO UPDATE SET total = excluded.total",
            &[],
        )
        .unwrap();
    assert_eq!(
        single("UPDATE archive SET total = total + 1 WHERE id = 1 RETURNING CAST(total AS INTEGER)"),
        10
    );

    // The migrating table, read through the union.
    assert_eq!(
        single("WITH o AS (SELECT id FROM orders) SELECT count(*) FROM o"),
        15
    );
    assert_eq!(
        single("SELECT max(n) FROM (SELECT rank() OVER (ORDER BY id) AS n FROM orders)"),
        15
    );
    assert_eq!(
        single("SELECT count(*) FROM json_each('[1, 11]') AS j JOIN orders ON orders.id = j.value"),
        2
    );
    assert_eq!(
        single("SELECT count(*) FROM orders WHERE total IS DISTINCT FROM 1.5"),
        14
    );

    for sql in [
        "INSERT INTO orders(id, total) VALUES (1, 0) ON CONFLICT(id) DO NOTHING",
        "DELETE FROM orders WHERE id = 1 RETURNING id",
    ] {
        assert!(
            matches!(handle.prepare(sql), Err(MigrationError::Unsupported { .. })),
            "{}",
            sql
        );
    }
}

#[test]
fn test_statements_the_parser_rejects() {
    let ctx = TestContext::with_orders(10, 5);
    ctx.raw()
        .execute_batch(
            "CREATE TABLE archive(id INTEGER PRIMARY KEY, total REAL);
             CREATE TABLE staging(id INTEGER PRIMARY KEY, total REAL);
             INSERT INTO archive(id, total) VALUES (1, 1.0), (2, 2.0);
             INSERT INTO staging(id, total) VALUES (2, 20.0);",
        )
        .unwrap();
    let handle = ctx.handle();

    // UPDATE ... FROM runs as written when no table it touches migrates.
    let changes = handle
        .execute(
            "UPDATE archive SET total = s.total FROM staging AS s WHERE archive.id = s.id",
            &[],
        )
        .unwrap();
    assert_eq!(changes, 1);
    let total: f64 = ctx
        .raw()
        .query_row("SELECT total FROM archive WHERE id = 2", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 20.0);

    for sql in [
        "UPDATE orders SET total = s.total FROM staging AS s WHERE orders.id = s.id",
        "UPDATE archive SET total = o.total FROM orders AS o WHERE archive.id = o.id",
    ] {
        match handle.prepare(sql) {
            Err(MigrationError::Unsupported { table, .. }) => assert_eq!(table, "orders"),
            other => panic!("{}: {:?}", sql, other.map(|stmt| stmt.physical_sql().to_vec())),
        }
    }

    // Invalid SQL still fails the way SQLite reports it.
    assert!(matches!(
        handle.prepare("UPDATE missing SET x = y.x FROM y"),
        Err(MigrationError::Sqlite(_))
    ));
}

#[test]
fn test_in_table_reads_both_tables() {
    let ctx = TestContext::new(
        "CREATE TABLE tags(name TEXT);
         CREATE TABLE tags_old(name TEXT);
         CREATE TABLE labels(name TEXT);
         INSERT INTO tags_old(name) VALUES ('a'), ('b');
         INSERT INTO tags(name) VALUES ('c');
         INSERT INTO labels(name) VALUES ('a'), ('b'), ('c'), ('d');",
    );
    ctx.migrate_table("tags", "tags_old");
    let handle = ctx.handle();

    let matched: i64 = handle
        .query_row("SELECT count(*) FROM labels WHERE name IN tags", &[], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(matched, 3);
    let unmatched: i64 = handle
        .query_row(
            "SELECT count(*) FROM labels WHERE name NOT IN main.tags",
            &[],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(unmatched, 1);
}

#[test]
fn test_finished_cross_database_table_is_detached() {
    let ctx = TestContext::new("CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);");
    let legacy = ctx.dir.path().join("legacy.db").to_string_lossy().into_owned();
    {
        let conn = Connection::open(&legacy).unwrap();
        conn.execute_batch("CREATE TABLE orders(id INTEGER PRIMARY KEY, total REAL);")
            .unwrap();
        seed(&conn, "orders", 1, 20);
    }
    let plan = MigrationPlan::from_json(&format!(
        r#"{{"tables": [{{"table": "orders", "source_table": "orders", "source_database": "{}"}}]}}"#,
        legacy
    ))
    .unwrap();
    ctx.migration
        .filter_table(Some(plan.into_filter(&ctx.path).unwrap()));

    let handle = ctx.handle();
    assert_eq!(handle_count(&handle), 20);
    assert_eq!(migration_schemas(handle.connection()).unwrap().len(), 1);
    assert_eq!(union_views(handle.connection()).unwrap().len(), 1);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);

    assert_eq!(handle_count(&handle), 20);
    assert!(migration_schemas(handle.connection()).unwrap().is_empty());
    assert!(union_views(handle.connection()).unwrap().is_empty());
}

#[test]
fn test_autoincrement_never_reuses_rowids() {
    let ctx = TestContext::new(
        "CREATE TABLE events(id INTEGER PRIMARY KEY AUTOINCREMENT, payload TEXT);
         CREATE TABLE events_old(id INTEGER PRIMARY KEY AUTOINCREMENT, payload TEXT);",
    );
    ctx.raw()
        .execute_batch(
            "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 10) \
             INSERT INTO events_old(id, payload) SELECT n, 'old' FROM seq",
        )
        .unwrap();
    ctx.migrate_table("events", "events_old");
    let handle = ctx.handle();
    let last_id = || -> i64 {
        handle
            .query_row("SELECT max(id) FROM events", &[], |row| row.get(0))
            .unwrap()
    };

    assert_eq!(
        handle.execute("INSERT INTO events(payload) VALUES ('new')", &[]).unwrap(),
        1
    );
    assert_eq!(last_id(), 11);
    handle.execute("DELETE FROM events WHERE id = 11", &[]).unwrap();
    handle.execute("INSERT INTO events(payload) VALUES ('newer')", &[]).unwrap();
    assert_eq!(last_id(), 12);

    let raw = ctx.raw();
    let sequence = |raw: &Connection| -> i64 {
        raw.query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = 'events'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert_eq!(sequence(&raw), 12);
    assert_eq!(count(&raw, "events_old"), 10);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    assert_eq!(count(&raw, "events"), 11);
    assert!(!table_exists(&raw, "main", "events_old").unwrap());

    handle.execute("INSERT INTO events(payload) VALUES ('after')", &[]).unwrap();
    assert_eq!(last_id(), 13);
    assert_eq!(sequence(&raw), 13);
}

#[test]
fn test_autoincrement_sequence_raised_before_stepping() {
    let ctx = TestContext::new(
        "CREATE TABLE events(id INTEGER PRIMARY KEY AUTOINCREMENT, payload TEXT);
         CREATE TABLE events_old(id INTEGER PRIMARY KEY, payload TEXT);
         INSERT INTO events_old(id, payload) VALUES (40, 'a'), (41, 'b');",
    );
    ctx.migrate_table("events", "events_old");

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    let raw = ctx.raw();
    let seq: i64 = raw
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = 'events'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(seq, 41);
    raw.execute("INSERT INTO events(payload) VALUES ('c')", []).unwrap();
    assert_eq!(raw.last_insert_rowid(), 42);
}

#[test]
fn test_writes_while_stepping_on_another_thread() {
    let ctx = TestContext::with_orders(2000, 0);
    let mode: String = ctx
        .raw()
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "wal");

    let stop = Arc::new(AtomicBool::new(false));
    let stepping = {
        let migration = Arc::clone(&ctx.migration);
        let path = ctx.path.clone();
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let mut stepper = StepperHandle::open(&path, StepperConfig::default()).unwrap();
            let mut steps = 0usize;
            while !stop.load(Ordering::SeqCst) {
                stepper.step(&migration).unwrap();
                steps += 1;
                std::thread::sleep(Duration::from_millis(2));
            }
            steps
        })
    };

    let handle = ctx.handle();
    let mut expected = 2000i64;
    for round in 0..200i64 {
        let inserted = handle
            .execute("INSERT INTO orders(total) VALUES (?)", &[&(round as f64)])
            .unwrap();
        assert_eq!(inserted, 1);
        expected += 1;
        if round % 3 == 0 {
            let deleted = handle
                .execute("DELETE FROM orders WHERE id = ?", &[&(round * 7 + 1)])
                .unwrap();
            assert_eq!(deleted, 1, "round {}", round);
            expected -= 1;
        }
        let updated = handle
            .execute(
                "UPDATE orders SET total = total + 1 WHERE id = ?",
                &[&(round * 5 + 2)],
            )
            .unwrap();
        assert!(updated <= 1);
        assert_eq!(handle_count(&handle), expected, "round {}", round);
    }

    stop.store(true, Ordering::SeqCst);
    assert!(stepping.join().unwrap() > 0);

    let mut stepper = ctx.stepper();
    ctx.migrate_all(&mut stepper);
    let raw = ctx.raw();
    assert!(!table_exists(&raw, "main", "orders_old").unwrap());
    let distinct: i64 = raw
        .query_row("SELECT count(DISTINCT id) FROM orders", [], |row| row.get(0))
        .unwrap();
    assert_eq!(distinct, expected);
    assert_eq!(count(&raw, "orders"), expected);
    assert_eq!(handle_count(&handle), expected);
}
