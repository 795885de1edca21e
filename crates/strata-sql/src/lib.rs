//! Strata SQL
//!
//! A parser, printer and rewriting pass for the subset of the SQLite dialect
//! that statement interception needs to understand.
//!
//! Statements the migration layer never rewrites (`PRAGMA`, `BEGIN`,
//! `CREATE INDEX`, ...) parse as [`Statement::Other`] and keep their text.
//!
//! # Usage
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use strata_sql::{parse, rewrite, QualifiedName, ReadReplacement};
//!
//! let statement = parse("SELECT * FROM orders WHERE id = ?").unwrap();
//!
//! let mut views = BTreeMap::new();
//! views.insert(
//!     "orders".to_string(),
//!     ReadReplacement {
//!         table: QualifiedName::with_schema("temp", "wcdb_union_orders"),
//!         alias: "orders".to_string(),
//!         columns: vec!["id".to_string(), "total".to_string()],
//!     },
//! );
//!
//! let rewritten = rewrite(&statement, &views);
//! assert!(rewritten.changed);
//! assert_eq!(
//!     rewritten.statement.to_string(),
//!     "SELECT orders.id, orders.total FROM temp.wcdb_union_orders AS orders WHERE id = ?1"
//! );
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod rewrite;
pub mod span;

pub use ast::{
    Assignment, BinaryOperator, BindParameter, ColumnRef, CompoundOperator, ConflictAction,
    CreateTable, Delete, DropTable, Expr, FromClause, FunctionArgs, Insert, InsertSource, Join,
    JoinConstraint, JoinKind, JoinOperator, Limit, Literal, NullsOrder, OrderingTerm,
    PatternOperator, QualifiedName, QueryCore, ResultColumn, Select, SelectCore, SortDirection,
    Statement, TableOrSubquery, UnaryOperator, Update,
};
pub use error::ParseError;
pub use parser::Parameters;
pub use printer::{quote_ident, quote_string};
pub use rewrite::{referenced_tables, rewrite, ReadReplacement, Rewritten, TableRewriter};
pub use span::Span;

/// Parse one SQL statement.
///
/// # Example
///
/// ```rust
/// use strata_sql::{parse, Statement};
///
/// let stmt = parse("DELETE FROM orders WHERE id = 1").unwrap();
/// assert!(matches!(stmt, Statement::Delete(_)));
/// ```
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    parser::parse(source)
}

/// Parse one SQL statement and report the bind parameters it uses.
///
/// # Example
///
/// ```rust
/// use strata_sql::parse_with_parameters;
///
/// let (_, params) = parse_with_parameters("SELECT * FROM t WHERE a = ? AND b = :b").unwrap();
/// assert_eq!(params.count, 2);
/// assert_eq!(params.index_of(":b"), Some(2));
/// ```
pub fn parse_with_parameters(source: &str) -> Result<(Statement, Parameters), ParseError> {
    parser::parse_with_parameters(source)
}
