//! Redirecting table reads to replacement views.
//!
//! A read of a replaced table `t` becomes a read of the replacement aliased
//! back to `t`, so qualified column references keep resolving. `*` and
//! `t.*` are expanded to the replacement's visible columns because the view
//! carries an extra `rowid` column that must not leak into results.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use crate::ast::*;

/// What a table read should be redirected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReplacement {
    /// The relation read instead, e.g. `temp.wcdb_union_orders`.
    pub table: QualifiedName,
    /// Alias given to the replacement when the read had none.
    pub alias: String,
    /// Columns `*` expands to, in declaration order.
    pub columns: Vec<String>,
}

/// Decides which table reads are redirected.
pub trait TableRewriter {
    fn read_replacement(&self, table: &QualifiedName) -> Option<ReadReplacement>;
}

/// Replacements keyed by main-schema table name.
impl TableRewriter for BTreeMap<String, ReadReplacement> {
    fn read_replacement(&self, table: &QualifiedName) -> Option<ReadReplacement> {
        if !table.is_main() {
            return None;
        }
        self.get(&table.name).cloned()
    }
}

/// Result of [`rewrite`].
#[derive(Debug, Clone, PartialEq)]
pub struct Rewritten {
    pub statement: Statement,
    /// Whether any read was redirected.
    pub changed: bool,
}

/// Redirect every table read in `statement` that `rewriter` replaces.
///
/// Write targets of INSERT, UPDATE and DELETE are left alone. When an
/// UPDATE or DELETE target is itself replaced, `main.<table>.<column>`
/// references to it are unqualified so they resolve against the alias.
pub fn rewrite(statement: &Statement, rewriter: &dyn TableRewriter) -> Rewritten {
    let mut statement = statement.clone();
    let mut pass = ReadPass {
        rewriter,
        unqualified: BTreeSet::new(),
        ctes: Vec::new(),
        changed: false,
    };
    pass.statement(&mut statement);
    Rewritten {
        changed: pass.changed,
        statement,
    }
}

/// Main-schema tables the statement reads or writes, without duplicates.
pub fn referenced_tables(statement: &Statement) -> Vec<String> {
    let collector = Collector::default();
    rewrite(statement, &collector);

    let mut tables = collector.seen.into_inner();
    let target = match statement {
        Statement::Insert(insert) => Some(&insert.table),
        Statement::Update(update) => Some(&update.table),
        Statement::Delete(delete) => Some(&delete.table),
        Statement::DropTable(drop) => Some(&drop.table),
        Statement::CreateTable(create) => Some(&create.table),
        _ => None,
    };
    if let Some(target) = target {
        if target.is_main() {
            tables.push(target.name.clone());
        }
    }

    let mut seen = BTreeSet::new();
    tables.retain(|name| seen.insert(name.clone()));
    tables
}

#[derive(Default)]
struct Collector {
    seen: RefCell<Vec<String>>,
}

impl TableRewriter for Collector {
    fn read_replacement(&self, table: &QualifiedName) -> Option<ReadReplacement> {
        if table.is_main() {
            self.seen.borrow_mut().push(table.name.clone());
        }
        None
    }
}

struct ReadPass<'a> {
    rewriter: &'a dyn TableRewriter,
    /// Tables whose `main.` column qualifier must be dropped.
    unqualified: BTreeSet<String>,
    /// Common table names in scope; an unqualified name matching one is not a table.
    ctes: Vec<String>,
    changed: bool,
}

impl ReadPass<'_> {
    fn statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::Select(select) => self.select(select),
            Statement::Insert(insert) => {
                let scope = self.enter(&mut insert.with);
                match &mut insert.source {
                    InsertSource::Values(rows) => self.rows(rows),
                    InsertSource::Select(select) => self.select(select),
                    InsertSource::DefaultValues => {}
                }
                for upsert in &mut insert.upsert {
                    self.upsert(upsert);
                }
                self.result_columns(&mut insert.returning);
                self.leave(scope);
            }
            Statement::Update(update) => {
                let scope = self.enter(&mut update.with);
                self.target(&update.table, update.alias.is_some());
                self.assignments(&mut update.assignments);
                self.tail(&mut update.filter, &mut update.order_by, &mut update.limit);
                self.result_columns(&mut update.returning);
                self.leave(scope);
            }
            Statement::Delete(delete) => {
                let scope = self.enter(&mut delete.with);
                self.target(&delete.table, delete.alias.is_some());
                self.tail(&mut delete.filter, &mut delete.order_by, &mut delete.limit);
                self.result_columns(&mut delete.returning);
                self.leave(scope);
            }
            Statement::CreateTable(_) | Statement::DropTable(_) | Statement::Other(_) => {}
        }
    }

    /// Visit the bodies of a `WITH` clause, leaving its names in scope.
    ///
    /// Each body sees the names declared before it and its own.
    fn enter(&mut self, with: &mut Option<With>) -> usize {
        let Some(with) = with else {
            return 0;
        };
        for table in &mut with.tables {
            self.ctes.push(table.name.clone());
            self.select(&mut table.select);
        }
        with.tables.len()
    }

    fn leave(&mut self, scope: usize) {
        self.ctes.truncate(self.ctes.len() - scope);
    }

    fn is_cte(&self, table: &QualifiedName) -> bool {
        table.schema.is_none()
            && self
                .ctes
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&table.name))
    }

    fn target(&mut self, table: &QualifiedName, aliased: bool) {
        if !aliased && self.rewriter.read_replacement(table).is_some() {
            self.unqualified.insert(table.name.clone());
        }
    }

    fn tail(
        &mut self,
        filter: &mut Option<Expr>,
        order_by: &mut [OrderingTerm],
        limit: &mut Option<Limit>,
    ) {
        if let Some(filter) = filter {
            self.expr(filter);
        }
        self.ordering(order_by);
        if let Some(limit) = limit {
            self.expr(&mut limit.limit);
            if let Some(offset) = &mut limit.offset {
                self.expr(offset);
            }
        }
    }

    fn ordering(&mut self, terms: &mut [OrderingTerm]) {
        for term in terms {
            self.expr(&mut term.expr);
        }
    }

    fn assignments(&mut self, assignments: &mut [Assignment]) {
        for assignment in assignments {
            self.expr(&mut assignment.value);
        }
    }

    fn upsert(&mut self, upsert: &mut Upsert) {
        if let Some(target) = &mut upsert.target {
            self.ordering(&mut target.columns);
            if let Some(filter) = &mut target.filter {
                self.expr(filter);
            }
        }
        if let UpsertAction::Update {
            assignments,
            filter,
        } = &mut upsert.action
        {
            self.assignments(assignments);
            if let Some(filter) = filter {
                self.expr(filter);
            }
        }
    }

    fn result_columns(&mut self, columns: &mut [ResultColumn]) {
        for column in columns {
            if let ResultColumn::Expr { expr, .. } = column {
                self.expr(expr);
            }
        }
    }

    fn select(&mut self, select: &mut Select) {
        let scope = self.enter(&mut select.with);
        self.core(&mut select.core);
        for (_, core) in &mut select.compound {
            self.core(core);
        }
        self.tail(&mut None, &mut select.order_by, &mut select.limit);
        self.leave(scope);
    }

    fn rows(&mut self, rows: &mut [Vec<Expr>]) {
        for expr in rows.iter_mut().flatten() {
            self.expr(expr);
        }
    }

    fn core(&mut self, core: &mut SelectCore) {
        let query = match core {
            SelectCore::Values(rows) => return self.rows(rows),
            SelectCore::Query(query) => query,
        };

        let mut replaced = Vec::new();
        if let Some(from) = &mut query.from {
            self.table_or_subquery(&mut from.first, &mut replaced);
            for join in &mut from.joins {
                self.table_or_subquery(&mut join.table, &mut replaced);
            }
            for join in &mut from.joins {
                if let Some(JoinConstraint::On(expr)) = &mut join.constraint {
                    self.expr(expr);
                }
            }
        }

        if !replaced.is_empty() {
            expand_stars(query, &replaced);
        }

        self.result_columns(&mut query.columns);
        if let Some(filter) = &mut query.filter {
            self.expr(filter);
        }
        for expr in &mut query.group_by {
            self.expr(expr);
        }
        if let Some(having) = &mut query.having {
            self.expr(having);
        }
        for (_, spec) in &mut query.windows {
            self.window(spec);
        }
    }

    fn table_or_subquery(
        &mut self,
        item: &mut TableOrSubquery,
        replaced: &mut Vec<(String, Vec<String>)>,
    ) {
        match item {
            TableOrSubquery::Table {
                name,
                alias,
                indexed,
            } => {
                if self.is_cte(name) {
                    return;
                }
                let Some(replacement) = self.rewriter.read_replacement(name) else {
                    return;
                };
                if alias.is_none() {
                    self.unqualified.insert(name.name.clone());
                }
                let visible = alias.get_or_insert(replacement.alias).clone();
                *name = replacement.table;
                // Index hints name indexes of the replaced table, not of the view.
                *indexed = None;
                replaced.push((visible, replacement.columns));
                self.changed = true;
            }
            TableOrSubquery::Subquery { select, .. } => self.select(select),
            TableOrSubquery::Function { args, .. } => {
                for arg in args {
                    self.expr(arg);
                }
            }
        }
    }

    /// Turn `x IN t` into `x IN (SELECT <columns> FROM <replacement>)`.
    ///
    /// The replacement cannot be named directly: its extra `rowid` column
    /// would count as one of the compared columns.
    fn in_table(&mut self, expr: &mut Expr) {
        let Expr::InTable {
            expr: operand,
            negated,
            table,
        } = expr
        else {
            return;
        };
        self.expr(operand);
        if self.is_cte(table) {
            return;
        }
        let Some(replacement) = self.rewriter.read_replacement(table) else {
            return;
        };

        let columns = replacement
            .columns
            .iter()
            .map(|column| ResultColumn::Expr {
                expr: Expr::column(column.as_str()),
                alias: None,
            })
            .collect();
        let select = Select::from_table(
            columns,
            TableOrSubquery::Table {
                name: replacement.table,
                alias: Some(replacement.alias),
                indexed: None,
            },
        );
        let negated = *negated;
        let operand = std::mem::replace(operand, Box::new(Expr::Literal(Literal::Null)));
        *expr = Expr::InSelect {
            expr: operand,
            negated,
            select: Box::new(select),
        };
        self.changed = true;
    }

    fn window(&mut self, spec: &mut WindowSpec) {
        for expr in &mut spec.partition_by {
            self.expr(expr);
        }
        self.ordering(&mut spec.order_by);
        if let Some(frame) = &mut spec.frame {
            for bound in std::iter::once(&mut frame.start).chain(frame.end.as_mut()) {
                if let FrameBound::Preceding(offset) | FrameBound::Following(offset) = bound {
                    self.expr(offset);
                }
            }
        }
    }

    fn column(&mut self, column: &mut ColumnRef) {
        let drop_schema = match (&column.schema, &column.table) {
            (Some(schema), Some(table)) => {
                schema.eq_ignore_ascii_case("main") && self.unqualified.contains(table)
            }
            _ => false,
        };
        if drop_schema {
            column.schema = None;
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Literal(_) | Expr::Parameter(_) => {}
            Expr::Column(column) => self.column(column),
            Expr::Unary { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Collate { expr, .. }
            | Expr::IsNull { expr, .. } => self.expr(expr),
            Expr::InTable { .. } => self.in_table(expr),
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Function {
                args, filter, over, ..
            } => {
                if let FunctionArgs::List(args) = args {
                    for arg in args {
                        self.expr(arg);
                    }
                }
                if let Some(filter) = filter {
                    self.expr(filter);
                }
                if let Some(Over::Spec(spec)) = over {
                    self.window(spec);
                }
            }
            Expr::Pattern {
                expr,
                pattern,
                escape,
                ..
            } => {
                self.expr(expr);
                self.expr(pattern);
                if let Some(escape) = escape {
                    self.expr(escape);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr);
                self.expr(low);
                self.expr(high);
            }
            Expr::InList { expr, list, .. } => {
                self.expr(expr);
                for item in list {
                    self.expr(item);
                }
            }
            Expr::InSelect { expr, select, .. } => {
                self.expr(expr);
                self.select(select);
            }
            Expr::Exists(select) | Expr::Subquery(select) => self.select(select),
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => {
                if let Some(operand) = operand {
                    self.expr(operand);
                }
                for (condition, result) in branches {
                    self.expr(condition);
                    self.expr(result);
                }
                if let Some(otherwise) = otherwise {
                    self.expr(otherwise);
                }
            }
            Expr::Nested(exprs) => {
                for expr in exprs {
                    self.expr(expr);
                }
            }
        }
    }
}

/// Expand `*` and `<replaced>.*` into explicit columns.
///
/// A bare `*` is left alone when the FROM clause has a NATURAL join, a USING
/// constraint or an unaliased subquery, since no column list could reproduce
/// what SQLite would return there.
fn expand_stars(query: &mut QueryCore, replaced: &[(String, Vec<String>)]) {
    let Some(from) = &query.from else {
        return;
    };

    let columns_of = |visible: &str| {
        replaced
            .iter()
            .find(|(name, _)| name == visible)
            .map(|(_, columns)| columns)
    };
    let qualified = |visible: &str, columns: &[String]| {
        columns
            .iter()
            .map(|column| ResultColumn::Expr {
                expr: Expr::Column(ColumnRef::qualified(visible, column.as_str())),
                alias: None,
            })
            .collect::<Vec<_>>()
    };

    let plain_joins = from.joins.iter().all(|join| {
        !matches!(join.operator, JoinOperator::Join { natural: true, .. })
            && !matches!(join.constraint, Some(JoinConstraint::Using(_)))
    });
    let visible_names: Option<Vec<&str>> = if plain_joins {
        from.items().map(TableOrSubquery::visible_name).collect()
    } else {
        None
    };

    let mut expanded = Vec::with_capacity(query.columns.len());
    for column in query.columns.drain(..) {
        match column {
            ResultColumn::Star => match &visible_names {
                Some(names) => {
                    for &name in names.iter() {
                        match columns_of(name) {
                            Some(columns) => expanded.extend(qualified(name, columns)),
                            None => expanded.push(ResultColumn::TableStar(name.to_string())),
                        }
                    }
                }
                None => expanded.push(ResultColumn::Star),
            },
            ResultColumn::TableStar(table) => match columns_of(table.as_str()) {
                Some(columns) => expanded.extend(qualified(table.as_str(), columns)),
                None => expanded.push(ResultColumn::TableStar(table)),
            },
            other => expanded.push(other),
        }
    }
    query.columns = expanded;
}
