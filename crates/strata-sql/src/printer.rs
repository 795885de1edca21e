//! SQL text generation for the syntax tree.
//!
//! Identifiers are quoted only when they need it. Expressions get
//! parentheses where the tree's grouping differs from SQLite's operator
//! precedence, so trees built by hand print correctly too.

use std::fmt::{self, Display, Formatter, Write};

use crate::ast::*;

/// Every keyword SQLite reserves in some context.
const KEYWORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

/// Whether `name` is an SQLite keyword, ignoring case.
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.iter().any(|keyword| keyword.eq_ignore_ascii_case(name))
}

/// Quote an identifier if it is not a plain word or collides with a keyword.
pub fn quote_ident(name: &str) -> String {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if plain && !is_keyword(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// Quote a string literal.
pub fn quote_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

struct Ident<'a>(&'a str);

impl Display for Ident<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&quote_ident(self.0))
    }
}

/// Write items separated by `, `.
fn comma_list<T: Display>(f: &mut Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn ident_list(f: &mut Formatter<'_>, names: &[String]) -> fmt::Result {
    f.write_char('(')?;
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", Ident(name))?;
    }
    f.write_char(')')
}

fn value_rows(f: &mut Formatter<'_>, rows: &[Vec<Expr>]) -> fmt::Result {
    f.write_str("VALUES ")?;
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_char('(')?;
        comma_list(f, row)?;
        f.write_char(')')?;
    }
    Ok(())
}

fn conflict_action(action: ConflictAction) -> &'static str {
    match action {
        ConflictAction::Rollback => "ROLLBACK",
        ConflictAction::Abort => "ABORT",
        ConflictAction::Replace => "REPLACE",
        ConflictAction::Fail => "FAIL",
        ConflictAction::Ignore => "IGNORE",
    }
}

fn tail_clauses(
    f: &mut Formatter<'_>,
    filter: &Option<Expr>,
    returning: &[ResultColumn],
    order_by: &[OrderingTerm],
    limit: &Option<Limit>,
) -> fmt::Result {
    if let Some(filter) = filter {
        write!(f, " WHERE {}", filter)?;
    }
    if !returning.is_empty() {
        f.write_str(" RETURNING ")?;
        comma_list(f, returning)?;
    }
    if !order_by.is_empty() {
        f.write_str(" ORDER BY ")?;
        comma_list(f, order_by)?;
    }
    if let Some(limit) = limit {
        write!(f, " {}", limit)?;
    }
    Ok(())
}

fn assignments(f: &mut Formatter<'_>, assignments: &[Assignment]) -> fmt::Result {
    for (i, assignment) in assignments.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        match assignment.columns.as_slice() {
            [column] => write!(f, "{}", Ident(column))?,
            columns => ident_list(f, columns)?,
        }
        write!(f, " = {}", assignment.value)?;
    }
    Ok(())
}

fn indexed_by(f: &mut Formatter<'_>, indexed: &Option<IndexedBy>) -> fmt::Result {
    match indexed {
        Some(IndexedBy::Index(index)) => write!(f, " INDEXED BY {}", Ident(index)),
        Some(IndexedBy::NotIndexed) => f.write_str(" NOT INDEXED"),
        None => Ok(()),
    }
}

fn with_prefix(f: &mut Formatter<'_>, with: &Option<With>) -> fmt::Result {
    match with {
        Some(with) => write!(f, "{} ", with),
        None => Ok(()),
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(select) => select.fmt(f),
            Statement::Insert(insert) => insert.fmt(f),
            Statement::Update(update) => update.fmt(f),
            Statement::Delete(delete) => delete.fmt(f),
            Statement::CreateTable(create) => create.fmt(f),
            Statement::DropTable(drop) => drop.fmt(f),
            Statement::Other(sql) => f.write_str(sql),
        }
    }
}

impl Display for QualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", Ident(schema))?;
        }
        write!(f, "{}", Ident(&self.name))
    }
}

impl Display for With {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("WITH ")?;
        if self.recursive {
            f.write_str("RECURSIVE ")?;
        }
        for (i, table) in self.tables.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", Ident(&table.name))?;
            if !table.columns.is_empty() {
                ident_list(f, &table.columns)?;
            }
            f.write_str(" AS ")?;
            match table.materialized {
                Some(true) => f.write_str("MATERIALIZED ")?,
                Some(false) => f.write_str("NOT MATERIALIZED ")?,
                None => {}
            }
            write!(f, "({})", table.select)?;
        }
        Ok(())
    }
}

impl Display for Select {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        with_prefix(f, &self.with)?;
        write!(f, "{}", self.core)?;
        for (op, core) in &self.compound {
            let op = match op {
                CompoundOperator::Union => "UNION",
                CompoundOperator::UnionAll => "UNION ALL",
                CompoundOperator::Intersect => "INTERSECT",
                CompoundOperator::Except => "EXCEPT",
            };
            write!(f, " {} {}", op, core)?;
        }
        tail_clauses(f, &None, &[], &self.order_by, &self.limit)
    }
}

impl Display for SelectCore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SelectCore::Values(rows) => value_rows(f, rows),
            SelectCore::Query(core) => {
                f.write_str("SELECT ")?;
                if core.distinct {
                    f.write_str("DISTINCT ")?;
                }
                comma_list(f, &core.columns)?;
                if let Some(from) = &core.from {
                    write!(f, " FROM {}", from)?;
                }
                if let Some(filter) = &core.filter {
                    write!(f, " WHERE {}", filter)?;
                }
                if !core.group_by.is_empty() {
                    f.write_str(" GROUP BY ")?;
                    comma_list(f, &core.group_by)?;
                }
                if let Some(having) = &core.having {
                    write!(f, " HAVING {}", having)?;
                }
                for (i, (name, spec)) in core.windows.iter().enumerate() {
                    f.write_str(if i == 0 { " WINDOW " } else { ", " })?;
                    write!(f, "{} AS {}", Ident(name), spec)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for ResultColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResultColumn::Star => f.write_char('*'),
            ResultColumn::TableStar(table) => write!(f, "{}.*", Ident(table)),
            ResultColumn::Expr { expr, alias } => {
                write!(f, "{}", expr)?;
                if let Some(alias) = alias {
                    write!(f, " AS {}", Ident(alias))?;
                }
                Ok(())
            }
        }
    }
}

impl Display for FromClause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for join in &self.joins {
            match join.operator {
                JoinOperator::Comma => f.write_str(", ")?,
                JoinOperator::Join { natural, kind } => {
                    f.write_char(' ')?;
                    if natural {
                        f.write_str("NATURAL ")?;
                    }
                    f.write_str(match kind {
                        JoinKind::Plain => "",
                        JoinKind::Inner => "INNER ",
                        JoinKind::Left => "LEFT ",
                        JoinKind::LeftOuter => "LEFT OUTER ",
                        JoinKind::Right => "RIGHT ",
                        JoinKind::RightOuter => "RIGHT OUTER ",
                        JoinKind::Full => "FULL ",
                        JoinKind::FullOuter => "FULL OUTER ",
                        JoinKind::Cross => "CROSS ",
                    })?;
                    f.write_str("JOIN ")?;
                }
            }
            write!(f, "{}", join.table)?;
            match &join.constraint {
                Some(JoinConstraint::On(expr)) => write!(f, " ON {}", expr)?,
                Some(JoinConstraint::Using(columns)) => {
                    f.write_str(" USING ")?;
                    ident_list(f, columns)?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

impl Display for TableOrSubquery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (alias, indexed) = match self {
            TableOrSubquery::Table {
                name,
                alias,
                indexed,
            } => {
                write!(f, "{}", name)?;
                (alias, indexed)
            }
            TableOrSubquery::Subquery { select, alias } => {
                write!(f, "({})", select)?;
                (alias, &None)
            }
            TableOrSubquery::Function { name, args, alias } => {
                write!(f, "{}(", name)?;
                comma_list(f, args)?;
                f.write_char(')')?;
                (alias, &None)
            }
        };
        if let Some(alias) = alias {
            write!(f, " AS {}", Ident(alias))?;
        }
        indexed_by(f, indexed)
    }
}

impl Display for OrderingTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        match self.direction {
            Some(SortDirection::Asc) => f.write_str(" ASC")?,
            Some(SortDirection::Desc) => f.write_str(" DESC")?,
            None => {}
        }
        match self.nulls {
            Some(NullsOrder::First) => f.write_str(" NULLS FIRST"),
            Some(NullsOrder::Last) => f.write_str(" NULLS LAST"),
            None => Ok(()),
        }
    }
}

impl Display for WindowSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut clauses = Vec::new();
        if let Some(base) = &self.base {
            clauses.push(quote_ident(base));
        }
        if !self.partition_by.is_empty() {
            let exprs: Vec<String> = self.partition_by.iter().map(Expr::to_string).collect();
            clauses.push(format!("PARTITION BY {}", exprs.join(", ")));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self.order_by.iter().map(OrderingTerm::to_string).collect();
            clauses.push(format!("ORDER BY {}", terms.join(", ")));
        }
        if let Some(frame) = &self.frame {
            clauses.push(frame.to_string());
        }
        write!(f, "({})", clauses.join(" "))
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self.unit {
            FrameUnit::Range => "RANGE ",
            FrameUnit::Rows => "ROWS ",
            FrameUnit::Groups => "GROUPS ",
        })?;
        match &self.end {
            Some(end) => write!(f, "BETWEEN {} AND {}", self.start, end)?,
            None => write!(f, "{}", self.start)?,
        }
        match self.exclude {
            Some(FrameExclude::NoOthers) => f.write_str(" EXCLUDE NO OTHERS"),
            Some(FrameExclude::CurrentRow) => f.write_str(" EXCLUDE CURRENT ROW"),
            Some(FrameExclude::Group) => f.write_str(" EXCLUDE GROUP"),
            Some(FrameExclude::Ties) => f.write_str(" EXCLUDE TIES"),
            None => Ok(()),
        }
    }
}

impl Display for FrameBound {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FrameBound::UnboundedPreceding => f.write_str("UNBOUNDED PRECEDING"),
            FrameBound::Preceding(offset) => write!(f, "{} PRECEDING", offset),
            FrameBound::CurrentRow => f.write_str("CURRENT ROW"),
            FrameBound::Following(offset) => write!(f, "{} FOLLOWING", offset),
            FrameBound::UnboundedFollowing => f.write_str("UNBOUNDED FOLLOWING"),
        }
    }
}

impl Display for Limit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "LIMIT {}", self.limit)?;
        if let Some(offset) = &self.offset {
            write!(f, " OFFSET {}", offset)?;
        }
        Ok(())
    }
}

impl Display for Insert {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        with_prefix(f, &self.with)?;
        f.write_str("INSERT")?;
        if let Some(action) = self.or_action {
            write!(f, " OR {}", conflict_action(action))?;
        }
        write!(f, " INTO {}", self.table)?;
        if !self.columns.is_empty() {
            ident_list(f, &self.columns)?;
        }
        match &self.source {
            InsertSource::Values(rows) => {
                f.write_char(' ')?;
                value_rows(f, rows)?;
            }
            InsertSource::Select(select) => write!(f, " {}", select)?,
            InsertSource::DefaultValues => f.write_str(" DEFAULT VALUES")?,
        }
        for upsert in &self.upsert {
            write!(f, " {}", upsert)?;
        }
        tail_clauses(f, &None, &self.returning, &[], &None)
    }
}

impl Display for Upsert {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("ON CONFLICT")?;
        if let Some(target) = &self.target {
            f.write_char('(')?;
            comma_list(f, &target.columns)?;
            f.write_char(')')?;
            if let Some(filter) = &target.filter {
                write!(f, " WHERE {}", filter)?;
            }
        }
        match &self.action {
            UpsertAction::Nothing => f.write_str(" DO NOTHING"),
            UpsertAction::Update {
                assignments: values,
                filter,
            } => {
                f.write_str(" DO UPDATE SET ")?;
                assignments(f, values)?;
                if let Some(filter) = filter {
                    write!(f, " WHERE {}", filter)?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Update {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        with_prefix(f, &self.with)?;
        f.write_str("UPDATE")?;
        if let Some(action) = self.or_action {
            write!(f, " OR {}", conflict_action(action))?;
        }
        write!(f, " {}", self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", Ident(alias))?;
        }
        indexed_by(f, &self.indexed)?;
        f.write_str(" SET ")?;
        assignments(f, &self.assignments)?;
        tail_clauses(
            f,
            &self.filter,
            &self.returning,
            &self.order_by,
            &self.limit,
        )
    }
}

impl Display for Delete {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        with_prefix(f, &self.with)?;
        write!(f, "DELETE FROM {}", self.table)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", Ident(alias))?;
        }
        indexed_by(f, &self.indexed)?;
        tail_clauses(
            f,
            &self.filter,
            &self.returning,
            &self.order_by,
            &self.limit,
        )
    }
}

impl Display for CreateTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("CREATE ")?;
        if self.temporary {
            f.write_str("TEMP ")?;
        }
        f.write_str("TABLE ")?;
        if self.if_not_exists {
            f.write_str("IF NOT EXISTS ")?;
        }
        write!(f, "{} {}", self.table, self.body)
    }
}

impl Display for DropTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("DROP TABLE ")?;
        if self.if_exists {
            f.write_str("IF EXISTS ")?;
        }
        write!(f, "{}", self.table)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Numeric(value) => f.write_str(value),
            Literal::String(value) => f.write_str(&quote_string(value)),
            Literal::Blob(hex) => write!(f, "X'{}'", hex),
            Literal::Null => f.write_str("NULL"),
            Literal::CurrentTime => f.write_str("CURRENT_TIME"),
            Literal::CurrentDate => f.write_str("CURRENT_DATE"),
            Literal::CurrentTimestamp => f.write_str("CURRENT_TIMESTAMP"),
        }
    }
}

/// Parameters always print in numbered form so indices survive rewriting.
impl Display for BindParameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.index)
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", Ident(schema))?;
        }
        if let Some(table) = &self.table {
            write!(f, "{}.", Ident(table))?;
        }
        write!(f, "{}", Ident(&self.column))
    }
}

impl BinaryOperator {
    fn as_str(self) -> &'static str {
        match self {
            BinaryOperator::Concat => "||",
            BinaryOperator::Extract => "->",
            BinaryOperator::ExtractText => "->>",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::ShiftLeft => "<<",
            BinaryOperator::ShiftRight => ">>",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEq => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEq => ">=",
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Is => "IS",
            BinaryOperator::IsNot => "IS NOT",
            BinaryOperator::IsDistinctFrom => "IS DISTINCT FROM",
            BinaryOperator::IsNotDistinctFrom => "IS NOT DISTINCT FROM",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Equal
            | BinaryOperator::NotEqual
            | BinaryOperator::Is
            | BinaryOperator::IsNot
            | BinaryOperator::IsDistinctFrom
            | BinaryOperator::IsNotDistinctFrom => 4,
            BinaryOperator::Less
            | BinaryOperator::LessEq
            | BinaryOperator::Greater
            | BinaryOperator::GreaterEq => 5,
            BinaryOperator::ShiftLeft
            | BinaryOperator::ShiftRight
            | BinaryOperator::BitAnd
            | BinaryOperator::BitOr => 6,
            BinaryOperator::Add | BinaryOperator::Subtract => 7,
            BinaryOperator::Multiply | BinaryOperator::Divide | BinaryOperator::Modulo => 8,
            BinaryOperator::Concat | BinaryOperator::Extract | BinaryOperator::ExtractText => 9,
        }
    }
}

const PREC_NOT: u8 = 3;
const PREC_EQUALITY: u8 = 4;
const PREC_COMPARISON: u8 = 5;
const PREC_UNARY: u8 = 10;
const PREC_COLLATE: u8 = 11;
const PREC_PRIMARY: u8 = 12;

impl Expr {
    /// Binding strength of the expression's outermost operator.
    fn precedence(&self) -> u8 {
        match self {
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary {
                op: UnaryOperator::Not,
                ..
            } => PREC_NOT,
            Expr::Unary { .. } => PREC_UNARY,
            Expr::Pattern { .. }
            | Expr::IsNull { .. }
            | Expr::Between { .. }
            | Expr::InList { .. }
            | Expr::InSelect { .. }
            | Expr::InTable { .. } => PREC_EQUALITY,
            Expr::Collate { .. } => PREC_COLLATE,
            _ => PREC_PRIMARY,
        }
    }
}

/// Write `expr`, parenthesized if it binds weaker than `min`.
fn operand(f: &mut Formatter<'_>, expr: &Expr, min: u8) -> fmt::Result {
    if expr.precedence() < min {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

fn not(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => literal.fmt(f),
            Expr::Parameter(parameter) => parameter.fmt(f),
            Expr::Column(column) => column.fmt(f),
            Expr::Unary { op, expr } => match op {
                UnaryOperator::Not => {
                    f.write_str("NOT ")?;
                    operand(f, expr, PREC_NOT)
                }
                UnaryOperator::Negative | UnaryOperator::Positive | UnaryOperator::BitNot => {
                    let symbol = match op {
                        UnaryOperator::Negative => '-',
                        UnaryOperator::Positive => '+',
                        _ => '~',
                    };
                    let mut inner = String::new();
                    if expr.precedence() < PREC_UNARY {
                        write!(inner, "({})", expr)?;
                    } else {
                        write!(inner, "{}", expr)?;
                    }
                    // `--` would start a comment.
                    if inner.starts_with('-') || inner.starts_with('+') {
                        write!(f, "{} {}", symbol, inner)
                    } else {
                        write!(f, "{}{}", symbol, inner)
                    }
                }
            },
            Expr::Binary { left, op, right } => {
                let precedence = op.precedence();
                operand(f, left, precedence)?;
                write!(f, " {} ", op.as_str())?;
                operand(f, right, precedence + 1)
            }
            Expr::Function {
                name,
                distinct,
                args,
                filter,
                over,
            } => {
                write!(f, "{}(", name)?;
                match args {
                    FunctionArgs::Star => f.write_char('*')?,
                    FunctionArgs::List(args) => {
                        if *distinct {
                            f.write_str("DISTINCT ")?;
                        }
                        comma_list(f, args)?;
                    }
                }
                f.write_char(')')?;
                if let Some(filter) = filter {
                    write!(f, " FILTER (WHERE {})", filter)?;
                }
                match over {
                    Some(Over::Named(window)) => write!(f, " OVER {}", Ident(window)),
                    Some(Over::Spec(spec)) => write!(f, " OVER {}", spec),
                    None => Ok(()),
                }
            }
            Expr::Cast { expr, type_name } => write!(f, "CAST({} AS {})", expr, type_name),
            Expr::Collate { expr, collation } => {
                operand(f, expr, PREC_COLLATE)?;
                write!(f, " COLLATE {}", Ident(collation))
            }
            Expr::Pattern {
                expr,
                negated,
                op,
                pattern,
                escape,
            } => {
                operand(f, expr, PREC_EQUALITY)?;
                let op = match op {
                    PatternOperator::Like => "LIKE",
                    PatternOperator::Glob => "GLOB",
                    PatternOperator::Regexp => "REGEXP",
                    PatternOperator::Match => "MATCH",
                };
                write!(f, " {}{} ", not(*negated), op)?;
                operand(f, pattern, PREC_COMPARISON)?;
                if let Some(escape) = escape {
                    f.write_str(" ESCAPE ")?;
                    operand(f, escape, PREC_COMPARISON)?;
                }
                Ok(())
            }
            Expr::IsNull { expr, negated } => {
                operand(f, expr, PREC_EQUALITY)?;
                f.write_str(if *negated { " NOTNULL" } else { " ISNULL" })
            }
            Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                operand(f, expr, PREC_EQUALITY)?;
                write!(f, " {}BETWEEN ", not(*negated))?;
                operand(f, low, PREC_COMPARISON)?;
                f.write_str(" AND ")?;
                operand(f, high, PREC_COMPARISON)
            }
            Expr::InList {
                expr,
                negated,
                list,
            } => {
                operand(f, expr, PREC_EQUALITY)?;
                write!(f, " {}IN (", not(*negated))?;
                comma_list(f, list)?;
                f.write_char(')')
            }
            Expr::InSelect {
                expr,
                negated,
                select,
            } => {
                operand(f, expr, PREC_EQUALITY)?;
                write!(f, " {}IN ({})", not(*negated), select)
            }
            Expr::InTable {
                expr,
                negated,
                table,
            } => {
                operand(f, expr, PREC_EQUALITY)?;
                write!(f, " {}IN {}", not(*negated), table)
            }
            Expr::Exists(select) => write!(f, "EXISTS ({})", select),
            Expr::Subquery(select) => write!(f, "({})", select),
            Expr::Case {
                operand: case_operand,
                branches,
                otherwise,
            } => {
                f.write_str("CASE")?;
                if let Some(case_operand) = case_operand {
                    write!(f, " {}", case_operand)?;
                }
                for (condition, result) in branches {
                    write!(f, " WHEN {} THEN {}", condition, result)?;
                }
                if let Some(otherwise) = otherwise {
                    write!(f, " ELSE {}", otherwise)?;
                }
                f.write_str(" END")
            }
            Expr::Nested(exprs) => {
                f.write_char('(')?;
                comma_list(f, exprs)?;
                f.write_char(')')
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn reprint(source: &str) -> String {
        parse(source).unwrap().to_string()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("orders"), "orders");
        assert_eq!(quote_ident("_c1"), "_c1");
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("Select"), "\"Select\"");
        assert_eq!(quote_ident("my col"), "\"my col\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("1abc"), "\"1abc\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn test_select_is_normalized() {
        assert_eq!(
            reprint("select a, b as c from main.t where a = 1 order by b desc limit 10 offset 5"),
            "SELECT a, b AS c FROM main.t WHERE a = 1 ORDER BY b DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(
            reprint("SELECT * FROM \"order\" o LEFT JOIN [x y] USING (id)"),
            "SELECT * FROM \"order\" AS o LEFT JOIN \"x y\" USING (id)"
        );
    }

    #[test]
    fn test_parameters_print_numbered() {
        assert_eq!(
            reprint("SELECT ?, :name, ?, :name FROM t"),
            "SELECT ?1, ?2, ?3, ?2 FROM t"
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            reprint("SELECT 'it''s', x'00ff', NULL, CURRENT_TIMESTAMP"),
            "SELECT 'it''s', X'00ff', NULL, CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_parenthesized_source_is_kept() {
        assert_eq!(
            reprint("SELECT (a + b) * c FROM t WHERE (a OR b) AND c"),
            "SELECT (a + b) * c FROM t WHERE (a OR b) AND c"
        );
    }

    #[test]
    fn test_built_trees_get_parentheses() {
        let or = Expr::binary(Expr::column("a"), BinaryOperator::Or, Expr::column("b"));
        let and = Expr::binary(or, BinaryOperator::And, Expr::column("c"));
        assert_eq!(and.to_string(), "(a OR b) AND c");

        let inner = Expr::binary(Expr::column("b"), BinaryOperator::Subtract, Expr::column("c"));
        let outer = Expr::binary(Expr::column("a"), BinaryOperator::Subtract, inner);
        assert_eq!(outer.to_string(), "a - (b - c)");

        let negative = Expr::Unary {
            op: UnaryOperator::Negative,
            expr: Box::new(Expr::Unary {
                op: UnaryOperator::Negative,
                expr: Box::new(Expr::integer(1)),
            }),
        };
        assert_eq!(negative.to_string(), "- -1");
    }

    #[test]
    fn test_write_statements() {
        assert_eq!(
            reprint("replace into t(a, \"b c\") values (1, ?)"),
            "INSERT OR REPLACE INTO t(a, \"b c\") VALUES (1, ?1)"
        );
        assert_eq!(
            reprint("UPDATE t SET a = a + 1, (b, c) = (1, 2) WHERE id IN (SELECT id FROM u) LIMIT 1"),
            "UPDATE t SET a = a + 1, (b, c) = (1, 2) WHERE id IN (SELECT id FROM u) LIMIT 1"
        );
        assert_eq!(
            reprint("delete from t as x where x.a not between 1 and 2"),
            "DELETE FROM t AS x WHERE x.a NOT BETWEEN 1 AND 2"
        );
        assert_eq!(reprint("DROP TABLE IF EXISTS t"), "DROP TABLE IF EXISTS t");
        assert_eq!(
            reprint("CREATE TABLE t(a INTEGER PRIMARY KEY)"),
            "CREATE TABLE t (a INTEGER PRIMARY KEY)"
        );
    }

    #[test]
    fn test_newer_statement_forms() {
        assert_eq!(
            reprint("with recursive n(i) as (select 1 union all select i + 1 from n where i < 3) select i from n"),
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 3) SELECT i FROM n"
        );
        assert_eq!(
            reprint("WITH x AS MATERIALIZED (SELECT 1) UPDATE t INDEXED BY t_a SET a = 1 WHERE a IN x RETURNING a, b"),
            "WITH x AS MATERIALIZED (SELECT 1) UPDATE t INDEXED BY t_a SET a = 1 WHERE a IN x RETURNING a, b"
        );
        assert_eq!(
            reprint("insert into t(id) values (1) on conflict(id) do update set n = n + 1 where n < 9 on conflict do nothing returning *"),
            "INSERT INTO t(id) VALUES (1) ON CONFLICT(id) DO UPDATE SET n = n + 1 WHERE n < 9 ON CONFLICT DO NOTHING RETURNING *"
        );
        assert_eq!(
            reprint("DELETE FROM t AS x NOT INDEXED WHERE x.a IS NOT DISTINCT FROM 1"),
            "DELETE FROM t AS x NOT INDEXED WHERE x.a IS NOT DISTINCT FROM 1"
        );
        assert_eq!(
            reprint("select value from json_each(?) j full outer join u using (value)"),
            "SELECT value FROM json_each(?1) AS j FULL OUTER JOIN u USING (value)"
        );
    }

    #[test]
    fn test_window_forms() {
        assert_eq!(
            reprint(
                "SELECT sum(a) FILTER (WHERE a > 0) OVER (PARTITION BY b ORDER BY c ROWS BETWEEN 1 PRECEDING AND UNBOUNDED FOLLOWING EXCLUDE TIES), rank() OVER w FROM t WINDOW w AS (w0 ORDER BY c)"
            ),
            "SELECT sum(a) FILTER (WHERE a > 0) OVER (PARTITION BY b ORDER BY c ROWS BETWEEN 1 PRECEDING AND UNBOUNDED FOLLOWING EXCLUDE TIES), rank() OVER w FROM t WINDOW w AS (w0 ORDER BY c)"
        );
    }

    #[test]
    fn test_expression_forms() {
        assert_eq!(
            reprint(
                "SELECT CASE WHEN a ISNULL THEN 1 ELSE 2 END, count(DISTINCT b), count(*), c COLLATE NOCASE, CAST(d AS TEXT), EXISTS (SELECT 1), e IN f FROM t"
            ),
            "SELECT CASE WHEN a ISNULL THEN 1 ELSE 2 END, count(DISTINCT b), count(*), c COLLATE NOCASE, CAST(d AS TEXT), EXISTS (SELECT 1), e IN f FROM t"
        );
    }
}
