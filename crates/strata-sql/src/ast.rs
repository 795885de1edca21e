//! Abstract syntax tree for SQLite statements.
//!
//! Every node is an owned value; rewriting produces a new tree instead of
//! mutating a shared one.

/// A top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `SELECT ...` or `VALUES ...`.
    Select(Select),
    /// `INSERT ...` or `REPLACE ...`.
    Insert(Insert),
    /// `UPDATE ...`.
    Update(Update),
    /// `DELETE FROM ...`.
    Delete(Delete),
    /// `CREATE [TEMP] TABLE ...`, body kept verbatim.
    CreateTable(CreateTable),
    /// `DROP TABLE ...`.
    DropTable(DropTable),
    /// Any other statement, kept as its original text.
    Other(String),
}

impl Statement {
    /// Short name of the statement kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::CreateTable(_) => "create table",
            Statement::DropTable(_) => "drop table",
            Statement::Other(_) => "other",
        }
    }
}

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

impl QualifiedName {
    /// An unqualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// A name qualified by `schema`.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    /// Whether the name refers to the main schema, explicitly or implicitly.
    pub fn is_main(&self) -> bool {
        match &self.schema {
            None => true,
            Some(schema) => schema.eq_ignore_ascii_case("main"),
        }
    }
}

/// `WITH [RECURSIVE] name AS (...), ...` in front of a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub recursive: bool,
    pub tables: Vec<CommonTable>,
}

impl With {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|table| table.name.as_str())
    }
}

/// One common table expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonTable {
    pub name: String,
    pub columns: Vec<String>,
    /// `Some(true)` for `AS MATERIALIZED`, `Some(false)` for `AS NOT MATERIALIZED`.
    pub materialized: Option<bool>,
    pub select: Box<Select>,
}

/// A full select statement: one or more cores joined by compound operators.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub with: Option<With>,
    pub core: SelectCore,
    pub compound: Vec<(CompoundOperator, SelectCore)>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Limit>,
}

impl Select {
    /// `SELECT <columns> FROM <table>`.
    pub fn from_table(columns: Vec<ResultColumn>, table: TableOrSubquery) -> Self {
        Self {
            with: None,
            core: SelectCore::Query(QueryCore {
                distinct: false,
                columns,
                from: Some(FromClause {
                    first: table,
                    joins: Vec::new(),
                }),
                filter: None,
                group_by: Vec::new(),
                having: None,
                windows: Vec::new(),
            }),
            compound: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Set the `WHERE` clause of the first core.
    pub fn with_filter(mut self, filter: Option<Expr>) -> Self {
        if let SelectCore::Query(core) = &mut self.core {
            core.filter = filter;
        }
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderingTerm>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: Option<Limit>) -> Self {
        self.limit = limit;
        self
    }
}

/// Compound select operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

/// One `SELECT` or `VALUES` body.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectCore {
    Query(QueryCore),
    Values(Vec<Vec<Expr>>),
}

/// `SELECT [DISTINCT] columns [FROM ...] [WHERE ...] [GROUP BY ...] [HAVING ...] [WINDOW ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCore {
    pub distinct: bool,
    pub columns: Vec<ResultColumn>,
    pub from: Option<FromClause>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    /// Named windows of the `WINDOW` clause.
    pub windows: Vec<(String, WindowSpec)>,
}

/// A result column of a select core.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultColumn {
    /// `*`.
    Star,
    /// `table.*`.
    TableStar(String),
    /// `expr [AS alias]`.
    Expr { expr: Expr, alias: Option<String> },
}

/// The `FROM` clause: a first item followed by joins.
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub first: TableOrSubquery,
    pub joins: Vec<Join>,
}

impl FromClause {
    /// All items in source order.
    pub fn items(&self) -> impl Iterator<Item = &TableOrSubquery> {
        std::iter::once(&self.first).chain(self.joins.iter().map(|join| &join.table))
    }
}

/// An item in a `FROM` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum TableOrSubquery {
    Table {
        name: QualifiedName,
        alias: Option<String>,
        indexed: Option<IndexedBy>,
    },
    Subquery {
        select: Box<Select>,
        alias: Option<String>,
    },
    /// A table-valued function such as `json_each(...)`.
    Function {
        name: QualifiedName,
        args: Vec<Expr>,
        alias: Option<String>,
    },
}

impl TableOrSubquery {
    /// A table without alias.
    pub fn table(name: QualifiedName) -> Self {
        TableOrSubquery::Table {
            name,
            alias: None,
            indexed: None,
        }
    }

    /// The name columns of this item are qualified with, if any.
    pub fn visible_name(&self) -> Option<&str> {
        match self {
            TableOrSubquery::Table { name, alias, .. }
            | TableOrSubquery::Function { name, alias, .. } => {
                Some(alias.as_deref().unwrap_or(name.name.as_str()))
            }
            TableOrSubquery::Subquery { alias, .. } => alias.as_deref(),
        }
    }
}

/// `INDEXED BY index` or `NOT INDEXED` after a table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedBy {
    Index(String),
    NotIndexed,
}

/// A join to the previous `FROM` items.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub operator: JoinOperator,
    pub table: TableOrSubquery,
    pub constraint: Option<JoinConstraint>,
}

/// How a join item is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOperator {
    /// `,`.
    Comma,
    /// `[NATURAL] <kind> JOIN`.
    Join { natural: bool, kind: JoinKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Plain,
    Inner,
    Left,
    LeftOuter,
    Right,
    RightOuter,
    Full,
    FullOuter,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinConstraint {
    On(Expr),
    Using(Vec<String>),
}

/// A term of an `ORDER BY` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub direction: Option<SortDirection>,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

/// `OVER` clause of a window function call.
#[derive(Debug, Clone, PartialEq)]
pub enum Over {
    /// `OVER name`.
    Named(String),
    /// `OVER (...)`.
    Spec(WindowSpec),
}

/// `[base] [PARTITION BY ...] [ORDER BY ...] [frame]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowSpec {
    pub base: Option<String>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderingTerm>,
    pub frame: Option<Frame>,
}

/// `RANGE|ROWS|GROUPS BETWEEN start AND end [EXCLUDE ...]`, or the
/// single-bound form when `end` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub unit: FrameUnit,
    pub start: FrameBound,
    pub end: Option<FrameBound>,
    pub exclude: Option<FrameExclude>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnit {
    Range,
    Rows,
    Groups,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(Box<Expr>),
    CurrentRow,
    Following(Box<Expr>),
    UnboundedFollowing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExclude {
    NoOthers,
    CurrentRow,
    Group,
    Ties,
}

/// `LIMIT expr [OFFSET expr]`. `LIMIT a, b` parses as offset `a`, limit `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub limit: Expr,
    pub offset: Option<Expr>,
}

/// Conflict resolution of `INSERT OR ...` / `UPDATE OR ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    Rollback,
    Abort,
    Replace,
    Fail,
    Ignore,
}

/// `INSERT [OR action] INTO table [(columns)] source [upsert] [RETURNING ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub with: Option<With>,
    /// `REPLACE INTO` parses as `Some(ConflictAction::Replace)`.
    pub or_action: Option<ConflictAction>,
    pub table: QualifiedName,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub upsert: Vec<Upsert>,
    pub returning: Vec<ResultColumn>,
}

/// `ON CONFLICT [(target) [WHERE ...]] DO NOTHING | DO UPDATE ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    pub target: Option<ConflictTarget>,
    pub action: UpsertAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictTarget {
    pub columns: Vec<OrderingTerm>,
    pub filter: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertAction {
    Nothing,
    Update {
        assignments: Vec<Assignment>,
        filter: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<Select>),
    DefaultValues,
}

/// `UPDATE [OR action] table [AS alias] SET ... [WHERE ...] [RETURNING ...] [ORDER BY ...] [LIMIT ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub with: Option<With>,
    pub or_action: Option<ConflictAction>,
    pub table: QualifiedName,
    pub alias: Option<String>,
    pub indexed: Option<IndexedBy>,
    pub assignments: Vec<Assignment>,
    pub filter: Option<Expr>,
    pub returning: Vec<ResultColumn>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Limit>,
}

/// `column = expr` or `(a, b) = expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub columns: Vec<String>,
    pub value: Expr,
}

/// `DELETE FROM table [AS alias] [WHERE ...] [RETURNING ...] [ORDER BY ...] [LIMIT ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub with: Option<With>,
    pub table: QualifiedName,
    pub alias: Option<String>,
    pub indexed: Option<IndexedBy>,
    pub filter: Option<Expr>,
    pub returning: Vec<ResultColumn>,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Limit>,
}

impl Delete {
    /// `DELETE FROM table`.
    pub fn all(table: QualifiedName) -> Self {
        Self {
            with: None,
            table,
            alias: None,
            indexed: None,
            filter: None,
            returning: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }
}

/// `CREATE [TEMP] TABLE [IF NOT EXISTS] name <body>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub temporary: bool,
    pub if_not_exists: bool,
    pub table: QualifiedName,
    /// Column definitions, constraints and options, as written.
    pub body: String,
}

/// `DROP TABLE [IF EXISTS] name`.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub if_exists: bool,
    pub table: QualifiedName,
}

/// A literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Integer, real or hex literal, as written.
    Numeric(String),
    String(String),
    /// Hex digits of an `X'..'` literal.
    Blob(String),
    Null,
    CurrentTime,
    CurrentDate,
    CurrentTimestamp,
}

/// A bind parameter with its resolved 1-based index.
///
/// Anonymous `?` parameters are numbered at parse time and named parameters
/// keep their name so callers can look the index up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindParameter {
    pub index: u32,
    pub name: Option<String>,
}

impl BindParameter {
    pub fn indexed(index: u32) -> Self {
        Self { index, name: None }
    }
}

/// A column reference, optionally qualified.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: None,
            column: column.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            schema: None,
            table: Some(table.into()),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negative,
    Positive,
    BitNot,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Concat,
    Extract,
    ExtractText,
    Multiply,
    Divide,
    Modulo,
    Add,
    Subtract,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
    Is,
    IsNot,
    IsDistinctFrom,
    IsNotDistinctFrom,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOperator {
    Like,
    Glob,
    Regexp,
    Match,
}

/// Arguments of a function call.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArgs {
    /// `f(*)`.
    Star,
    List(Vec<Expr>),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Parameter(BindParameter),
    Column(ColumnRef),
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Function {
        name: String,
        distinct: bool,
        args: FunctionArgs,
        /// `FILTER (WHERE ...)` of an aggregate.
        filter: Option<Box<Expr>>,
        over: Option<Over>,
    },
    /// `CAST(expr AS type)`, type name as written.
    Cast {
        expr: Box<Expr>,
        type_name: String,
    },
    Collate {
        expr: Box<Expr>,
        collation: String,
    },
    /// `expr [NOT] LIKE|GLOB|REGEXP|MATCH pattern [ESCAPE escape]`.
    Pattern {
        expr: Box<Expr>,
        negated: bool,
        op: PatternOperator,
        pattern: Box<Expr>,
        escape: Option<Box<Expr>>,
    },
    /// `expr ISNULL` / `expr NOTNULL` / `expr NOT NULL`.
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        negated: bool,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        negated: bool,
        list: Vec<Expr>,
    },
    InSelect {
        expr: Box<Expr>,
        negated: bool,
        select: Box<Select>,
    },
    /// `expr [NOT] IN table`.
    InTable {
        expr: Box<Expr>,
        negated: bool,
        table: QualifiedName,
    },
    Exists(Box<Select>),
    Subquery(Box<Select>),
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        otherwise: Option<Box<Expr>>,
    },
    /// A parenthesized expression or row value.
    Nested(Vec<Expr>),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::new(name))
    }

    pub fn rowid() -> Self {
        Expr::column("rowid")
    }

    pub fn parameter(index: u32) -> Self {
        Expr::Parameter(BindParameter::indexed(index))
    }

    pub fn integer(value: i64) -> Self {
        Expr::Literal(Literal::Numeric(value.to_string()))
    }

    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Self {
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            distinct: false,
            args: FunctionArgs::List(args),
            filter: None,
            over: None,
        }
    }

    pub fn in_select(expr: Expr, select: Select) -> Self {
        Expr::InSelect {
            expr: Box::new(expr),
            negated: false,
            select: Box::new(select),
        }
    }
}
