//! Recursive descent parser for SQLite statements.
//!
//! Expression precedence, lowest first: `OR`, `AND`, `NOT`, equality and
//! pattern predicates, comparisons, bitwise operators, additive,
//! multiplicative, concatenation / JSON extraction, unary operators and
//! `COLLATE`.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::Span;

/// Bind parameters seen while parsing a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Largest parameter index used by the statement.
    pub count: u32,
    /// Named parameters with the index they were assigned.
    pub named: Vec<(String, u32)>,
}

impl Parameters {
    /// Index assigned to a named parameter, including its prefix (`:id`).
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.named
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, index)| *index)
    }
}

/// Parser for one SQL statement.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
    parameters: Parameters,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
            parameters: Parameters::default(),
        }
    }

    /// Parameters collected so far.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Parse a complete statement, optionally terminated by `;`.
    pub fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let with = self.parse_with()?;
        let statement = match self.peek_kind() {
            Some(Token::Select) | Some(Token::Values) => Statement::Select(Select {
                with,
                ..self.parse_select()?
            }),
            Some(Token::Insert) | Some(Token::Replace) => Statement::Insert(Insert {
                with,
                ..self.parse_insert()?
            }),
            Some(Token::Update) => Statement::Update(Update {
                with,
                ..self.parse_update()?
            }),
            Some(Token::Delete) => Statement::Delete(Delete {
                with,
                ..self.parse_delete()?
            }),
            _ if with.is_some() => {
                return Err(self.error_at_next("expected SELECT, INSERT, UPDATE or DELETE after WITH"))
            }
            None => return Err(self.error_at_end("empty statement")),
            Some(Token::Create) => {
                return match self.parse_create_table()? {
                    Some(create) => Ok(Statement::CreateTable(create)),
                    None => Ok(Statement::Other(self.source.to_string())),
                }
            }
            Some(Token::Drop) => match self.parse_drop_table()? {
                Some(drop) => Statement::DropTable(drop),
                None => return Ok(Statement::Other(self.source.to_string())),
            },
            Some(_) => return Ok(Statement::Other(self.source.to_string())),
        };
        self.expect_end()?;
        Ok(statement)
    }

    /// Parse a select statement with compound parts, ORDER BY and LIMIT.
    fn parse_select(&mut self) -> Result<Select, ParseError> {
        let with = self.parse_with()?;
        let core = self.parse_select_core()?;

        let mut compound = Vec::new();
        loop {
            let op = match self.peek_kind() {
                Some(Token::Union) => {
                    self.next_token()?;
                    if self.eat(&Token::All) {
                        CompoundOperator::UnionAll
                    } else {
                        CompoundOperator::Union
                    }
                }
                Some(Token::Intersect) => {
                    self.next_token()?;
                    CompoundOperator::Intersect
                }
                Some(Token::Except) => {
                    self.next_token()?;
                    CompoundOperator::Except
                }
                _ => break,
            };
            compound.push((op, self.parse_select_core()?));
        }

        let order_by = self.parse_order_by()?;
        let limit = self.parse_limit()?;

        Ok(Select {
            with,
            core,
            compound,
            order_by,
            limit,
        })
    }

    /// Parse an optional `WITH [RECURSIVE] name [(columns)] AS [[NOT] MATERIALIZED] (select), ...`.
    fn parse_with(&mut self) -> Result<Option<With>, ParseError> {
        if !self.eat(&Token::With) {
            return Ok(None);
        }
        let recursive = self.eat(&Token::Recursive);

        let mut tables = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let columns = if self.peek_is(&Token::LParen) {
                self.parse_ident_list()?
            } else {
                Vec::new()
            };
            self.expect_token(Token::As)?;
            let materialized = if self.eat(&Token::Materialized) {
                Some(true)
            } else if self.eat(&Token::Not) {
                self.expect_token(Token::Materialized)?;
                Some(false)
            } else {
                None
            };
            self.expect_token(Token::LParen)?;
            let select = self.parse_select()?;
            self.expect_token(Token::RParen)?;
            tables.push(CommonTable {
                name,
                columns,
                materialized,
                select: Box::new(select),
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        Ok(Some(With { recursive, tables }))
    }

    fn parse_select_core(&mut self) -> Result<SelectCore, ParseError> {
        if self.eat(&Token::Values) {
            return Ok(SelectCore::Values(self.parse_value_rows()?));
        }
        self.expect_token(Token::Select)?;

        let distinct = if self.eat(&Token::Distinct) {
            true
        } else {
            self.eat(&Token::All);
            false
        };

        let columns = self.parse_result_columns()?;

        let from = if self.eat(&Token::From) {
            Some(self.parse_from()?)
        } else {
            None
        };
        let filter = self.parse_where()?;

        let group_by = if self.eat(&Token::Group) {
            self.expect_token(Token::By)?;
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        let having = if self.eat(&Token::Having) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let mut windows = Vec::new();
        if self.eat(&Token::Window) {
            loop {
                let name = self.expect_ident()?;
                self.expect_token(Token::As)?;
                windows.push((name, self.parse_window_spec()?));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }

        Ok(SelectCore::Query(QueryCore {
            distinct,
            columns,
            from,
            filter,
            group_by,
            having,
            windows,
        }))
    }

    fn parse_result_columns(&mut self) -> Result<Vec<ResultColumn>, ParseError> {
        let mut columns = vec![self.parse_result_column()?];
        while self.eat(&Token::Comma) {
            columns.push(self.parse_result_column()?);
        }
        Ok(columns)
    }

    fn parse_result_column(&mut self) -> Result<ResultColumn, ParseError> {
        if self.eat(&Token::Star) {
            return Ok(ResultColumn::Star);
        }

        let table_star = self.peek_is_ident()
            && matches!(self.lexer.peek_nth(1).map(|t| &t.token), Some(Token::Dot))
            && matches!(self.lexer.peek_nth(2).map(|t| &t.token), Some(Token::Star));
        if table_star {
            let table = self.expect_ident()?;
            self.expect_token(Token::Dot)?;
            self.expect_token(Token::Star)?;
            return Ok(ResultColumn::TableStar(table));
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_alias()?;
        Ok(ResultColumn::Expr { expr, alias })
    }

    /// Parse `[AS] alias`. Without `AS` only plain identifiers are accepted.
    fn parse_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.eat(&Token::As) {
            return match self.peek_kind() {
                Some(Token::String(value)) => {
                    self.next_token()?;
                    Ok(Some(value))
                }
                _ => Ok(Some(self.expect_ident()?)),
            };
        }
        match self.peek_kind() {
            Some(Token::Ident(name)) | Some(Token::QuotedIdent(name)) => {
                self.next_token()?;
                Ok(Some(name))
            }
            _ => Ok(None),
        }
    }

    fn parse_from(&mut self) -> Result<FromClause, ParseError> {
        let first = self.parse_table_or_subquery()?;
        let mut joins = Vec::new();

        loop {
            let operator = if self.eat(&Token::Comma) {
                JoinOperator::Comma
            } else if let Some(operator) = self.parse_join_operator()? {
                operator
            } else {
                break;
            };

            let table = self.parse_table_or_subquery()?;
            let constraint = if self.eat(&Token::On) {
                Some(JoinConstraint::On(self.parse_expr()?))
            } else if self.eat(&Token::Using) {
                Some(JoinConstraint::Using(self.parse_ident_list()?))
            } else {
                None
            };

            joins.push(Join {
                operator,
                table,
                constraint,
            });
        }

        Ok(FromClause { first, joins })
    }

    fn parse_join_operator(&mut self) -> Result<Option<JoinOperator>, ParseError> {
        let natural = self.eat(&Token::Natural);
        let kind = match self.peek_kind() {
            Some(Token::Left) => {
                self.next_token()?;
                if self.eat(&Token::Outer) {
                    JoinKind::LeftOuter
                } else {
                    JoinKind::Left
                }
            }
            Some(Token::Right) => {
                self.next_token()?;
                if self.eat(&Token::Outer) {
                    JoinKind::RightOuter
                } else {
                    JoinKind::Right
                }
            }
            Some(Token::Full) => {
                self.next_token()?;
                if self.eat(&Token::Outer) {
                    JoinKind::FullOuter
                } else {
                    JoinKind::Full
                }
            }
            Some(Token::Inner) => {
                self.next_token()?;
                JoinKind::Inner
            }
            Some(Token::Cross) => {
                self.next_token()?;
                JoinKind::Cross
            }
            Some(Token::Join) => JoinKind::Plain,
            _ if natural => {
                return Err(self.error_at_next("expected JOIN after NATURAL"));
            }
            _ => return Ok(None),
        };
        self.expect_token(Token::Join)?;
        Ok(Some(JoinOperator::Join { natural, kind }))
    }

    fn parse_table_or_subquery(&mut self) -> Result<TableOrSubquery, ParseError> {
        if self.eat(&Token::LParen) {
            if !matches!(
                self.peek_kind(),
                Some(Token::Select) | Some(Token::Values) | Some(Token::With)
            ) {
                return Err(self
                    .error_at_next("parenthesized joins are not supported")
                    .with_hint("join the tables without parentheses"));
            }
            let select = self.parse_select()?;
            self.expect_token(Token::RParen)?;
            let alias = self.parse_alias()?;
            return Ok(TableOrSubquery::Subquery {
                select: Box::new(select),
                alias,
            });
        }

        let name = self.parse_qualified_name()?;
        if self.eat(&Token::LParen) {
            let args = if self.peek_is(&Token::RParen) {
                Vec::new()
            } else {
                self.parse_expr_list()?
            };
            self.expect_token(Token::RParen)?;
            let alias = self.parse_alias()?;
            return Ok(TableOrSubquery::Function { name, args, alias });
        }
        let alias = self.parse_alias()?;
        let indexed = self.parse_indexed()?;
        Ok(TableOrSubquery::Table {
            name,
            alias,
            indexed,
        })
    }

    /// Parse `INDEXED BY index` or `NOT INDEXED`.
    fn parse_indexed(&mut self) -> Result<Option<IndexedBy>, ParseError> {
        if self.eat(&Token::Indexed) {
            self.expect_token(Token::By)?;
            return Ok(Some(IndexedBy::Index(self.expect_ident()?)));
        }
        let not_indexed = self.peek_is(&Token::Not)
            && matches!(self.lexer.peek_nth(1).map(|t| &t.token), Some(Token::Indexed));
        if not_indexed {
            self.next_token()?;
            self.next_token()?;
            return Ok(Some(IndexedBy::NotIndexed));
        }
        Ok(None)
    }

    fn parse_where(&mut self) -> Result<Option<Expr>, ParseError> {
        if self.eat(&Token::Where) {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_order_by(&mut self) -> Result<Vec<OrderingTerm>, ParseError> {
        if !self.eat(&Token::Order) {
            return Ok(Vec::new());
        }
        self.expect_token(Token::By)?;

        let mut terms = vec![self.parse_ordering_term()?];
        while self.eat(&Token::Comma) {
            terms.push(self.parse_ordering_term()?);
        }
        Ok(terms)
    }

    fn parse_ordering_term(&mut self) -> Result<OrderingTerm, ParseError> {
        let expr = self.parse_expr()?;
        let direction = if self.eat(&Token::Asc) {
            Some(SortDirection::Asc)
        } else if self.eat(&Token::Desc) {
            Some(SortDirection::Desc)
        } else {
            None
        };
        let nulls = if self.eat(&Token::Nulls) {
            let tok = self.next_token()?;
            match tok.token {
                Token::First => Some(NullsOrder::First),
                Token::Last => Some(NullsOrder::Last),
                other => {
                    return Err(ParseError::new(
                        format!("expected FIRST or LAST after NULLS, found {:?}", other),
                        tok.span,
                    ))
                }
            }
        } else {
            None
        };
        Ok(OrderingTerm {
            expr,
            direction,
            nulls,
        })
    }

    /// Parse `([base] [PARTITION BY ...] [ORDER BY ...] [frame])` after `OVER` or in a
    /// `WINDOW` clause.
    fn parse_window_spec(&mut self) -> Result<WindowSpec, ParseError> {
        self.expect_token(Token::LParen)?;
        let base = match self.peek_kind() {
            Some(Token::Ident(name)) | Some(Token::QuotedIdent(name)) => {
                self.next_token()?;
                Some(name)
            }
            _ => None,
        };
        let partition_by = if self.eat(&Token::Partition) {
            self.expect_token(Token::By)?;
            self.parse_expr_list()?
        } else {
            Vec::new()
        };
        let order_by = self.parse_order_by()?;
        let frame = self.parse_frame()?;
        self.expect_token(Token::RParen)?;
        Ok(WindowSpec {
            base,
            partition_by,
            order_by,
            frame,
        })
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, ParseError> {
        let unit = match self.peek_kind() {
            Some(Token::Range) => FrameUnit::Range,
            Some(Token::Rows) => FrameUnit::Rows,
            Some(Token::Groups) => FrameUnit::Groups,
            _ => return Ok(None),
        };
        self.next_token()?;

        let (start, end) = if self.eat(&Token::Between) {
            let start = self.parse_frame_bound()?;
            self.expect_token(Token::And)?;
            (start, Some(self.parse_frame_bound()?))
        } else {
            (self.parse_frame_bound()?, None)
        };

        let exclude = if self.eat(&Token::Exclude) {
            let tok = self.next_token()?;
            Some(match tok.token {
                Token::No => {
                    self.expect_token(Token::Others)?;
                    FrameExclude::NoOthers
                }
                Token::Current => {
                    self.expect_token(Token::Row)?;
                    FrameExclude::CurrentRow
                }
                Token::Group => FrameExclude::Group,
                Token::Ties => FrameExclude::Ties,
                other => {
                    return Err(ParseError::new(
                        format!("expected NO OTHERS, CURRENT ROW, GROUP or TIES, found {:?}", other),
                        tok.span,
                    ))
                }
            })
        } else {
            None
        };

        Ok(Some(Frame {
            unit,
            start,
            end,
            exclude,
        }))
    }

    fn parse_frame_bound(&mut self) -> Result<FrameBound, ParseError> {
        if self.eat(&Token::Current) {
            self.expect_token(Token::Row)?;
            return Ok(FrameBound::CurrentRow);
        }
        let unbounded = self.eat(&Token::Unbounded);
        let offset = if unbounded {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        let tok = self.next_token()?;
        match (tok.token, offset) {
            (Token::Preceding, None) => Ok(FrameBound::UnboundedPreceding),
            (Token::Following, None) => Ok(FrameBound::UnboundedFollowing),
            (Token::Preceding, Some(offset)) => Ok(FrameBound::Preceding(offset)),
            (Token::Following, Some(offset)) => Ok(FrameBound::Following(offset)),
            (other, _) => Err(ParseError::new(
                format!("expected PRECEDING or FOLLOWING, found {:?}", other),
                tok.span,
            )),
        }
    }

    fn parse_limit(&mut self) -> Result<Option<Limit>, ParseError> {
        if !self.eat(&Token::Limit) {
            return Ok(None);
        }
        let first = self.parse_expr()?;
        if self.eat(&Token::Offset) {
            Ok(Some(Limit {
                limit: first,
                offset: Some(self.parse_expr()?),
            }))
        } else if self.eat(&Token::Comma) {
            Ok(Some(Limit {
                limit: self.parse_expr()?,
                offset: Some(first),
            }))
        } else {
            Ok(Some(Limit {
                limit: first,
                offset: None,
            }))
        }
    }

    fn parse_insert(&mut self) -> Result<Insert, ParseError> {
        let or_action = if self.eat(&Token::Replace) {
            Some(ConflictAction::Replace)
        } else {
            self.expect_token(Token::Insert)?;
            self.parse_or_action()?
        };
        self.expect_token(Token::Into)?;
        let table = self.parse_qualified_name()?;

        if self.peek_is(&Token::As) {
            return Err(self.error_at_next("INSERT target aliases are not supported"));
        }

        let columns = if self.peek_is(&Token::LParen) {
            self.parse_ident_list()?
        } else {
            Vec::new()
        };

        let source = match self.peek_kind() {
            Some(Token::Default) => {
                self.next_token()?;
                self.expect_token(Token::Values)?;
                InsertSource::DefaultValues
            }
            Some(Token::Values) => {
                self.next_token()?;
                InsertSource::Values(self.parse_value_rows()?)
            }
            Some(Token::Select) | Some(Token::With) => {
                InsertSource::Select(Box::new(self.parse_select()?))
            }
            _ => return Err(self.error_at_next("expected VALUES, SELECT or DEFAULT VALUES")),
        };

        let mut upsert = Vec::new();
        while self.peek_is(&Token::On) {
            upsert.push(self.parse_upsert()?);
        }
        let returning = self.parse_returning()?;

        Ok(Insert {
            with: None,
            or_action,
            table,
            columns,
            source,
            upsert,
            returning,
        })
    }

    fn parse_upsert(&mut self) -> Result<Upsert, ParseError> {
        self.expect_token(Token::On)?;
        self.expect_token(Token::Conflict)?;
        let target = if self.eat(&Token::LParen) {
            let mut columns = vec![self.parse_ordering_term()?];
            while self.eat(&Token::Comma) {
                columns.push(self.parse_ordering_term()?);
            }
            self.expect_token(Token::RParen)?;
            let filter = self.parse_where()?;
            Some(ConflictTarget { columns, filter })
        } else {
            None
        };

        self.expect_token(Token::Do)?;
        let action = if self.eat(&Token::Nothing) {
            UpsertAction::Nothing
        } else {
            self.expect_token(Token::Update)?;
            self.expect_token(Token::Set)?;
            let assignments = self.parse_assignments()?;
            let filter = self.parse_where()?;
            UpsertAction::Update {
                assignments,
                filter,
            }
        };
        Ok(Upsert { target, action })
    }

    fn parse_returning(&mut self) -> Result<Vec<ResultColumn>, ParseError> {
        if self.eat(&Token::Returning) {
            self.parse_result_columns()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_assignments(&mut self) -> Result<Vec<Assignment>, ParseError> {
        let mut assignments = Vec::new();
        loop {
            let columns = if self.peek_is(&Token::LParen) {
                self.parse_ident_list()?
            } else {
                vec![self.expect_ident()?]
            };
            self.expect_token(Token::Eq)?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { columns, value });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(assignments)
    }

    fn parse_update(&mut self) -> Result<Update, ParseError> {
        self.expect_token(Token::Update)?;
        let or_action = self.parse_or_action()?;
        let table = self.parse_qualified_name()?;
        let alias = self.parse_target_alias()?;
        let indexed = self.parse_indexed()?;
        self.expect_token(Token::Set)?;
        let assignments = self.parse_assignments()?;

        if self.peek_is(&Token::From) {
            return Err(self.error_at_next("UPDATE ... FROM is not supported"));
        }

        let filter = self.parse_where()?;
        let returning = self.parse_returning()?;
        let order_by = self.parse_order_by()?;
        let limit = self.parse_limit()?;

        Ok(Update {
            with: None,
            or_action,
            table,
            alias,
            indexed,
            assignments,
            filter,
            returning,
            order_by,
            limit,
        })
    }

    fn parse_delete(&mut self) -> Result<Delete, ParseError> {
        self.expect_token(Token::Delete)?;
        self.expect_token(Token::From)?;
        let table = self.parse_qualified_name()?;
        let alias = self.parse_target_alias()?;
        let indexed = self.parse_indexed()?;
        let filter = self.parse_where()?;
        let returning = self.parse_returning()?;
        let order_by = self.parse_order_by()?;
        let limit = self.parse_limit()?;

        Ok(Delete {
            with: None,
            table,
            alias,
            indexed,
            filter,
            returning,
            order_by,
            limit,
        })
    }

    /// UPDATE and DELETE targets only take an alias after `AS`.
    fn parse_target_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.eat(&Token::As) {
            Ok(Some(self.expect_ident()?))
        } else {
            Ok(None)
        }
    }

    fn parse_or_action(&mut self) -> Result<Option<ConflictAction>, ParseError> {
        if !self.eat(&Token::Or) {
            return Ok(None);
        }
        let tok = self.next_token()?;
        let action = match tok.token {
            Token::Rollback => ConflictAction::Rollback,
            Token::Abort => ConflictAction::Abort,
            Token::Replace => ConflictAction::Replace,
            Token::Fail => ConflictAction::Fail,
            Token::Ignore => ConflictAction::Ignore,
            other => {
                return Err(ParseError::new(
                    format!("expected conflict resolution after OR, found {:?}", other),
                    tok.span,
                ))
            }
        };
        Ok(Some(action))
    }

    /// Returns `None` when the statement is not a `CREATE TABLE`.
    fn parse_create_table(&mut self) -> Result<Option<CreateTable>, ParseError> {
        self.expect_token(Token::Create)?;
        let temporary = self.eat(&Token::Temp) || self.eat(&Token::Temporary);
        if !self.eat(&Token::Table) {
            return Ok(None);
        }

        let if_not_exists = if self.eat(&Token::If) {
            self.expect_token(Token::Not)?;
            self.expect_token(Token::Exists)?;
            true
        } else {
            false
        };
        let table = self.parse_qualified_name()?;

        let start = match self.lexer.peek() {
            Some(tok) => tok.span.start,
            None => return Err(self.error_at_end("expected table definition")),
        };
        let body = self.source[start..]
            .trim_end()
            .trim_end_matches(';')
            .trim_end()
            .to_string();

        Ok(Some(CreateTable {
            temporary,
            if_not_exists,
            table,
            body,
        }))
    }

    /// Returns `None` when the statement drops something other than a table.
    fn parse_drop_table(&mut self) -> Result<Option<DropTable>, ParseError> {
        self.expect_token(Token::Drop)?;
        if !self.eat(&Token::Table) {
            return Ok(None);
        }
        let if_exists = if self.eat(&Token::If) {
            self.expect_token(Token::Exists)?;
            true
        } else {
            false
        };
        let table = self.parse_qualified_name()?;
        Ok(Some(DropTable { if_exists, table }))
    }

    fn parse_value_rows(&mut self) -> Result<Vec<Vec<Expr>>, ParseError> {
        let mut rows = Vec::new();
        loop {
            self.expect_token(Token::LParen)?;
            rows.push(self.parse_expr_list()?);
            self.expect_token(Token::RParen)?;
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(rows)
    }

    fn parse_qualified_name(&mut self) -> Result<QualifiedName, ParseError> {
        let first = self.expect_ident()?;
        if self.eat(&Token::Dot) {
            let name = self.expect_ident()?;
            Ok(QualifiedName::with_schema(first, name))
        } else {
            Ok(QualifiedName::new(first))
        }
    }

    /// Parse `(ident, ...)`.
    fn parse_ident_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect_token(Token::LParen)?;
        let mut names = vec![self.expect_ident()?];
        while self.eat(&Token::Comma) {
            names.push(self.expect_ident()?);
        }
        self.expect_token(Token::RParen)?;
        Ok(names)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }

    /// Parse an expression.
    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::binary(left, BinaryOperator::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            let expr = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_equality()
    }

    /// Equality operators and the postfix predicates sharing their precedence.
    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;

        loop {
            left = match self.peek_kind() {
                Some(Token::Eq) | Some(Token::EqEq) => {
                    self.next_token()?;
                    let right = self.parse_comparison()?;
                    Expr::binary(left, BinaryOperator::Equal, right)
                }
                Some(Token::Ne) | Some(Token::LtGt) => {
                    self.next_token()?;
                    let right = self.parse_comparison()?;
                    Expr::binary(left, BinaryOperator::NotEqual, right)
                }
                Some(Token::Is) => {
                    self.next_token()?;
                    let negated = self.eat(&Token::Not);
                    let op = if self.eat(&Token::Distinct) {
                        self.expect_token(Token::From)?;
                        if negated {
                            BinaryOperator::IsNotDistinctFrom
                        } else {
                            BinaryOperator::IsDistinctFrom
                        }
                    } else if negated {
                        BinaryOperator::IsNot
                    } else {
                        BinaryOperator::Is
                    };
                    let right = self.parse_comparison()?;
                    Expr::binary(left, op, right)
                }
                Some(Token::IsNull) => {
                    self.next_token()?;
                    Expr::IsNull {
                        expr: Box::new(left),
                        negated: false,
                    }
                }
                Some(Token::NotNull) => {
                    self.next_token()?;
                    Expr::IsNull {
                        expr: Box::new(left),
                        negated: true,
                    }
                }
                Some(Token::Not) => {
                    let follower = self.lexer.peek_nth(1).map(|t| t.token.clone());
                    match follower {
                        Some(Token::Null) => {
                            self.next_token()?;
                            self.next_token()?;
                            Expr::IsNull {
                                expr: Box::new(left),
                                negated: true,
                            }
                        }
                        Some(Token::In)
                        | Some(Token::Like)
                        | Some(Token::Glob)
                        | Some(Token::Regexp)
                        | Some(Token::Match)
                        | Some(Token::Between) => {
                            self.next_token()?;
                            self.parse_predicate(left, true)?
                        }
                        _ => break,
                    }
                }
                Some(Token::In)
                | Some(Token::Like)
                | Some(Token::Glob)
                | Some(Token::Regexp)
                | Some(Token::Match)
                | Some(Token::Between) => self.parse_predicate(left, false)?,
                _ => break,
            };
        }

        Ok(left)
    }

    /// Parse `IN`, pattern and `BETWEEN` predicates after their left operand.
    fn parse_predicate(&mut self, left: Expr, negated: bool) -> Result<Expr, ParseError> {
        let tok = self.next_token()?;
        let expr = Box::new(left);
        match tok.token {
            Token::In => {
                if !self.eat(&Token::LParen) {
                    let table = self.parse_qualified_name()?;
                    return Ok(Expr::InTable {
                        expr,
                        negated,
                        table,
                    });
                }
                if matches!(
                    self.peek_kind(),
                    Some(Token::Select) | Some(Token::Values) | Some(Token::With)
                ) {
                    let select = self.parse_select()?;
                    self.expect_token(Token::RParen)?;
                    return Ok(Expr::InSelect {
                        expr,
                        negated,
                        select: Box::new(select),
                    });
                }
                let list = if self.peek_is(&Token::RParen) {
                    Vec::new()
                } else {
                    self.parse_expr_list()?
                };
                self.expect_token(Token::RParen)?;
                Ok(Expr::InList {
                    expr,
                    negated,
                    list,
                })
            }
            Token::Like | Token::Glob | Token::Regexp | Token::Match => {
                let op = match tok.token {
                    Token::Like => PatternOperator::Like,
                    Token::Glob => PatternOperator::Glob,
                    Token::Regexp => PatternOperator::Regexp,
                    _ => PatternOperator::Match,
                };
                let pattern = Box::new(self.parse_comparison()?);
                let escape = if self.eat(&Token::Escape) {
                    Some(Box::new(self.parse_comparison()?))
                } else {
                    None
                };
                Ok(Expr::Pattern {
                    expr,
                    negated,
                    op,
                    pattern,
                    escape,
                })
            }
            Token::Between => {
                let low = Box::new(self.parse_comparison()?);
                self.expect_token(Token::And)?;
                let high = Box::new(self.parse_comparison()?);
                Ok(Expr::Between {
                    expr,
                    negated,
                    low,
                    high,
                })
            }
            other => Err(ParseError::new(
                format!("expected IN, LIKE or BETWEEN, found {:?}", other),
                tok.span,
            )),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitwise()?;
        loop {
            let op = match self.peek_kind() {
                Some(Token::Lt) => BinaryOperator::Less,
                Some(Token::Le) => BinaryOperator::LessEq,
                Some(Token::Gt) => BinaryOperator::Greater,
                Some(Token::Ge) => BinaryOperator::GreaterEq,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_bitwise()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_bitwise(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(Token::ShiftLeft) => BinaryOperator::ShiftLeft,
                Some(Token::ShiftRight) => BinaryOperator::ShiftRight,
                Some(Token::Ampersand) => BinaryOperator::BitAnd,
                Some(Token::Pipe) => BinaryOperator::BitOr,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_additive()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(Token::Plus) => BinaryOperator::Add,
                Some(Token::Minus) => BinaryOperator::Subtract,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek_kind() {
                Some(Token::Star) => BinaryOperator::Multiply,
                Some(Token::Slash) => BinaryOperator::Divide,
                Some(Token::Percent) => BinaryOperator::Modulo,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_concat()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(Token::Concat) => BinaryOperator::Concat,
                Some(Token::Extract) => BinaryOperator::Extract,
                Some(Token::ExtractText) => BinaryOperator::ExtractText,
                _ => break,
            };
            self.next_token()?;
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(Token::Minus) => UnaryOperator::Negative,
            Some(Token::Plus) => UnaryOperator::Positive,
            Some(Token::Tilde) => UnaryOperator::BitNot,
            _ => return self.parse_collate(),
        };
        self.next_token()?;
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_collate(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.eat(&Token::Collate) {
            let collation = self.expect_ident()?;
            expr = Expr::Collate {
                expr: Box::new(expr),
                collation,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Numeric(value) => Ok(Expr::Literal(Literal::Numeric(value))),
            Token::String(value) => Ok(Expr::Literal(Literal::String(value))),
            Token::Blob(value) => Ok(Expr::Literal(Literal::Blob(value))),
            Token::Null => Ok(Expr::Literal(Literal::Null)),
            Token::CurrentTime => Ok(Expr::Literal(Literal::CurrentTime)),
            Token::CurrentDate => Ok(Expr::Literal(Literal::CurrentDate)),
            Token::CurrentTimestamp => Ok(Expr::Literal(Literal::CurrentTimestamp)),
            Token::Question => {
                self.parameters.count += 1;
                Ok(Expr::parameter(self.parameters.count))
            }
            Token::NumberedParameter(index) => {
                if index == 0 {
                    return Err(ParseError::new("parameter indices start at 1", tok.span));
                }
                self.parameters.count = self.parameters.count.max(index);
                Ok(Expr::parameter(index))
            }
            Token::NamedParameter(name) => {
                let index = match self.parameters.index_of(&name) {
                    Some(index) => index,
                    None => {
                        self.parameters.count += 1;
                        let index = self.parameters.count;
                        self.parameters.named.push((name.clone(), index));
                        index
                    }
                };
                Ok(Expr::Parameter(BindParameter {
                    index,
                    name: Some(name),
                }))
            }
            Token::LParen => {
                if matches!(
                    self.peek_kind(),
                    Some(Token::Select) | Some(Token::Values) | Some(Token::With)
                ) {
                    let select = self.parse_select()?;
                    self.expect_token(Token::RParen)?;
                    return Ok(Expr::Subquery(Box::new(select)));
                }
                let list = self.parse_expr_list()?;
                self.expect_token(Token::RParen)?;
                Ok(Expr::Nested(list))
            }
            Token::Exists => {
                self.expect_token(Token::LParen)?;
                let select = self.parse_select()?;
                self.expect_token(Token::RParen)?;
                Ok(Expr::Exists(Box::new(select)))
            }
            Token::Case => self.parse_case(),
            Token::Cast => self.parse_cast(),
            Token::Ident(name) | Token::QuotedIdent(name) => self.parse_name_expr(name),
            ref soft if soft.is_soft_keyword() => {
                let name = tok.span.slice(self.source).to_string();
                self.parse_name_expr(name)
            }
            other => Err(ParseError::new(
                format!("expected expression, found {:?}", other),
                tok.span,
            )),
        }
    }

    /// Parse a function call or a column reference starting with `name`.
    fn parse_name_expr(&mut self, name: String) -> Result<Expr, ParseError> {
        if self.eat(&Token::LParen) {
            let (distinct, args) = if self.eat(&Token::Star) {
                (false, FunctionArgs::Star)
            } else if self.peek_is(&Token::RParen) {
                (false, FunctionArgs::List(Vec::new()))
            } else {
                let distinct = self.eat(&Token::Distinct);
                (distinct, FunctionArgs::List(self.parse_expr_list()?))
            };
            self.expect_token(Token::RParen)?;

            let filter = if self.eat(&Token::Filter) {
                self.expect_token(Token::LParen)?;
                self.expect_token(Token::Where)?;
                let filter = self.parse_expr()?;
                self.expect_token(Token::RParen)?;
                Some(Box::new(filter))
            } else {
                None
            };
            let over = if !self.eat(&Token::Over) {
                None
            } else if self.peek_is(&Token::LParen) {
                Some(Over::Spec(self.parse_window_spec()?))
            } else {
                Some(Over::Named(self.expect_ident()?))
            };

            return Ok(Expr::Function {
                name,
                distinct,
                args,
                filter,
                over,
            });
        }

        let mut parts = vec![name];
        while parts.len() < 3 && self.eat(&Token::Dot) {
            parts.push(self.expect_ident()?);
        }
        let column = match parts.len() {
            1 => ColumnRef::new(parts.remove(0)),
            2 => {
                let column = parts.remove(1);
                ColumnRef::qualified(parts.remove(0), column)
            }
            _ => {
                let column = parts.remove(2);
                let table = parts.remove(1);
                ColumnRef {
                    schema: Some(parts.remove(0)),
                    table: Some(table),
                    column,
                }
            }
        };
        Ok(Expr::Column(column))
    }

    fn parse_case(&mut self) -> Result<Expr, ParseError> {
        let operand = if self.peek_is(&Token::When) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        let mut branches = Vec::new();
        while self.eat(&Token::When) {
            let condition = self.parse_expr()?;
            self.expect_token(Token::Then)?;
            let result = self.parse_expr()?;
            branches.push((condition, result));
        }
        if branches.is_empty() {
            return Err(self.error_at_next("expected WHEN in CASE expression"));
        }

        let otherwise = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_token(Token::End)?;

        Ok(Expr::Case {
            operand,
            branches,
            otherwise,
        })
    }

    fn parse_cast(&mut self) -> Result<Expr, ParseError> {
        self.expect_token(Token::LParen)?;
        let expr = self.parse_expr()?;
        let as_token = self.expect_token(Token::As)?;

        // The type name is kept as written, up to the matching parenthesis.
        let mut depth = 0usize;
        let start = as_token.span.end;
        let end = loop {
            let tok = self.next_token()?;
            match tok.token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => break tok.span.start,
                Token::RParen => depth -= 1,
                _ => {}
            }
        };
        let type_name = self.source[start..end].trim().to_string();
        if type_name.is_empty() {
            return Err(ParseError::new("expected type name", Span::new(start, end)));
        }

        Ok(Expr::Cast {
            expr: Box::new(expr),
            type_name,
        })
    }

    /// Accept a trailing `;` and require the end of input.
    fn expect_end(&mut self) -> Result<(), ParseError> {
        while self.eat(&Token::Semicolon) {}
        if let Some(tok) = self.lexer.peek() {
            let span = tok.span;
            let token = tok.token.clone();
            return Err(ParseError::new(format!("unexpected {:?}", token), span)
                .with_hint("only one statement can be prepared at a time"));
        }
        if let Some(span) = self.lexer.error() {
            return Err(self.unrecognized(span));
        }
        Ok(())
    }

    /// Expect and consume an identifier, quoted identifier or soft keyword.
    fn expect_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Ident(name) | Token::QuotedIdent(name) => Ok(name),
            ref soft if soft.is_soft_keyword() => Ok(tok.span.slice(self.source).to_string()),
            other => Err(ParseError::new(
                format!("expected identifier, found {:?}", other),
                tok.span,
            )),
        }
    }

    fn peek_is_ident(&mut self) -> bool {
        match self.lexer.peek() {
            Some(tok) => matches!(tok.token, Token::Ident(_) | Token::QuotedIdent(_))
                || tok.token.is_soft_keyword(),
            None => false,
        }
    }

    /// Expect and consume a specific token.
    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!("expected {:?}, found {:?}", expected, tok.token),
                tok.span,
            ))
        }
    }

    /// Consume the next token if it equals `expected`.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek_is(expected) {
            self.lexer.next_token();
            true
        } else {
            false
        }
    }

    fn peek_is(&mut self, expected: &Token) -> bool {
        self.lexer.peek().map(|t| &t.token) == Some(expected)
    }

    fn peek_kind(&mut self) -> Option<Token> {
        self.lexer.peek().map(|t| t.token.clone())
    }

    /// Get the next token or error if the input ended.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => Ok(tok),
            None => match self.lexer.error() {
                Some(span) => Err(self.unrecognized(span)),
                None => Err(self.error_at_end("unexpected end of input")),
            },
        }
    }

    fn unrecognized(&self, span: Span) -> ParseError {
        ParseError::new(
            format!("unrecognized token '{}'", span.slice(self.source)),
            span,
        )
    }

    fn error_at_next(&mut self, message: &str) -> ParseError {
        let span = match self.lexer.peek() {
            Some(tok) => tok.span,
            None => Span::eof(self.source),
        };
        ParseError::new(message, span)
    }

    fn error_at_end(&self, message: &str) -> ParseError {
        ParseError::new(message, Span::eof(self.source))
    }
}

/// Parse a source string into a statement.
pub fn parse(source: &str) -> Result<Statement, ParseError> {
    Parser::new(source).parse_statement()
}

/// Parse a statement and report the bind parameters it uses.
pub fn parse_with_parameters(source: &str) -> Result<(Statement, Parameters), ParseError> {
    let mut parser = Parser::new(source);
    let statement = parser.parse_statement()?;
    Ok((statement, parser.parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn select(source: &str) -> Select {
        match parse(source).unwrap() {
            Statement::Select(select) => select,
            other => panic!("expected Select, got {:?}", other),
        }
    }

    fn query_core(select: &Select) -> &QueryCore {
        match &select.core {
            SelectCore::Query(core) => core,
            other => panic!("expected query core, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let select = select("SELECT a, b AS c FROM main.t WHERE a = 1");
        let core = query_core(&select);
        assert_eq!(core.columns.len(), 2);
        assert_eq!(
            core.columns[1],
            ResultColumn::Expr {
                expr: Expr::column("b"),
                alias: Some("c".to_string()),
            }
        );
        let from = core.from.as_ref().unwrap();
        assert_eq!(
            from.first,
            TableOrSubquery::table(QualifiedName::with_schema("main", "t"))
        );
        assert_eq!(
            core.filter,
            Some(Expr::binary(
                Expr::column("a"),
                BinaryOperator::Equal,
                Expr::integer(1)
            ))
        );
    }

    #[test]
    fn test_parse_table_star_and_alias() {
        let select = select("SELECT x.*, count(*) n FROM t AS x");
        let core = query_core(&select);
        assert_eq!(core.columns[0], ResultColumn::TableStar("x".to_string()));
        if let ResultColumn::Expr { expr, alias } = &core.columns[1] {
            assert_eq!(alias.as_deref(), Some("n"));
            assert!(matches!(
                expr,
                Expr::Function {
                    args: FunctionArgs::Star,
                    ..
                }
            ));
        } else {
            panic!("expected expression column");
        }
        assert_eq!(
            core.from.as_ref().unwrap().first.visible_name(),
            Some("x")
        );
    }

    #[test]
    fn test_parse_joins() {
        let select = select(
            "SELECT * FROM a LEFT OUTER JOIN b ON a.id = b.id NATURAL JOIN c, d CROSS JOIN e USING (k)",
        );
        let joins = &query_core(&select).from.as_ref().unwrap().joins;
        assert_eq!(joins.len(), 4);
        assert_eq!(
            joins[0].operator,
            JoinOperator::Join {
                natural: false,
                kind: JoinKind::LeftOuter
            }
        );
        assert_eq!(
            joins[1].operator,
            JoinOperator::Join {
                natural: true,
                kind: JoinKind::Plain
            }
        );
        assert_eq!(joins[2].operator, JoinOperator::Comma);
        assert_eq!(
            joins[3].constraint,
            Some(JoinConstraint::Using(vec!["k".to_string()]))
        );
    }

    #[test]
    fn test_parse_compound_order_limit() {
        let select = select("SELECT a FROM t UNION ALL SELECT a FROM u ORDER BY a DESC LIMIT 5, 10");
        assert_eq!(select.compound.len(), 1);
        assert_eq!(select.compound[0].0, CompoundOperator::UnionAll);
        assert_eq!(select.order_by[0].direction, Some(SortDirection::Desc));
        let limit = select.limit.unwrap();
        assert_eq!(limit.limit, Expr::integer(10));
        assert_eq!(limit.offset, Some(Expr::integer(5)));
    }

    #[test]
    fn test_precedence() {
        let select = select("SELECT 1 + 2 * 3 = 7 AND NOT a OR b");
        let core = query_core(&select);
        let ResultColumn::Expr { expr, .. } = &core.columns[0] else {
            panic!("expected expression column");
        };
        let Expr::Binary { op, left, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOperator::Or);
        let Expr::Binary { op, left, right } = left.as_ref() else {
            panic!("expected AND");
        };
        assert_eq!(*op, BinaryOperator::And);
        assert!(matches!(
            right.as_ref(),
            Expr::Unary {
                op: UnaryOperator::Not,
                ..
            }
        ));
        let Expr::Binary { op, left, .. } = left.as_ref() else {
            panic!("expected equality");
        };
        assert_eq!(*op, BinaryOperator::Equal);
        let Expr::Binary { op, right, .. } = left.as_ref() else {
            panic!("expected addition");
        };
        assert_eq!(*op, BinaryOperator::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_predicates() {
        let select = select(
            "SELECT * FROM t WHERE a NOT IN (1, 2) AND b BETWEEN 1 AND 3 AND c NOT LIKE 'x%' ESCAPE '\\' AND d NOT NULL AND e IN u AND f IN (SELECT g FROM v)",
        );
        let filter = query_core(&select).filter.clone().unwrap();
        let mut predicates = Vec::new();
        let mut current = filter;
        while let Expr::Binary {
            left,
            op: BinaryOperator::And,
            right,
        } = current
        {
            predicates.push(*right);
            current = *left;
        }
        predicates.push(current);
        predicates.reverse();

        assert!(matches!(predicates[0], Expr::InList { negated: true, .. }));
        assert!(matches!(predicates[1], Expr::Between { negated: false, .. }));
        assert!(matches!(
            predicates[2],
            Expr::Pattern {
                negated: true,
                op: PatternOperator::Like,
                escape: Some(_),
                ..
            }
        ));
        assert!(matches!(predicates[3], Expr::IsNull { negated: true, .. }));
        assert!(matches!(predicates[4], Expr::InTable { .. }));
        assert!(matches!(predicates[5], Expr::InSelect { .. }));
    }

    #[test]
    fn test_parameters_are_numbered() {
        let (statement, parameters) =
            parse_with_parameters("SELECT ? , ?5, ?, :name, :name, @other FROM t").unwrap();
        assert_eq!(parameters.count, 8);
        assert_eq!(parameters.index_of(":name"), Some(7));
        assert_eq!(parameters.index_of("@other"), Some(8));
        let Statement::Select(select) = statement else {
            panic!("expected select");
        };
        let indices: Vec<u32> = query_core(&select)
            .columns
            .iter()
            .map(|column| match column {
                ResultColumn::Expr {
                    expr: Expr::Parameter(parameter),
                    ..
                } => parameter.index,
                other => panic!("expected parameter, got {:?}", other),
            })
            .collect();
        assert_eq!(indices, vec![1, 5, 6, 7, 7, 8]);
    }

    #[test]
    fn test_parse_insert() {
        let statement = parse("INSERT OR IGNORE INTO t(a, b) VALUES (1, ?), (2, ?);").unwrap();
        let Statement::Insert(insert) = statement else {
            panic!("expected insert");
        };
        assert_eq!(insert.or_action, Some(ConflictAction::Ignore));
        assert_eq!(insert.columns, vec!["a".to_string(), "b".to_string()]);
        let InsertSource::Values(rows) = &insert.source else {
            panic!("expected values");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][1], Expr::parameter(2));
    }

    #[test]
    fn test_parse_replace_and_default_values() {
        let Statement::Insert(insert) = parse("REPLACE INTO t DEFAULT VALUES").unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(insert.or_action, Some(ConflictAction::Replace));
        assert_eq!(insert.source, InsertSource::DefaultValues);
    }

    #[test]
    fn test_parse_update_and_delete() {
        let Statement::Update(update) =
            parse("UPDATE OR REPLACE t SET a = 1, (b, c) = (2, 3) WHERE d > 0 ORDER BY d LIMIT 2")
                .unwrap()
        else {
            panic!("expected update");
        };
        assert_eq!(update.or_action, Some(ConflictAction::Replace));
        assert_eq!(update.assignments.len(), 2);
        assert_eq!(update.assignments[1].columns.len(), 2);
        assert_eq!(update.order_by.len(), 1);
        assert!(update.limit.is_some());

        let Statement::Delete(delete) = parse("DELETE FROM main.t AS x WHERE x.a = 1").unwrap()
        else {
            panic!("expected delete");
        };
        assert_eq!(delete.table, QualifiedName::with_schema("main", "t"));
        assert_eq!(delete.alias.as_deref(), Some("x"));
    }

    #[test]
    fn test_parse_create_and_drop_table() {
        let Statement::CreateTable(create) =
            parse("CREATE TABLE IF NOT EXISTS t(id INTEGER PRIMARY KEY, a TEXT);").unwrap()
        else {
            panic!("expected create table");
        };
        assert!(create.if_not_exists);
        assert!(!create.temporary);
        assert_eq!(create.table, QualifiedName::new("t"));
        assert_eq!(create.body, "(id INTEGER PRIMARY KEY, a TEXT)");

        let Statement::DropTable(drop) = parse("DROP TABLE IF EXISTS t").unwrap() else {
            panic!("expected drop table");
        };
        assert!(drop.if_exists);
        assert_eq!(drop.table, QualifiedName::new("t"));
    }

    #[test]
    fn test_other_statements_are_kept_verbatim() {
        for source in [
            "PRAGMA table_info(t)",
            "BEGIN IMMEDIATE",
            "CREATE INDEX i ON t(a)",
            "DROP VIEW v",
            "CREATE VIEW v AS SELECT 1",
        ] {
            assert_eq!(parse(source).unwrap(), Statement::Other(source.to_string()));
        }
    }

    #[test]
    fn test_soft_keywords_as_names() {
        let select = select("SELECT replace(a, 'x', 'y'), temp.b FROM temp.t");
        let core = query_core(&select);
        assert!(matches!(
            &core.columns[0],
            ResultColumn::Expr {
                expr: Expr::Function { name, .. },
                ..
            } if name == "replace"
        ));
        assert_eq!(
            core.from.as_ref().unwrap().first,
            TableOrSubquery::table(QualifiedName::with_schema("temp", "t"))
        );
    }

    #[test]
    fn test_cast_and_case() {
        let select = select(
            "SELECT CAST(a AS VARCHAR(10)), CASE WHEN a THEN 1 ELSE 2 END, CASE b WHEN 1 THEN 'x' END FROM t",
        );
        let core = query_core(&select);
        assert!(matches!(
            &core.columns[0],
            ResultColumn::Expr { expr: Expr::Cast { type_name, .. }, .. } if type_name == "VARCHAR(10)"
        ));
        assert!(matches!(
            &core.columns[1],
            ResultColumn::Expr {
                expr: Expr::Case {
                    operand: None,
                    otherwise: Some(_),
                    ..
                },
                ..
            }
        ));
        assert!(matches!(
            &core.columns[2],
            ResultColumn::Expr {
                expr: Expr::Case {
                    operand: Some(_),
                    otherwise: None,
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_parse_common_table_expressions() {
        let select = select(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 5), \
             m AS NOT MATERIALIZED (SELECT * FROM t) SELECT i FROM n, m",
        );
        let with = select.with.as_ref().unwrap();
        assert!(with.recursive);
        assert_eq!(with.names().collect::<Vec<_>>(), vec!["n", "m"]);
        assert_eq!(with.tables[0].columns, vec!["i".to_string()]);
        assert_eq!(with.tables[0].select.compound.len(), 1);
        assert_eq!(with.tables[1].materialized, Some(false));

        let Statement::Delete(delete) =
            parse("WITH old AS (SELECT id FROM t WHERE a < 0) DELETE FROM t WHERE id IN old")
                .unwrap()
        else {
            panic!("expected delete");
        };
        assert!(delete.with.is_some());

        let Statement::Select(nested) = parse("SELECT * FROM (WITH x AS (SELECT 1) SELECT * FROM x)").unwrap()
        else {
            panic!("expected select");
        };
        let from = query_core(&nested).from.as_ref().unwrap();
        assert!(matches!(
            &from.first,
            TableOrSubquery::Subquery { select, .. } if select.with.is_some()
        ));
    }

    #[test]
    fn test_parse_window_functions() {
        let select = select(
            "SELECT row_number() OVER (PARTITION BY a ORDER BY b DESC ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW), \
             sum(c) FILTER (WHERE c > 0) OVER win, \
             avg(c) OVER (win RANGE 2 PRECEDING EXCLUDE NO OTHERS) \
             FROM t WINDOW win AS (ORDER BY b)",
        );
        let core = query_core(&select);
        let ResultColumn::Expr {
            expr: Expr::Function { over, .. },
            ..
        } = &core.columns[0]
        else {
            panic!("expected function");
        };
        let Some(Over::Spec(spec)) = over else {
            panic!("expected window definition");
        };
        assert_eq!(spec.partition_by, vec![Expr::column("a")]);
        assert_eq!(spec.order_by[0].direction, Some(SortDirection::Desc));
        assert_eq!(
            spec.frame,
            Some(Frame {
                unit: FrameUnit::Rows,
                start: FrameBound::UnboundedPreceding,
                end: Some(FrameBound::CurrentRow),
                exclude: None,
            })
        );

        assert!(matches!(
            &core.columns[1],
            ResultColumn::Expr {
                expr: Expr::Function {
                    filter: Some(_),
                    over: Some(Over::Named(name)),
                    ..
                },
                ..
            } if name == "win"
        ));
        let ResultColumn::Expr {
            expr: Expr::Function {
                over: Some(Over::Spec(spec)),
                ..
            },
            ..
        } = &core.columns[2]
        else {
            panic!("expected window definition");
        };
        assert_eq!(spec.base.as_deref(), Some("win"));
        assert_eq!(
            spec.frame.as_ref().map(|frame| frame.exclude),
            Some(Some(FrameExclude::NoOthers))
        );
        assert_eq!(core.windows.len(), 1);
        assert_eq!(core.windows[0].0, "win");
    }

    #[test]
    fn test_parse_upsert_and_returning() {
        let Statement::Insert(insert) = parse(
            "INSERT INTO t(id, a) VALUES (1, 'x') \
             ON CONFLICT (id) WHERE id > 0 DO UPDATE SET a = excluded.a WHERE a IS NOT excluded.a \
             ON CONFLICT DO NOTHING RETURNING id, a AS value",
        )
        .unwrap() else {
            panic!("expected insert");
        };
        assert_eq!(insert.upsert.len(), 2);
        let target = insert.upsert[0].target.as_ref().unwrap();
        assert_eq!(target.columns[0].expr, Expr::column("id"));
        assert!(target.filter.is_some());
        assert!(matches!(
            &insert.upsert[0].action,
            UpsertAction::Update { assignments, filter: Some(_) } if assignments.len() == 1
        ));
        assert_eq!(insert.upsert[1].target, None);
        assert_eq!(insert.upsert[1].action, UpsertAction::Nothing);
        assert_eq!(insert.returning.len(), 2);

        let Statement::Update(update) =
            parse("UPDATE t SET a = 1 WHERE id = 2 RETURNING *").unwrap()
        else {
            panic!("expected update");
        };
        assert_eq!(update.returning, vec![ResultColumn::Star]);

        let Statement::Delete(delete) = parse("DELETE FROM t RETURNING id").unwrap() else {
            panic!("expected delete");
        };
        assert_eq!(delete.returning.len(), 1);
    }

    #[test]
    fn test_parse_table_functions_and_index_hints() {
        let select = select("SELECT value FROM json_each('[1,2]') AS j, t INDEXED BY t_a");
        let from = query_core(&select).from.as_ref().unwrap();
        assert!(matches!(
            &from.first,
            TableOrSubquery::Function { name, args, alias: Some(alias) }
                if name.name == "json_each" && args.len() == 1 && alias == "j"
        ));
        assert_eq!(
            from.joins[0].table,
            TableOrSubquery::Table {
                name: QualifiedName::new("t"),
                alias: None,
                indexed: Some(IndexedBy::Index("t_a".to_string())),
            }
        );

        let Statement::Delete(delete) = parse("DELETE FROM t NOT INDEXED WHERE a = 1").unwrap()
        else {
            panic!("expected delete");
        };
        assert_eq!(delete.indexed, Some(IndexedBy::NotIndexed));

        let Statement::Update(update) =
            parse("UPDATE t AS x INDEXED BY t_a SET a = 1").unwrap()
        else {
            panic!("expected update");
        };
        assert_eq!(update.indexed, Some(IndexedBy::Index("t_a".to_string())));
    }

    #[test]
    fn test_parse_distinct_from_and_outer_joins() {
        let select = select(
            "SELECT a IS DISTINCT FROM b, a IS NOT DISTINCT FROM NULL FROM t RIGHT JOIN u USING (a) FULL OUTER JOIN v USING (a)",
        );
        let core = query_core(&select);
        assert!(matches!(
            &core.columns[0],
            ResultColumn::Expr {
                expr: Expr::Binary { op: BinaryOperator::IsDistinctFrom, .. },
                ..
            }
        ));
        assert!(matches!(
            &core.columns[1],
            ResultColumn::Expr {
                expr: Expr::Binary { op: BinaryOperator::IsNotDistinctFrom, .. },
                ..
            }
        ));
        let joins = &core.from.as_ref().unwrap().joins;
        assert_eq!(
            joins[0].operator,
            JoinOperator::Join {
                natural: false,
                kind: JoinKind::Right
            }
        );
        assert_eq!(
            joins[1].operator,
            JoinOperator::Join {
                natural: false,
                kind: JoinKind::FullOuter
            }
        );
    }

    #[test]
    fn test_errors() {
        let err = parse("WITH x AS (SELECT 1) CREATE TABLE t(a)").unwrap_err();
        assert!(err.message.contains("after WITH"));

        let err = parse("SELECT 1; SELECT 2").unwrap_err();
        assert!(err.hint.is_some());

        let err = parse("SELECT a FROM").unwrap_err();
        assert_eq!(err.message, "unexpected end of input");

        let err = parse("SELECT # FROM t").unwrap_err();
        assert!(err.message.contains("unrecognized token"));

        let err = parse("INSERT INTO t(a) VALUES (1) ON CONFLICT DO").unwrap_err();
        assert_eq!(err.message, "unexpected end of input");

        let err = parse("SELECT sum(a) OVER (ROWS 1) FROM t").unwrap_err();
        assert!(err.message.contains("PRECEDING or FOLLOWING"));

        assert!(parse("").is_err());
    }
}
