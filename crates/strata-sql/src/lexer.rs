//! Lexer for the SQLite statement dialect using logos.

use crate::span::Span;
use logos::Logos;
use std::collections::VecDeque;

/// Token types for SQL statements.
///
/// Keywords are matched case-insensitively. Only the keywords the parser
/// needs are tokens; every other word lexes as [`Token::Ident`].
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"--[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
pub enum Token {
    // Statement keywords
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("insert", ignore(ascii_case))]
    Insert,
    #[token("replace", ignore(ascii_case))]
    Replace,
    #[token("update", ignore(ascii_case))]
    Update,
    #[token("delete", ignore(ascii_case))]
    Delete,
    #[token("create", ignore(ascii_case))]
    Create,
    #[token("drop", ignore(ascii_case))]
    Drop,
    #[token("with", ignore(ascii_case))]
    With,
    #[token("values", ignore(ascii_case))]
    Values,
    #[token("recursive", ignore(ascii_case))]
    Recursive,
    #[token("materialized", ignore(ascii_case))]
    Materialized,
    #[token("returning", ignore(ascii_case))]
    Returning,

    // Clause keywords
    #[token("from", ignore(ascii_case))]
    From,
    #[token("where", ignore(ascii_case))]
    Where,
    #[token("group", ignore(ascii_case))]
    Group,
    #[token("having", ignore(ascii_case))]
    Having,
    #[token("order", ignore(ascii_case))]
    Order,
    #[token("by", ignore(ascii_case))]
    By,
    #[token("limit", ignore(ascii_case))]
    Limit,
    #[token("offset", ignore(ascii_case))]
    Offset,
    #[token("into", ignore(ascii_case))]
    Into,
    #[token("set", ignore(ascii_case))]
    Set,
    #[token("default", ignore(ascii_case))]
    Default,
    #[token("table", ignore(ascii_case))]
    Table,
    #[token("as", ignore(ascii_case))]
    As,
    #[token("distinct", ignore(ascii_case))]
    Distinct,
    #[token("all", ignore(ascii_case))]
    All,
    #[token("union", ignore(ascii_case))]
    Union,
    #[token("intersect", ignore(ascii_case))]
    Intersect,
    #[token("except", ignore(ascii_case))]
    Except,
    #[token("asc", ignore(ascii_case))]
    Asc,
    #[token("desc", ignore(ascii_case))]
    Desc,
    #[token("nulls", ignore(ascii_case))]
    Nulls,
    #[token("first", ignore(ascii_case))]
    First,
    #[token("last", ignore(ascii_case))]
    Last,

    // Joins
    #[token("join", ignore(ascii_case))]
    Join,
    #[token("natural", ignore(ascii_case))]
    Natural,
    #[token("left", ignore(ascii_case))]
    Left,
    #[token("right", ignore(ascii_case))]
    Right,
    #[token("full", ignore(ascii_case))]
    Full,
    #[token("outer", ignore(ascii_case))]
    Outer,
    #[token("inner", ignore(ascii_case))]
    Inner,
    #[token("cross", ignore(ascii_case))]
    Cross,
    #[token("on", ignore(ascii_case))]
    On,
    #[token("using", ignore(ascii_case))]
    Using,

    // Conflict resolution and DDL modifiers
    #[token("or", ignore(ascii_case))]
    Or,
    #[token("rollback", ignore(ascii_case))]
    Rollback,
    #[token("abort", ignore(ascii_case))]
    Abort,
    #[token("fail", ignore(ascii_case))]
    Fail,
    #[token("ignore", ignore(ascii_case))]
    Ignore,
    #[token("temp", ignore(ascii_case))]
    Temp,
    #[token("temporary", ignore(ascii_case))]
    Temporary,
    #[token("if", ignore(ascii_case))]
    If,
    #[token("exists", ignore(ascii_case))]
    Exists,
    #[token("indexed", ignore(ascii_case))]
    Indexed,

    // Upsert
    #[token("conflict", ignore(ascii_case))]
    Conflict,
    #[token("do", ignore(ascii_case))]
    Do,
    #[token("nothing", ignore(ascii_case))]
    Nothing,

    // Window functions
    #[token("filter", ignore(ascii_case))]
    Filter,
    #[token("over", ignore(ascii_case))]
    Over,
    #[token("window", ignore(ascii_case))]
    Window,
    #[token("partition", ignore(ascii_case))]
    Partition,
    #[token("range", ignore(ascii_case))]
    Range,
    #[token("rows", ignore(ascii_case))]
    Rows,
    #[token("groups", ignore(ascii_case))]
    Groups,
    #[token("unbounded", ignore(ascii_case))]
    Unbounded,
    #[token("preceding", ignore(ascii_case))]
    Preceding,
    #[token("following", ignore(ascii_case))]
    Following,
    #[token("current", ignore(ascii_case))]
    Current,
    #[token("row", ignore(ascii_case))]
    Row,
    #[token("exclude", ignore(ascii_case))]
    Exclude,
    #[token("no", ignore(ascii_case))]
    No,
    #[token("others", ignore(ascii_case))]
    Others,
    #[token("ties", ignore(ascii_case))]
    Ties,

    // Expression keywords
    #[token("and", ignore(ascii_case))]
    And,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("in", ignore(ascii_case))]
    In,
    #[token("like", ignore(ascii_case))]
    Like,
    #[token("glob", ignore(ascii_case))]
    Glob,
    #[token("regexp", ignore(ascii_case))]
    Regexp,
    #[token("match", ignore(ascii_case))]
    Match,
    #[token("escape", ignore(ascii_case))]
    Escape,
    #[token("between", ignore(ascii_case))]
    Between,
    #[token("isnull", ignore(ascii_case))]
    IsNull,
    #[token("notnull", ignore(ascii_case))]
    NotNull,
    #[token("null", ignore(ascii_case))]
    Null,
    #[token("case", ignore(ascii_case))]
    Case,
    #[token("when", ignore(ascii_case))]
    When,
    #[token("then", ignore(ascii_case))]
    Then,
    #[token("else", ignore(ascii_case))]
    Else,
    #[token("end", ignore(ascii_case))]
    End,
    #[token("cast", ignore(ascii_case))]
    Cast,
    #[token("collate", ignore(ascii_case))]
    Collate,
    #[token("current_time", ignore(ascii_case))]
    CurrentTime,
    #[token("current_date", ignore(ascii_case))]
    CurrentDate,
    #[token("current_timestamp", ignore(ascii_case))]
    CurrentTimestamp,

    // Identifiers
    #[regex(r"[a-zA-Z_\x{80}-\x{10FFFF}][a-zA-Z0-9_$\x{80}-\x{10FFFF}]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r#""([^"]|"")*""#, |lex| unquote(lex.slice(), '"'))]
    #[regex(r"`([^`]|``)*`", |lex| unquote(lex.slice(), '`'))]
    #[regex(r"\[[^\]]*\]", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    QuotedIdent(String),

    // Literals
    #[regex(r"'([^']|'')*'", |lex| unquote(lex.slice(), '\''))]
    String(String),

    #[regex(r"[xX]'[0-9a-fA-F]*'", |lex| {
        let s = lex.slice();
        s[2..s.len() - 1].to_string()
    })]
    Blob(String),

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().to_string())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| lex.slice().to_string())]
    Numeric(String),

    // Bind parameters
    #[token("?")]
    Question,
    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok())]
    NumberedParameter(u32),
    #[regex(r"[:@$][a-zA-Z0-9_]+", |lex| lex.slice().to_string())]
    NamedParameter(String),

    // Operators
    #[token("||")]
    Concat,
    #[token("->>")]
    ExtractText,
    #[token("->")]
    Extract,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("&")]
    Ampersand,
    #[token("|")]
    Pipe,
    #[token("~")]
    Tilde,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<>")]
    LtGt,

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(";")]
    Semicolon,
}

impl Token {
    /// Keywords SQLite also accepts as plain identifiers.
    pub fn is_soft_keyword(&self) -> bool {
        matches!(
            self,
            Token::Replace
                | Token::Rollback
                | Token::Abort
                | Token::Fail
                | Token::Ignore
                | Token::Temp
                | Token::Temporary
                | Token::If
                | Token::Asc
                | Token::Desc
                | Token::Nulls
                | Token::First
                | Token::Last
                | Token::Match
                | Token::Regexp
                | Token::Glob
                | Token::Like
                | Token::Cast
                | Token::Offset
                | Token::Left
                | Token::Natural
                | Token::Cross
                | Token::Inner
                | Token::Outer
                | Token::Right
                | Token::Full
                | Token::Recursive
                | Token::Materialized
                | Token::Indexed
                | Token::Conflict
                | Token::Do
                | Token::Nothing
                | Token::Filter
                | Token::Over
                | Token::Window
                | Token::Partition
                | Token::Range
                | Token::Rows
                | Token::Groups
                | Token::Unbounded
                | Token::Preceding
                | Token::Following
                | Token::Current
                | Token::Row
                | Token::Exclude
                | Token::No
                | Token::Others
                | Token::Ties
        )
    }
}

/// Strip the surrounding quote characters and collapse doubled quotes.
fn unquote(s: &str, quote: char) -> String {
    let inner = &s[1..s.len() - 1];
    let doubled: String = [quote, quote].iter().collect();
    inner.replace(&doubled, &quote.to_string())
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer that produces spanned tokens.
///
/// Lexing stops at the first unrecognized input; the offending span is kept
/// in [`Lexer::error`] so the parser can report it.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    lookahead: VecDeque<SpannedToken>,
    error: Option<Span>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            lookahead: VecDeque::new(),
            error: None,
        }
    }

    /// Peek at the next token without consuming it.
    pub fn peek(&mut self) -> Option<&SpannedToken> {
        self.peek_nth(0)
    }

    /// Peek `n` tokens ahead (`0` is the next token).
    pub fn peek_nth(&mut self, n: usize) -> Option<&SpannedToken> {
        while self.lookahead.len() <= n {
            match self.next_inner() {
                Some(token) => self.lookahead.push_back(token),
                None => break,
            }
        }
        self.lookahead.get(n)
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Option<SpannedToken> {
        self.lookahead.pop_front().or_else(|| self.next_inner())
    }

    fn next_inner(&mut self) -> Option<SpannedToken> {
        if self.error.is_some() {
            return None;
        }
        match self.inner.next() {
            Some(Ok(token)) => Some(SpannedToken {
                token,
                span: self.inner.span().into(),
            }),
            Some(Err(())) => {
                self.error = Some(self.inner.span().into());
                None
            }
            None => None,
        }
    }

    /// Span of the first unrecognized input, if any.
    pub fn error(&self) -> Option<Span> {
        self.error
    }

    /// Get the source string.
    pub fn source(&self) -> &'source str {
        self.inner.source()
    }
}

impl Iterator for Lexer<'_> {
    type Item = SpannedToken;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Tokenize a source string into a vector of spanned tokens.
pub fn tokenize(source: &str) -> Vec<SpannedToken> {
    Lexer::new(source).collect()
}
