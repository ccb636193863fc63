//! Recursive-descent parser.
//!
//! Statements are parsed top-down; expressions use precedence climbing
//! over a fixed table (lowest to highest):
//!
//! | level | operators              | assoc |
//! |-------|------------------------|-------|
//! | 0     | `=`                    | right |
//! | 1     | `\|\|`                 | left  |
//! | 2     | `&&`                   | left  |
//! | 3     | `==` `!=`              | left  |
//! | 4     | `<` `<=` `>` `>=`      | left  |
//! | 5     | `+` `-`                | left  |
//! | 6     | `*` `/` `%`            | left  |
//! | 7     | unary `-` `!`          | right |
//! | 8     | call, primary          |       |
//!
//! A syntax error records a diagnostic, skips to the next statement
//! boundary (`;` or a brace) and carries on, so the returned [`Program`]
//! holds every statement that did parse.
//!
//! Nesting (groups, blocks, operator chains, call chains, `else if`) is
//! capped at [`MAX_NESTING`] levels. Every later stage recurses over the
//! tree, so deeper input is rejected here with a diagnostic.

use std::rc::Rc;

use tracing::debug;

use crate::ast::{
    BinaryOp, Block, Expr, ExprKind, FnDecl, Ident, Program, Stmt, StmtKind, UnaryOp,
};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::lexer::{Keyword, Literal, Operator, Punct, Token, TokenKind, tokenize};
use crate::span::{FileId, Span};

/// Deepest tree the parser will build.
pub const MAX_NESTING: usize = 256;

/// Parsed program plus everything reported on the way.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

impl ParseResult {
    pub fn has_errors(&self) -> bool {
        crate::diagnostic::has_errors(&self.diagnostics)
    }
}

/// Parse a token stream produced from `source`.
pub fn parse<I>(file_id: FileId, source: &str, tokens: I) -> ParseResult
where
    I: IntoIterator<Item = Token>,
{
    let mut parser = Parser::new(file_id, source, tokens.into_iter());
    let program = parser.program();
    debug!(
        statements = program.statements.len(),
        diagnostics = parser.diagnostics.len(),
        "parsed program"
    );
    ParseResult {
        program,
        diagnostics: parser.diagnostics,
    }
}

/// Lex and parse in one streaming pass. Lexer diagnostics come first.
pub fn parse_text(file_id: FileId, source: &str) -> ParseResult {
    let mut lexer = tokenize(file_id, source);
    let mut result = parse(file_id, source, &mut lexer);
    let mut diagnostics = lexer.into_diagnostics();
    diagnostics.append(&mut result.diagnostics);
    result.diagnostics = diagnostics;
    result
}

/// Marker for "a diagnostic was recorded, resynchronize".
struct Recover;

type PResult<T> = Result<T, Recover>;

struct Parser<'src, I> {
    file_id: FileId,
    source: &'src str,
    tokens: I,
    current: Token,
    previous: Span,
    diagnostics: Vec<Diagnostic>,
    last_error_at: Option<u32>,
    fn_depth: usize,
    nesting: usize,
}

impl<'src, I> Parser<'src, I>
where
    I: Iterator<Item = Token>,
{
    fn new(file_id: FileId, source: &'src str, mut tokens: I) -> Self {
        let eof = Span::point(file_id, source.len() as u32);
        let current = tokens.next().unwrap_or(Token {
            kind: TokenKind::Eof,
            span: eof,
            literal: None,
        });
        Parser {
            file_id,
            source,
            tokens,
            previous: Span::point(file_id, current.span.start),
            current,
            diagnostics: Vec::new(),
            last_error_at: None,
            fn_depth: 0,
            nesting: 0,
        }
    }

    // -----------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------

    fn advance(&mut self) -> Token {
        let eof = Span::point(self.file_id, self.source.len() as u32);
        let next = self.tokens.next().unwrap_or(Token {
            kind: TokenKind::Eof,
            span: eof,
            literal: None,
        });
        let token = std::mem::replace(&mut self.current, next);
        self.previous = token.span;
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn at_eof(&self) -> bool {
        self.check(TokenKind::Eof)
    }

    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> PResult<Token> {
        match self.eat(kind) {
            Some(token) => Ok(token),
            None => Err(self.unexpected(expected)),
        }
    }

    fn expect_ident(&mut self, expected: &str) -> PResult<Ident> {
        let token = self.expect(TokenKind::Ident, expected)?;
        Ok(Ident {
            name: token.text(self.source).to_string(),
            span: token.span,
        })
    }

    fn describe_current(&self) -> String {
        match self.current.kind {
            TokenKind::Ident | TokenKind::Number | TokenKind::Str => {
                format!("{} `{}`", self.current.kind, self.current.text(self.source))
            }
            other => other.to_string(),
        }
    }

    fn unexpected(&mut self, expected: &str) -> Recover {
        let message = format!("expected {expected}, found {}", self.describe_current());
        self.error(self.current.span, message, "E0301");
        Recover
    }

    /// Record an error unless one was already reported at the same place.
    fn error(&mut self, span: Span, message: impl Into<String>, code: &'static str) {
        if self.last_error_at == Some(span.start) {
            return;
        }
        self.last_error_at = Some(span.start);
        self.diagnostics
            .push(Diagnostic::error(DiagnosticKind::Parse, message, span).with_code(code));
    }

    /// Skip to a statement boundary: past a `;`, or up to a `}` / end.
    fn synchronize(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Eof | TokenKind::Punct(Punct::RBrace) => return,
                TokenKind::Punct(Punct::Semi) => {
                    self.advance();
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Run `parse`, then restore the nesting level it started with.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> PResult<T>) -> PResult<T> {
        let nesting = self.nesting;
        let result = parse(self);
        self.nesting = nesting;
        result
    }

    /// Go one level deeper, or report and skip the rest of the group.
    fn descend(&mut self) -> PResult<()> {
        if self.nesting >= MAX_NESTING {
            self.error(
                self.current.span,
                format!("nesting exceeds {MAX_NESTING} levels"),
                "E0307",
            );
            self.skip_group();
            return Err(Recover);
        }
        self.nesting += 1;
        Ok(())
    }

    /// Skip a balanced `(..)` / `{..}` group starting at the current token.
    fn skip_group(&mut self) {
        let mut open = 0usize;
        loop {
            match self.current.kind {
                TokenKind::Eof => return,
                TokenKind::Punct(Punct::LParen | Punct::LBrace) => open += 1,
                TokenKind::Punct(Punct::RParen | Punct::RBrace) => {
                    if open == 0 {
                        return;
                    }
                    open -= 1;
                }
                _ if open == 0 => return,
                _ => {}
            }
            self.advance();
            if open == 0 {
                return;
            }
        }
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    fn program(&mut self) -> Program {
        let start = self.current.span;
        let mut statements = Vec::new();
        while !self.at_eof() {
            if self.check(TokenKind::Punct(Punct::RBrace)) {
                self.error(self.current.span, "unmatched '}'", "E0302");
                self.advance();
                continue;
            }
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(Recover) => self.synchronize(),
            }
        }
        let end = self.current.span;
        Program {
            statements,
            span: start.to(end),
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        match self.current.kind {
            TokenKind::Keyword(Keyword::Let) => self.let_statement(),
            TokenKind::Keyword(Keyword::Fn) => self.fn_declaration(),
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::While) => self.while_statement(),
            TokenKind::Keyword(Keyword::Return) => self.return_statement(),
            TokenKind::Keyword(Keyword::Print) => {
                let keyword = self.advance();
                let value = self.expression()?;
                self.terminator("print statement")?;
                Ok(self.stmt(StmtKind::Print(value), keyword.span))
            }
            TokenKind::Punct(Punct::LBrace) => {
                let block = self.block()?;
                let span = block.span;
                Ok(Stmt {
                    kind: StmtKind::Block(block),
                    span,
                })
            }
            TokenKind::Punct(Punct::Semi) => {
                let semi = self.advance();
                self.diagnostics.push(
                    Diagnostic::warning(DiagnosticKind::Parse, "empty statement", semi.span)
                        .with_code("E0306"),
                );
                Ok(self.stmt(StmtKind::Empty, semi.span))
            }
            _ => {
                let start = self.current.span;
                let expr = self.expression()?;
                self.terminator("expression")?;
                Ok(self.stmt(StmtKind::Expr(expr), start))
            }
        }
    }

    /// Build a statement spanning from `start` to the last consumed token.
    fn stmt(&self, kind: StmtKind, start: Span) -> Stmt {
        Stmt {
            kind,
            span: start.to(self.previous),
        }
    }

    /// `;`, or nothing when the statement is last in its block or file.
    fn terminator(&mut self, after: &str) -> PResult<()> {
        if self.eat(TokenKind::Punct(Punct::Semi)).is_some()
            || self.check(TokenKind::Punct(Punct::RBrace))
            || self.at_eof()
        {
            return Ok(());
        }
        Err(self.unexpected(&format!("';' after {after}")))
    }

    fn let_statement(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        let name = self.expect_ident("variable name after 'let'")?;
        let init = if self.eat(TokenKind::Operator(Operator::Assign)).is_some() {
            Some(self.expression()?)
        } else {
            None
        };
        self.terminator("let declaration")?;
        Ok(self.stmt(StmtKind::Let { name, init }, keyword.span))
    }

    fn fn_declaration(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        let name = self.expect_ident("function name after 'fn'")?;
        self.expect(TokenKind::Punct(Punct::LParen), "'(' after function name")?;

        let mut params: Vec<Ident> = Vec::new();
        if !self.check(TokenKind::Punct(Punct::RParen)) {
            loop {
                let param = self.expect_ident("parameter name")?;
                if params.iter().any(|p| p.name == param.name) {
                    self.error(
                        param.span,
                        format!("duplicate parameter `{}`", param.name),
                        "E0305",
                    );
                }
                params.push(param);
                if self.eat(TokenKind::Punct(Punct::Comma)).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::Punct(Punct::RParen), "')' after parameters")?;

        self.fn_depth += 1;
        let body = self.block();
        self.fn_depth -= 1;
        let body = body?;

        let span = keyword.span.to(body.span);
        let decl = FnDecl {
            name,
            params,
            body,
            span,
        };
        Ok(Stmt {
            kind: StmtKind::Fn(Rc::new(decl)),
            span,
        })
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        let cond = self.expression()?;
        let then_branch = self.block()?;
        let else_branch = if self.eat(TokenKind::Keyword(Keyword::Else)).is_some() {
            let branch = if self.check(TokenKind::Keyword(Keyword::If)) {
                self.nested(|this| {
                    this.descend()?;
                    this.if_statement()
                })?
            } else {
                let block = self.block()?;
                let span = block.span;
                Stmt {
                    kind: StmtKind::Block(block),
                    span,
                }
            };
            Some(Box::new(branch))
        } else {
            None
        };
        Ok(self.stmt(
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            },
            keyword.span,
        ))
    }

    fn while_statement(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        let cond = self.expression()?;
        let body = self.block()?;
        Ok(self.stmt(StmtKind::While { cond, body }, keyword.span))
    }

    fn return_statement(&mut self) -> PResult<Stmt> {
        let keyword = self.advance();
        if self.fn_depth == 0 {
            self.error(keyword.span, "'return' outside of a function", "E0304");
        }
        let value = if self.check(TokenKind::Punct(Punct::Semi))
            || self.check(TokenKind::Punct(Punct::RBrace))
            || self.at_eof()
        {
            None
        } else {
            Some(self.expression()?)
        };
        self.terminator("return statement")?;
        Ok(self.stmt(StmtKind::Return(value), keyword.span))
    }

    fn block(&mut self) -> PResult<Block> {
        self.nested(|this| {
            this.descend()?;
            this.block_body()
        })
    }

    fn block_body(&mut self) -> PResult<Block> {
        let open = self.expect(TokenKind::Punct(Punct::LBrace), "'{'")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::Punct(Punct::RBrace)) && !self.at_eof() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(Recover) => self.synchronize(),
            }
        }
        let close = self.expect(TokenKind::Punct(Punct::RBrace), "'}' to close block")?;
        Ok(Block {
            statements,
            span: open.span.to(close.span),
        })
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.nested(|this| {
            this.descend()?;
            this.assignment()
        })
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.binary(1)?;
        if self.eat(TokenKind::Operator(Operator::Assign)).is_none() {
            return Ok(target);
        }
        let value = self.nested(|this| {
            this.descend()?;
            this.assignment()
        })?;
        match target.kind {
            ExprKind::Ident(name) => {
                let span = target.span.to(value.span);
                Ok(Expr {
                    kind: ExprKind::Assign {
                        target: Ident {
                            name,
                            span: target.span,
                        },
                        value: Box::new(value),
                    },
                    span,
                })
            }
            _ => {
                self.error(target.span, "invalid assignment target", "E0303");
                Err(Recover)
            }
        }
    }

    fn binary(&mut self, min_precedence: u8) -> PResult<Expr> {
        self.nested(|this| this.binary_chain(min_precedence))
    }

    /// Each operator in the chain nests the tree one level deeper.
    fn binary_chain(&mut self, min_precedence: u8) -> PResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let Some((op, precedence)) = binary_operator(self.current.kind) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.descend()?;
            self.advance();
            let rhs = self.binary(precedence + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.current.kind {
            TokenKind::Operator(Operator::Minus) => UnaryOp::Neg,
            TokenKind::Operator(Operator::Bang) => UnaryOp::Not,
            _ => return self.call(),
        };
        let token = self.advance();
        let operand = self.nested(|this| {
            this.descend()?;
            this.unary()
        })?;
        let span = token.span.to(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    fn call(&mut self) -> PResult<Expr> {
        self.nested(Self::call_chain)
    }

    fn call_chain(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        while self.check(TokenKind::Punct(Punct::LParen)) {
            self.descend()?;
            self.advance();
            let mut args = Vec::new();
            if !self.check(TokenKind::Punct(Punct::RParen)) {
                loop {
                    args.push(self.expression()?);
                    if self.eat(TokenKind::Punct(Punct::Comma)).is_none() {
                        break;
                    }
                }
            }
            let close = self.expect(TokenKind::Punct(Punct::RParen), "')' after arguments")?;
            let span = expr.span.to(close.span);
            expr = Expr {
                kind: ExprKind::Call {
                    callee: Box::new(expr),
                    args,
                },
                span,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let kind = match self.current.kind {
            TokenKind::Number => match &self.current.literal {
                Some(Literal::Number(value)) => ExprKind::Number(*value),
                _ => ExprKind::Number(0.0),
            },
            TokenKind::Str => match &self.current.literal {
                Some(Literal::Str(value)) => ExprKind::Str(value.clone()),
                _ => ExprKind::Str(String::new()),
            },
            TokenKind::Keyword(Keyword::True) => ExprKind::Bool(true),
            TokenKind::Keyword(Keyword::False) => ExprKind::Bool(false),
            TokenKind::Keyword(Keyword::Nil) => ExprKind::Nil,
            TokenKind::Ident => ExprKind::Ident(self.current.text(self.source).to_string()),
            TokenKind::Punct(Punct::LParen) => {
                let open = self.advance();
                let inner = self.expression()?;
                let close = self.expect(TokenKind::Punct(Punct::RParen), "')'")?;
                return Ok(Expr {
                    kind: ExprKind::Group(Box::new(inner)),
                    span: open.span.to(close.span),
                });
            }
            _ => return Err(self.unexpected("expression")),
        };
        let token = self.advance();
        Ok(Expr {
            kind,
            span: token.span,
        })
    }
}

fn binary_operator(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let TokenKind::Operator(op) = kind else {
        return None;
    };
    let entry = match op {
        Operator::OrOr => (BinaryOp::Or, 1),
        Operator::AndAnd => (BinaryOp::And, 2),
        Operator::EqEq => (BinaryOp::Eq, 3),
        Operator::NotEq => (BinaryOp::Ne, 3),
        Operator::Less => (BinaryOp::Lt, 4),
        Operator::LessEq => (BinaryOp::Le, 4),
        Operator::Greater => (BinaryOp::Gt, 4),
        Operator::GreaterEq => (BinaryOp::Ge, 4),
        Operator::Plus => (BinaryOp::Add, 5),
        Operator::Minus => (BinaryOp::Sub, 5),
        Operator::Star => (BinaryOp::Mul, 6),
        Operator::Slash => (BinaryOp::Div, 6),
        Operator::Percent => (BinaryOp::Rem, 6),
        Operator::Assign | Operator::Bang => return None,
    };
    Some(entry)
}
