//! Surface AST produced by the parser.
//!
//! The tree is read-only once parsing finishes: both backends walk the
//! same [`Program`] without touching it. Function declarations sit behind
//! an [`Rc`] so the interpreter can keep a handle to a body inside a
//! closure value without copying the subtree.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// Root of the tree: top-level statements in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name = init;`
    Let { name: Ident, init: Option<Expr> },
    /// `fn name(params) { body }`
    Fn(Rc<FnDecl>),
    Expr(Expr),
    Block(Block),
    /// `else if` chains nest another `If` statement in `else_branch`.
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Box<Stmt>>,
    },
    While { cond: Expr, body: Block },
    Return(Option<Expr>),
    Print(Expr),
    /// A lone `;`.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Ident,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Parenthesized expression, kept so spans cover the parentheses.
    Group(Box<Expr>),
}

impl Expr {
    /// True for literal expressions, looking through parentheses.
    pub fn is_literal(&self) -> bool {
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Str(_) | ExprKind::Bool(_) | ExprKind::Nil => true,
            ExprKind::Group(inner) => inner.is_literal(),
            _ => false,
        }
    }

    /// Strip any number of enclosing parentheses.
    pub fn ungroup(&self) -> &Expr {
        match &self.kind {
            ExprKind::Group(inner) => inner.ungroup(),
            _ => self,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Short-circuiting `&&`.
    And,
    /// Short-circuiting `||`.
    Or,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Display a number the way every stage prints it: integral values without
/// a fraction, everything else in shortest round-trip form.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------
// S-expression rendering used by `--parse`
// ---------------------------------------------------------------------

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Number(value) => f.write_str(&format_number(*value)),
            ExprKind::Str(value) => write!(f, "{value:?}"),
            ExprKind::Bool(value) => write!(f, "{value}"),
            ExprKind::Nil => f.write_str("nil"),
            ExprKind::Ident(name) => f.write_str(name),
            ExprKind::Unary { op, operand } => write!(f, "({} {operand})", op.as_str()),
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({} {lhs} {rhs})", op.as_str()),
            ExprKind::Assign { target, value } => write!(f, "(= {} {value})", target.name),
            ExprKind::Call { callee, args } => {
                write!(f, "(call {callee}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
            ExprKind::Group(inner) => write!(f, "(group {inner})"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::from("(program");
        for stmt in &self.statements {
            out.push('\n');
            write_stmt(&mut out, stmt, 1)?;
        }
        out.push(')');
        f.write_str(&out)
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match &stmt.kind {
        StmtKind::Let { name, init } => match init {
            Some(init) => write!(out, "{pad}(let {} {init})", name.name),
            None => write!(out, "{pad}(let {})", name.name),
        },
        StmtKind::Fn(decl) => {
            let params: Vec<&str> = decl.params.iter().map(|p| p.name.as_str()).collect();
            writeln!(out, "{pad}(fn {} ({})", decl.name.name, params.join(" "))?;
            write_block(out, &decl.body, depth + 1)?;
            out.push(')');
            Ok(())
        }
        StmtKind::Expr(expr) => write!(out, "{pad}(expr {expr})"),
        StmtKind::Block(block) => write_block(out, block, depth),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            writeln!(out, "{pad}(if {cond}")?;
            write_block(out, then_branch, depth + 1)?;
            if let Some(else_branch) = else_branch {
                writeln!(out, "\n{pad}  (else")?;
                write_stmt(out, else_branch, depth + 2)?;
                out.push(')');
            }
            out.push(')');
            Ok(())
        }
        StmtKind::While { cond, body } => {
            writeln!(out, "{pad}(while {cond}")?;
            write_block(out, body, depth + 1)?;
            out.push(')');
            Ok(())
        }
        StmtKind::Return(Some(value)) => write!(out, "{pad}(return {value})"),
        StmtKind::Return(None) => write!(out, "{pad}(return)"),
        StmtKind::Print(value) => write!(out, "{pad}(print {value})"),
        StmtKind::Empty => write!(out, "{pad}(empty)"),
    }
}

fn write_block(out: &mut String, block: &Block, depth: usize) -> fmt::Result {
    write!(out, "{}(block", "  ".repeat(depth))?;
    for stmt in &block.statements {
        out.push('\n');
        write_stmt(out, stmt, depth + 1)?;
    }
    out.push(')');
    Ok(())
}
