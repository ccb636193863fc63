//! Tree-walking interpreter behind `--execute`.
//!
//! The interpreter walks the parsed [`Program`] directly. Every block runs
//! in a child [`Scope`]; the active scope is swapped in and out through
//! `Interpreter::with_scope`, so errors and `return` unwinding leave the
//! scope chain exactly as they found it. Semantic failures abort the run and
//! surface as a single [`Diagnostic`].

use std::cmp::Ordering;
use std::io::Write;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::debug;

use crate::ast::{BinaryOp, Block, Expr, ExprKind, FnDecl, Program, Stmt, StmtKind, UnaryOp};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::env::{Env, Scope, clear_chain};
use crate::span::Span;
use crate::value::{Closure, Value};

pub const DEFAULT_STEP_LIMIT: u64 = 1_000_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Execution budgets. `step_limit: None` disables the step budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    pub step_limit: Option<u64>,
    pub max_call_depth: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            step_limit: Some(DEFAULT_STEP_LIMIT),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

#[derive(Debug)]
pub struct ExecResult {
    /// `None` when the run was aborted by an error.
    pub value: Option<Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ExecResult {
    pub fn has_errors(&self) -> bool {
        crate::diagnostic::has_errors(&self.diagnostics)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String, span: Span },
    #[error("assignment to undeclared variable '{name}'")]
    UndeclaredAssignment { name: String, span: Span },
    #[error("{message}")]
    Type { message: String, span: Span },
    #[error("{what} by zero")]
    DivisionByZero { what: &'static str, span: Span },
    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: u64, span: Span },
    #[error("maximum call depth of {limit} exceeded")]
    CallDepth { limit: usize, span: Span },
    #[error("failed to write output: {message}")]
    Output { message: String, span: Span },
}

impl RuntimeError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            RuntimeError::UndefinedVariable { .. } | RuntimeError::UndeclaredAssignment { .. } => {
                DiagnosticKind::Name
            }
            RuntimeError::Type { .. } => DiagnosticKind::Type,
            RuntimeError::DivisionByZero { .. } => DiagnosticKind::Arithmetic,
            RuntimeError::StepLimit { .. } | RuntimeError::CallDepth { .. } => DiagnosticKind::Limit,
            RuntimeError::Output { .. } => DiagnosticKind::Io,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.kind() {
            DiagnosticKind::Name => "E0401",
            DiagnosticKind::Type => "E0402",
            DiagnosticKind::Arithmetic => "E0403",
            DiagnosticKind::Limit => "E0404",
            _ => "E0405",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            RuntimeError::UndefinedVariable { span, .. }
            | RuntimeError::UndeclaredAssignment { span, .. }
            | RuntimeError::Type { span, .. }
            | RuntimeError::DivisionByZero { span, .. }
            | RuntimeError::StepLimit { span, .. }
            | RuntimeError::CallDepth { span, .. }
            | RuntimeError::Output { span, .. } => *span,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.kind(), self.to_string(), self.span()).with_code(self.code())
    }
}

/// Run `program` once against a fresh global scope.
pub fn execute(program: &Program, out: &mut dyn Write, config: &ExecConfig) -> ExecResult {
    Session::new(config.clone()).run(program, out)
}

/// A global environment that outlives individual runs, for REPL-style hosts.
///
/// Each [`Session::run`] is a transaction: if the run fails, global bindings
/// are rolled back to what they were before it started. Dropping the session
/// releases every scope its runs created.
#[derive(Debug)]
pub struct Session {
    globals: Env,
    config: ExecConfig,
    /// Scopes captured by closures that were stored outside them.
    retained: Vec<Weak<Scope>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ExecConfig::default())
    }
}

impl Session {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            globals: Scope::global(),
            config,
            retained: Vec::new(),
        }
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn run(&mut self, program: &Program, out: &mut dyn Write) -> ExecResult {
        debug!(statements = program.statements.len(), "executing program");
        let saved = self.globals.snapshot();
        let mut interpreter = Interpreter {
            env: Rc::clone(&self.globals),
            out,
            config: &self.config,
            retained: &mut self.retained,
            steps: 0,
            depth: 0,
        };
        let outcome = interpreter.run_program(program);
        debug!(steps = interpreter.steps, "execution finished");
        match outcome {
            Ok(value) => ExecResult {
                value: Some(value),
                diagnostics: Vec::new(),
            },
            Err(error) => {
                self.globals.restore(saved);
                ExecResult {
                    value: None,
                    diagnostics: vec![error.to_diagnostic()],
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for scope in self.retained.drain(..) {
            if let Some(scope) = scope.upgrade() {
                clear_chain(&scope);
            }
        }
        self.globals.clear();
    }
}

/// Non-local exits out of statement execution.
enum Unwind {
    Return(Value),
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(error: RuntimeError) -> Self {
        Unwind::Error(error)
    }
}

struct Interpreter<'a> {
    env: Env,
    out: &'a mut dyn Write,
    config: &'a ExecConfig,
    retained: &'a mut Vec<Weak<Scope>>,
    steps: u64,
    depth: usize,
}

impl Interpreter<'_> {
    fn run_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        for stmt in &program.statements {
            if let StmtKind::Fn(decl) = &stmt.kind {
                self.define_function(decl);
            }
        }

        let mut result = Value::Nil;
        for stmt in &program.statements {
            result = match &stmt.kind {
                StmtKind::Fn(_) => Value::Nil,
                StmtKind::Expr(expr) => {
                    self.tick(stmt.span)?;
                    self.eval(expr)?
                }
                _ => {
                    match self.exec_stmt(stmt) {
                        Ok(()) => {}
                        Err(Unwind::Return(value)) => return Ok(value),
                        Err(Unwind::Error(error)) => return Err(error),
                    }
                    Value::Nil
                }
            };
        }
        Ok(result)
    }

    /// Run `body` with `scope` as the active scope, restoring the previous
    /// scope afterwards whatever `body` returns.
    fn with_scope<T>(&mut self, scope: Env, body: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.env, scope);
        let result = body(self);
        self.env = saved;
        result
    }

    fn tick(&mut self, span: Span) -> Result<(), RuntimeError> {
        self.steps += 1;
        match self.config.step_limit {
            Some(limit) if self.steps > limit => Err(RuntimeError::StepLimit { limit, span }),
            _ => Ok(()),
        }
    }

    fn define_function(&mut self, decl: &Rc<FnDecl>) {
        let closure = Closure::new(Rc::clone(decl), Rc::clone(&self.env));
        self.env
            .define(decl.name.name.clone(), Value::Function(Rc::new(closure)));
    }

    /// Remember the scope behind a function value about to be stored, so
    /// the session can break the cycle if it is stored in an ancestor.
    fn retain(&mut self, value: &Value) {
        let Value::Function(closure) = value else {
            return;
        };
        let Some(env) = closure.env() else {
            return;
        };
        if self.retained.len() == self.retained.capacity() {
            self.retained.retain(|scope| scope.strong_count() > 0);
        }
        self.retained.push(Rc::downgrade(&env));
    }

    fn exec_block(&mut self, block: &Block) -> Result<(), Unwind> {
        let scope = Scope::child(&self.env);
        self.with_scope(scope, |this| this.exec_statements(&block.statements))
    }

    fn exec_statements(&mut self, statements: &[Stmt]) -> Result<(), Unwind> {
        for stmt in statements {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<(), Unwind> {
        self.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                let value = match init {
                    Some(init) => self.eval(init)?,
                    None => Value::Nil,
                };
                self.retain(&value);
                self.env.define(name.name.clone(), value);
            }
            StmtKind::Fn(decl) => self.define_function(decl),
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Block(block) => self.exec_block(block)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.condition(cond, "if")? {
                    self.exec_block(then_branch)?;
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch)?;
                }
            }
            StmtKind::While { cond, body } => {
                while self.condition(cond, "while")? {
                    self.exec_block(body)?;
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value)?,
                    None => Value::Nil,
                };
                return Err(Unwind::Return(value));
            }
            StmtKind::Print(expr) => {
                let value = self.eval(expr)?;
                writeln!(self.out, "{value}").map_err(|err| RuntimeError::Output {
                    message: err.to_string(),
                    span: stmt.span,
                })?;
            }
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn condition(&mut self, cond: &Expr, keyword: &str) -> Result<bool, RuntimeError> {
        match self.eval(cond)? {
            Value::Bool(value) => Ok(value),
            other => Err(RuntimeError::Type {
                message: format!(
                    "{keyword} condition must be a bool, found {}",
                    other.type_name()
                ),
                span: cond.span,
            }),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        self.tick(expr.span)?;
        match &expr.kind {
            ExprKind::Number(value) => Ok(Value::Number(*value)),
            ExprKind::Str(value) => Ok(Value::Str(Rc::from(value.as_str()))),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::Nil => Ok(Value::Nil),
            ExprKind::Ident(name) => {
                self.env
                    .get(name)
                    .ok_or_else(|| RuntimeError::UndefinedVariable {
                        name: name.clone(),
                        span: expr.span,
                    })
            }
            ExprKind::Group(inner) => self.eval(inner),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                apply_unary(*op, value, expr.span)
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, expr.span),
            ExprKind::Assign { target, value } => {
                let value = self.eval(value)?;
                self.retain(&value);
                if self.env.assign(&target.name, value.clone()) {
                    Ok(value)
                } else {
                    Err(RuntimeError::UndeclaredAssignment {
                        name: target.name.clone(),
                        span: target.span,
                    })
                }
            }
            ExprKind::Call { callee, args } => self.call(callee, args, expr.span),
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        if op.is_short_circuit() {
            let left = self.eval(lhs)?;
            let left = expect_bool(op, left, lhs.span)?;
            let decided = match op {
                BinaryOp::And => !left,
                _ => left,
            };
            if decided {
                return Ok(Value::Bool(left));
            }
            let right = self.eval(rhs)?;
            return expect_bool(op, right, rhs.span).map(Value::Bool);
        }

        let left = self.eval(lhs)?;
        let right = self.eval(rhs)?;
        apply_binary(op, left, right, span)
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<Value, RuntimeError> {
        let closure = match self.eval(callee)? {
            Value::Function(closure) => closure,
            other => {
                return Err(RuntimeError::Type {
                    message: format!("cannot call a value of type {}", other.type_name()),
                    span: callee.span,
                });
            }
        };
        if args.len() != closure.arity() {
            return Err(RuntimeError::Type {
                message: format!(
                    "function '{}' expects {} argument(s), got {}",
                    closure.name(),
                    closure.arity(),
                    args.len()
                ),
                span,
            });
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }

        if self.depth >= self.config.max_call_depth {
            return Err(RuntimeError::CallDepth {
                limit: self.config.max_call_depth,
                span,
            });
        }

        let Some(env) = closure.env() else {
            return Err(RuntimeError::Type {
                message: format!("function '{}' outlived its scope", closure.name()),
                span,
            });
        };
        let scope = Scope::child(&env);
        for (param, value) in closure.decl.params.iter().zip(values) {
            scope.define(param.name.clone(), value);
        }

        self.depth += 1;
        let outcome =
            self.with_scope(scope, |this| this.exec_statements(&closure.decl.body.statements));
        self.depth -= 1;

        match outcome {
            Ok(()) => Ok(Value::Nil),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Error(error)) => Err(error),
        }
    }
}

fn expect_bool(op: BinaryOp, value: Value, span: Span) -> Result<bool, RuntimeError> {
    match value {
        Value::Bool(value) => Ok(value),
        other => Err(RuntimeError::Type {
            message: format!(
                "operand of '{}' must be a bool, found {}",
                op.as_str(),
                other.type_name()
            ),
            span,
        }),
    }
}

/// Apply a unary operator to an evaluated operand.
pub fn apply_unary(op: UnaryOp, value: Value, span: Span) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Number(value)) => Ok(Value::Number(-value)),
        (UnaryOp::Not, Value::Bool(value)) => Ok(Value::Bool(!value)),
        (op, value) => Err(RuntimeError::Type {
            message: format!("cannot apply '{}' to {}", op.as_str(), value.type_name()),
            span,
        }),
    }
}

/// Apply a non-short-circuit binary operator to two evaluated operands.
pub fn apply_binary(
    op: BinaryOp,
    left: Value,
    right: Value,
    span: Span,
) -> Result<Value, RuntimeError> {
    use Value::{Bool, Number, Str};

    match (op, &left, &right) {
        (BinaryOp::Eq, _, _) => Ok(Bool(left == right)),
        (BinaryOp::Ne, _, _) => Ok(Bool(left != right)),
        (BinaryOp::Add, Number(a), Number(b)) => Ok(Number(a + b)),
        (BinaryOp::Add, Str(a), Str(b)) => Ok(Str(Rc::from(format!("{a}{b}")))),
        (BinaryOp::Sub, Number(a), Number(b)) => Ok(Number(a - b)),
        (BinaryOp::Mul, Number(a), Number(b)) => Ok(Number(a * b)),
        (BinaryOp::Div | BinaryOp::Rem, Number(_), Number(b)) if *b == 0.0 => {
            Err(RuntimeError::DivisionByZero {
                what: if op == BinaryOp::Div {
                    "division"
                } else {
                    "modulo"
                },
                span,
            })
        }
        (BinaryOp::Div, Number(a), Number(b)) => Ok(Number(a / b)),
        (BinaryOp::Rem, Number(a), Number(b)) => Ok(Number(a % b)),
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Number(a), Number(b)) => {
            Ok(Bool(ordered(op, a.partial_cmp(b))))
        }
        (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge, Str(a), Str(b)) => {
            Ok(Bool(ordered(op, Some(a.cmp(b)))))
        }
        _ => Err(RuntimeError::Type {
            message: format!(
                "cannot apply '{}' to {} and {}",
                op.as_str(),
                left.type_name(),
                right.type_name()
            ),
            span,
        }),
    }
}

fn ordered(op: BinaryOp, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use crate::span::FileId;

    fn program(source: &str) -> Program {
        let parsed = parse_text(FileId(0), source);
        assert!(
            !parsed.has_errors(),
            "unexpected parse errors: {:?}",
            parsed.diagnostics
        );
        parsed.program
    }

    fn run_with(source: &str, config: &ExecConfig) -> (ExecResult, String) {
        let mut out = Vec::new();
        let result = execute(&program(source), &mut out, config);
        (result, String::from_utf8(out).unwrap())
    }

    fn run(source: &str) -> (ExecResult, String) {
        run_with(source, &ExecConfig::default())
    }

    fn error_kind(source: &str) -> DiagnosticKind {
        let (result, _) = run(source);
        assert!(result.value.is_none());
        assert_eq!(result.diagnostics.len(), 1);
        result.diagnostics[0].kind
    }

    #[test]
    fn respects_precedence() {
        let (result, out) = run("1 + 2 * 3");
        assert_eq!(result.value, Some(Value::from(7.0)));
        assert!(result.diagnostics.is_empty());
        assert_eq!(out, "");
    }

    #[test]
    fn division_by_zero_aborts_without_value() {
        let (result, _) = run("1 / 0");
        assert!(result.value.is_none());
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Arithmetic);
        assert_eq!(result.diagnostics[0].code, Some("E0403"));
        assert_eq!(result.diagnostics[0].message, "division by zero");
        assert_eq!(error_kind("5 % 0"), DiagnosticKind::Arithmetic);
    }

    #[test]
    fn prints_and_returns_last_expression() {
        let (result, out) = run("let x = 2; print x * 3; print \"a\" + \"b\"; x");
        assert_eq!(out, "6\nab\n");
        assert_eq!(result.value, Some(Value::from(2.0)));
    }

    #[test]
    fn result_is_nil_when_last_statement_is_not_an_expression() {
        let (result, _) = run("let x = 2;");
        assert_eq!(result.value, Some(Value::Nil));
    }

    #[test]
    fn runs_recursive_functions() {
        let (result, _) = run(
            "fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }\nfib(10)",
        );
        assert_eq!(result.value, Some(Value::from(55.0)));
    }

    #[test]
    fn hoists_top_level_functions() {
        let (result, out) = run(
            "print twice(4);\nfn twice(x) { return x * 2; }\nfn even(n) { if n == 0 { return true; } return odd(n - 1); }\nfn odd(n) { if n == 0 { return false; } return even(n - 1); }\neven(6)",
        );
        assert_eq!(out, "8\n");
        assert_eq!(result.value, Some(Value::from(true)));
    }

    #[test]
    fn closures_capture_their_scope() {
        let (result, _) = run(
            "fn counter() { let n = 0; fn inc() { n = n + 1; return n; } return inc; }\nlet c = counter(); c(); c()",
        );
        assert_eq!(result.value, Some(Value::from(2.0)));
    }

    #[test]
    fn block_scopes_are_released() {
        let (result, out) = run("let x = 1; { let x = 2; print x; } x");
        assert_eq!(out, "2\n");
        assert_eq!(result.value, Some(Value::from(1.0)));

        let (result, _) = run("fn f() { { let y = 1; return y; } } let y = 5; f(); y");
        assert_eq!(result.value, Some(Value::from(5.0)));
    }

    #[test]
    fn while_loops_and_assignment() {
        let (result, out) =
            run("let i = 0; let total = 0; while i < 4 { i = i + 1; total = total + i; } print total; i");
        assert_eq!(out, "10\n");
        assert_eq!(result.value, Some(Value::from(4.0)));
    }

    #[test]
    fn else_if_chains() {
        let (_, out) = run(
            "fn sign(n) { if n > 0 { return 1; } else if n < 0 { return -1; } else { return 0; } }\nprint sign(3); print sign(-2); print sign(0);",
        );
        assert_eq!(out, "1\n-1\n0\n");
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert_eq!(run("false && missing").0.value, Some(Value::from(false)));
        assert_eq!(run("true || missing").0.value, Some(Value::from(true)));
        assert_eq!(run("true && !false").0.value, Some(Value::from(true)));
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(run("\"apple\" < \"banana\"").0.value, Some(Value::from(true)));
        assert_eq!(run("nil == nil").0.value, Some(Value::from(true)));
        assert_eq!(run("1 == \"1\"").0.value, Some(Value::from(false)));
        assert_eq!(run("3 >= 3").0.value, Some(Value::from(true)));
    }

    #[test]
    fn reports_name_errors() {
        assert_eq!(error_kind("print missing;"), DiagnosticKind::Name);
        assert_eq!(error_kind("z = 1"), DiagnosticKind::Name);
    }

    #[test]
    fn reports_type_errors() {
        assert_eq!(error_kind("1 + \"a\""), DiagnosticKind::Type);
        assert_eq!(error_kind("if 1 { }"), DiagnosticKind::Type);
        assert_eq!(error_kind("-true"), DiagnosticKind::Type);
        assert_eq!(error_kind("1 && true"), DiagnosticKind::Type);
        assert_eq!(error_kind("nil()"), DiagnosticKind::Type);
        assert_eq!(error_kind("fn f(a) { } f()"), DiagnosticKind::Type);
    }

    #[test]
    fn output_before_an_error_is_kept() {
        let (result, out) = run("print 1; print 1 / 0; print 2;");
        assert_eq!(out, "1\n");
        assert!(result.has_errors());
    }

    #[test]
    fn enforces_step_limit() {
        let config = ExecConfig {
            step_limit: Some(1_000),
            ..ExecConfig::default()
        };
        let (result, _) = run_with("while true { }", &config);
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Limit);
        assert_eq!(result.diagnostics[0].message, "step limit of 1000 exceeded");
    }

    #[test]
    fn enforces_call_depth() {
        let config = ExecConfig {
            step_limit: None,
            max_call_depth: 20,
        };
        let (result, _) = run_with("fn r(n) { return r(n + 1); } r(0)", &config);
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Limit);
        assert_eq!(result.diagnostics[0].code, Some("E0404"));
    }

    struct ClosedSink;

    impl Write for ClosedSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("closed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn output_failures_are_io_errors() {
        let result = execute(&program("print 1;"), &mut ClosedSink, &ExecConfig::default());
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Io);
    }

    #[test]
    fn session_keeps_globals_between_runs() {
        let mut session = Session::default();
        let mut out = Vec::new();

        let first = session.run(&program("let x = 1; fn bump() { x = x + 1; return x; }"), &mut out);
        assert!(!first.has_errors());
        let second = session.run(&program("bump(); x"), &mut out);
        assert_eq!(second.value, Some(Value::from(2.0)));

        let failed = session.run(&program("x = 10; let y = 3; missing"), &mut out);
        assert!(failed.has_errors());
        assert_eq!(session.globals().get("x"), Some(Value::from(2.0)));
        assert_eq!(session.globals().get("y"), None);
    }

    #[test]
    fn dropping_a_session_releases_its_scopes() {
        let mut session = Session::default();
        let mut out = Vec::new();
        let result = session.run(
            &program(
                "fn f() { return 1; }\n{ let big = \"x\"; fn g() { return big; } print g(); }\nfn counter() { let n = 0; fn inc() { n = n + 1; return n; } return inc; }\nlet c = counter(); c(); c()",
            ),
            &mut out,
        );
        assert_eq!(result.value, Some(Value::from(2.0)));
        assert_eq!(String::from_utf8(out).unwrap(), "x\n");

        let globals = Rc::downgrade(session.globals());
        drop(session);
        assert!(globals.upgrade().is_none());
    }

    #[test]
    fn closures_stored_outside_their_scope_keep_it() {
        let (result, _) = run(
            "fn outer() { let k = nil; { let n = 3; fn g() { return n; } k = g; } return k(); }\nouter()",
        );
        assert_eq!(result.value, Some(Value::from(3.0)));
    }

    #[test]
    fn functions_compare_by_declaration_and_scope() {
        let (result, out) = run("fn f() { } fn g() { } print f == f; print f == g; let h = f; h == f");
        assert_eq!(out, "true\nfalse\n");
        assert_eq!(result.value, Some(Value::from(true)));
    }

    #[test]
    fn folds_constants_like_the_interpreter() {
        let span = Span::point(FileId(0), 0);
        assert_eq!(
            apply_binary(BinaryOp::Add, Value::from(1.0), Value::from(2.0), span),
            Ok(Value::from(3.0))
        );
        assert!(matches!(
            apply_binary(BinaryOp::Sub, Value::from("a"), Value::from(1.0), span),
            Err(RuntimeError::Type { .. })
        ));
        assert_eq!(
            apply_unary(UnaryOp::Neg, Value::from(2.0), span),
            Ok(Value::from(-2.0))
        );
    }
}
