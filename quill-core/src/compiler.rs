//! Stack-machine IR emission behind `--compile`.
//!
//! Single pass over the AST. Names are resolved through a [`SymbolTable`]
//! owned by the run: names declared in the `<main>` frame become global
//! slots, names declared inside a function become local slots of that
//! function. The first semantic error aborts emission.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::ast::{BinaryOp, Block, Expr, ExprKind, FnDecl, Program, Stmt, StmtKind, UnaryOp, format_number};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::interpreter::{RuntimeError, apply_binary, apply_unary};
use crate::span::Span;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
}

impl Constant {
    /// Pool identity: numbers compare by bit pattern so `0` and `-0` stay
    /// distinct entries.
    fn same(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Number(value) => f.write_str(&format_number(*value)),
            Constant::Str(value) => write!(f, "{value:?}"),
            Constant::Bool(value) => write!(f, "{value}"),
            Constant::Nil => f.write_str("nil"),
        }
    }
}

/// One stack-machine instruction. Jump targets are absolute instruction
/// indices within the enclosing function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    PushConst(u32),
    LoadGlobal(u32),
    StoreGlobal(u32),
    LoadLocal(u32),
    StoreLocal(u32),
    /// Push a function value for `functions[index]`.
    MakeFunction(u32),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Jump(u32),
    /// Pop a condition and jump when it is `false`.
    JumpIfFalse(u32),
    Pop,
    Print,
    /// Call with the given number of arguments above the callee.
    Call(u32),
    Return,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushConst(index) => write!(f, "push_const #{index}"),
            Instruction::LoadGlobal(slot) => write!(f, "load_global @{slot}"),
            Instruction::StoreGlobal(slot) => write!(f, "store_global @{slot}"),
            Instruction::LoadLocal(slot) => write!(f, "load_local %{slot}"),
            Instruction::StoreLocal(slot) => write!(f, "store_local %{slot}"),
            Instruction::MakeFunction(index) => write!(f, "make_function {index}"),
            Instruction::Unary(op) => write!(f, "unary {}", op.as_str()),
            Instruction::Binary(op) => write!(f, "binary {}", op.as_str()),
            Instruction::Jump(target) => write!(f, "jump {target}"),
            Instruction::JumpIfFalse(target) => write!(f, "jump_if_false {target}"),
            Instruction::Pop => f.write_str("pop"),
            Instruction::Print => f.write_str("print"),
            Instruction::Call(argc) => write!(f, "call {argc}"),
            Instruction::Return => f.write_str("return"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub arity: u32,
    /// Local slot names; parameters occupy the first `arity` slots.
    pub locals: Vec<String>,
    pub code: Vec<Instruction>,
}

impl IrFunction {
    pub fn slots(&self) -> usize {
        self.locals.len()
    }
}

/// Compiled program. `functions[0]` is `<main>`.
#[derive(Debug, Clone, PartialEq)]
pub struct IrProgram {
    pub constants: Vec<Constant>,
    pub globals: Vec<String>,
    pub functions: Vec<IrFunction>,
}

pub const MAIN_FUNCTION: &str = "<main>";

impl IrProgram {
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|function| function.code.len()).sum()
    }

    fn note(&self, function: &IrFunction, instruction: Instruction) -> Option<String> {
        match instruction {
            Instruction::PushConst(index) => self
                .constants
                .get(index as usize)
                .map(|constant| constant.to_string()),
            Instruction::LoadGlobal(slot) | Instruction::StoreGlobal(slot) => {
                self.globals.get(slot as usize).cloned()
            }
            Instruction::LoadLocal(slot) | Instruction::StoreLocal(slot) => {
                function.locals.get(slot as usize).cloned()
            }
            Instruction::MakeFunction(index) => self
                .functions
                .get(index as usize)
                .map(|function| function.name.clone()),
            _ => None,
        }
    }
}

/// Stable listing printed by `--compile`.
impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.constants.is_empty() {
            writeln!(f, "constants:")?;
            for (index, constant) in self.constants.iter().enumerate() {
                writeln!(f, "  #{index} = {constant}")?;
            }
        }
        if !self.globals.is_empty() {
            writeln!(f, "globals:")?;
            for (slot, name) in self.globals.iter().enumerate() {
                writeln!(f, "  @{slot} = {name}")?;
            }
        }
        for (index, function) in self.functions.iter().enumerate() {
            writeln!(
                f,
                "fn {index} {} (arity {}, locals {}):",
                function.name,
                function.arity,
                function.slots()
            )?;
            for (pc, instruction) in function.code.iter().enumerate() {
                write!(f, "  {pc:04}  {instruction}")?;
                if let Some(note) = self.note(function, *instruction) {
                    write!(f, "  ; {note}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Symbol table
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Global(u32),
    Local(u32),
    /// A local of an enclosing function other than the current one.
    Captured,
}

#[derive(Debug)]
struct Frame {
    scopes: Vec<HashMap<String, u32>>,
    slots: Vec<String>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            scopes: vec![HashMap::new()],
            slots: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> Option<u32> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }
}

/// Name-to-slot mapping for one compilation run: a stack of function frames,
/// each holding a stack of block scopes. Frame 0 is `<main>`.
#[derive(Debug)]
pub struct SymbolTable {
    frames: Vec<Frame>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            frames: vec![Frame::new()],
        }
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::new());
    }

    /// Leave the current function frame, returning its slot names.
    pub fn pop_frame(&mut self) -> Vec<String> {
        if self.frames.len() > 1 {
            self.frames.pop().map(|frame| frame.slots).unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn push_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.scopes.push(HashMap::new());
        }
    }

    pub fn pop_scope(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            if frame.scopes.len() > 1 {
                frame.scopes.pop();
            }
        }
    }

    pub fn in_main(&self) -> bool {
        self.frames.len() == 1
    }

    /// Declare `name` in the innermost scope. Redeclaring a name in the same
    /// scope reuses its slot; shadowing in an inner scope takes a new one.
    pub fn declare(&mut self, name: &str) -> Symbol {
        let in_main = self.in_main();
        let Some(frame) = self.frames.last_mut() else {
            return Symbol::Captured;
        };
        let existing = frame.scopes.last().and_then(|scope| scope.get(name).copied());
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let slot = frame.slots.len() as u32;
                frame.slots.push(name.to_string());
                if let Some(scope) = frame.scopes.last_mut() {
                    scope.insert(name.to_string(), slot);
                }
                slot
            }
        };
        if in_main {
            Symbol::Global(slot)
        } else {
            Symbol::Local(slot)
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        let (main, rest) = self.frames.split_first()?;
        if let Some((current, enclosing)) = rest.split_last() {
            if let Some(slot) = current.lookup(name) {
                return Some(Symbol::Local(slot));
            }
            if enclosing.iter().any(|frame| frame.lookup(name).is_some()) {
                return Some(Symbol::Captured);
            }
        }
        main.lookup(name).map(Symbol::Global)
    }

    /// Slot names of the `<main>` frame.
    pub fn globals(&self) -> &[String] {
        self.frames.first().map(|frame| frame.slots.as_slice()).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------

#[derive(Debug)]
pub struct CompileResult {
    /// `None` when a semantic error aborted emission.
    pub program: Option<IrProgram>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileResult {
    pub fn has_errors(&self) -> bool {
        crate::diagnostic::has_errors(&self.diagnostics)
    }
}

pub fn compile(program: &Program) -> CompileResult {
    let mut compiler = Compiler::new();
    let outcome = compiler.program(program);
    let mut diagnostics = compiler.warnings;
    match outcome {
        Ok(()) => {
            let ir = IrProgram {
                constants: compiler.constants,
                globals: compiler.symbols.globals().to_vec(),
                functions: compiler.functions,
            };
            debug!(
                functions = ir.functions.len(),
                constants = ir.constants.len(),
                instructions = ir.instruction_count(),
                "compiled program"
            );
            CompileResult {
                program: Some(ir),
                diagnostics,
            }
        }
        Err(error) => {
            debug!(code = ?error.code, "compilation aborted");
            diagnostics.push(error);
            CompileResult {
                program: None,
                diagnostics,
            }
        }
    }
}

struct Compiler {
    symbols: SymbolTable,
    constants: Vec<Constant>,
    functions: Vec<IrFunction>,
    current: usize,
    warnings: Vec<Diagnostic>,
}

impl Compiler {
    fn new() -> Self {
        Compiler {
            symbols: SymbolTable::new(),
            constants: Vec::new(),
            functions: vec![IrFunction {
                name: MAIN_FUNCTION.to_string(),
                arity: 0,
                locals: Vec::new(),
                code: Vec::new(),
            }],
            current: 0,
            warnings: Vec::new(),
        }
    }

    fn program(&mut self, program: &Program) -> Result<(), Diagnostic> {
        // Top-level functions are bound before any statement runs. Their
        // bodies are compiled after `<main>` so they can see every global.
        let mut hoisted = Vec::new();
        for stmt in &program.statements {
            if let StmtKind::Fn(decl) = &stmt.kind {
                let symbol = self.symbols.declare(&decl.name.name);
                let index = self.reserve_function(decl);
                self.emit(Instruction::MakeFunction(index));
                self.emit_store(symbol);
                hoisted.push((index, decl));
            }
        }

        let count = program.statements.len();
        let mut keeps_value = false;
        for (position, stmt) in program.statements.iter().enumerate() {
            match &stmt.kind {
                StmtKind::Fn(_) => {}
                StmtKind::Expr(expr) if position + 1 == count => {
                    self.expr(expr)?;
                    keeps_value = true;
                }
                _ => self.stmt(stmt)?,
            }
        }
        if !keeps_value {
            self.push_const(Constant::Nil);
        }
        self.emit(Instruction::Return);

        for (index, decl) in hoisted {
            self.function_body(index, decl)?;
        }
        Ok(())
    }

    fn reserve_function(&mut self, decl: &FnDecl) -> u32 {
        self.functions.push(IrFunction {
            name: decl.name.name.clone(),
            arity: decl.params.len() as u32,
            locals: Vec::new(),
            code: Vec::new(),
        });
        (self.functions.len() - 1) as u32
    }

    fn function_body(&mut self, index: u32, decl: &FnDecl) -> Result<(), Diagnostic> {
        let saved = std::mem::replace(&mut self.current, index as usize);
        self.symbols.push_frame();
        for param in &decl.params {
            self.symbols.declare(&param.name);
        }
        self.statements(&decl.body.statements)?;
        self.push_const(Constant::Nil);
        self.emit(Instruction::Return);
        let locals = self.symbols.pop_frame();
        self.functions[index as usize].locals = locals;
        self.current = saved;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    fn statements(&mut self, statements: &[Stmt]) -> Result<(), Diagnostic> {
        let mut returned = false;
        let mut warned = false;
        for stmt in statements {
            if returned && !warned && stmt.kind != StmtKind::Empty {
                self.warnings.push(
                    Diagnostic::warning(
                        DiagnosticKind::Unreachable,
                        "unreachable statement",
                        stmt.span,
                    )
                    .with_code("E0505"),
                );
                warned = true;
            }
            self.stmt(stmt)?;
            if matches!(stmt.kind, StmtKind::Return(_)) {
                returned = true;
            }
        }
        Ok(())
    }

    fn block(&mut self, block: &Block) -> Result<(), Diagnostic> {
        self.symbols.push_scope();
        let result = self.statements(&block.statements);
        self.symbols.pop_scope();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), Diagnostic> {
        match &stmt.kind {
            StmtKind::Let { name, init } => {
                match init {
                    Some(init) => self.expr(init)?,
                    None => self.push_const(Constant::Nil),
                }
                let symbol = self.symbols.declare(&name.name);
                self.emit_store(symbol);
            }
            StmtKind::Fn(decl) => {
                let symbol = self.symbols.declare(&decl.name.name);
                let index = self.reserve_function(decl);
                self.function_body(index, decl)?;
                self.emit(Instruction::MakeFunction(index));
                self.emit_store(symbol);
            }
            StmtKind::Expr(expr) => {
                self.expr(expr)?;
                self.emit(Instruction::Pop);
            }
            StmtKind::Block(block) => self.block(block)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond)?;
                let skip_then = self.emit(Instruction::JumpIfFalse(0));
                self.block(then_branch)?;
                match else_branch {
                    Some(else_branch) => {
                        let skip_else = self.emit(Instruction::Jump(0));
                        self.patch(skip_then);
                        self.stmt(else_branch)?;
                        self.patch(skip_else);
                    }
                    None => self.patch(skip_then),
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.here();
                self.expr(cond)?;
                let exit = self.emit(Instruction::JumpIfFalse(0));
                self.block(body)?;
                self.emit(Instruction::Jump(start));
                self.patch(exit);
            }
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.push_const(Constant::Nil),
                }
                self.emit(Instruction::Return);
            }
            StmtKind::Print(expr) => {
                self.expr(expr)?;
                self.emit(Instruction::Print);
            }
            StmtKind::Empty => {}
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> Result<(), Diagnostic> {
        match &expr.kind {
            ExprKind::Number(value) => self.push_const(Constant::Number(*value)),
            ExprKind::Str(value) => self.push_const(Constant::Str(value.clone())),
            ExprKind::Bool(value) => self.push_const(Constant::Bool(*value)),
            ExprKind::Nil => self.push_const(Constant::Nil),
            ExprKind::Ident(name) => {
                let symbol = self.resolve(name, expr.span)?;
                self.emit_load(symbol);
            }
            ExprKind::Group(inner) => self.expr(inner)?,
            ExprKind::Unary { op, operand } => {
                if let Some(value) = literal_value(operand) {
                    apply_unary(*op, value, expr.span).map_err(static_error)?;
                }
                self.expr(operand)?;
                self.emit(Instruction::Unary(*op));
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_short_circuit() => {
                self.logical(*op, lhs, rhs)?;
            }
            ExprKind::Binary { op, lhs, rhs } => {
                check_binary(*op, lhs, rhs, expr.span)?;
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(Instruction::Binary(*op));
            }
            ExprKind::Assign { target, value } => {
                self.expr(value)?;
                let symbol = self.resolve(&target.name, target.span)?;
                self.emit_store(symbol);
                self.emit_load(symbol);
            }
            ExprKind::Call { callee, args } => {
                if callee.is_literal() {
                    return Err(Diagnostic::error(
                        DiagnosticKind::Type,
                        "cannot call a literal value",
                        callee.span,
                    )
                    .with_code("E0503"));
                }
                self.expr(callee)?;
                for arg in args {
                    self.expr(arg)?;
                }
                self.emit(Instruction::Call(args.len() as u32));
            }
        }
        Ok(())
    }

    /// `a && b`: a; jump_if_false F; b; jump END; F: false; END.
    /// `a || b`: a; jump_if_false R; true; jump END; R: b; END.
    fn logical(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), Diagnostic> {
        self.expr(lhs)?;
        let branch = self.emit(Instruction::JumpIfFalse(0));
        if op == BinaryOp::And {
            self.expr(rhs)?;
            let end = self.emit(Instruction::Jump(0));
            self.patch(branch);
            self.push_const(Constant::Bool(false));
            self.patch(end);
        } else {
            self.push_const(Constant::Bool(true));
            let end = self.emit(Instruction::Jump(0));
            self.patch(branch);
            self.expr(rhs)?;
            self.patch(end);
        }
        Ok(())
    }

    fn resolve(&self, name: &str, span: Span) -> Result<Symbol, Diagnostic> {
        match self.symbols.resolve(name) {
            Some(Symbol::Captured) => Err(Diagnostic::error(
                DiagnosticKind::Name,
                format!(
                    "'{name}' is a local of an enclosing function (capture not supported)"
                ),
                span,
            )
            .with_code("E0502")),
            Some(symbol) => Ok(symbol),
            None => Err(Diagnostic::error(
                DiagnosticKind::Name,
                format!("undefined variable '{name}'"),
                span,
            )
            .with_code("E0501")),
        }
    }

    // -----------------------------------------------------------------
    // Code buffer
    // -----------------------------------------------------------------

    fn code(&mut self) -> &mut Vec<Instruction> {
        &mut self.functions[self.current].code
    }

    fn here(&mut self) -> u32 {
        self.code().len() as u32
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        let code = self.code();
        code.push(instruction);
        code.len() - 1
    }

    /// Point the jump at `at` to the next instruction to be emitted.
    fn patch(&mut self, at: usize) {
        let target = self.here();
        if let Some(Instruction::Jump(slot) | Instruction::JumpIfFalse(slot)) =
            self.code().get_mut(at)
        {
            *slot = target;
        }
    }

    fn push_const(&mut self, constant: Constant) {
        let index = match self.constants.iter().position(|c| c.same(&constant)) {
            Some(index) => index,
            None => {
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        self.emit(Instruction::PushConst(index as u32));
    }

    fn emit_load(&mut self, symbol: Symbol) {
        let instruction = match symbol {
            Symbol::Global(slot) => Instruction::LoadGlobal(slot),
            Symbol::Local(slot) => Instruction::LoadLocal(slot),
            Symbol::Captured => return,
        };
        self.emit(instruction);
    }

    fn emit_store(&mut self, symbol: Symbol) {
        let instruction = match symbol {
            Symbol::Global(slot) => Instruction::StoreGlobal(slot),
            Symbol::Local(slot) => Instruction::StoreLocal(slot),
            Symbol::Captured => return,
        };
        self.emit(instruction);
    }
}

fn literal_value(expr: &Expr) -> Option<Value> {
    match &expr.ungroup().kind {
        ExprKind::Number(value) => Some(Value::Number(*value)),
        ExprKind::Str(value) => Some(Value::from(value.as_str())),
        ExprKind::Bool(value) => Some(Value::Bool(*value)),
        ExprKind::Nil => Some(Value::Nil),
        _ => None,
    }
}

fn check_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, span: Span) -> Result<(), Diagnostic> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) {
        if let ExprKind::Number(divisor) = &rhs.ungroup().kind {
            if *divisor == 0.0 {
                let what = if op == BinaryOp::Div { "division" } else { "modulo" };
                return Err(static_error(RuntimeError::DivisionByZero { what, span }));
            }
        }
    }
    if let (Some(left), Some(right)) = (literal_value(lhs), literal_value(rhs)) {
        apply_binary(op, left, right, span).map_err(static_error)?;
    }
    Ok(())
}

/// Re-code an evaluation error found while checking constant operands.
fn static_error(error: RuntimeError) -> Diagnostic {
    let code = match error.kind() {
        DiagnosticKind::Arithmetic => "E0504",
        _ => "E0503",
    };
    Diagnostic::error(error.kind(), error.to_string(), error.span()).with_code(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_text;
    use crate::span::FileId;

    fn compile_source(source: &str) -> CompileResult {
        let parsed = parse_text(FileId(0), source);
        assert!(
            !parsed.has_errors(),
            "unexpected parse errors: {:?}",
            parsed.diagnostics
        );
        compile(&parsed.program)
    }

    fn ir(source: &str) -> IrProgram {
        let result = compile_source(source);
        assert!(!result.has_errors(), "unexpected errors: {:?}", result.diagnostics);
        result.program.unwrap()
    }

    fn error(source: &str) -> Diagnostic {
        let result = compile_source(source);
        assert!(result.program.is_none());
        result.diagnostics.into_iter().find(Diagnostic::is_error).unwrap()
    }

    #[test]
    fn lists_arithmetic() {
        let listing = ir("1 + 2 * 3").to_string();
        assert_eq!(
            listing,
            "constants:\n\
             \x20 #0 = 1\n\
             \x20 #1 = 2\n\
             \x20 #2 = 3\n\
             fn 0 <main> (arity 0, locals 0):\n\
             \x20 0000  push_const #0  ; 1\n\
             \x20 0001  push_const #1  ; 2\n\
             \x20 0002  push_const #2  ; 3\n\
             \x20 0003  binary *\n\
             \x20 0004  binary +\n\
             \x20 0005  return\n"
        );
    }

    #[test]
    fn lists_functions_and_globals() {
        let listing = ir("let x = 1;\nfn double(n) { return n * 2; }\nprint double(x);").to_string();
        let expected = [
            "constants:",
            "  #0 = 1",
            "  #1 = nil",
            "  #2 = 2",
            "globals:",
            "  @0 = double",
            "  @1 = x",
            "fn 0 <main> (arity 0, locals 0):",
            "  0000  make_function 1  ; double",
            "  0001  store_global @0  ; double",
            "  0002  push_const #0  ; 1",
            "  0003  store_global @1  ; x",
            "  0004  load_global @0  ; double",
            "  0005  load_global @1  ; x",
            "  0006  call 1",
            "  0007  print",
            "  0008  push_const #1  ; nil",
            "  0009  return",
            "fn 1 double (arity 1, locals 1):",
            "  0000  load_local %0  ; n",
            "  0001  push_const #2  ; 2",
            "  0002  binary *",
            "  0003  return",
            "  0004  push_const #1  ; nil",
            "  0005  return",
        ];
        assert_eq!(listing, format!("{}\n", expected.join("\n")));
    }

    #[test]
    fn short_circuit_layout() {
        let program = ir("true && false");
        assert_eq!(
            program.functions[0].code,
            vec![
                Instruction::PushConst(0),
                Instruction::JumpIfFalse(4),
                Instruction::PushConst(1),
                Instruction::Jump(5),
                Instruction::PushConst(1),
                Instruction::Return,
            ]
        );

        let program = ir("false || true");
        assert_eq!(
            program.functions[0].code,
            vec![
                Instruction::PushConst(0),
                Instruction::JumpIfFalse(4),
                Instruction::PushConst(1),
                Instruction::Jump(5),
                Instruction::PushConst(1),
                Instruction::Return,
            ]
        );
    }

    #[test]
    fn loops_jump_back_to_condition() {
        let program = ir("let i = 0; while i < 3 { i = i + 1; }");
        let code = &program.functions[0].code;
        assert_eq!(code[5], Instruction::JumpIfFalse(13));
        assert_eq!(code[12], Instruction::Jump(2));
        assert_eq!(code.len(), 15);
    }

    #[test]
    fn if_else_patches_both_branches() {
        let program = ir("let x = 1; if x > 0 { print 1; } else { print 2; }");
        let code = &program.functions[0].code;
        assert_eq!(code[5], Instruction::JumpIfFalse(9));
        assert_eq!(code[8], Instruction::Jump(11));
    }

    #[test]
    fn functions_see_globals_declared_later() {
        let program = ir("fn f() { return g; } let g = 1; f()");
        assert_eq!(program.globals, vec!["f".to_string(), "g".to_string()]);
        assert_eq!(program.functions[1].code[0], Instruction::LoadGlobal(1));
    }

    #[test]
    fn nested_functions_get_their_own_entries() {
        let program = ir("fn outer() { fn inner(v) { return v; } return inner(1); } outer()");
        let names: Vec<&str> = program.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["<main>", "outer", "inner"]);
        assert_eq!(program.functions[1].locals, vec!["inner".to_string()]);
        assert_eq!(program.functions[2].arity, 1);
    }

    #[test]
    fn redeclaration_reuses_slot_and_blocks_shadow() {
        let program = ir("let x = 1; let x = 2; { let x = 3; }");
        assert_eq!(program.globals, vec!["x".to_string(), "x".to_string()]);
    }

    #[test]
    fn reports_undefined_names() {
        let diagnostic = error("print y;");
        assert_eq!(diagnostic.kind, DiagnosticKind::Name);
        assert_eq!(diagnostic.code, Some("E0501"));
        assert_eq!(error("{ let a = 1; } a").kind, DiagnosticKind::Name);
        assert_eq!(error("z = 1").kind, DiagnosticKind::Name);
    }

    #[test]
    fn rejects_captures() {
        let diagnostic =
            error("fn outer() { let a = 1; fn inner() { return a; } return inner; }");
        assert_eq!(diagnostic.code, Some("E0502"));
        assert!(diagnostic.message.contains("capture not supported"));
    }

    #[test]
    fn reports_literal_type_errors() {
        assert_eq!(error("1 + \"a\"").kind, DiagnosticKind::Type);
        assert_eq!(error("-\"s\"").kind, DiagnosticKind::Type);
        assert_eq!(error("!1").kind, DiagnosticKind::Type);
        let call = error("\"a\"()");
        assert_eq!(call.kind, DiagnosticKind::Type);
        assert_eq!(call.code, Some("E0503"));
    }

    #[test]
    fn reports_division_by_literal_zero() {
        let diagnostic = error("let x = 4; x / 0");
        assert_eq!(diagnostic.kind, DiagnosticKind::Arithmetic);
        assert_eq!(diagnostic.code, Some("E0504"));
        assert_eq!(error("1 % (0)").kind, DiagnosticKind::Arithmetic);
    }

    #[test]
    fn warns_about_unreachable_statements() {
        let result = compile_source("fn f() { return 1; print 2; print 3; }");
        assert!(result.program.is_some());
        assert_eq!(result.diagnostics.len(), 1);
        assert!(!result.diagnostics[0].is_error());
        assert_eq!(result.diagnostics[0].kind, DiagnosticKind::Unreachable);
        assert_eq!(result.diagnostics[0].code, Some("E0505"));
    }

    #[test]
    fn emission_is_deterministic() {
        let source = "fn fib(n) { if n < 2 { return n; } return fib(n - 1) + fib(n - 2); }\nprint fib(10);";
        assert_eq!(ir(source).to_string(), ir(source).to_string());
    }

    #[test]
    fn symbol_table_frames() {
        let mut symbols = SymbolTable::new();
        assert_eq!(symbols.declare("g"), Symbol::Global(0));
        symbols.push_frame();
        assert_eq!(symbols.declare("a"), Symbol::Local(0));
        symbols.push_frame();
        assert_eq!(symbols.resolve("a"), Some(Symbol::Captured));
        assert_eq!(symbols.resolve("g"), Some(Symbol::Global(0)));
        assert_eq!(symbols.resolve("missing"), None);
        symbols.pop_frame();
        assert_eq!(symbols.resolve("a"), Some(Symbol::Local(0)));
        assert_eq!(symbols.pop_frame(), vec!["a".to_string()]);
        assert!(symbols.in_main());
    }
}
