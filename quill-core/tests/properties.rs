use proptest::prelude::*;

use quill_core::ast::{Block, Expr, ExprKind, Program, Stmt, StmtKind};
use quill_core::compiler::compile;
use quill_core::lexer::{TokenKind, format_tokens, lex};
use quill_core::parser::parse_text;
use quill_core::preprocess::preprocess_str;
use quill_core::span::{FileId, Span};

const FILE: FileId = FileId(0);

const TOKENS: &[&str] = &[
    "let", "fn", "if", "else", "while", "return", "print", "true", "false", "nil", "x", "y",
    "total_2", "_tmp", "0", "12", "3.5", "1e3", "2.5E-2", "\"hi\"", "\"a\\nb\"", "\"\"", "==",
    "!=", "<=", ">=", "&&", "||", "=", "<", ">", "+", "-", "*", "/", "%", "!", "(", ")", "{",
    "}", ",", ";",
];

const SEPARATORS: &[&str] = &[" ", "  ", "\n", "\t", " \n "];

/// Well-formed tokens separated by whitespace, in arbitrary order.
fn token_soup() -> impl Strategy<Value = String> {
    prop::collection::vec(
        (prop::sample::select(TOKENS), prop::sample::select(SEPARATORS)),
        0..40,
    )
    .prop_map(|pairs| {
        let mut text = String::new();
        for (token, separator) in pairs {
            text.push_str(token);
            text.push_str(separator);
        }
        text
    })
}

/// Small programs that parse cleanly.
fn program_text() -> impl Strategy<Value = String> {
    let atom = prop_oneof![
        (0u32..100).prop_map(|n| n.to_string()),
        Just("a".to_string()),
        Just("b".to_string()),
    ];
    let expr = (
        atom.clone(),
        prop::sample::select(&["+", "-", "*", "<", "=="][..]),
        atom,
    )
        .prop_map(|(lhs, op, rhs)| format!("{lhs} {op} {rhs}"));
    prop::collection::vec(
        prop_oneof![
            expr.clone().prop_map(|e| format!("print {e};")),
            expr.clone().prop_map(|e| format!("a = {e};")),
            expr.clone().prop_map(|e| format!("if {e} == {e} {{ b = a; }}")),
            expr.prop_map(|e| format!("fn f() {{ return {e}; }}")),
        ],
        0..8,
    )
    .prop_map(|statements| format!("let a = 1; let b = 2;\n{}", statements.join("\n")))
}

fn within(span: Span, len: usize) -> bool {
    span.start <= span.end && span.end as usize <= len
}

fn check_block(block: &Block, len: usize) -> bool {
    within(block.span, len) && block.statements.iter().all(|stmt| check_stmt(stmt, len))
}

fn check_stmt(stmt: &Stmt, len: usize) -> bool {
    if !within(stmt.span, len) {
        return false;
    }
    match &stmt.kind {
        StmtKind::Let { name, init } => {
            within(name.span, len) && init.as_ref().is_none_or(|e| check_expr(e, len))
        }
        StmtKind::Fn(decl) => {
            within(decl.span, len)
                && decl.params.iter().all(|p| within(p.span, len))
                && check_block(&decl.body, len)
        }
        StmtKind::Expr(expr) | StmtKind::Print(expr) => check_expr(expr, len),
        StmtKind::Block(block) => check_block(block, len),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => {
            check_expr(cond, len)
                && check_block(then_branch, len)
                && else_branch.as_ref().is_none_or(|s| check_stmt(s, len))
        }
        StmtKind::While { cond, body } => check_expr(cond, len) && check_block(body, len),
        StmtKind::Return(value) => value.as_ref().is_none_or(|e| check_expr(e, len)),
        StmtKind::Empty => true,
    }
}

fn check_expr(expr: &Expr, len: usize) -> bool {
    if !within(expr.span, len) {
        return false;
    }
    match &expr.kind {
        ExprKind::Unary { operand, .. } => check_expr(operand, len),
        ExprKind::Binary { lhs, rhs, .. } => check_expr(lhs, len) && check_expr(rhs, len),
        ExprKind::Assign { target, value } => within(target.span, len) && check_expr(value, len),
        ExprKind::Call { callee, args } => {
            check_expr(callee, len) && args.iter().all(|arg| check_expr(arg, len))
        }
        ExprKind::Group(inner) => check_expr(inner, len),
        _ => true,
    }
}

fn check_program(program: &Program, len: usize) -> bool {
    within(program.span, len) && program.statements.iter().all(|stmt| check_stmt(stmt, len))
}

proptest! {
    #[test]
    fn stages_are_deterministic(text in program_text()) {
        let first = parse_text(FILE, &text);
        let second = parse_text(FILE, &text);
        prop_assert!(!first.has_errors(), "{:?}", first.diagnostics);
        prop_assert_eq!(first.program.to_string(), second.program.to_string());

        let tokens = format_tokens(&text, &lex(FILE, &text).tokens);
        prop_assert_eq!(&tokens, &format_tokens(&text, &lex(FILE, &text).tokens));

        let a = compile(&first.program);
        let b = compile(&second.program);
        prop_assert_eq!(
            a.program.map(|ir| ir.to_string()),
            b.program.map(|ir| ir.to_string())
        );
    }

    #[test]
    fn preprocessing_clean_text_is_idempotent(text in "[a-z0-9 +;=(){}\"\n-]{0,80}") {
        let once = preprocess_str(&text).expect("clean text preprocesses");
        prop_assert_eq!(&once, &text);
        let twice = preprocess_str(&once).expect("clean text preprocesses");
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn token_spans_round_trip(text in token_soup()) {
        let lexed = lex(FILE, &text);
        prop_assert!(lexed.diagnostics.is_empty(), "{:?}", lexed.diagnostics);

        let mut cursor = 0usize;
        for token in &lexed.tokens {
            let gap = &text[cursor..token.span.start as usize];
            prop_assert!(gap.chars().all(char::is_whitespace), "gap {:?}", gap);
            cursor = token.span.end as usize;
        }
        prop_assert_eq!(cursor, text.len());

        let joined: Vec<&str> = lexed
            .tokens
            .iter()
            .filter(|token| token.kind != TokenKind::Eof)
            .map(|token| token.text(&text))
            .collect();
        let rebuilt = joined.join(" ");
        let relexed = lex(FILE, &rebuilt);
        let kinds = |tokens: &[quill_core::lexer::Token]| {
            tokens
                .iter()
                .map(|token| (token.kind, token.literal.clone()))
                .collect::<Vec<_>>()
        };
        prop_assert_eq!(kinds(&lexed.tokens), kinds(&relexed.tokens));
    }

    #[test]
    fn ast_spans_stay_in_source(text in token_soup()) {
        let parsed = parse_text(FILE, &text);
        prop_assert!(check_program(&parsed.program, text.len()));
    }

    #[test]
    fn arbitrary_input_never_panics(text in "\\PC{0,60}") {
        let parsed = parse_text(FILE, &text);
        prop_assert!(check_program(&parsed.program, text.len()));
    }
}
