//! Lexer for Quill.
//!
//! [`tokenize`] returns a lazy [`Lexer`]: each call to `next()` scans one
//! more token, and the sequence always ends with exactly one
//! [`TokenKind::Eof`]. Lexing the same text twice yields the same tokens.
//!
//! Malformed input never stops the lexer. The offending character (or the
//! rest of a broken literal) is skipped, a diagnostic is recorded, and
//! scanning resumes, so one run can report several problems.

use std::fmt;

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::span::{FileId, Span};

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Keyword(Keyword),
    Operator(Operator),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Fn,
    If,
    Else,
    While,
    Return,
    Print,
    True,
    False,
    Nil,
}

impl Keyword {
    pub fn from_ident(text: &str) -> Option<Keyword> {
        let keyword = match text {
            "let" => Keyword::Let,
            "fn" => Keyword::Fn,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "return" => Keyword::Return,
            "print" => Keyword::Print,
            "true" => Keyword::True,
            "false" => Keyword::False,
            "nil" => Keyword::Nil,
            _ => return None,
        };
        Some(keyword)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Let => "let",
            Keyword::Fn => "fn",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Return => "return",
            Keyword::Print => "print",
            Keyword::True => "true",
            Keyword::False => "false",
            Keyword::Nil => "nil",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Assign,    // =
    EqEq,      // ==
    NotEq,     // !=
    Less,      // <
    LessEq,    // <=
    Greater,   // >
    GreaterEq, // >=
    Bang,      // !
    AndAnd,    // &&
    OrOr,      // ||
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Star => "*",
            Operator::Slash => "/",
            Operator::Percent => "%",
            Operator::Assign => "=",
            Operator::EqEq => "==",
            Operator::NotEq => "!=",
            Operator::Less => "<",
            Operator::LessEq => "<=",
            Operator::Greater => ">",
            Operator::GreaterEq => ">=",
            Operator::Bang => "!",
            Operator::AndAnd => "&&",
            Operator::OrOr => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen, // (
    RParen, // )
    LBrace, // {
    RBrace, // }
    Comma,  // ,
    Semi,   // ;
}

impl Punct {
    pub fn as_str(self) -> &'static str {
        match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::Comma => ",",
            Punct::Semi => ";",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident => f.write_str("identifier"),
            TokenKind::Number => f.write_str("number"),
            TokenKind::Str => f.write_str("string"),
            TokenKind::Keyword(keyword) => write!(f, "'{}'", keyword.as_str()),
            TokenKind::Operator(op) => write!(f, "'{}'", op.as_str()),
            TokenKind::Punct(punct) => write!(f, "'{}'", punct.as_str()),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

/// Decoded value of a literal token.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
}

/// A single token with its kind and span.
///
/// Identifier and keyword text is not copied; higher layers slice the
/// source with `span` when they need it.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub literal: Option<Literal>,
}

impl Token {
    pub fn text<'src>(&self, source: &'src str) -> &'src str {
        source.get(self.span.range()).unwrap_or("")
    }
}

/// Result of lexing a whole source string eagerly.
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<Token>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Start lazily tokenizing `source`.
pub fn tokenize(file_id: FileId, source: &str) -> Lexer<'_> {
    Lexer {
        file_id,
        source,
        chars: source.as_bytes(),
        len: source.len(),
        index: 0,
        diagnostics: Vec::new(),
        finished: false,
    }
}

/// Lex a source string into a token vector.
pub fn lex(file_id: FileId, source: &str) -> LexResult {
    let mut lexer = tokenize(file_id, source);
    let tokens: Vec<Token> = lexer.by_ref().collect();
    LexResult {
        tokens,
        diagnostics: lexer.into_diagnostics(),
    }
}

/// Render tokens one per line: span, kind, source text and decoded value.
pub fn format_tokens(source: &str, tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let label = match token.kind {
            TokenKind::Ident => "ident",
            TokenKind::Number => "number",
            TokenKind::Str => "string",
            TokenKind::Keyword(_) => "keyword",
            TokenKind::Operator(_) => "operator",
            TokenKind::Punct(_) => "punct",
            TokenKind::Eof => "eof",
        };
        let span = format!("{}", token.span);
        let line = match &token.literal {
            Some(Literal::Number(value)) => {
                format!("{span:<10} {label:<8} {} = {value}", token.text(source))
            }
            Some(Literal::Str(value)) => {
                format!("{span:<10} {label:<8} {} = {value:?}", token.text(source))
            }
            None => format!("{span:<10} {label:<8} {}", token.text(source)),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Lazy token stream over one source text.
pub struct Lexer<'src> {
    file_id: FileId,
    source: &'src str,
    chars: &'src [u8],
    len: usize,
    index: usize,
    diagnostics: Vec<Diagnostic>,
    finished: bool,
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.finished {
            return None;
        }
        loop {
            let Some(ch) = self.peek_char() else {
                self.finished = true;
                let end = self.len as u32;
                return Some(Token {
                    kind: TokenKind::Eof,
                    span: Span::point(self.file_id, end),
                    literal: None,
                });
            };
            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }
            let start = self.index as u32;
            if let Some(token) = self.scan(ch, start) {
                return Some(token);
            }
        }
    }
}

impl<'src> Lexer<'src> {
    /// Diagnostics recorded so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn scan(&mut self, ch: u8, start: u32) -> Option<Token> {
        match ch {
            b'(' => self.single(TokenKind::Punct(Punct::LParen), start),
            b')' => self.single(TokenKind::Punct(Punct::RParen), start),
            b'{' => self.single(TokenKind::Punct(Punct::LBrace), start),
            b'}' => self.single(TokenKind::Punct(Punct::RBrace), start),
            b',' => self.single(TokenKind::Punct(Punct::Comma), start),
            b';' => self.single(TokenKind::Punct(Punct::Semi), start),
            b'+' => self.single(TokenKind::Operator(Operator::Plus), start),
            b'-' => self.single(TokenKind::Operator(Operator::Minus), start),
            b'*' => self.single(TokenKind::Operator(Operator::Star), start),
            b'/' => self.single(TokenKind::Operator(Operator::Slash), start),
            b'%' => self.single(TokenKind::Operator(Operator::Percent), start),
            b'=' => self.one_or_two(b'=', Operator::Assign, Operator::EqEq, start),
            b'!' => self.one_or_two(b'=', Operator::Bang, Operator::NotEq, start),
            b'<' => self.one_or_two(b'=', Operator::Less, Operator::LessEq, start),
            b'>' => self.one_or_two(b'=', Operator::Greater, Operator::GreaterEq, start),
            b'&' | b'|' => {
                if self.peek_next() == Some(ch) {
                    self.consume_char();
                    let op = if ch == b'&' {
                        Operator::AndAnd
                    } else {
                        Operator::OrOr
                    };
                    self.single(TokenKind::Operator(op), start)
                } else {
                    self.consume_char();
                    let doubled = if ch == b'&' { "&&" } else { "||" };
                    self.unexpected_char(start, Some(doubled))
                }
            }
            b'"' => self.lex_string(start),
            b'0'..=b'9' => self.lex_number(start),
            _ if is_ident_start(ch) => self.lex_ident_or_keyword(start),
            _ => {
                self.consume_utf8_char();
                self.unexpected_char(start, None)
            }
        }
    }

    fn single(&mut self, kind: TokenKind, start: u32) -> Option<Token> {
        self.consume_char();
        self.simple_token(kind, start)
    }

    fn one_or_two(&mut self, second: u8, one: Operator, two: Operator, start: u32) -> Option<Token> {
        self.consume_char();
        if self.peek_char() == Some(second) {
            self.consume_char();
            self.simple_token(TokenKind::Operator(two), start)
        } else {
            self.simple_token(TokenKind::Operator(one), start)
        }
    }

    fn simple_token(&self, kind: TokenKind, start: u32) -> Option<Token> {
        Some(Token {
            kind,
            span: Span::new(self.file_id, start, self.index as u32),
            literal: None,
        })
    }

    fn unexpected_char(&mut self, start: u32, hint: Option<&str>) -> Option<Token> {
        let span = Span::new(self.file_id, start, self.index as u32);
        let text = &self.source[span.range()];
        let message = match hint {
            Some(hint) => format!("unexpected character '{text}' (did you mean '{hint}'?)"),
            None => format!("unexpected character '{text}'"),
        };
        self.diagnostics
            .push(Diagnostic::error(DiagnosticKind::Lex, message, span).with_code("E0201"));
        None
    }

    fn lex_string(&mut self, start: u32) -> Option<Token> {
        // Opening quote
        self.consume_char();

        let mut value = String::new();
        loop {
            match self.peek_char() {
                None | Some(b'\n') => break,
                Some(b'"') => {
                    self.consume_char();
                    return Some(Token {
                        kind: TokenKind::Str,
                        span: Span::new(self.file_id, start, self.index as u32),
                        literal: Some(Literal::Str(value)),
                    });
                }
                Some(b'\\') => {
                    let escape_start = self.index as u32;
                    self.consume_char();
                    let Some(next) = self.peek_char() else { break };
                    if next == b'\n' {
                        break;
                    }
                    let decoded = match next {
                        b'n' => Some('\n'),
                        b't' => Some('\t'),
                        b'r' => Some('\r'),
                        b'0' => Some('\0'),
                        b'\\' => Some('\\'),
                        b'"' => Some('"'),
                        _ => None,
                    };
                    match decoded {
                        Some(c) => {
                            self.consume_char();
                            value.push(c);
                        }
                        None => {
                            let c = self.consume_utf8_char();
                            let span = Span::new(self.file_id, escape_start, self.index as u32);
                            self.diagnostics.push(
                                Diagnostic::warning(
                                    DiagnosticKind::Lex,
                                    format!("unknown escape sequence '\\{c}'"),
                                    span,
                                )
                                .with_code("E0204"),
                            );
                            value.push(c);
                        }
                    }
                }
                Some(_) => {
                    let c = self.consume_utf8_char();
                    value.push(c);
                }
            }
        }

        // Unterminated: the string runs to the end of the line.
        let span = Span::new(self.file_id, start, self.index as u32);
        self.diagnostics.push(
            Diagnostic::error(DiagnosticKind::Lex, "unterminated string literal", span)
                .with_code("E0202"),
        );
        None
    }

    fn lex_number(&mut self, start: u32) -> Option<Token> {
        self.consume_digits();

        if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char(); // '.'
            self.consume_digits();
        }

        let mut malformed = false;
        if matches!(self.peek_char(), Some(b'e' | b'E')) {
            let exponent_at = self.index;
            self.consume_char();
            if matches!(self.peek_char(), Some(b'+' | b'-')) {
                self.consume_char();
            }
            if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.consume_digits();
            } else {
                malformed = true;
                // Leave a dangling sign for the next token if there was one.
                if self.index > exponent_at + 1 && !self.peek_char().is_some_and(is_ident_continue) {
                    self.index = exponent_at + 1;
                }
            }
        }

        if self.peek_char().is_some_and(is_ident_continue) {
            malformed = true;
        }
        if malformed {
            while self
                .peek_char()
                .is_some_and(|c| is_ident_continue(c) || c == b'.')
            {
                self.consume_char();
            }
            let span = Span::new(self.file_id, start, self.index as u32);
            let text = &self.source[span.range()];
            self.diagnostics.push(
                Diagnostic::error(
                    DiagnosticKind::Lex,
                    format!("invalid numeric literal '{text}'"),
                    span,
                )
                .with_code("E0203"),
            );
            return None;
        }

        let span = Span::new(self.file_id, start, self.index as u32);
        let text = &self.source[span.range()];
        match text.parse::<f64>() {
            Ok(value) => Some(Token {
                kind: TokenKind::Number,
                span,
                literal: Some(Literal::Number(value)),
            }),
            Err(_) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        DiagnosticKind::Lex,
                        format!("invalid numeric literal '{text}'"),
                        span,
                    )
                    .with_code("E0203"),
                );
                None
            }
        }
    }

    fn lex_ident_or_keyword(&mut self, start: u32) -> Option<Token> {
        while self.peek_char().is_some_and(is_ident_continue) {
            self.consume_char();
        }

        let span = Span::new(self.file_id, start, self.index as u32);
        let kind = match Keyword::from_ident(&self.source[span.range()]) {
            Some(keyword) => TokenKind::Keyword(keyword),
            None => TokenKind::Ident,
        };
        Some(Token {
            kind,
            span,
            literal: None,
        })
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
        }
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.len {
            self.index += 1;
        }
    }

    /// Consume one whole UTF-8 character and return it.
    fn consume_utf8_char(&mut self) -> char {
        match self.source[self.index..].chars().next() {
            Some(c) => {
                self.index += c.len_utf8();
                c
            }
            None => '\0',
        }
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}
