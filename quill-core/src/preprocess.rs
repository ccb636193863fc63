//! Textual preprocessing pass.
//!
//! Runs before the lexer and produces the cleaned text the rest of the
//! pipeline sees:
//!
//! - `//` and `/* */` comments are blanked out (every comment byte becomes
//!   a space, newlines are kept) so offsets stay put;
//! - directive lines (`#define`, `#undef`, `#ifdef`, `#ifndef`, `#else`,
//!   `#endif`, `#include`) are interpreted and replaced by empty lines;
//! - object-like macros are substituted whole-word outside strings;
//! - included files are spliced in place of their `#include` line.
//!
//! The output is registered in the [`SourceMap`] as a derived file with one
//! [`LineOrigin`] per line, so later diagnostics resolve to the file, line
//! and column the user actually wrote. Lines changed by macro substitution
//! carry [`Shift`]s that map their columns back. Text without comments or directives passes
//! through unchanged.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::source::{LineOrigin, Shift, SourceMap};
use crate::span::{FileId, Span};

/// Includes nested deeper than this are rejected.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// A file returned by an [`IncludeResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedFile {
    /// Name used for diagnostics and cycle detection.
    pub name: String,
    pub text: String,
}

/// Looks up the target of an `#include "path"` directive.
pub trait IncludeResolver {
    /// `from` is the name of the including file.
    fn resolve(&self, from: &str, path: &str) -> Option<IncludedFile>;
}

/// Resolver that rejects every include.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncludes;

impl IncludeResolver for NoIncludes {
    fn resolve(&self, _from: &str, _path: &str) -> Option<IncludedFile> {
        None
    }
}

/// Resolver backed by an in-memory table of `path -> text`.
#[derive(Debug, Default, Clone)]
pub struct MemoryIncludes {
    files: HashMap<String, String>,
}

impl MemoryIncludes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }
}

impl IncludeResolver for MemoryIncludes {
    fn resolve(&self, _from: &str, path: &str) -> Option<IncludedFile> {
        self.files.get(path).map(|text| IncludedFile {
            name: path.to_string(),
            text: text.clone(),
        })
    }
}

/// Resolver reading from disk.
///
/// Relative paths are tried against the including file's directory first,
/// then against each search directory in order.
#[derive(Debug, Default, Clone)]
pub struct FsIncludeResolver {
    search_dirs: Vec<PathBuf>,
}

impl FsIncludeResolver {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        FsIncludeResolver { search_dirs }
    }
}

impl IncludeResolver for FsIncludeResolver {
    fn resolve(&self, from: &str, path: &str) -> Option<IncludedFile> {
        let requested = Path::new(path);
        let mut candidates = Vec::new();
        if requested.is_absolute() {
            candidates.push(requested.to_path_buf());
        } else {
            if let Some(parent) = Path::new(from).parent() {
                candidates.push(parent.join(requested));
            }
            candidates.extend(self.search_dirs.iter().map(|dir| dir.join(requested)));
        }

        candidates.into_iter().find_map(|candidate| {
            trace!(candidate = %candidate.display(), "trying include candidate");
            let text = fs::read_to_string(&candidate).ok()?;
            Some(IncludedFile {
                name: candidate.display().to_string(),
                text,
            })
        })
    }
}

/// Result of preprocessing one entry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preprocessed {
    /// The cleaned text, registered as a derived file.
    pub file_id: FileId,
    /// Files pulled in through `#include`, in inclusion order.
    pub includes: Vec<FileId>,
    /// Macros still defined at the end of the entry file.
    pub macros: Vec<String>,
}

/// Preprocess `file` and register the cleaned output in `sources`.
pub fn preprocess(
    sources: &mut SourceMap,
    file: FileId,
    resolver: &dyn IncludeResolver,
) -> Result<Preprocessed, Diagnostic> {
    let mut pp = Preprocessor {
        sources,
        resolver,
        macros: BTreeMap::new(),
        out: String::new(),
        origins: Vec::new(),
        stack: Vec::new(),
        includes: Vec::new(),
    };
    pp.process_file(file)?;
    pp.mark_end(file);

    let name = match pp.sources.get(file) {
        Some(source) => format!("{} (preprocessed)", source.name()),
        None => "<preprocessed>".to_string(),
    };
    let Preprocessor {
        sources,
        macros,
        out,
        origins,
        includes,
        ..
    } = pp;
    debug!(
        lines = origins.len(),
        bytes = out.len(),
        macros = macros.len(),
        includes = includes.len(),
        "preprocessed source"
    );
    let file_id = sources.add_derived(name, out, origins);
    Ok(Preprocessed {
        file_id,
        includes,
        macros: macros.into_keys().collect(),
    })
}

/// Preprocess a standalone string without include support.
pub fn preprocess_str(text: &str) -> Result<String, Diagnostic> {
    let mut sources = SourceMap::new();
    let file = sources.add("<input>", text);
    let result = preprocess(&mut sources, file, &NoIncludes)?;
    Ok(sources
        .get(result.file_id)
        .map(|file| file.text().to_string())
        .unwrap_or_default())
}

struct Conditional {
    active: bool,
    parent_active: bool,
    seen_else: bool,
    span: Span,
}

struct Preprocessor<'a> {
    sources: &'a mut SourceMap,
    resolver: &'a dyn IncludeResolver,
    macros: BTreeMap<String, String>,
    out: String,
    origins: Vec<LineOrigin>,
    stack: Vec<FileId>,
    includes: Vec<FileId>,
}

impl Preprocessor<'_> {
    fn process_file(&mut self, file_id: FileId) -> Result<(), Diagnostic> {
        let Some(source) = self.sources.get(file_id) else {
            return Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                "unknown source file",
                Span::point(file_id, 0),
            )
            .with_code("E0100"));
        };
        let text = strip_comments(file_id, source.text())?;
        self.stack.push(file_id);

        let mut conditions: Vec<Conditional> = Vec::new();
        let mut line_start = 0usize;
        for (index, raw_line) in text.split_inclusive('\n').enumerate() {
            let line_no = index as u32 + 1;
            let (body, newline) = match raw_line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (raw_line, ""),
            };
            let active = conditions.last().is_none_or(|c| c.active);
            let trimmed = body.trim_start();

            if let Some(directive) = trimmed.strip_prefix('#') {
                let hash_offset = line_start + (body.len() - trimmed.len());
                let span = Span::new(
                    file_id,
                    hash_offset as u32,
                    (line_start + body.trim_end().len()) as u32,
                );
                let spliced =
                    self.directive(file_id, directive, span, active, &mut conditions)?;
                if !spliced {
                    self.emit(newline, file_id, line_no);
                }
            } else if active {
                let (expanded, shifts) = expand_macros(body, &self.macros);
                self.out.push_str(&expanded);
                self.out.push_str(newline);
                self.origins.push(LineOrigin {
                    file_id,
                    line: line_no,
                    shifts,
                });
            } else {
                self.emit(newline, file_id, line_no);
            }
            line_start += raw_line.len();
        }

        self.stack.pop();
        if let Some(open) = conditions.pop() {
            return Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                "unterminated conditional directive: missing #endif",
                open.span,
            )
            .with_code("E0103"));
        }
        if !self.out.is_empty() && !self.out.ends_with('\n') && !self.stack.is_empty() {
            // An included file without a trailing newline must not glue its
            // last line to the includer's next line.
            self.out.push('\n');
        }
        Ok(())
    }

    /// When the output ends on a line break, the empty line after it (where
    /// the parser reports end of input) maps to the end of the entry file.
    fn mark_end(&mut self, file_id: FileId) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            return;
        }
        let Some(source) = self.sources.get(file_id) else {
            return;
        };
        let end = source.len();
        let (line, _) = source.line_col(end);
        let line_start = source.line_start(line).unwrap_or(end);
        self.origins.push(LineOrigin {
            file_id,
            line,
            shifts: vec![Shift {
                derived: 0,
                origin: end - line_start,
                verbatim: false,
            }],
        });
    }

    fn emit(&mut self, newline: &str, file_id: FileId, line: u32) {
        self.out.push_str(newline);
        self.origins.push(LineOrigin::new(file_id, line));
    }

    /// Handle one directive. Returns true when the directive spliced an
    /// included file in place of its own line.
    fn directive(
        &mut self,
        file_id: FileId,
        directive: &str,
        span: Span,
        active: bool,
        conditions: &mut Vec<Conditional>,
    ) -> Result<bool, Diagnostic> {
        let directive = directive.trim();
        let (name, rest) = match directive.find(char::is_whitespace) {
            Some(split) => (&directive[..split], directive[split..].trim()),
            None => (directive, ""),
        };

        match name {
            "ifdef" | "ifndef" => {
                let macro_name = expect_identifier(name, rest, span)?;
                let defined = self.macros.contains_key(macro_name);
                let wanted = if name == "ifdef" { defined } else { !defined };
                conditions.push(Conditional {
                    active: active && wanted,
                    parent_active: active,
                    seen_else: false,
                    span,
                });
                return Ok(false);
            }
            "else" => {
                let Some(top) = conditions.last_mut() else {
                    return Err(stray(span, "#else without matching #ifdef"));
                };
                if top.seen_else {
                    return Err(stray(span, "duplicate #else in conditional"));
                }
                top.seen_else = true;
                top.active = top.parent_active && !top.active;
                return Ok(false);
            }
            "endif" => {
                if conditions.pop().is_none() {
                    return Err(stray(span, "#endif without matching #ifdef"));
                }
                return Ok(false);
            }
            _ => {}
        }

        if !active {
            return Ok(false);
        }

        match name {
            "define" => {
                let (macro_name, body) = match rest.find(char::is_whitespace) {
                    Some(split) => (&rest[..split], rest[split..].trim()),
                    None => (rest, ""),
                };
                let macro_name = expect_identifier(name, macro_name, span)?;
                let (body, _) = expand_macros(body, &self.macros);
                trace!(name = macro_name, body = %body, "define macro");
                self.macros.insert(macro_name.to_string(), body);
                Ok(false)
            }
            "undef" => {
                let macro_name = expect_identifier(name, rest, span)?;
                self.macros.remove(macro_name);
                Ok(false)
            }
            "include" => {
                self.include(file_id, rest, span)?;
                Ok(true)
            }
            "" => Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                "expected directive name after '#'",
                span,
            )
            .with_code("E0101")),
            other => Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                format!("unknown directive #{other}"),
                span,
            )
            .with_code("E0101")),
        }
    }

    fn include(&mut self, file_id: FileId, rest: &str, span: Span) -> Result<(), Diagnostic> {
        let path = rest
            .strip_prefix('"')
            .and_then(|tail| tail.strip_suffix('"'))
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                Diagnostic::error(
                    DiagnosticKind::Preprocess,
                    "expected #include \"path\"",
                    span,
                )
                .with_code("E0102")
            })?;

        if self.stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                format!("include depth exceeds {MAX_INCLUDE_DEPTH}"),
                span,
            )
            .with_code("E0105"));
        }

        let from = self
            .sources
            .get(file_id)
            .map(|file| file.name().to_string())
            .unwrap_or_default();
        let included = self.resolver.resolve(&from, path).ok_or_else(|| {
            Diagnostic::error(
                DiagnosticKind::Preprocess,
                format!("unresolved include \"{path}\""),
                span,
            )
            .with_code("E0104")
        })?;

        let recursive = self.stack.iter().any(|open| {
            self.sources
                .get(*open)
                .is_some_and(|file| file.name() == included.name)
        });
        if recursive {
            return Err(Diagnostic::error(
                DiagnosticKind::Preprocess,
                format!("recursive include of \"{path}\""),
                span,
            )
            .with_code("E0105"));
        }

        trace!(path, resolved = %included.name, "splicing include");
        let included_id = self.sources.add(included.name, included.text);
        self.includes.push(included_id);
        self.process_file(included_id)
    }
}

fn stray(span: Span, message: &str) -> Diagnostic {
    Diagnostic::error(DiagnosticKind::Preprocess, message, span).with_code("E0103")
}

fn expect_identifier<'t>(directive: &str, text: &'t str, span: Span) -> Result<&'t str, Diagnostic> {
    let mut chars = text.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(text)
    } else {
        Err(Diagnostic::error(
            DiagnosticKind::Preprocess,
            format!("#{directive} expects a macro name"),
            span,
        )
        .with_code("E0102"))
    }
}

/// Replace comments by spaces, leaving strings and newlines untouched.
fn strip_comments(file_id: FileId, text: &str) -> Result<String, Diagnostic> {
    enum State {
        Code,
        Str,
        LineComment,
        BlockComment(usize),
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        match state {
            State::Code => match ch {
                '"' => {
                    state = State::Str;
                    out.push(ch);
                }
                '/' if chars.peek().is_some_and(|&(_, next)| next == '/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek().is_some_and(|&(_, next)| next == '*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment(index);
                }
                _ => out.push(ch),
            },
            State::Str => {
                out.push(ch);
                match ch {
                    '\\' => {
                        if let Some(&(_, next)) = chars.peek() {
                            if next != '\n' {
                                out.push(next);
                                chars.next();
                            }
                        }
                    }
                    '"' | '\n' => state = State::Code,
                    _ => {}
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    out.push('\n');
                    state = State::Code;
                } else {
                    blank(&mut out, ch);
                }
            }
            State::BlockComment(_) => {
                if ch == '*' && chars.peek().is_some_and(|&(_, next)| next == '/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if ch == '\n' {
                    out.push('\n');
                } else {
                    blank(&mut out, ch);
                }
            }
        }
    }

    if let State::BlockComment(start) = state {
        return Err(Diagnostic::error(
            DiagnosticKind::Preprocess,
            "unterminated block comment",
            Span::new(file_id, start as u32, text.len() as u32),
        )
        .with_code("E0106"));
    }
    Ok(out)
}

/// One space per byte of `ch`.
fn blank(out: &mut String, ch: char) {
    for _ in 0..ch.len_utf8() {
        out.push(' ');
    }
}

/// Substitute macro names in `line`, skipping string literals and numbers.
/// Returns the expanded line and the shifts mapping it back onto `line`.
fn expand_macros(line: &str, macros: &BTreeMap<String, String>) -> (String, Vec<Shift>) {
    let mut shifts = Vec::new();
    if macros.is_empty() {
        return (line.to_string(), shifts);
    }

    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut index = 0;
    while index < bytes.len() {
        let ch = bytes[index];
        if ch == b'"' {
            let start = index;
            index += 1;
            while index < bytes.len() && bytes[index] != b'"' {
                if bytes[index] == b'\\' {
                    index += 1;
                }
                index += 1;
            }
            index = (index + 1).min(bytes.len());
            out.push_str(&line[start..index]);
        } else if ch.is_ascii_digit() {
            let start = index;
            while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'.' || bytes[index] == b'_') {
                index += 1;
            }
            out.push_str(&line[start..index]);
        } else if ch.is_ascii_alphabetic() || ch == b'_' {
            let start = index;
            while index < bytes.len() && (bytes[index].is_ascii_alphanumeric() || bytes[index] == b'_') {
                index += 1;
            }
            let word = &line[start..index];
            match macros.get(word) {
                Some(replacement) => {
                    shifts.push(Shift {
                        derived: out.len() as u32,
                        origin: start as u32,
                        verbatim: false,
                    });
                    out.push_str(replacement);
                    shifts.push(Shift {
                        derived: out.len() as u32,
                        origin: index as u32,
                        verbatim: true,
                    });
                }
                None => out.push_str(word),
            }
        } else {
            let start = index;
            index += 1;
            while index < bytes.len() && !line.is_char_boundary(index) {
                index += 1;
            }
            out.push_str(&line[start..index]);
        }
    }
    (out, shifts)
}
