//! Mode controller: runs the pipeline up to the stage a mode asks for and
//! writes that stage's output.
//!
//! Stage output goes to the caller's writer; diagnostics are handed back in
//! [`RunOutcome`] for the caller to render against the [`SourceMap`].

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info_span};

use crate::ast::Program;
use crate::compiler::compile;
use crate::diagnostic::{self, Diagnostic};
use crate::error::CoreError;
use crate::interpreter::{ExecConfig, execute};
use crate::lexer::{format_tokens, lex};
use crate::parser::{ParseResult, parse, parse_text};
use crate::preprocess::{FsIncludeResolver, IncludeResolver, preprocess};
use crate::source::SourceMap;
use crate::span::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Preprocess,
    Tokenize,
    Parse,
    Monolith,
    Execute,
    Compile,
}

impl Mode {
    pub const ALL: [Mode; 6] = [
        Mode::Preprocess,
        Mode::Tokenize,
        Mode::Parse,
        Mode::Monolith,
        Mode::Execute,
        Mode::Compile,
    ];

    pub fn from_flag(flag: &str) -> Result<Mode, CoreError> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.flag() == flag)
            .ok_or_else(|| CoreError::UnknownMode(flag.to_string()))
    }

    pub fn flag(self) -> &'static str {
        match self {
            Mode::Preprocess => "--preprocess",
            Mode::Tokenize => "--tokenize",
            Mode::Parse => "--parse",
            Mode::Monolith => "--monolith",
            Mode::Execute => "--execute",
            Mode::Compile => "--compile",
        }
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(flag: &str) -> Result<Self, Self::Err> {
        Mode::from_flag(flag)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Settings for one pipeline run, built by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Extra directories searched by `#include` after the including file's
    /// own directory.
    pub include_dirs: Vec<PathBuf>,
    pub exec: ExecConfig,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub has_errors: bool,
}

impl RunOutcome {
    fn new(diagnostics: Vec<Diagnostic>) -> Self {
        let has_errors = diagnostic::has_errors(&diagnostics);
        RunOutcome {
            diagnostics,
            has_errors,
        }
    }
}

/// Run `mode` on `file`, resolving includes from the filesystem.
pub fn run(
    mode: Mode,
    sources: &mut SourceMap,
    file: FileId,
    config: &PipelineConfig,
    out: &mut dyn Write,
) -> Result<RunOutcome, CoreError> {
    let resolver = FsIncludeResolver::new(config.include_dirs.clone());
    run_with_resolver(mode, sources, file, &resolver, &config.exec, out)
}

pub fn run_with_resolver(
    mode: Mode,
    sources: &mut SourceMap,
    file: FileId,
    resolver: &dyn IncludeResolver,
    exec: &ExecConfig,
    out: &mut dyn Write,
) -> Result<RunOutcome, CoreError> {
    let name = sources
        .get(file)
        .map(|source| source.name().to_string())
        .unwrap_or_default();
    let span = info_span!("pipeline", mode = mode.flag(), file = %name);
    let _guard = span.enter();

    let monolith = mode == Mode::Monolith;
    let mut diagnostics = Vec::new();

    let preprocessed = match preprocess(sources, file, resolver) {
        Ok(preprocessed) => preprocessed,
        Err(error) => {
            diagnostics.push(error);
            return Ok(RunOutcome::new(diagnostics));
        }
    };
    let cleaned = preprocessed.file_id;
    let text = sources
        .get(cleaned)
        .map(|source| source.text().to_string())
        .unwrap_or_default();

    if mode == Mode::Preprocess || monolith {
        header(out, monolith, "preprocess")?;
        write_text(out, &text)?;
        if !monolith {
            return Ok(RunOutcome::new(diagnostics));
        }
    }

    let parsed = if mode == Mode::Tokenize || monolith {
        let lexed = lex(cleaned, &text);
        debug!(
            tokens = lexed.tokens.len(),
            errors = diagnostic::error_count(&lexed.diagnostics),
            "tokenized"
        );
        header(out, monolith, "tokens")?;
        out.write_all(format_tokens(&text, &lexed.tokens).as_bytes())?;
        diagnostics.extend(lexed.diagnostics);
        if !monolith {
            return Ok(RunOutcome::new(diagnostics));
        }
        parse(cleaned, &text, lexed.tokens)
    } else {
        let parsed = parse_text(cleaned, &text);
        debug!(
            statements = parsed.program.statements.len(),
            errors = diagnostic::error_count(&parsed.diagnostics),
            "parsed"
        );
        parsed
    };
    let ParseResult {
        program,
        diagnostics: parse_diagnostics,
    } = parsed;
    diagnostics.extend(parse_diagnostics);

    if mode == Mode::Parse || monolith {
        header(out, monolith, "ast")?;
        writeln!(out, "{program}")?;
        if !monolith {
            return Ok(RunOutcome::new(diagnostics));
        }
    }

    if diagnostic::has_errors(&diagnostics) {
        debug!("front-end errors; skipping back ends");
        return Ok(RunOutcome::new(diagnostics));
    }

    if mode == Mode::Execute || monolith {
        header(out, monolith, "execute")?;
        diagnostics.extend(run_interpreter(&program, exec, out)?);
    }

    if mode == Mode::Compile || monolith {
        header(out, monolith, "compile")?;
        let compiled = compile(&program);
        if let Some(ir) = &compiled.program {
            write!(out, "{ir}")?;
        }
        diagnostics.extend(compiled.diagnostics);
    }

    Ok(RunOutcome::new(diagnostics))
}

fn run_interpreter(
    program: &Program,
    exec: &ExecConfig,
    out: &mut dyn Write,
) -> Result<Vec<Diagnostic>, CoreError> {
    let result = execute(program, out, exec);
    if let Some(value) = &result.value {
        if !value.is_nil() {
            writeln!(out, "{value}")?;
        }
    }
    Ok(result.diagnostics)
}

fn header(out: &mut dyn Write, monolith: bool, stage: &str) -> std::io::Result<()> {
    if monolith {
        writeln!(out, "== {stage} ==")?;
    }
    Ok(())
}

fn write_text(out: &mut dyn Write, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.is_empty() && !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use crate::preprocess::MemoryIncludes;

    fn run_source(mode: Mode, source: &str) -> (String, RunOutcome, SourceMap) {
        run_with_includes(mode, source, &MemoryIncludes::new())
    }

    fn run_with_includes(
        mode: Mode,
        source: &str,
        includes: &MemoryIncludes,
    ) -> (String, RunOutcome, SourceMap) {
        let mut sources = SourceMap::new();
        let file = sources.add("main.q", source);
        let mut out = Vec::new();
        let outcome = run_with_resolver(
            mode,
            &mut sources,
            file,
            includes,
            &ExecConfig::default(),
            &mut out,
        )
        .expect("pipeline runs");
        (String::from_utf8(out).expect("utf8 output"), outcome, sources)
    }

    #[test]
    fn parses_mode_flags() {
        for mode in Mode::ALL {
            assert_eq!(Mode::from_flag(mode.flag()).unwrap(), mode);
        }
        let err = Mode::from_flag("--foo").unwrap_err();
        assert_eq!(err.to_string(), "Unknown mode: --foo");
        assert!("execute".parse::<Mode>().is_err());
    }

    #[test]
    fn execute_prints_result() {
        let (out, outcome, _) = run_source(Mode::Execute, "1 + 2 * 3");
        assert_eq!(out, "7\n");
        assert!(!outcome.has_errors);
    }

    #[test]
    fn execute_prints_output_but_not_nil() {
        let (out, _, _) = run_source(Mode::Execute, "print \"hello\";");
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn execute_reports_division_by_zero_without_result() {
        let (out, outcome, sources) = run_source(Mode::Execute, "1 / 0");
        assert_eq!(out, "");
        assert!(outcome.has_errors);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(
            outcome.diagnostics[0].render(&sources),
            "error[E0403]: ArithmeticError: division by zero at main.q:1:1"
        );
    }

    #[test]
    fn parse_prints_partial_tree() {
        let (out, outcome, _) = run_source(Mode::Parse, "x = 1; x = x +");
        assert_eq!(out, "(program\n  (expr (= x 1)))\n");
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::Parse);
    }

    #[test]
    fn tokenize_keeps_tokens_before_bad_string() {
        let (out, outcome, _) = run_source(Mode::Tokenize, "say \"hi");
        assert!(out.starts_with("0..3       ident    say\n"));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::Lex);
    }

    #[test]
    fn preprocess_prints_cleaned_text() {
        let (out, outcome, _) = run_source(Mode::Preprocess, "#define N 3\nprint N; // three");
        assert_eq!(out, "\nprint 3;         \n");
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn preprocess_errors_stop_the_pipeline() {
        let (out, outcome, _) = run_source(Mode::Execute, "#ifdef X\nprint 1;\n");
        assert_eq!(out, "");
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::Preprocess);
    }

    #[test]
    fn parse_errors_suppress_backends() {
        let (out, outcome, _) = run_source(Mode::Execute, "print 1; print (");
        assert_eq!(out, "");
        assert!(outcome.has_errors);

        let (out, _, _) = run_source(Mode::Compile, "print 1; print (");
        assert_eq!(out, "");
    }

    #[test]
    fn compile_prints_listing() {
        let (out, outcome, _) = run_source(Mode::Compile, "print 1;");
        assert!(out.starts_with("constants:\n  #0 = 1\n  #1 = nil\nfn 0 <main>"));
        assert!(!outcome.has_errors);
    }

    #[test]
    fn monolith_prints_every_stage() {
        let (out, outcome, _) = run_source(Mode::Monolith, "print 2 * 4;");
        let headers: Vec<&str> = out.lines().filter(|line| line.starts_with("== ")).collect();
        assert_eq!(
            headers,
            vec![
                "== preprocess ==",
                "== tokens ==",
                "== ast ==",
                "== execute ==",
                "== compile ==",
            ]
        );
        assert!(out.contains("== execute ==\n8\n== compile ==\n"));
        assert!(!outcome.has_errors);
    }

    #[test]
    fn monolith_reports_lexer_errors_once() {
        let (out, outcome, _) = run_source(Mode::Monolith, "print 1 $ 2;");
        assert_eq!(
            outcome
                .diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::Lex)
                .count(),
            1
        );
        assert!(!out.contains("== execute =="));
    }

    #[test]
    fn includes_resolve_and_locate() {
        let includes =
            MemoryIncludes::new().with_file("lib.q", "fn twice(x) { return x * 2; }\n");
        let (out, _, _) = run_with_includes(
            Mode::Execute,
            "#include \"lib.q\"\nprint twice(2);",
            &includes,
        );
        assert_eq!(out, "4\n");

        let (_, outcome, sources) = run_source(Mode::Execute, "#define Z 0\nprint 1 / Z;");
        assert_eq!(
            outcome.diagnostics[0].render(&sources),
            "error[E0403]: ArithmeticError: division by zero at main.q:2:7"
        );
    }

    #[test]
    fn end_of_input_is_located_in_the_source_file() {
        let (_, outcome, sources) = run_source(Mode::Parse, "let a = 1;\nprint a +\n");
        assert_eq!(
            outcome.diagnostics[0].render(&sources),
            "error[E0301]: ParseError: expected expression, found end of input at main.q:3:1"
        );
    }

    #[test]
    fn columns_survive_macro_expansion() {
        let (_, outcome, sources) =
            run_source(Mode::Execute, "#define LONGNAME 1\nprint LONGNAME + missing;\n");
        assert_eq!(
            outcome.diagnostics[0].render(&sources),
            "error[E0401]: NameError: undefined variable 'missing' at main.q:2:18"
        );
    }
}
