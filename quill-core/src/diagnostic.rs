//! Diagnostics shared by every pipeline stage.
//!
//! Stages never print. They return [`Diagnostic`] values next to their
//! output and let the caller decide how to render them. Codes are stable
//! and grouped by stage:
//!
//! | range   | stage        |
//! |---------|--------------|
//! | `E00xx` | usage / host |
//! | `E01xx` | preprocessor |
//! | `E02xx` | lexer        |
//! | `E03xx` | parser       |
//! | `E04xx` | interpreter  |
//! | `E05xx` | compiler     |

use std::fmt;

use crate::source::SourceMap;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Error taxonomy of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Usage,
    Preprocess,
    Lex,
    Parse,
    Name,
    Type,
    Arithmetic,
    /// Execution budget (steps or call depth) exhausted.
    Limit,
    Io,
    /// Statements that can never run.
    Unreachable,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::Usage => "UsageError",
            DiagnosticKind::Preprocess => "PreprocessError",
            DiagnosticKind::Lex => "LexError",
            DiagnosticKind::Parse => "ParseError",
            DiagnosticKind::Name => "NameError",
            DiagnosticKind::Type => "TypeError",
            DiagnosticKind::Arithmetic => "ArithmeticError",
            DiagnosticKind::Limit => "LimitError",
            DiagnosticKind::Io => "IoError",
            DiagnosticKind::Unreachable => "UnreachableCode",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub code: Option<&'static str>,
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Error,
            kind,
            code: None,
            message: message.into(),
            span,
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, span: Span) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            kind,
            code: None,
            message: message.into(),
            span,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Render as `<severity>[<code>]: <Kind>: <message> at <file>:<line>:<col>`.
    pub fn render(&self, sources: &SourceMap) -> String {
        let location = sources.locate(self.span);
        match self.code {
            Some(code) => format!(
                "{}[{}]: {}: {} at {}",
                self.severity,
                code,
                self.kind,
                self.message,
                location
            ),
            None => format!(
                "{}: {}: {} at {}",
                self.severity,
                self.kind,
                self.message,
                location
            ),
        }
    }
}

/// Returns true if any diagnostic in `diagnostics` is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Count of error-severity diagnostics.
pub fn error_count(diagnostics: &[Diagnostic]) -> usize {
    diagnostics.iter().filter(|d| d.is_error()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_location_and_code() {
        let mut sources = SourceMap::new();
        let file = sources.add("demo.q", "1 / 0");
        let diag = Diagnostic::error(
            DiagnosticKind::Arithmetic,
            "division by zero",
            Span::new(file, 0, 5),
        )
        .with_code("E0403");
        assert_eq!(
            diag.render(&sources),
            "error[E0403]: ArithmeticError: division by zero at demo.q:1:1"
        );
    }

    #[test]
    fn warnings_are_not_errors() {
        let span = Span::point(crate::span::FileId(0), 0);
        let diags = vec![
            Diagnostic::warning(DiagnosticKind::Parse, "empty statement", span),
            Diagnostic::error(DiagnosticKind::Parse, "expected expression", span),
        ];
        assert!(has_errors(&diags));
        assert_eq!(error_count(&diags), 1);
        assert!(!has_errors(&diags[..1]));
    }
}
