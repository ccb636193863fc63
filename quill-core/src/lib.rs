//! Core pipeline for the Quill language.
//!
//! The pipeline is roughly:
//!
//!   source .q
//!     -> preprocess  (comments, #define / #ifdef / #include)
//!     -> lexer       (tokens)
//!     -> parser      (AST)
//!     -> interpreter (tree walking, `--execute`)
//!      | compiler    (stack-machine IR, `--compile`)
//!
//! The CLI and any other host should drive the pipeline through
//! [`driver::run`] rather than reimplementing the stage sequencing.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod source;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: preprocessing, lexing and parsing
// ---------------------------------------------------------------------

pub mod preprocess;
pub mod lexer;
pub mod ast;
pub mod parser;

// ---------------------------------------------------------------------
// Back-ends: interpretation and IR emission
// ---------------------------------------------------------------------

pub mod value;
pub mod env;
pub mod interpreter;
pub mod compiler;

// ---------------------------------------------------------------------
// Mode controller
// ---------------------------------------------------------------------

pub mod driver;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{CompileResult, IrProgram, compile};
pub use diagnostic::{Diagnostic, DiagnosticKind, Severity};
pub use driver::{Mode, PipelineConfig, RunOutcome, run};
pub use error::CoreError;
pub use interpreter::{ExecConfig, ExecResult, Session, execute};
pub use source::SourceMap;
pub use value::Value;
