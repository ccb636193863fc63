use std::path::PathBuf;

use thiserror::Error;

/// Host-level failures of the pipeline.
///
/// Problems with the *program* being processed are reported as
/// [`crate::diagnostic::Diagnostic`]s; this type covers everything that
/// prevents the pipeline from running at all.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source {path}: {source}")]
    SourceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write stage output: {0}")]
    Output(#[from] std::io::Error),
    #[error("Unknown mode: {0}")]
    UnknownMode(String),
}
