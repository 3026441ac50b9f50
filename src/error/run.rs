use std::path::PathBuf;

use thiserror::Error;

use crate::domain::RunStatus;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to create workspace '{path}': {source}")]
    CreateWorkspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write properties file '{path}': {source}")]
    WriteProperties {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to open output log '{path}': {source}")]
    OpenOutputLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Run '{run_id}' not found.")]
    RunNotFound { run_id: String },
    #[error("Result artifact '{path}' not found.")]
    ResultNotFound { path: PathBuf },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed result artifact at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Result artifact is missing column '{column}'.")]
    MissingColumn { column: &'static str },
    #[error("Run '{run_id}' cannot move from {from} to {to}.")]
    IllegalTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
}
