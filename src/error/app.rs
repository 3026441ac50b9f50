use thiserror::Error;

use super::{AgentError, ConfigError, RunError, StoreError, ValidationError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Run error: {0}")]
    Run(#[from] RunError),
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Background task '{task}' is no longer running.")]
    TaskGone { task: &'static str },
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure categories surfaced to callers at the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Io,
    Launch,
    NotFound,
    Parse,
    State,
    Remote,
    Store,
    Config,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::Launch => "launch",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Parse => "parse",
            ErrorKind::State => "state",
            ErrorKind::Remote => "remote",
            ErrorKind::Store => "store",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }

    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::State => 409,
            ErrorKind::Parse => 422,
            ErrorKind::Remote => 502,
            ErrorKind::Io
            | ErrorKind::Launch
            | ErrorKind::Store
            | ErrorKind::Config
            | ErrorKind::Internal => 500,
        }
    }
}

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn run<E>(error: E) -> Self
    where
        E: Into<RunError>,
    {
        error.into().into()
    }

    pub fn agent<E>(error: E) -> Self
    where
        E: Into<AgentError>,
    {
        error.into().into()
    }

    pub fn store<E>(error: E) -> Self
    where
        E: Into<StoreError>,
    {
        error.into().into()
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Clap { .. } | AppError::Json { .. } => {
                ErrorKind::Validation
            }
            AppError::Config(_) => ErrorKind::Config,
            AppError::Store(_) => ErrorKind::Store,
            AppError::Io { .. } => ErrorKind::Io,
            AppError::Join { .. } | AppError::TaskGone { .. } => ErrorKind::Internal,
            AppError::Run(err) => match err {
                RunError::CreateWorkspace { .. }
                | RunError::WriteProperties { .. }
                | RunError::OpenOutputLog { .. }
                | RunError::Io { .. }
                | RunError::Wait { .. } => ErrorKind::Io,
                RunError::Launch { .. } => ErrorKind::Launch,
                RunError::RunNotFound { .. } | RunError::ResultNotFound { .. } => {
                    ErrorKind::NotFound
                }
                RunError::Parse { .. } | RunError::MissingColumn { .. } => ErrorKind::Parse,
                RunError::IllegalTransition { .. } => ErrorKind::State,
            },
            AppError::Agent(err) => match err {
                AgentError::NotFound { .. } => ErrorKind::NotFound,
                AgentError::IllegalTransition { .. }
                | AgentError::NotRunning { .. }
                | AgentError::HostNotRunning { .. } => {
                    ErrorKind::State
                }
                AgentError::Transport { .. }
                | AgentError::Remote { .. }
                | AgentError::ReadinessTimeout { .. } => ErrorKind::Remote,
            },
        }
    }
}
