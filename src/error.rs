use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to start '{program}': {reason}")]
    SpawnError { program: String, reason: String },

    #[error("Cannot write to stdin: {0}")]
    StdinWriteError(String),

    #[error("Session not found for ID: {0}")]
    SessionNotFound(String),

    #[error("Session cannot be closed: {0}")]
    SessionNotClosable(String),
}
