//! Server error handling.

use integrad_core::protocol::ErrorResponse;
use integrad_store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single command. Answered to the client, never fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// The JSON line sent back for this error.
    pub fn to_line(&self) -> String {
        let body = ErrorResponse {
            error: self.to_string(),
        };
        serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"Error":"internal error"}"#.to_string())
    }
}

impl From<integrad_core::Error> for CommandError {
    fn from(err: integrad_core::Error) -> Self {
        match err {
            integrad_core::Error::NotFound(msg) => CommandError::NotFound(msg),
            integrad_core::Error::InvalidInput(msg) => CommandError::BadRequest(msg),
            _ => CommandError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CommandError::NotFound(msg),
            _ => CommandError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(err: serde_json::Error) -> Self {
        CommandError::BadRequest(format!("malformed command: {err}"))
    }
}

/// Failure that stops the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("another daemon is already running on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fatal fault: {0}")]
    Fault(String),
}
