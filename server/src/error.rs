//! Error types for the blame language server.

use crate::git::GitError;
use crate::watcher::WatchError;
use thiserror::Error;

/// Errors that can occur while serving LSP requests.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ServerError> for tower_lsp::jsonrpc::Error {
    fn from(err: ServerError) -> Self {
        let code = match &err {
            ServerError::InvalidUri(_) | ServerError::InvalidParams(_) => {
                tower_lsp::jsonrpc::ErrorCode::InvalidParams
            }
            _ => tower_lsp::jsonrpc::ErrorCode::InternalError,
        };

        tower_lsp::jsonrpc::Error {
            code,
            message: err.to_string().into(),
            data: None,
        }
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
