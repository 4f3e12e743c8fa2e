//! Error types for git blame operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while running git for a file.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Will not blame '{0}': not accessible or outside any git repository")]
    NotTrackable(PathBuf),

    #[error("Git process reported an error: {0}")]
    ProcessError(String),

    #[error("Blame was cancelled")]
    Killed,

    #[error("Git command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Whether this error is an expected outcome rather than a failure.
    pub fn is_quiet(&self) -> bool {
        matches!(self, GitError::Killed | GitError::NotTrackable(_))
    }
}
