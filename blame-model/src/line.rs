//! Line attribution types

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::commit::Commit;

/// A line's number in the blamed-from revision (`source`) and in the
/// current file (`result`). Both are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub source: u32,
    pub result: u32,
}

impl Line {
    pub fn new(source: u32, result: u32) -> Self {
        Self { source, result }
    }
}

/// A commit together with the file name it was found under.
///
/// The file name differs from the blamed path when the lines were moved
/// or copied from another file (`-C`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachedCommit {
    pub commit: Arc<Commit>,
    pub filename: Arc<str>,
}

impl FileAttachedCommit {
    pub fn new(commit: Arc<Commit>) -> Self {
        Self {
            commit,
            filename: Arc::from(""),
        }
    }
}

/// The commit that last touched one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineAttachedCommit {
    pub commit: Arc<Commit>,
    pub filename: Arc<str>,
    pub line: Line,
}

impl LineAttachedCommit {
    pub fn new(attached: &FileAttachedCommit, line: Line) -> Self {
        Self {
            commit: Arc::clone(&attached.commit),
            filename: Arc::clone(&attached.filename),
            line,
        }
    }
}
