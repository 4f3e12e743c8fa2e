//! Git Blame LSP Server Library
//!
//! Keeps `git blame --incremental` results for open files, parsed as the
//! output streams in, with a bounded number of git processes at a time.
//! Cached results are dropped when a file or its repository's `HEAD` changes.

pub mod backend;
pub mod cache;
pub mod config;
pub mod custom_requests;
pub mod error;
pub mod git;
pub mod handlers;
pub mod queue;
pub mod watcher;

pub use backend::BlameBackend;
pub use cache::Blamer;
pub use config::BlameSettings;
pub use error::ServerError;
pub use queue::BlameQueue;
