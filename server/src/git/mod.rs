//! Git blame for single files.
//!
//! This module provides:
//! - Launching git and caching per-repository lookups
//! - Parsing `git blame --incremental` output as it streams in
//! - A per-file handle that runs blame once and can be cancelled

mod error;
mod executor;
mod file;
mod parser;

#[cfg(test)]
pub(crate) mod testing;

pub use error::GitError;
pub use executor::{
    blame_args, read_to_string_lossy, ByteStream, GitCommand, ProcessHandle, ProcessRunner,
    RunningProcess, SpawnOptions, SystemProcessRunner,
};
pub use file::BlamedFile;
pub use parser::{CommitRegistry, IncrementalParser, DEFAULT_TIME_SLICE};
