//! Blame Model
//!
//! Data types describing which commit last touched each line of a file,
//! as reported by `git blame --incremental`.
//!
//! ## Overview
//!
//! - [`Commit`] / [`CommitAuthor`] - commit metadata, shared between every
//!   line the commit owns
//! - [`Line`] - a line's position in the historical and current revision
//! - [`FileAttachedCommit`] / [`LineAttachedCommit`] - a commit bound to the
//!   file name it was found under, and to one concrete line
//! - [`Blame`] - result line number to attribution, for one file

pub mod blame;
pub mod commit;
pub mod line;

// Re-exports for convenience
pub use blame::Blame;
pub use commit::{is_hash, is_uncommitted_hash, Commit, CommitAuthor, HASH_LENGTHS};
pub use line::{FileAttachedCommit, Line, LineAttachedCommit};
