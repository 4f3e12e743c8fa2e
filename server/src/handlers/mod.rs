//! Request handlers for blame queries.

pub mod blame;

pub use blame::*;
