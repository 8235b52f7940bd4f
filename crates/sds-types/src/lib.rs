//! Foundation types for the SQL-backed dirstate.
//!
//! This crate provides the value types shared by every other crate in the
//! workspace. It performs no I/O.
//!
//! # Key Types
//!
//! - [`NodeId`] -- 20-byte revision identifier for working copy parents
//! - [`Parents`] -- the `(p1, p2)` pair the working copy is based on
//! - [`EntryState`] -- tracked file status (`n`, `a`, `r`, `m`)
//! - [`FileRecord`] -- status plus cached mode, size and mtime
//! - [`find_dirs`] / [`normcase`] -- repository path helpers

pub mod error;
pub mod node;
pub mod path;
pub mod record;

pub use error::TypeError;
pub use node::{NodeId, Parents};
pub use path::{find_dirs, normcase};
pub use record::{EntryState, FileRecord, MTIME_UNSET, SIZE_FROM_OTHER_PARENT, SIZE_NONNORMAL};
