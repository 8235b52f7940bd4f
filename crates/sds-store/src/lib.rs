//! SQLite-backed tables for the SQL dirstate.
//!
//! Every table is exposed as a dictionary-like [`SqlMap`] that writes through
//! to the database immediately and caches what it has read or written. All
//! maps built on one [`Database`] share its connection and therefore its
//! transaction: nothing becomes durable until [`Database::commit`].
//!
//! # Tables
//!
//! - [`FilesTable`] via [`FileStateMap`] -- per-file status records
//! - [`CopyTable`] -- copy/rename sources keyed by destination
//! - [`FileFoldTable`] / [`DirFoldTable`] -- case-folded name to real name
//! - [`DirsTable`] via [`DirsMap`] -- ancestor directory refcounts
//! - `other` via [`MetaStore`] -- schema version and working copy parents
//!
//! # Design Rules
//!
//! 1. Writes are never deferred: a `set` is visible to the next `get` within
//!    the same open transaction.
//! 2. Deletes are idempotent.
//! 3. Schema creation is idempotent and commits immediately.
//! 4. All SQLite errors are propagated, never silently ignored.

pub mod db;
pub mod dirs;
pub mod error;
pub mod files;
pub mod map;
pub mod meta;
pub mod table;

pub use db::{Database, SQLITE_CACHE_SIZE};
pub use dirs::{DirCounts, DirsMap};
pub use error::{StoreError, StoreResult};
pub use files::FileStateMap;
pub use map::SqlMap;
pub use meta::{MetaStore, SCHEMA_VERSION};
pub use table::{CopyTable, DirFoldTable, DirsTable, FileFoldTable, FilesTable, Table};

/// Copy records: destination path to source path.
pub type CopyMap = SqlMap<CopyTable>;
/// Case-folded file name to real file name.
pub type FileFoldMap = SqlMap<FileFoldTable>;
/// Case-folded directory name to real directory name.
pub type DirFoldMap = SqlMap<DirFoldTable>;
