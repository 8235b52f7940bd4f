//! Working-copy state for the SQL dirstate.
//!
//! [`WorkingState`] composes the tables of `sds-store` into the object the
//! host VCS manipulates: record-update primitives, working copy parents,
//! dirty tracking, and the commit, backup and invalidate lifecycle.
//! [`SqlDirstate`] exposes it through the [`DirstateProvider`] trait and
//! wires deferred writes into the host's [`HostTransaction`].
//!
//! # Files in the metadata directory
//!
//! - `dirstate.sqlite3` -- the database
//! - `dirstate` -- parents-only shadow file, see [`shadow`]
//! - `{journal}.dirstate.sqlite3` -- backup taken by a deferred write

pub mod atomic;
pub mod clock;
pub mod config;
pub mod error;
pub mod provider;
pub mod shadow;
pub mod state;
pub mod transaction;

pub use atomic::atomic_write;
pub use clock::{FixedClock, FsClock, TempFileClock};
pub use config::StateConfig;
pub use error::{StateError, StateResult};
pub use provider::{DirstateProvider, SqlDirstate, WRITE_FINALIZER};
pub use shadow::{shadow_contents, write_shadow_file, SHADOW_FILE};
pub use state::{DiscardedCopies, WorkingState, DB_FILE};
pub use transaction::{BackupEntry, Finalizer, HostTransaction, RecordingTransaction};
