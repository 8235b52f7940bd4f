//! Bridge between the SQL dirstate and the legacy flat `dirstate` file.
//!
//! - [`convert_to_persistent`] bulk-loads a [`FlatDirstate`] into a fresh
//!   database and opens it.
//! - [`convert_to_flat`] writes the current state back as a flat file.
//! - [`read_flat`] loads a flat file through a [`FlatCodec`].
//!
//! [`DirstateV1`] implements the classic on-disk layout.

pub mod codec;
pub mod convert;
pub mod error;
pub mod flat;

pub use codec::{DirstateV1, FlatCodec};
pub use convert::{convert_to_flat, convert_to_persistent, read_flat};
pub use error::{FlatError, FlatResult};
pub use flat::FlatDirstate;
