//! The parents-only `dirstate` file kept next to the database for tools that
//! read the working copy parents directly.

use std::path::Path;

use sds_types::Parents;
use tracing::debug;

use crate::atomic::atomic_write;
use crate::error::{StateError, StateResult};

pub const SHADOW_FILE: &str = "dirstate";

const NOTICE: &[u8] = b"\nThis is fake dirstate put here by the sqldirsate.\
\nIt contains only working copy parents info.\
\nThe real dirstate is in dirstate.sqlite3 file.";

/// Bytes of the shadow file for `parents`.
pub fn shadow_contents(parents: &Parents) -> Vec<u8> {
    let mut out = Vec::with_capacity(40 + NOTICE.len());
    out.extend_from_slice(&parents.to_raw());
    out.extend_from_slice(NOTICE);
    out
}

pub fn write_shadow_file(location: &Path, parents: &Parents) -> StateResult<()> {
    let path = location.join(SHADOW_FILE);
    atomic_write(&path, &shadow_contents(parents))
        .map_err(|source| StateError::ShadowFile { path, source })?;
    debug!(p1 = %parents.p1.short_hex(), "wrote shadow dirstate");
    Ok(())
}
