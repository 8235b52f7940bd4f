//! The file-status table and its derived queries.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use rusqlite::params;
use sds_types::{EntryState, FileRecord, MTIME_UNSET};
use tracing::debug;

use crate::db::Database;
use crate::error::StoreResult;
use crate::map::SqlMap;
use crate::table::{bytes_column, FilesTable, Table};

/// Per-file status records, with the queries a status scan needs.
///
/// Dereferences to the underlying [`SqlMap`] for plain dictionary access.
#[derive(Debug)]
pub struct FileStateMap {
    map: SqlMap<FilesTable>,
}

impl FileStateMap {
    pub fn new(db: Rc<Database>) -> Self {
        Self {
            map: SqlMap::new(db),
        }
    }

    /// Paths whose cached status cannot be trusted: anything not `normal`,
    /// plus normal entries with an unknown mtime.
    pub fn nonnormal_entries(&self) -> StoreResult<HashSet<Vec<u8>>> {
        let conn = self.map.db().conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT filename FROM files WHERE status != 'n' OR mtime = -1")?;
        let mut rows = stmt.query([])?;
        let mut out = HashSet::new();
        while let Some(row) = rows.next()? {
            out.insert(bytes_column(FilesTable::NAME, row, 0)?);
        }
        Ok(out)
    }

    /// Entries pulled in from the merge's second parent (`normal` with size
    /// `-2`).
    pub fn other_parent_entries(&self) -> StoreResult<Vec<(Vec<u8>, FileRecord)>> {
        self.select_entries(
            "SELECT filename, status, mode, size, mtime FROM files \
             WHERE status = 'n' AND size = -2",
        )
    }

    /// Entries in the `merged` state.
    pub fn modified_entries(&self) -> StoreResult<Vec<(Vec<u8>, FileRecord)>> {
        self.select_entries(
            "SELECT filename, status, mode, size, mtime FROM files WHERE status = 'm'",
        )
    }

    /// Mark every normal entry whose mtime equals `now` as needing a recheck.
    ///
    /// A file written in the same clock tick as this write could change again
    /// without its mtime moving, so its cached mtime is ambiguous.
    pub fn reset_now(&mut self, now: i32) -> StoreResult<usize> {
        let changed = self.map.db().execute(
            "UPDATE files SET mtime = -1 WHERE status = 'n' AND mtime = ?1",
            params![now],
        )?;
        for record in self.map.cached_values_mut() {
            if record.state == EntryState::Normal && record.mtime == now {
                record.mtime = MTIME_UNSET;
            }
        }
        debug!(now, changed, "reset ambiguous mtimes");
        Ok(changed)
    }

    fn select_entries(&self, sql: &str) -> StoreResult<Vec<(Vec<u8>, FileRecord)>> {
        let conn = self.map.db().conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let path = bytes_column(FilesTable::NAME, row, 0)?;
            out.push((path, FilesTable::decode(row, 1)?));
        }
        Ok(out)
    }
}

impl Deref for FileStateMap {
    type Target = SqlMap<FilesTable>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl DerefMut for FileStateMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}
