//! Ancestor-directory refcounts.
//!
//! A directory is present while at least one tracked path lives below it.
//! Its count is the number of direct children (tracked files and counted
//! subdirectories) it holds. Adding a path walks outward only until it meets
//! a directory that is already counted, since that directory's ancestors are
//! counted too. Removing is symmetric: a directory whose count would reach
//! zero is dropped and the walk continues outward.

use std::collections::BTreeMap;
use std::rc::Rc;

use sds_types::find_dirs;
use tracing::warn;

use crate::db::Database;
use crate::error::StoreResult;
use crate::map::SqlMap;
use crate::table::DirsTable;

/// Backing storage for directory refcounts.
pub trait DirCounts {
    fn count(&mut self, dir: &[u8]) -> StoreResult<Option<i64>>;
    fn set_count(&mut self, dir: &[u8], count: i64) -> StoreResult<()>;
    fn remove_dir(&mut self, dir: &[u8]) -> StoreResult<()>;
}

impl DirCounts for SqlMap<DirsTable> {
    fn count(&mut self, dir: &[u8]) -> StoreResult<Option<i64>> {
        self.get(dir)
    }

    fn set_count(&mut self, dir: &[u8], count: i64) -> StoreResult<()> {
        self.set(dir, count)
    }

    fn remove_dir(&mut self, dir: &[u8]) -> StoreResult<()> {
        self.delete(dir)
    }
}

impl DirCounts for BTreeMap<Vec<u8>, i64> {
    fn count(&mut self, dir: &[u8]) -> StoreResult<Option<i64>> {
        Ok(self.get(dir).copied())
    }

    fn set_count(&mut self, dir: &[u8], count: i64) -> StoreResult<()> {
        self.insert(dir.to_vec(), count);
        Ok(())
    }

    fn remove_dir(&mut self, dir: &[u8]) -> StoreResult<()> {
        self.remove(dir);
        Ok(())
    }
}

/// Directory refcount map over any [`DirCounts`] storage.
///
/// The persistent form uses the `dirs` table; bulk rebuilds use an in-memory
/// `BTreeMap` and copy the result into the table in one pass.
#[derive(Debug)]
pub struct DirsMap<S = SqlMap<DirsTable>> {
    counts: S,
}

impl DirsMap<SqlMap<DirsTable>> {
    /// Refcounts persisted in the `dirs` table of `db`.
    pub fn persistent(db: Rc<Database>) -> Self {
        Self {
            counts: SqlMap::new(db),
        }
    }

    pub fn create_schema(&self) -> StoreResult<()> {
        self.counts.create_schema()
    }

    /// Directories currently counted.
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        self.counts.keys()
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        self.counts.clear()
    }

    pub fn invalidate_cache(&mut self) {
        self.counts.invalidate_cache();
    }

    /// Replace the table contents with `counts`.
    pub fn load(&mut self, counts: BTreeMap<Vec<u8>, i64>) -> StoreResult<usize> {
        self.counts.clear()?;
        self.counts.update(counts)
    }
}

impl DirsMap<BTreeMap<Vec<u8>, i64>> {
    /// Build in-memory refcounts from a set of tracked paths.
    ///
    /// The result depends only on the multiset of paths, not their order.
    pub fn from_paths<I, P>(paths: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut map = Self::with_storage(BTreeMap::new());
        map.add_paths(paths)?;
        Ok(map)
    }

    /// Read-only view of the counts.
    pub fn counts(&self) -> &BTreeMap<Vec<u8>, i64> {
        &self.counts
    }

    pub fn into_counts(self) -> BTreeMap<Vec<u8>, i64> {
        self.counts
    }
}

impl<S: DirCounts> DirsMap<S> {
    /// Wrap existing storage.
    pub fn with_storage(counts: S) -> Self {
        Self { counts }
    }

    /// Count `path` against its ancestor directories.
    pub fn add_path(&mut self, path: &[u8]) -> StoreResult<()> {
        for base in find_dirs(path) {
            if let Some(count) = self.counts.count(base)? {
                self.counts.set_count(base, count + 1)?;
                return Ok(());
            }
            self.counts.set_count(base, 1)?;
        }
        Ok(())
    }

    /// Count every path of `paths`.
    pub fn add_paths<I, P>(&mut self, paths: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        for path in paths {
            self.add_path(path.as_ref())?;
        }
        Ok(())
    }

    /// Undo [`add_path`](Self::add_path) for `path`.
    pub fn remove_path(&mut self, path: &[u8]) -> StoreResult<()> {
        for base in find_dirs(path) {
            match self.counts.count(base)? {
                Some(count) if count > 1 => {
                    self.counts.set_count(base, count - 1)?;
                    return Ok(());
                }
                Some(_) => self.counts.remove_dir(base)?,
                None => {
                    warn!(
                        path = %String::from_utf8_lossy(path),
                        dir = %String::from_utf8_lossy(base),
                        "removing path whose directory is not counted"
                    );
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Returns `true` if some tracked path lives under `dir`.
    pub fn contains(&mut self, dir: &[u8]) -> StoreResult<bool> {
        Ok(self.counts.count(dir)?.is_some())
    }

    pub fn count(&mut self, dir: &[u8]) -> StoreResult<Option<i64>> {
        self.counts.count(dir)
    }
}
