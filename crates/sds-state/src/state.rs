//! The working-copy state: every dirstate table behind one object.
//!
//! [`WorkingState`] owns the database connection and the maps sharing it.
//! Every mutation goes straight to the database inside one open
//! transaction; [`WorkingState::write`] commits it and
//! [`WorkingState::invalidate`] throws it away.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sds_store::{
    CopyMap, Database, DirFoldMap, DirsMap, FileFoldMap, FileStateMap, MetaStore,
};
use sds_types::{
    find_dirs, normcase, EntryState, FileRecord, NodeId, Parents, MTIME_UNSET,
    SIZE_FROM_OTHER_PARENT, SIZE_NONNORMAL,
};
use tracing::{debug, info};

use crate::clock::FsClock;
use crate::config::StateConfig;
use crate::error::{StateError, StateResult};
use crate::shadow::write_shadow_file;
use crate::transaction::{BackupEntry, HostTransaction};

/// Name of the database file inside the metadata directory.
pub const DB_FILE: &str = "dirstate.sqlite3";

/// Copy records dropped by a parent change, destination to source.
pub type DiscardedCopies = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct WorkingState {
    location: PathBuf,
    config: StateConfig,
    clock: Box<dyn FsClock>,
    db: Rc<Database>,
    meta: MetaStore,
    files: FileStateMap,
    copies: CopyMap,
    file_fold: FileFoldMap,
    dir_fold: DirFoldMap,
    dirs: DirsMap,
    parents: Option<Parents>,
    nonnormal: Option<HashSet<Vec<u8>>>,
    last_normal_time: i32,
    dirty: bool,
    dirty_parents: bool,
    parent_writers: usize,
}

impl std::fmt::Debug for WorkingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkingState")
            .field("location", &self.location)
            .field("parents", &self.parents)
            .field("dirty", &self.dirty)
            .field("dirty_parents", &self.dirty_parents)
            .field("parent_writers", &self.parent_writers)
            .finish()
    }
}

impl WorkingState {
    /// Open or create the database in the metadata directory `location`.
    ///
    /// Only the schema is touched; records are read on demand.
    pub fn open(
        location: impl AsRef<Path>,
        config: StateConfig,
        clock: impl FsClock + 'static,
    ) -> StateResult<Self> {
        let location = location.as_ref().to_path_buf();
        let db = Rc::new(Database::open(location.join(DB_FILE), config.cache_size)?);
        let state = Self {
            meta: MetaStore::new(Rc::clone(&db)),
            files: FileStateMap::new(Rc::clone(&db)),
            copies: CopyMap::new(Rc::clone(&db)),
            file_fold: FileFoldMap::new(Rc::clone(&db)),
            dir_fold: DirFoldMap::new(Rc::clone(&db)),
            dirs: DirsMap::persistent(Rc::clone(&db)),
            db,
            location,
            config,
            clock: Box::new(clock),
            parents: None,
            nonnormal: None,
            last_normal_time: 0,
            dirty: false,
            dirty_parents: false,
            parent_writers: 0,
        };
        state.ensure_schema()?;
        debug!(location = %state.location.display(), "opened working state");
        Ok(state)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &Path {
        self.db.path()
    }

    /// The shared connection handle.
    pub fn database(&self) -> &Rc<Database> {
        &self.db
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn parents_dirty(&self) -> bool {
        self.dirty_parents
    }

    /// Newest mtime recorded by [`normal`](Self::normal) since the last
    /// commit.
    pub fn last_normal_time(&self) -> i32 {
        self.last_normal_time
    }

    /// Current filesystem time as seen from the metadata directory.
    pub fn fs_now(&self) -> StateResult<i32> {
        self.clock.now(&self.location)
    }

    fn ensure_schema(&self) -> StateResult<()> {
        self.meta.create_schema()?;
        self.files.create_schema()?;
        self.copies.create_schema()?;
        self.file_fold.create_schema()?;
        self.dir_fold.create_schema()?;
        self.dirs.create_schema()?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Parents
    // ---------------------------------------------------------------

    pub fn parents(&mut self) -> StateResult<Parents> {
        if let Some(parents) = self.parents {
            return Ok(parents);
        }
        let parents = self.meta.parents()?;
        self.parents = Some(parents);
        Ok(parents)
    }

    pub fn p1(&mut self) -> StateResult<NodeId> {
        Ok(self.parents()?.p1)
    }

    pub fn p2(&mut self) -> StateResult<NodeId> {
        Ok(self.parents()?.p2)
    }

    /// Enter a parent-change section. Sections nest.
    pub fn begin_parent_change(&mut self) {
        self.parent_writers += 1;
    }

    pub fn end_parent_change(&mut self) {
        self.parent_writers = self.parent_writers.saturating_sub(1);
    }

    /// Returns `true` inside a parent-change section.
    pub fn pending_parent_change(&self) -> bool {
        self.parent_writers > 0
    }

    /// Run `f` inside a parent-change section. The section is closed even if
    /// `f` fails.
    pub fn with_parent_change<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> StateResult<R>,
    ) -> StateResult<R> {
        self.begin_parent_change();
        let result = f(self);
        self.end_parent_change();
        result
    }

    /// Move the working copy to `p1`/`p2`.
    ///
    /// Leaving a merge (two parents to one) turns merged entries back into
    /// lookups and other-parent entries into adds. Copy records of those
    /// entries are removed and returned.
    pub fn set_parents(&mut self, p1: NodeId, p2: NodeId) -> StateResult<DiscardedCopies> {
        if self.parent_writers == 0 {
            return Err(StateError::InvalidState(
                "cannot set dirstate parents outside a parent change".into(),
            ));
        }
        let old = self.parents()?;
        let new = Parents::new(p1, p2);
        self.dirty = true;
        self.dirty_parents = true;
        self.meta.set_parents(&new)?;
        self.parents = Some(new);

        let mut discarded = DiscardedCopies::new();
        if old.is_merge() && !new.is_merge() {
            for (path, _) in self.files.modified_entries()? {
                if let Some(source) = self.copies.get(&path)? {
                    discarded.insert(path.clone(), source);
                }
                self.normal_lookup(&path)?;
            }
            for (path, _) in self.files.other_parent_entries()? {
                if let Some(source) = self.copies.get(&path)? {
                    discarded.insert(path.clone(), source);
                }
                self.add(&path)?;
            }
            info!(
                p1 = %p1.short_hex(),
                discarded = discarded.len(),
                "left merge state"
            );
        } else {
            debug!(p1 = %p1.short_hex(), p2 = %p2.short_hex(), "set parents");
        }
        Ok(discarded)
    }

    // ---------------------------------------------------------------
    // Record updates
    // ---------------------------------------------------------------

    /// Mark `f` clean with the metadata the caller just observed.
    pub fn normal(&mut self, f: &[u8], mode: u32, size: i32, mtime: i32) -> StateResult<()> {
        let record = FileRecord::normal(mode, size, mtime);
        self.add_path(f, record)?;
        self.copies.delete(f)?;
        self.track_nonnormal(f, record.is_nonnormal());
        if mtime > self.last_normal_time {
            self.last_normal_time = mtime;
        }
        Ok(())
    }

    /// Mark `f` as needing a content check on the next status run.
    pub fn normal_lookup(&mut self, f: &[u8]) -> StateResult<()> {
        if self.parents()?.is_merge() {
            if let Some(entry) = self.files.get(f)? {
                if entry.state == EntryState::Removed
                    && (entry.size == SIZE_NONNORMAL || entry.size == SIZE_FROM_OTHER_PARENT)
                {
                    // Undo a remove during a merge.
                    let source = self.copies.get(f)?;
                    if entry.size == SIZE_NONNORMAL {
                        self.merge(f)?;
                    } else {
                        self.other_parent(f)?;
                    }
                    if let Some(source) = source {
                        self.copy(&source, f)?;
                    }
                    return Ok(());
                }
                if entry.state == EntryState::Merged || entry.is_from_other_parent() {
                    return Ok(());
                }
            }
        }
        self.add_path(f, FileRecord::lookup())?;
        self.copies.delete(f)?;
        Ok(())
    }

    /// Mark `f` as coming from the second parent. Only valid during a merge.
    pub fn other_parent(&mut self, f: &[u8]) -> StateResult<()> {
        if !self.parents()?.is_merge() {
            return Err(StateError::InvalidState(format!(
                "setting {} to other parent only allowed in merges",
                String::from_utf8_lossy(f)
            )));
        }
        let record = match self.files.get(f)? {
            Some(entry) if entry.state == EntryState::Normal => {
                FileRecord::new(EntryState::Merged, 0, SIZE_FROM_OTHER_PARENT, MTIME_UNSET)
            }
            _ => FileRecord::other_parent(),
        };
        self.add_path(f, record)?;
        self.copies.delete(f)?;
        Ok(())
    }

    pub fn add(&mut self, f: &[u8]) -> StateResult<()> {
        self.add_path(f, FileRecord::added())?;
        self.copies.delete(f)?;
        Ok(())
    }

    /// Mark `f` removed. During a merge the size remembers whether the entry
    /// was merged or from the other parent, and the copy record is kept.
    pub fn remove(&mut self, f: &[u8]) -> StateResult<()> {
        self.dirty = true;
        let old = self.files.get(f)?;
        self.drop_path(f, old)?;
        let mut size = 0;
        if self.parents()?.is_merge() {
            match old {
                Some(entry) if entry.state == EntryState::Merged => {
                    size = SIZE_NONNORMAL;
                }
                Some(entry) if entry.is_from_other_parent() => {
                    size = SIZE_FROM_OTHER_PARENT;
                }
                _ => {}
            }
        }
        self.files.set(f, FileRecord::removed(size))?;
        self.track_nonnormal(f, true);
        if size == 0 {
            self.copies.delete(f)?;
        }
        Ok(())
    }

    /// Mark `f` merged: a lookup outside a merge, other-parent within one.
    pub fn merge(&mut self, f: &[u8]) -> StateResult<()> {
        if !self.parents()?.is_merge() {
            return self.normal_lookup(f);
        }
        self.other_parent(f)
    }

    /// Forget `f` entirely. Untracked paths are ignored.
    pub fn drop_file(&mut self, f: &[u8]) -> StateResult<()> {
        let Some(old) = self.files.get(f)? else {
            return Ok(());
        };
        self.dirty = true;
        self.drop_path(f, Some(old))?;
        self.files.delete(f)?;
        self.track_nonnormal(f, false);
        self.copies.delete(f)?;
        Ok(())
    }

    /// Record `dest` as a copy of `source`.
    pub fn copy(&mut self, source: &[u8], dest: &[u8]) -> StateResult<()> {
        if source == dest {
            return Ok(());
        }
        self.dirty = true;
        self.copies.set(dest, source.to_vec())?;
        Ok(())
    }

    /// Forget the copy record of `dest`, if any.
    pub fn forget_copy(&mut self, dest: &[u8]) -> StateResult<()> {
        self.dirty = true;
        self.copies.delete(dest)?;
        Ok(())
    }

    fn add_path(&mut self, f: &[u8], record: FileRecord) -> StateResult<()> {
        let old = self.files.get(f)?;
        let was_tracked = matches!(old, Some(entry) if entry.state != EntryState::Removed);
        if record.state == EntryState::Added
            || matches!(old, Some(entry) if entry.state == EntryState::Removed)
        {
            self.check_path(f)?;
        }
        self.dirty = true;
        if !was_tracked {
            self.dirs.add_path(f)?;
        }
        self.files.set(f, record)?;
        self.track_nonnormal(f, record.is_nonnormal());
        Ok(())
    }

    fn check_path(&mut self, f: &[u8]) -> StateResult<()> {
        if self.dirs.contains(f)? {
            return Err(StateError::PathConflict(format!(
                "directory {} already in dirstate",
                String::from_utf8_lossy(f)
            )));
        }
        for dir in find_dirs(f) {
            if self.dirs.contains(dir)? {
                break;
            }
            if let Some(entry) = self.files.get(dir)? {
                if entry.state != EntryState::Removed {
                    return Err(StateError::PathConflict(format!(
                        "file {} in dirstate clashes with {}",
                        String::from_utf8_lossy(dir),
                        String::from_utf8_lossy(f)
                    )));
                }
            }
        }
        Ok(())
    }

    fn drop_path(&mut self, f: &[u8], old: Option<FileRecord>) -> StateResult<()> {
        if matches!(old, Some(entry) if entry.state != EntryState::Removed) {
            self.dirs.remove_path(f)?;
        }
        self.file_fold.delete(&normcase(f))?;
        Ok(())
    }

    fn track_nonnormal(&mut self, f: &[u8], nonnormal: bool) {
        if let Some(set) = &mut self.nonnormal {
            if nonnormal {
                set.insert(f.to_vec());
            } else {
                set.remove(f);
            }
        }
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn get(&mut self, f: &[u8]) -> StateResult<Option<FileRecord>> {
        Ok(self.files.get(f)?)
    }

    /// Status character of `f`, `'?'` when untracked.
    pub fn state_of(&mut self, f: &[u8]) -> StateResult<char> {
        Ok(self.files.get(f)?.map_or('?', |r| r.state.as_char()))
    }

    pub fn contains(&mut self, f: &[u8]) -> StateResult<bool> {
        Ok(self.files.contains(f)?)
    }

    /// Number of tracked records, removed ones included.
    pub fn len(&self) -> StateResult<usize> {
        Ok(self.files.len()?)
    }

    pub fn is_empty(&self) -> StateResult<bool> {
        Ok(self.files.is_empty()?)
    }

    /// Returns `true` if some tracked, non-removed file lives under `dir`.
    pub fn has_dir(&mut self, dir: &[u8]) -> StateResult<bool> {
        Ok(self.dirs.contains(dir)?)
    }

    /// Stream every record through `visit`.
    pub fn for_each_file<F>(&self, mut visit: F) -> StateResult<()>
    where
        F: FnMut(&[u8], &FileRecord),
    {
        self.files.for_each(|path, record| {
            visit(&path, &record);
            Ok(())
        })?;
        Ok(())
    }

    pub fn entries(&self) -> StateResult<Vec<(Vec<u8>, FileRecord)>> {
        Ok(self.files.entries()?)
    }

    /// Paths whose status must be checked against the filesystem.
    pub fn nonnormal_set(&mut self) -> StateResult<&HashSet<Vec<u8>>> {
        let set = match self.nonnormal.take() {
            Some(set) => set,
            None => self.files.nonnormal_entries()?,
        };
        Ok(&*self.nonnormal.insert(set))
    }

    pub fn other_parent_entries(&self) -> StateResult<Vec<(Vec<u8>, FileRecord)>> {
        Ok(self.files.other_parent_entries()?)
    }

    pub fn modified_entries(&self) -> StateResult<Vec<(Vec<u8>, FileRecord)>> {
        Ok(self.files.modified_entries()?)
    }

    /// Source of the copy that produced `dest`.
    pub fn copied(&mut self, dest: &[u8]) -> StateResult<Option<Vec<u8>>> {
        Ok(self.copies.get(dest)?)
    }

    /// Every copy record, destination to source.
    pub fn copies(&self) -> StateResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        Ok(self.copies.entries()?.into_iter().collect())
    }

    // ---------------------------------------------------------------
    // Case folding
    // ---------------------------------------------------------------

    /// Real name of the tracked file whose case-folded name is `normed`.
    pub fn file_fold(&mut self, normed: &[u8]) -> StateResult<Option<Vec<u8>>> {
        Ok(self.file_fold.get(normed)?)
    }

    pub fn dir_fold(&mut self, normed: &[u8]) -> StateResult<Option<Vec<u8>>> {
        Ok(self.dir_fold.get(normed)?)
    }

    /// Remember the on-disk spelling of a file name.
    pub fn record_file_fold(&mut self, real: &[u8]) -> StateResult<()> {
        Ok(self.file_fold.set(&normcase(real), real.to_vec())?)
    }

    /// Remember the on-disk spelling of a directory name.
    pub fn record_dir_fold(&mut self, real: &[u8]) -> StateResult<()> {
        Ok(self.dir_fold.set(&normcase(real), real.to_vec())?)
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Commit pending changes. Does nothing when nothing changed.
    pub fn write(&mut self) -> StateResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.commit_now()
    }

    /// First half of a write deferred to the host transaction.
    ///
    /// Returns `false` when there is nothing to write; otherwise ambiguous
    /// mtimes are reset and the caller must arrange for
    /// [`backup_and_write`](Self::backup_and_write) to run.
    pub fn prepare_deferred_write(&mut self) -> StateResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let now = self.fs_now()?;
        if self.files.reset_now(now)? > 0 {
            self.nonnormal = None;
        }
        Ok(true)
    }

    /// Back up the database under the transaction's journal name, register
    /// the backup with `tr`, then commit.
    pub fn backup_and_write(&mut self, tr: &mut dyn HostTransaction) -> StateResult<()> {
        if !self.config.skip_backups {
            let backup = self.location.join(format!("{}.{}", tr.journal(), DB_FILE));
            copy_file(self.db.path(), &backup)?;
            tr.add_backup_entry(BackupEntry::plain(self.db.path(), &backup));
            debug!(backup = %backup.display(), "took journal backup");
        }
        self.commit_now()
    }

    fn commit_now(&mut self) -> StateResult<()> {
        let now = self.fs_now()?;
        if self.files.reset_now(now)? > 0 {
            self.nonnormal = None;
        }
        self.db.commit()?;
        self.last_normal_time = 0;
        self.dirty = false;
        self.dirty_parents = false;
        self.nonnormal = Some(self.files.nonnormal_entries()?);
        if self.config.emit_shadow_file {
            let parents = self.parents()?;
            write_shadow_file(&self.location, &parents)?;
        }
        debug!(location = %self.location.display(), now, "wrote working state");
        Ok(())
    }

    fn backup_path(&self, prefix: &str, suffix: &str) -> PathBuf {
        self.location.join(format!("{prefix}{DB_FILE}{suffix}"))
    }

    /// Commit and copy the database to `prefix + dirstate.sqlite3 + suffix`.
    pub fn save_backup(&mut self, prefix: &str, suffix: &str) -> StateResult<()> {
        if self.config.skip_backups {
            return Ok(());
        }
        self.commit_now()?;
        let backup = self.backup_path(prefix, suffix);
        copy_file(self.db.path(), &backup)?;
        info!(backup = %backup.display(), "saved dirstate backup");
        Ok(())
    }

    /// Move a backup taken by [`save_backup`](Self::save_backup) back into
    /// place and drop all in-memory state.
    pub fn restore_backup(&mut self, prefix: &str, suffix: &str) -> StateResult<()> {
        if self.config.skip_backups {
            return Ok(());
        }
        let backup = self.backup_path(prefix, suffix);
        fs::rename(&backup, self.db.path()).map_err(|source| StateError::Backup {
            path: backup.clone(),
            source,
        })?;
        info!(backup = %backup.display(), "restored dirstate backup");
        self.invalidate()
    }

    pub fn clear_backup(&mut self, prefix: &str, suffix: &str) -> StateResult<()> {
        if self.config.skip_backups {
            return Ok(());
        }
        let backup = self.backup_path(prefix, suffix);
        fs::remove_file(&backup).map_err(|source| StateError::Backup {
            path: backup,
            source,
        })
    }

    /// Discard uncommitted changes and every cached value.
    pub fn invalidate(&mut self) -> StateResult<()> {
        self.db.reopen()?;
        self.files.invalidate_cache();
        self.copies.invalidate_cache();
        self.file_fold.invalidate_cache();
        self.dir_fold.invalidate_cache();
        self.dirs.invalidate_cache();
        self.parents = None;
        self.nonnormal = None;
        self.last_normal_time = 0;
        self.dirty = false;
        self.dirty_parents = false;
        self.parent_writers = 0;
        self.ensure_schema()?;
        debug!(location = %self.location.display(), "invalidated working state");
        Ok(())
    }

    /// Forget every record and reset the parents to null.
    pub fn clear(&mut self) -> StateResult<()> {
        self.files.clear()?;
        self.nonnormal = Some(HashSet::new());
        self.dirs.clear()?;
        self.copies.clear()?;
        self.file_fold.clear()?;
        self.dir_fold.clear()?;
        let null = Parents::null();
        self.meta.set_parents(&null)?;
        self.parents = Some(null);
        self.last_normal_time = 0;
        self.dirty = true;
        Ok(())
    }
}

fn copy_file(from: &Path, to: &Path) -> StateResult<()> {
    fs::copy(from, to).map_err(|source| StateError::Backup {
        path: to.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::shadow::shadow_contents;
    use crate::transaction::RecordingTransaction;

    const NOW: i32 = 1_000;

    fn node(b: u8) -> NodeId {
        NodeId::from_array([b; 20])
    }

    fn open(dir: &Path, config: StateConfig) -> (WorkingState, Rc<FixedClock>) {
        let clock = Rc::new(FixedClock::new(NOW));
        let state = WorkingState::open(dir, config, Rc::clone(&clock)).unwrap();
        (state, clock)
    }

    fn set_parents(state: &mut WorkingState, p1: NodeId, p2: NodeId) -> DiscardedCopies {
        state.with_parent_change(|s| s.set_parents(p1, p2)).unwrap()
    }

    #[test]
    fn open_creates_database_and_reads_null_parents() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        assert!(dir.path().join(DB_FILE).exists());
        assert_eq!(state.parents().unwrap(), Parents::null());
        assert!(!state.is_dirty());
        assert!(state.is_empty().unwrap());
    }

    #[test]
    fn failed_parent_read_leaves_state_clean() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.database().close().unwrap();

        let result = state.with_parent_change(|s| s.set_parents(node(1), NodeId::null()));
        assert!(matches!(result, Err(StateError::StorageIo(_))));
        assert!(!state.is_dirty());
        assert!(!state.parents_dirty());
    }

    #[test]
    fn set_parents_outside_section_fails_without_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        let writes = state.database().write_count();

        let err = state.set_parents(node(1), NodeId::null()).unwrap_err();
        assert!(matches!(err, StateError::InvalidState(_)));
        assert!(!state.is_dirty());
        assert!(!state.parents_dirty());
        assert_eq!(state.database().write_count(), writes);
        assert_eq!(state.parents().unwrap(), Parents::null());
    }

    #[test]
    fn parent_change_sections_nest() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.begin_parent_change();
        state.begin_parent_change();
        state.end_parent_change();
        assert!(state.pending_parent_change());
        state.set_parents(node(1), NodeId::null()).unwrap();
        state.end_parent_change();
        assert!(!state.pending_parent_change());
        assert!(state.parents_dirty());
    }

    #[test]
    fn leaving_merge_resolves_merged_entry_and_discards_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.normal(b"a/b.txt", 0o644, 10, 500).unwrap();
        set_parents(&mut state, node(1), node(2));
        state.merge(b"a/b.txt").unwrap();
        state.copy(b"a/orig.txt", b"a/b.txt").unwrap();
        assert_eq!(state.state_of(b"a/b.txt").unwrap(), 'm');

        let discarded = set_parents(&mut state, node(1), NodeId::null());

        let record = state.get(b"a/b.txt").unwrap().unwrap();
        assert_eq!(record.state, EntryState::Normal);
        assert_eq!(record.mtime, MTIME_UNSET);
        assert_eq!(state.copied(b"a/b.txt").unwrap(), None);
        assert_eq!(discarded.get(&b"a/b.txt"[..]), Some(&b"a/orig.txt".to_vec()));
    }

    #[test]
    fn leaving_merge_turns_other_parent_entries_into_adds() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        set_parents(&mut state, node(1), node(2));
        state.other_parent(b"theirs").unwrap();
        state.copy(b"src", b"theirs").unwrap();

        let discarded = set_parents(&mut state, node(3), NodeId::null());
        assert_eq!(state.state_of(b"theirs").unwrap(), 'a');
        assert_eq!(discarded.len(), 1);
        assert!(state.copies().unwrap().is_empty());
    }

    #[test]
    fn other_parent_requires_merge() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        assert!(matches!(
            state.other_parent(b"f"),
            Err(StateError::InvalidState(_))
        ));
        assert!(!state.contains(b"f").unwrap());
    }

    #[test]
    fn remove_during_merge_remembers_origin_and_lookup_restores_it() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        set_parents(&mut state, node(1), node(2));
        state.other_parent(b"theirs").unwrap();
        state.copy(b"src", b"theirs").unwrap();

        state.remove(b"theirs").unwrap();
        let removed = state.get(b"theirs").unwrap().unwrap();
        assert_eq!(removed, FileRecord::removed(SIZE_FROM_OTHER_PARENT));
        assert_eq!(state.copied(b"theirs").unwrap(), Some(b"src".to_vec()));
        assert!(!state.has_dir(b"theirs").unwrap());

        state.normal_lookup(b"theirs").unwrap();
        assert_eq!(state.get(b"theirs").unwrap(), Some(FileRecord::other_parent()));
        assert_eq!(state.copied(b"theirs").unwrap(), Some(b"src".to_vec()));
    }

    #[test]
    fn remove_outside_merge_drops_copy_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.add(b"d/new").unwrap();
        state.copy(b"d/old", b"d/new").unwrap();
        state.record_file_fold(b"d/New").unwrap();
        assert!(state.has_dir(b"d").unwrap());

        state.remove(b"d/new").unwrap();
        assert_eq!(state.get(b"d/new").unwrap(), Some(FileRecord::removed(0)));
        assert_eq!(state.copied(b"d/new").unwrap(), None);
        assert!(!state.has_dir(b"d").unwrap());
        assert_eq!(state.file_fold(b"d/new").unwrap(), None);
    }

    #[test]
    fn drop_file_forgets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.add(b"x/y").unwrap();
        state.copy(b"x/z", b"x/y").unwrap();
        state.drop_file(b"x/y").unwrap();
        state.drop_file(b"x/y").unwrap();
        assert_eq!(state.state_of(b"x/y").unwrap(), '?');
        assert_eq!(state.copied(b"x/y").unwrap(), None);
        assert!(!state.has_dir(b"x").unwrap());
        assert!(!state.nonnormal_set().unwrap().contains(&b"x/y".to_vec()));
    }

    #[test]
    fn adding_over_directory_or_file_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.add(b"a/b").unwrap();

        let err = state.add(b"a").unwrap_err();
        assert!(matches!(err, StateError::PathConflict(_)));
        let err = state.add(b"a/b/c").unwrap_err();
        assert!(matches!(err, StateError::PathConflict(_)));

        state.remove(b"a/b").unwrap();
        state.add(b"a/b/c").unwrap();
        assert!(state.has_dir(b"a/b").unwrap());
    }

    #[test]
    fn nonnormal_set_follows_primitives() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.normal(b"clean", 0o644, 1, 10).unwrap();
        state.add(b"added").unwrap();
        assert_eq!(state.nonnormal_set().unwrap().len(), 1);

        state.normal_lookup(b"clean").unwrap();
        state.normal(b"added", 0o644, 1, 10).unwrap();
        let set = state.nonnormal_set().unwrap().clone();
        assert_eq!(set, HashSet::from([b"clean".to_vec()]));
        assert_eq!(set, state.files.nonnormal_entries().unwrap());
    }

    #[test]
    fn write_on_clean_state_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        let writes = state.database().write_count();
        let commits = state.database().commit_count();
        state.write().unwrap();
        assert_eq!(state.database().write_count(), writes);
        assert_eq!(state.database().commit_count(), commits);
        assert!(!dir.path().join("dirstate").exists());
    }

    #[test]
    fn write_commits_resets_now_and_emits_shadow_file() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        set_parents(&mut state, node(7), NodeId::null());
        state.normal(b"same_tick", 0o644, 3, NOW).unwrap();
        state.normal(b"older", 0o644, 3, NOW - 1).unwrap();
        assert_eq!(state.last_normal_time(), NOW);

        state.write().unwrap();
        assert!(!state.is_dirty());
        assert!(!state.parents_dirty());
        assert_eq!(state.last_normal_time(), 0);
        assert_eq!(state.get(b"same_tick").unwrap().unwrap().mtime, MTIME_UNSET);
        assert_eq!(state.get(b"older").unwrap().unwrap().mtime, NOW - 1);
        assert!(state.nonnormal_set().unwrap().contains(&b"same_tick".to_vec()));

        let shadow = fs::read(dir.path().join("dirstate")).unwrap();
        assert_eq!(shadow, shadow_contents(&Parents::new(node(7), NodeId::null())));
    }

    #[test]
    fn invalidate_discards_uncommitted_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.add(b"kept").unwrap();
        state.write().unwrap();

        state.add(b"lost").unwrap();
        state.begin_parent_change();
        state.set_parents(node(4), NodeId::null()).unwrap();
        state.invalidate().unwrap();

        assert!(!state.is_dirty());
        assert!(!state.pending_parent_change());
        assert_eq!(state.parents().unwrap(), Parents::null());
        assert_eq!(state.state_of(b"kept").unwrap(), 'a');
        assert_eq!(state.state_of(b"lost").unwrap(), '?');
        assert!(!state.nonnormal_set().unwrap().contains(&b"lost".to_vec()));
    }

    #[test]
    fn committed_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut state, _) = open(dir.path(), StateConfig::default());
            set_parents(&mut state, node(1), NodeId::null());
            state.normal(b"f", 0o755, 5, 42).unwrap();
            state.add(b"g").unwrap();
            state.copy(b"f", b"g").unwrap();
            state.write().unwrap();
        }
        let (mut state, _) = open(dir.path(), StateConfig::default());
        assert_eq!(state.p1().unwrap(), node(1));
        assert_eq!(state.get(b"f").unwrap(), Some(FileRecord::normal(0o755, 5, 42)));
        assert_eq!(state.copied(b"g").unwrap(), Some(b"f".to_vec()));
        assert_eq!(state.len().unwrap(), 2);
    }

    #[test]
    fn clear_empties_tables_and_nulls_parents() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        set_parents(&mut state, node(1), node(2));
        state.add(b"a/b").unwrap();
        state.record_dir_fold(b"A").unwrap();
        state.write().unwrap();

        state.clear().unwrap();
        assert!(state.is_dirty());
        assert!(state.is_empty().unwrap());
        assert!(!state.has_dir(b"a").unwrap());
        assert_eq!(state.dir_fold(b"a").unwrap(), None);
        assert_eq!(state.parents().unwrap(), Parents::null());
        assert!(state.nonnormal_set().unwrap().is_empty());
    }

    #[test]
    fn fold_maps_key_by_normalized_name() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.record_file_fold(b"Docs/README").unwrap();
        state.record_dir_fold(b"Docs").unwrap();
        assert_eq!(state.file_fold(b"docs/readme").unwrap(), Some(b"Docs/README".to_vec()));
        assert_eq!(state.dir_fold(b"docs").unwrap(), Some(b"Docs".to_vec()));
        assert!(!state.is_dirty());
    }

    #[test]
    fn backup_operations_are_noops_when_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default());
        state.add(b"f").unwrap();
        state.save_backup("undo.", "").unwrap();
        assert!(!dir.path().join("undo.dirstate.sqlite3").exists());
        assert!(state.is_dirty());
        state.restore_backup("undo.", "").unwrap();
        state.clear_backup("undo.", "").unwrap();
    }

    #[test]
    fn save_and_restore_backup_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default().with_backups());
        state.add(b"before").unwrap();
        state.save_backup("undo.", ".bak").unwrap();
        let saved = fs::read(dir.path().join("undo.dirstate.sqlite3.bak")).unwrap();

        state.add(b"after").unwrap();
        state.write().unwrap();
        state.restore_backup("undo.", ".bak").unwrap();

        assert_eq!(fs::read(state.db_path()).unwrap(), saved);
        assert_eq!(state.state_of(b"before").unwrap(), 'a');
        assert_eq!(state.state_of(b"after").unwrap(), '?');
        assert!(!dir.path().join("undo.dirstate.sqlite3.bak").exists());
    }

    #[test]
    fn clear_missing_backup_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default().with_backups());
        let err = state.clear_backup("", ".missing").unwrap_err();
        assert!(matches!(err, StateError::Backup { .. }));
    }

    #[test]
    fn deferred_write_backs_up_then_commits() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _) = open(dir.path(), StateConfig::default().with_backups());
        state.add(b"committed").unwrap();
        state.write().unwrap();
        let before = fs::read(state.db_path()).unwrap();

        state.add(b"pending").unwrap();
        assert!(state.prepare_deferred_write().unwrap());
        let mut tr = RecordingTransaction::new("journal");
        state.backup_and_write(&mut tr).unwrap();
        assert!(!state.is_dirty());

        let backup = dir.path().join("journal.dirstate.sqlite3");
        assert_eq!(fs::read(&backup).unwrap(), before);
        assert_eq!(tr.backups(), &[BackupEntry::plain(state.db_path(), &backup)]);

        tr.rollback().unwrap();
        state.invalidate().unwrap();
        assert_eq!(fs::read(state.db_path()).unwrap(), before);
        assert_eq!(state.state_of(b"committed").unwrap(), 'a');
        assert_eq!(state.state_of(b"pending").unwrap(), '?');
    }

    #[test]
    fn prepare_deferred_write_on_clean_state_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, clock) = open(dir.path(), StateConfig::default());
        let writes = state.database().write_count();
        clock.set(NOW + 1);
        assert!(!state.prepare_deferred_write().unwrap());
        assert_eq!(state.database().write_count(), writes);
    }
}
