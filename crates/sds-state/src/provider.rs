//! The host-facing dirstate interface and its SQL implementation.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use sds_types::{FileRecord, NodeId, Parents};
use tracing::debug;

use crate::clock::FsClock;
use crate::config::StateConfig;
use crate::error::StateResult;
use crate::state::{DiscardedCopies, WorkingState};
use crate::transaction::HostTransaction;

/// Name of the finalizer a deferred write registers.
pub const WRITE_FINALIZER: &str = "sqldirstate.write";

/// Operations the host's status and update logic perform on the dirstate.
pub trait DirstateProvider {
    fn parents(&self) -> StateResult<Parents>;
    fn begin_parent_change(&self);
    fn end_parent_change(&self);
    fn pending_parent_change(&self) -> bool;
    fn set_parents(&self, p1: NodeId, p2: NodeId) -> StateResult<DiscardedCopies>;

    fn get(&self, f: &[u8]) -> StateResult<Option<FileRecord>>;
    /// Status character, `'?'` when untracked.
    fn state_of(&self, f: &[u8]) -> StateResult<char>;
    fn has_dir(&self, dir: &[u8]) -> StateResult<bool>;
    fn nonnormal_set(&self) -> StateResult<HashSet<Vec<u8>>>;
    fn copied(&self, dest: &[u8]) -> StateResult<Option<Vec<u8>>>;
    fn copies(&self) -> StateResult<BTreeMap<Vec<u8>, Vec<u8>>>;

    fn normal(&self, f: &[u8], mode: u32, size: i32, mtime: i32) -> StateResult<()>;
    fn normal_lookup(&self, f: &[u8]) -> StateResult<()>;
    fn other_parent(&self, f: &[u8]) -> StateResult<()>;
    fn add(&self, f: &[u8]) -> StateResult<()>;
    fn remove(&self, f: &[u8]) -> StateResult<()>;
    fn merge(&self, f: &[u8]) -> StateResult<()>;
    fn drop_file(&self, f: &[u8]) -> StateResult<()>;
    fn copy(&self, source: &[u8], dest: &[u8]) -> StateResult<()>;

    /// Persist pending changes, immediately or when `tr` is finalized.
    fn write(&self, tr: Option<&mut dyn HostTransaction>) -> StateResult<()>;
    fn save_backup(&self, prefix: &str, suffix: &str) -> StateResult<()>;
    fn restore_backup(&self, prefix: &str, suffix: &str) -> StateResult<()>;
    fn clear_backup(&self, prefix: &str, suffix: &str) -> StateResult<()>;
    fn invalidate(&self) -> StateResult<()>;
    fn clear(&self) -> StateResult<()>;
}

/// [`DirstateProvider`] backed by a shared [`WorkingState`].
///
/// Clones share the same state. A deferred write keeps the state alive
/// until the host transaction runs its finalizers.
#[derive(Clone, Debug)]
pub struct SqlDirstate {
    state: Rc<RefCell<WorkingState>>,
}

impl SqlDirstate {
    pub fn open(
        location: impl AsRef<Path>,
        config: StateConfig,
        clock: impl FsClock + 'static,
    ) -> StateResult<Self> {
        Ok(Self::new(WorkingState::open(location, config, clock)?))
    }

    pub fn new(state: WorkingState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Direct access to the facade.
    pub fn state(&self) -> RefMut<'_, WorkingState> {
        self.state.borrow_mut()
    }
}

impl DirstateProvider for SqlDirstate {
    fn parents(&self) -> StateResult<Parents> {
        self.state().parents()
    }

    fn begin_parent_change(&self) {
        self.state().begin_parent_change();
    }

    fn end_parent_change(&self) {
        self.state().end_parent_change();
    }

    fn pending_parent_change(&self) -> bool {
        self.state().pending_parent_change()
    }

    fn set_parents(&self, p1: NodeId, p2: NodeId) -> StateResult<DiscardedCopies> {
        self.state().set_parents(p1, p2)
    }

    fn get(&self, f: &[u8]) -> StateResult<Option<FileRecord>> {
        self.state().get(f)
    }

    fn state_of(&self, f: &[u8]) -> StateResult<char> {
        self.state().state_of(f)
    }

    fn has_dir(&self, dir: &[u8]) -> StateResult<bool> {
        self.state().has_dir(dir)
    }

    fn nonnormal_set(&self) -> StateResult<HashSet<Vec<u8>>> {
        Ok(self.state().nonnormal_set()?.clone())
    }

    fn copied(&self, dest: &[u8]) -> StateResult<Option<Vec<u8>>> {
        self.state().copied(dest)
    }

    fn copies(&self) -> StateResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.state().copies()
    }

    fn normal(&self, f: &[u8], mode: u32, size: i32, mtime: i32) -> StateResult<()> {
        self.state().normal(f, mode, size, mtime)
    }

    fn normal_lookup(&self, f: &[u8]) -> StateResult<()> {
        self.state().normal_lookup(f)
    }

    fn other_parent(&self, f: &[u8]) -> StateResult<()> {
        self.state().other_parent(f)
    }

    fn add(&self, f: &[u8]) -> StateResult<()> {
        self.state().add(f)
    }

    fn remove(&self, f: &[u8]) -> StateResult<()> {
        self.state().remove(f)
    }

    fn merge(&self, f: &[u8]) -> StateResult<()> {
        self.state().merge(f)
    }

    fn drop_file(&self, f: &[u8]) -> StateResult<()> {
        self.state().drop_file(f)
    }

    fn copy(&self, source: &[u8], dest: &[u8]) -> StateResult<()> {
        self.state().copy(source, dest)
    }

    fn write(&self, tr: Option<&mut dyn HostTransaction>) -> StateResult<()> {
        let Some(tr) = tr else {
            return self.state().write();
        };
        if !self.state().prepare_deferred_write()? {
            return Ok(());
        }
        let state = Rc::clone(&self.state);
        tr.add_finalizer(
            WRITE_FINALIZER,
            Box::new(move |tr: &mut dyn HostTransaction| state.borrow_mut().backup_and_write(tr)),
        );
        debug!(journal = %tr.journal(), "deferred dirstate write");
        Ok(())
    }

    fn save_backup(&self, prefix: &str, suffix: &str) -> StateResult<()> {
        self.state().save_backup(prefix, suffix)
    }

    fn restore_backup(&self, prefix: &str, suffix: &str) -> StateResult<()> {
        self.state().restore_backup(prefix, suffix)
    }

    fn clear_backup(&self, prefix: &str, suffix: &str) -> StateResult<()> {
        self.state().clear_backup(prefix, suffix)
    }

    fn invalidate(&self) -> StateResult<()> {
        self.state().invalidate()
    }

    fn clear(&self) -> StateResult<()> {
        self.state().clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::transaction::RecordingTransaction;
    use sds_store::FileStateMap;

    fn open(dir: &Path, config: StateConfig) -> SqlDirstate {
        SqlDirstate::open(dir, config, FixedClock::new(100)).unwrap()
    }

    #[test]
    fn host_drives_state_through_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let ds = open(dir.path(), StateConfig::default());
        let host: &dyn DirstateProvider = &ds;

        host.add(b"src/lib.rs").unwrap();
        host.copy(b"src/old.rs", b"src/lib.rs").unwrap();
        host.begin_parent_change();
        host.set_parents(NodeId::from_array([5; 20]), NodeId::null()).unwrap();
        host.end_parent_change();
        host.write(None).unwrap();

        assert_eq!(host.state_of(b"src/lib.rs").unwrap(), 'a');
        assert!(host.has_dir(b"src").unwrap());
        assert_eq!(host.copied(b"src/lib.rs").unwrap(), Some(b"src/old.rs".to_vec()));
        assert_eq!(host.parents().unwrap().p1, NodeId::from_array([5; 20]));
        assert!(host.nonnormal_set().unwrap().contains(&b"src/lib.rs".to_vec()));
    }

    #[test]
    fn deferred_write_commits_when_transaction_closes() {
        let dir = tempfile::tempdir().unwrap();
        let ds = open(dir.path(), StateConfig::default().with_backups());
        ds.add(b"f").unwrap();

        let mut tr = RecordingTransaction::new("journal");
        ds.write(Some(&mut tr)).unwrap();
        assert_eq!(tr.pending_finalizers(), vec![WRITE_FINALIZER]);
        assert!(ds.state().is_dirty());

        tr.close().unwrap();
        assert!(!ds.state().is_dirty());
        assert_eq!(tr.backups().len(), 1);
        assert!(dir.path().join("journal.dirstate.sqlite3").exists());

        // The commit is durable: a fresh handle sees it.
        let other = open(dir.path(), StateConfig::default());
        assert_eq!(other.state_of(b"f").unwrap(), 'a');
    }

    #[test]
    fn deferred_write_keeps_nonnormal_set_current() {
        let dir = tempfile::tempdir().unwrap();
        let ds = open(dir.path(), StateConfig::default());
        ds.normal(b"f", 0o644, 1, 100).unwrap();
        assert!(ds.nonnormal_set().unwrap().is_empty());

        let mut tr = RecordingTransaction::new("journal");
        ds.write(Some(&mut tr)).unwrap();

        let direct = FileStateMap::new(Rc::clone(ds.state().database()))
            .nonnormal_entries()
            .unwrap();
        assert_eq!(direct, HashSet::from([b"f".to_vec()]));
        assert_eq!(ds.nonnormal_set().unwrap(), direct);

        tr.close().unwrap();
        assert_eq!(ds.nonnormal_set().unwrap(), direct);
    }

    #[test]
    fn deferred_write_of_clean_state_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ds = open(dir.path(), StateConfig::default());
        let mut tr = RecordingTransaction::new("journal");
        ds.write(Some(&mut tr)).unwrap();
        assert!(tr.pending_finalizers().is_empty());
    }

    #[test]
    fn skipped_backups_register_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ds = open(dir.path(), StateConfig::default());
        ds.add(b"f").unwrap();
        let mut tr = RecordingTransaction::new("journal");
        ds.write(Some(&mut tr)).unwrap();
        tr.close().unwrap();
        assert!(tr.backups().is_empty());
        assert!(!dir.path().join("journal.dirstate.sqlite3").exists());
        assert!(!ds.state().is_dirty());
    }
}
