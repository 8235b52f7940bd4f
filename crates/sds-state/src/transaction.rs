//! The slice of the host's transaction manager the dirstate relies on.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{StateError, StateResult};

/// Callback run when the host transaction is finalized.
pub type Finalizer = Box<dyn FnOnce(&mut dyn HostTransaction) -> StateResult<()>>;

/// A file copy the host restores if the transaction is rolled back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupEntry {
    /// Storage area the file belongs to (`"plain"` for the metadata
    /// directory).
    pub location: String,
    pub path: PathBuf,
    pub backup: PathBuf,
    /// Cache files may be dropped instead of restored.
    pub cache: bool,
}

impl BackupEntry {
    pub fn plain(path: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            location: "plain".into(),
            path: path.into(),
            backup: backup.into(),
            cache: false,
        }
    }
}

/// Host transaction hooks.
pub trait HostTransaction {
    /// Name of the transaction journal; backups taken for this transaction
    /// are named after it.
    fn journal(&self) -> &str;

    /// Register `finalizer` under `name`, replacing any earlier one with the
    /// same name.
    fn add_finalizer(&mut self, name: &str, finalizer: Finalizer);

    fn add_backup_entry(&mut self, entry: BackupEntry);
}

/// A minimal in-process transaction.
///
/// Finalizers run in name order on [`close`](Self::close). Backup entries
/// are restored by [`rollback`](Self::rollback), newest first.
pub struct RecordingTransaction {
    journal: String,
    finalizers: BTreeMap<String, Finalizer>,
    backups: Vec<BackupEntry>,
}

impl RecordingTransaction {
    pub fn new(journal: impl Into<String>) -> Self {
        Self {
            journal: journal.into(),
            finalizers: BTreeMap::new(),
            backups: Vec::new(),
        }
    }

    /// Names of finalizers not yet run.
    pub fn pending_finalizers(&self) -> Vec<&str> {
        self.finalizers.keys().map(String::as_str).collect()
    }

    pub fn backups(&self) -> &[BackupEntry] {
        &self.backups
    }

    /// Run every registered finalizer. Finalizers registered while closing
    /// run in the same pass.
    pub fn close(&mut self) -> StateResult<()> {
        while let Some((name, finalizer)) = self.finalizers.pop_first() {
            debug!(journal = %self.journal, finalizer = %name, "running finalizer");
            let tr: &mut dyn HostTransaction = &mut *self;
            finalizer(tr)?;
        }
        Ok(())
    }

    /// Copy every backup back over its original file.
    pub fn rollback(&mut self) -> StateResult<()> {
        for entry in self.backups.drain(..).rev() {
            restore(&entry.backup, &entry.path)?;
            info!(path = %entry.path.display(), "restored backup");
        }
        self.finalizers.clear();
        Ok(())
    }
}

impl HostTransaction for RecordingTransaction {
    fn journal(&self) -> &str {
        &self.journal
    }

    fn add_finalizer(&mut self, name: &str, finalizer: Finalizer) {
        self.finalizers.insert(name.to_string(), finalizer);
    }

    fn add_backup_entry(&mut self, entry: BackupEntry) {
        self.backups.push(entry);
    }
}

impl std::fmt::Debug for RecordingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingTransaction")
            .field("journal", &self.journal)
            .field("finalizers", &self.pending_finalizers())
            .field("backups", &self.backups)
            .finish()
    }
}

fn restore(backup: &Path, path: &Path) -> StateResult<()> {
    fs::copy(backup, path).map_err(|source| StateError::Backup {
        path: backup.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn finalizers_run_in_name_order_and_replace_by_name() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut tr = RecordingTransaction::new("journal");
        for (name, tag) in [("b", "b1"), ("a", "a"), ("b", "b2")] {
            let log = Rc::clone(&log);
            tr.add_finalizer(
                name,
                Box::new(move |_: &mut dyn HostTransaction| {
                    log.borrow_mut().push(tag);
                    Ok(())
                }),
            );
        }
        assert_eq!(tr.pending_finalizers(), vec!["a", "b"]);
        tr.close().unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b2"]);
        assert!(tr.pending_finalizers().is_empty());
    }

    #[test]
    fn finalizers_can_register_backups() {
        let mut tr = RecordingTransaction::new("journal");
        tr.add_finalizer(
            "x",
            Box::new(|tr: &mut dyn HostTransaction| {
                let backup = format!("{}.file", tr.journal());
                tr.add_backup_entry(BackupEntry::plain("file", backup));
                Ok(())
            }),
        );
        tr.close().unwrap();
        assert_eq!(tr.backups(), &[BackupEntry::plain("file", "journal.file")]);
    }

    #[test]
    fn rollback_restores_backups() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data");
        let backup = dir.path().join("journal.data");
        fs::write(&file, b"new").unwrap();
        fs::write(&backup, b"old").unwrap();

        let mut tr = RecordingTransaction::new("journal");
        tr.add_backup_entry(BackupEntry::plain(&file, &backup));
        tr.rollback().unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"old");
        assert!(tr.backups().is_empty());
    }

    #[test]
    fn rollback_with_missing_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut tr = RecordingTransaction::new("journal");
        tr.add_backup_entry(BackupEntry::plain(
            dir.path().join("data"),
            dir.path().join("missing"),
        ));
        assert!(matches!(tr.rollback(), Err(StateError::Backup { .. })));
    }
}
