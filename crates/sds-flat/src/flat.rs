use std::collections::BTreeMap;

use sds_store::{DirsMap, StoreResult};
use sds_types::{normcase, EntryState, FileRecord, Parents};

/// The whole dirstate held in memory, as the legacy flat file stores it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatDirstate {
    pub parents: Parents,
    pub files: BTreeMap<Vec<u8>, FileRecord>,
    /// Destination to source.
    pub copies: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl FlatDirstate {
    pub fn new(parents: Parents) -> Self {
        Self {
            parents,
            ..Default::default()
        }
    }

    fn tracked(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.files
            .iter()
            .filter(|(_, record)| record.state != EntryState::Removed)
            .map(|(path, _)| path)
    }

    /// Case-folded name to real name for every file not removed.
    pub fn file_fold_map(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.tracked()
            .map(|path| (normcase(path), path.clone()))
            .collect()
    }

    /// Refcounts of the directories holding files that are not removed.
    pub fn dir_counts(&self) -> StoreResult<BTreeMap<Vec<u8>, i64>> {
        Ok(DirsMap::from_paths(self.tracked())?.into_counts())
    }

    /// Case-folded name to real name for every directory in
    /// [`dir_counts`](Self::dir_counts).
    pub fn dir_fold_map(&self) -> StoreResult<BTreeMap<Vec<u8>, Vec<u8>>> {
        Ok(self
            .dir_counts()?
            .into_keys()
            .map(|dir| (normcase(&dir), dir))
            .collect())
    }
}
