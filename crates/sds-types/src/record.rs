//! Tracked file records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Size sentinel: the entry comes from the merge's second parent and is
/// always considered dirty.
pub const SIZE_FROM_OTHER_PARENT: i32 = -2;

/// Size sentinel: size unknown (also marks a removed entry that was merged).
pub const SIZE_NONNORMAL: i32 = -1;

/// Mtime sentinel: the cached mtime cannot be trusted and the file must be
/// rechecked on the next status scan.
pub const MTIME_UNSET: i32 = -1;

/// Status of a tracked file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Tracked and clean as of the cached metadata.
    Normal,
    /// Scheduled for addition.
    Added,
    /// Scheduled for removal.
    Removed,
    /// Merged from both parents.
    Merged,
}

impl EntryState {
    /// The single-byte code used in both the database and the flat file.
    pub fn as_byte(self) -> u8 {
        match self {
            EntryState::Normal => b'n',
            EntryState::Added => b'a',
            EntryState::Removed => b'r',
            EntryState::Merged => b'm',
        }
    }

    pub fn as_char(self) -> char {
        self.as_byte() as char
    }
}

impl TryFrom<u8> for EntryState {
    type Error = TypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'n' => Ok(EntryState::Normal),
            b'a' => Ok(EntryState::Added),
            b'r' => Ok(EntryState::Removed),
            b'm' => Ok(EntryState::Merged),
            other => Err(TypeError::InvalidState(other)),
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A tracked file's status together with its cached filesystem metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub state: EntryState,
    /// Permission bits as last observed.
    pub mode: u32,
    /// Size in bytes, or one of the size sentinels.
    pub size: i32,
    /// Modification time in seconds, or [`MTIME_UNSET`].
    pub mtime: i32,
}

impl FileRecord {
    pub fn new(state: EntryState, mode: u32, size: i32, mtime: i32) -> Self {
        Self {
            state,
            mode,
            size,
            mtime,
        }
    }

    /// A clean file with trusted metadata.
    pub fn normal(mode: u32, size: i32, mtime: i32) -> Self {
        Self::new(EntryState::Normal, mode, size, mtime)
    }

    /// A normal file whose metadata must be rechecked.
    pub fn lookup() -> Self {
        Self::new(EntryState::Normal, 0, SIZE_NONNORMAL, MTIME_UNSET)
    }

    pub fn added() -> Self {
        Self::new(EntryState::Added, 0, SIZE_NONNORMAL, MTIME_UNSET)
    }

    pub fn merged() -> Self {
        Self::new(EntryState::Merged, 0, SIZE_NONNORMAL, MTIME_UNSET)
    }

    /// A file taken from the merge's second parent.
    pub fn other_parent() -> Self {
        Self::new(EntryState::Normal, 0, SIZE_FROM_OTHER_PARENT, MTIME_UNSET)
    }

    /// A removed file. `size` remembers whether it was merged (`-1`) or
    /// taken from the other parent (`-2`) so a later lookup can restore it.
    pub fn removed(size: i32) -> Self {
        Self::new(EntryState::Removed, 0, size, 0)
    }

    /// The cached status cannot be trusted without a filesystem check.
    pub fn is_nonnormal(&self) -> bool {
        self.state != EntryState::Normal || self.mtime == MTIME_UNSET
    }

    pub fn is_from_other_parent(&self) -> bool {
        self.state == EntryState::Normal && self.size == SIZE_FROM_OTHER_PARENT
    }
}
