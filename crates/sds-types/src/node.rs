use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length in bytes of a revision identifier.
pub const NODE_LEN: usize = 20;

/// Identifier of a revision the working copy can be based on.
///
/// The all-zeros id is the null revision: it stands for "no parent" and is
/// what `p2` holds whenever no merge is in progress.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_LEN]);

impl NodeId {
    /// Create a `NodeId` from raw bytes.
    pub const fn from_array(bytes: [u8; NODE_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a `NodeId` from a byte slice of exactly [`NODE_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; NODE_LEN] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: NODE_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// The null revision.
    pub const fn null() -> Self {
        Self([0u8; NODE_LEN])
    }

    /// Returns `true` if this is the null revision.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; NODE_LEN]
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_LEN] {
        &self.0
    }

    /// Lowercase hex representation (40 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 12 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Parse from a 40-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; NODE_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_LEN]) -> Self {
        Self(bytes)
    }
}

/// The working copy parents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parents {
    pub p1: NodeId,
    pub p2: NodeId,
}

impl Parents {
    pub fn new(p1: NodeId, p2: NodeId) -> Self {
        Self { p1, p2 }
    }

    /// Both parents null: a fresh or cleared working copy.
    pub fn null() -> Self {
        Self::default()
    }

    /// A merge is in progress when the second parent is set.
    pub fn is_merge(&self) -> bool {
        !self.p2.is_null()
    }

    /// `p1` bytes followed by `p2` bytes, as stored at the head of the
    /// legacy flat file and the shadow file.
    pub fn to_raw(&self) -> [u8; NODE_LEN * 2] {
        let mut out = [0u8; NODE_LEN * 2];
        out[..NODE_LEN].copy_from_slice(self.p1.as_bytes());
        out[NODE_LEN..].copy_from_slice(self.p2.as_bytes());
        out
    }
}
