//! Serialization of the legacy flat dirstate file.
//!
//! Version 1 layout:
//!
//! ```text
//! +------------+------------+----------------------------------------+
//! | p1 (20 B)  | p2 (20 B)  | entries...                             |
//! +------------+------------+----------------------------------------+
//!
//! entry: state u8 | mode i32 | size i32 | mtime i32 | len i32 | name
//! ```
//!
//! Integers are big-endian. A copied file's name is followed by a NUL byte
//! and the copy source, both counted in `len`.

use sds_types::{EntryState, FileRecord, NodeId, Parents, MTIME_UNSET};

use crate::error::{FlatError, FlatResult};
use crate::flat::FlatDirstate;

const PARENTS_LEN: usize = 40;
const HEADER_LEN: usize = 17;

/// Encoder and decoder for one flat file layout.
pub trait FlatCodec {
    fn decode(&self, data: &[u8]) -> FlatResult<FlatDirstate>;

    /// Serialize `dirstate`. `now` is the current filesystem time: normal
    /// entries modified at that second are written with an unknown mtime.
    fn encode(&self, dirstate: &FlatDirstate, now: i32) -> FlatResult<Vec<u8>>;
}

/// The classic version 1 layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirstateV1;

impl FlatCodec for DirstateV1 {
    fn decode(&self, data: &[u8]) -> FlatResult<FlatDirstate> {
        if data.is_empty() {
            return Ok(FlatDirstate::default());
        }
        if data.len() < PARENTS_LEN {
            return Err(FlatError::Corrupt(format!(
                "file too short for parents: {} bytes",
                data.len()
            )));
        }
        let parents = Parents::new(node(&data[..20])?, node(&data[20..PARENTS_LEN])?);
        let mut flat = FlatDirstate::new(parents);

        let mut pos = PARENTS_LEN;
        while pos < data.len() {
            if pos + HEADER_LEN > data.len() {
                return Err(FlatError::Corrupt(format!("truncated header at offset {pos}")));
            }
            let header = &data[pos..pos + HEADER_LEN];
            let state = EntryState::try_from(header[0])
                .map_err(|e| FlatError::Corrupt(format!("offset {pos}: {e}")))?;
            let mode = read_i32(&header[1..5]);
            let size = read_i32(&header[5..9]);
            let mtime = read_i32(&header[9..13]);
            let len = usize::try_from(read_i32(&header[13..17]))
                .map_err(|_| FlatError::Corrupt(format!("negative name length at offset {pos}")))?;
            pos += HEADER_LEN;

            if pos + len > data.len() {
                return Err(FlatError::Corrupt(format!("truncated name at offset {pos}")));
            }
            let name = &data[pos..pos + len];
            pos += len;

            let path = match name.iter().position(|&b| b == 0) {
                Some(nul) => {
                    let dest = name[..nul].to_vec();
                    flat.copies.insert(dest.clone(), name[nul + 1..].to_vec());
                    dest
                }
                None => name.to_vec(),
            };
            flat.files
                .insert(path, FileRecord::new(state, mode as u32, size, mtime));
        }
        Ok(flat)
    }

    fn encode(&self, dirstate: &FlatDirstate, now: i32) -> FlatResult<Vec<u8>> {
        let mut out = Vec::with_capacity(PARENTS_LEN + dirstate.files.len() * (HEADER_LEN + 32));
        out.extend_from_slice(&dirstate.parents.to_raw());

        for (path, record) in &dirstate.files {
            let mut name = path.clone();
            if let Some(source) = dirstate.copies.get(path) {
                name.push(0);
                name.extend_from_slice(source);
            }
            let len = i32::try_from(name.len()).map_err(|_| {
                FlatError::Corrupt(format!("name too long: {} bytes", name.len()))
            })?;
            let mtime = if record.state == EntryState::Normal && record.mtime == now {
                MTIME_UNSET
            } else {
                record.mtime
            };

            out.push(record.state.as_byte());
            out.extend_from_slice(&(record.mode as i32).to_be_bytes());
            out.extend_from_slice(&record.size.to_be_bytes());
            out.extend_from_slice(&mtime.to_be_bytes());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&name);
        }
        Ok(out)
    }
}

fn node(bytes: &[u8]) -> FlatResult<NodeId> {
    NodeId::from_slice(bytes).map_err(|e| FlatError::Corrupt(e.to_string()))
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    i32::from_be_bytes(buf)
}
