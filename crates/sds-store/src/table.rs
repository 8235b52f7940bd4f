//! Table descriptions: name, columns, schema and row codec.

use rusqlite::types::{Value, ValueRef};
use rusqlite::Row;
use sds_types::{EntryState, FileRecord};

use crate::error::{StoreError, StoreResult};

/// A database table keyed by a byte-string primary key.
///
/// Implementors describe the schema and how one row's value columns map to
/// [`Table::Value`]. [`SqlMap`](crate::SqlMap) builds every statement from
/// these constants.
pub trait Table {
    /// In-memory representation of the value columns.
    type Value: Clone;

    const NAME: &'static str;
    const KEY: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Idempotent DDL creating the table and its indexes.
    const SCHEMA: &'static str;

    /// Decode the value columns, which start at column `offset` of `row`.
    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<Self::Value>;

    /// Encode a value into one SQL parameter per entry of [`Table::COLUMNS`].
    fn encode(value: &Self::Value) -> Vec<Value>;
}

/// Read a byte-string column regardless of whether it was stored as TEXT or
/// BLOB.
pub(crate) fn bytes_column(
    table: &'static str,
    row: &Row<'_>,
    idx: usize,
) -> StoreResult<Vec<u8>> {
    match row.get_ref(idx)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => Ok(b.to_vec()),
        other => Err(StoreError::Decode {
            table,
            reason: format!("expected bytes in column {idx}, found {:?}", other.data_type()),
        }),
    }
}

/// Per-file status records.
pub struct FilesTable;

impl Table for FilesTable {
    type Value = FileRecord;

    const NAME: &'static str = "files";
    const KEY: &'static str = "filename";
    const COLUMNS: &'static [&'static str] = &["status", "mode", "size", "mtime"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS files (
            filename BLOB PRIMARY KEY,
            status BLOB NOT NULL,
            mode INTEGER NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL);
        CREATE INDEX IF NOT EXISTS files_mtime ON files(mtime);";

    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<FileRecord> {
        let status = bytes_column(Self::NAME, row, offset)?;
        let state = match status.as_slice() {
            [code] => EntryState::try_from(*code).map_err(|e| StoreError::Decode {
                table: Self::NAME,
                reason: e.to_string(),
            })?,
            other => {
                return Err(StoreError::Decode {
                    table: Self::NAME,
                    reason: format!("status must be one byte, got {}", other.len()),
                })
            }
        };
        let mode: i64 = row.get(offset + 1)?;
        Ok(FileRecord {
            state,
            mode: mode as u32,
            size: row.get(offset + 2)?,
            mtime: row.get(offset + 3)?,
        })
    }

    fn encode(value: &FileRecord) -> Vec<Value> {
        // Status is stored as TEXT so the literal comparisons in the
        // derived queries (`status = 'n'`) match.
        vec![
            Value::Text(value.state.as_char().to_string()),
            Value::Integer(i64::from(value.mode)),
            Value::Integer(i64::from(value.size)),
            Value::Integer(i64::from(value.mtime)),
        ]
    }
}

/// Copy records: destination to source.
pub struct CopyTable;

impl Table for CopyTable {
    type Value = Vec<u8>;

    const NAME: &'static str = "copymap";
    const KEY: &'static str = "dest";
    const COLUMNS: &'static [&'static str] = &["source"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS copymap (
            dest BLOB PRIMARY KEY,
            source BLOB NOT NULL);";

    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<Vec<u8>> {
        bytes_column(Self::NAME, row, offset)
    }

    fn encode(value: &Vec<u8>) -> Vec<Value> {
        vec![Value::Blob(value.clone())]
    }
}

/// Case-folded file name to real file name.
pub struct FileFoldTable;

impl Table for FileFoldTable {
    type Value = Vec<u8>;

    const NAME: &'static str = "filefoldmap";
    const KEY: &'static str = "normed";
    const COLUMNS: &'static [&'static str] = &["real"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS filefoldmap (
            normed BLOB PRIMARY KEY,
            real BLOB NOT NULL);";

    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<Vec<u8>> {
        bytes_column(Self::NAME, row, offset)
    }

    fn encode(value: &Vec<u8>) -> Vec<Value> {
        vec![Value::Blob(value.clone())]
    }
}

/// Case-folded directory name to real directory name.
pub struct DirFoldTable;

impl Table for DirFoldTable {
    type Value = Vec<u8>;

    const NAME: &'static str = "dirfoldmap";
    const KEY: &'static str = "normed";
    const COLUMNS: &'static [&'static str] = &["real"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS dirfoldmap (
            normed BLOB PRIMARY KEY,
            real BLOB NOT NULL);";

    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<Vec<u8>> {
        bytes_column(Self::NAME, row, offset)
    }

    fn encode(value: &Vec<u8>) -> Vec<Value> {
        vec![Value::Blob(value.clone())]
    }
}

/// Directory refcounts.
pub struct DirsTable;

impl Table for DirsTable {
    type Value = i64;

    const NAME: &'static str = "dirs";
    const KEY: &'static str = "dir";
    const COLUMNS: &'static [&'static str] = &["count"];
    const SCHEMA: &'static str = "CREATE TABLE IF NOT EXISTS dirs (
            dir BLOB PRIMARY KEY,
            count INT NOT NULL);";

    fn decode(row: &Row<'_>, offset: usize) -> StoreResult<i64> {
        Ok(row.get(offset)?)
    }

    fn encode(value: &i64) -> Vec<Value> {
        vec![Value::Integer(*value)]
    }
}
