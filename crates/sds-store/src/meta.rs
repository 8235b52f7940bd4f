//! The catch-all `other` table: schema version and working copy parents.

use std::rc::Rc;

use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension};
use sds_types::{NodeId, Parents};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Current on-disk schema version.
pub const SCHEMA_VERSION: i64 = 1;

const TABLE: &str = "other";

/// Small key/value data that does not warrant its own table.
#[derive(Debug)]
pub struct MetaStore {
    db: Rc<Database>,
}

impl MetaStore {
    pub fn new(db: Rc<Database>) -> Self {
        Self { db }
    }

    /// Create the table and record the schema version if it is missing.
    pub fn create_schema(&self) -> StoreResult<()> {
        self.db.execute_schema(
            "CREATE TABLE IF NOT EXISTS other (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL)",
        )?;
        if self.schema_version()?.is_none() {
            self.db.execute(
                "INSERT OR REPLACE INTO other (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )?;
            self.db.commit()?;
        }
        Ok(())
    }

    pub fn drop_schema(&self) -> StoreResult<()> {
        self.db.execute_schema("DROP TABLE IF EXISTS other")
    }

    pub fn schema_version(&self) -> StoreResult<Option<i64>> {
        let conn = self.db.conn()?;
        let version = conn
            .query_row(
                "SELECT value FROM other WHERE key = 'schema_version'",
                [],
                |row| match row.get_ref(0)? {
                    ValueRef::Integer(v) => Ok(Some(v)),
                    ValueRef::Text(t) | ValueRef::Blob(t) => {
                        Ok(std::str::from_utf8(t).ok().and_then(|s| s.parse().ok()))
                    }
                    _ => Ok(None),
                },
            )
            .optional()?;
        Ok(version.flatten())
    }

    /// Read the parents. Missing keys read as the null revision.
    pub fn parents(&self) -> StoreResult<Parents> {
        let mut parents = Parents::null();
        let conn = self.db.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT key, value FROM other WHERE key = 'p1' OR key = 'p2'")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key = text_column(row.get_ref(0)?)?;
            let node = NodeId::from_hex(&text_column(row.get_ref(1)?)?).map_err(|e| {
                StoreError::Decode {
                    table: TABLE,
                    reason: format!("parent {key}: {e}"),
                }
            })?;
            match key.as_str() {
                "p1" => parents.p1 = node,
                "p2" => parents.p2 = node,
                _ => {}
            }
        }
        Ok(parents)
    }

    /// Store both parents as hex text within the open transaction.
    pub fn set_parents(&self, parents: &Parents) -> StoreResult<()> {
        let sql = "INSERT OR REPLACE INTO other (key, value) VALUES (?1, ?2)";
        self.db.execute(sql, params!["p1", parents.p1.to_hex()])?;
        self.db.execute(sql, params!["p2", parents.p2.to_hex()])?;
        Ok(())
    }
}

fn text_column(value: ValueRef<'_>) -> StoreResult<String> {
    match value {
        ValueRef::Text(t) | ValueRef::Blob(t) => Ok(String::from_utf8_lossy(t).into_owned()),
        other => Err(StoreError::Decode {
            table: TABLE,
            reason: format!("expected text, found {:?}", other.data_type()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> MetaStore {
        let meta = MetaStore::new(Rc::new(Database::open_in_memory().unwrap()));
        meta.create_schema().unwrap();
        meta
    }

    #[test]
    fn schema_version_is_recorded_once() {
        let meta = meta();
        assert_eq!(meta.schema_version().unwrap(), Some(SCHEMA_VERSION));
        meta.create_schema().unwrap();
        assert_eq!(meta.schema_version().unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn missing_parents_read_as_null() {
        assert_eq!(meta().parents().unwrap(), Parents::null());
    }

    #[test]
    fn parents_roundtrip_as_hex() {
        let meta = meta();
        let parents = Parents::new(NodeId::from_array([0x11; 20]), NodeId::from_array([0x22; 20]));
        meta.set_parents(&parents).unwrap();
        assert_eq!(meta.parents().unwrap(), parents);

        let stored: String = meta
            .db
            .conn()
            .unwrap()
            .query_row("SELECT value FROM other WHERE key = 'p1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, "11".repeat(20));
    }
}
