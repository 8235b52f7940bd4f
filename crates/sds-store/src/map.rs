//! Cached, write-through mapping over one table.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::debug;

use crate::db::Database;
use crate::error::StoreResult;
use crate::table::{bytes_column, Table};

/// Dictionary view of a [`Table`].
///
/// Reads go to the cache first and fall back to a primary-key lookup whose
/// result is cached. Writes are issued immediately (`INSERT OR REPLACE` /
/// `DELETE`) inside the database's open transaction and mirrored in the
/// cache, so the cache never holds anything the database does not.
pub struct SqlMap<T: Table> {
    db: Rc<Database>,
    cache: HashMap<Vec<u8>, T::Value>,
    select_sql: String,
    upsert_sql: String,
    delete_sql: String,
    scan_sql: String,
    _table: PhantomData<T>,
}

impl<T: Table> SqlMap<T> {
    pub fn new(db: Rc<Database>) -> Self {
        let columns = T::COLUMNS.join(", ");
        let placeholders = (2..=T::COLUMNS.len() + 1)
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            select_sql: format!("SELECT {columns} FROM {} WHERE {} = ?1", T::NAME, T::KEY),
            upsert_sql: format!(
                "INSERT OR REPLACE INTO {} ({}, {columns}) VALUES (?1, {placeholders})",
                T::NAME,
                T::KEY
            ),
            delete_sql: format!("DELETE FROM {} WHERE {} = ?1", T::NAME, T::KEY),
            scan_sql: format!("SELECT {}, {columns} FROM {}", T::KEY, T::NAME),
            db,
            cache: HashMap::new(),
            _table: PhantomData,
        }
    }

    /// The shared database handle.
    pub fn db(&self) -> &Rc<Database> {
        &self.db
    }

    pub fn create_schema(&self) -> StoreResult<()> {
        self.db.execute_schema(T::SCHEMA)
    }

    pub fn drop_schema(&mut self) -> StoreResult<()> {
        self.cache.clear();
        self.db.execute_schema(&format!("DROP TABLE IF EXISTS {}", T::NAME))
    }

    /// Look up `key`. `Ok(None)` means the key is not present.
    pub fn get(&mut self, key: &[u8]) -> StoreResult<Option<T::Value>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value.clone()));
        }
        let value = {
            let conn = self.db.conn()?;
            let mut stmt = conn.prepare_cached(&self.select_sql)?;
            let mut rows = stmt.query(params![key])?;
            let decoded = match rows.next()? {
                Some(row) => Some(T::decode(row, 0)?),
                None => None,
            };
            decoded
        };
        if let Some(value) = &value {
            self.cache.insert(key.to_vec(), value.clone());
        }
        Ok(value)
    }

    pub fn contains(&mut self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or replace `key`.
    pub fn set(&mut self, key: &[u8], value: T::Value) -> StoreResult<()> {
        self.upsert(key, &value)?;
        self.cache.insert(key.to_vec(), value);
        Ok(())
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn delete(&mut self, key: &[u8]) -> StoreResult<()> {
        self.db.execute(&self.delete_sql, params![key])?;
        self.cache.remove(key);
        Ok(())
    }

    /// Remove `key` and return its previous value, if any.
    pub fn pop(&mut self, key: &[u8]) -> StoreResult<Option<T::Value>> {
        let previous = self.get(key)?;
        if previous.is_some() {
            self.delete(key)?;
        }
        Ok(previous)
    }

    /// Number of rows in the table.
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.db.conn()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", T::NAME), [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        let conn = self.db.conn()?;
        let any = conn
            .query_row(&format!("SELECT 1 FROM {} LIMIT 1", T::NAME), [], |_| Ok(()))
            .optional()?;
        Ok(any.is_none())
    }

    /// Stream every row through `visit`, decoding one row at a time.
    ///
    /// The scan is not restartable; `visit` returning an error stops it.
    pub fn for_each<F>(&self, mut visit: F) -> StoreResult<()>
    where
        F: FnMut(Vec<u8>, T::Value) -> StoreResult<()>,
    {
        let conn = self.db.conn()?;
        let mut stmt = conn.prepare_cached(&self.scan_sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key = bytes_column(T::NAME, row, 0)?;
            let value = T::decode(row, 1)?;
            visit(key, value)?;
        }
        Ok(())
    }

    /// Collect a full-table scan.
    pub fn entries(&self) -> StoreResult<Vec<(Vec<u8>, T::Value)>> {
        let mut out = Vec::new();
        self.for_each(|key, value| {
            out.push((key, value));
            Ok(())
        })?;
        Ok(out)
    }

    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        self.for_each(|key, _| {
            out.push(key);
            Ok(())
        })?;
        Ok(out)
    }

    /// Bulk upsert. Entries are not cached.
    pub fn update<I>(&mut self, entries: I) -> StoreResult<usize>
    where
        I: IntoIterator<Item = (Vec<u8>, T::Value)>,
    {
        let mut written = 0;
        for (key, value) in entries {
            self.upsert(&key, &value)?;
            if self.cache.contains_key(&key) {
                self.cache.insert(key, value);
            }
            written += 1;
        }
        debug!(table = T::NAME, written, "bulk update");
        Ok(written)
    }

    /// Delete every row.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.db.execute(&format!("DELETE FROM {}", T::NAME), [])?;
        self.cache.clear();
        Ok(())
    }

    /// Forget cached entries; the next reads go to the database.
    pub fn invalidate_cache(&mut self) {
        self.cache.clear();
    }

    pub(crate) fn cached_values_mut(&mut self) -> impl Iterator<Item = &mut T::Value> {
        self.cache.values_mut()
    }

    fn upsert(&self, key: &[u8], value: &T::Value) -> StoreResult<()> {
        let mut values = Vec::with_capacity(T::COLUMNS.len() + 1);
        values.push(Value::Blob(key.to_vec()));
        values.extend(T::encode(value));
        self.db.execute(&self.upsert_sql, params_from_iter(values))?;
        Ok(())
    }
}

impl<T: Table> std::fmt::Debug for SqlMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlMap")
            .field("table", &T::NAME)
            .field("cached", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{CopyTable, FilesTable};
    use sds_types::FileRecord;

    fn copy_map() -> SqlMap<CopyTable> {
        let db = Rc::new(Database::open_in_memory().unwrap());
        let map = SqlMap::<CopyTable>::new(db);
        map.create_schema().unwrap();
        map
    }

    #[test]
    fn get_missing_is_none() {
        let mut map = copy_map();
        assert_eq!(map.get(b"nope").unwrap(), None);
        assert!(!map.contains(b"nope").unwrap());
    }

    #[test]
    fn set_is_visible_before_commit() {
        let mut map = copy_map();
        map.set(b"dest", b"src".to_vec()).unwrap();
        assert!(map.db().in_transaction().unwrap());
        map.invalidate_cache();
        assert_eq!(map.get(b"dest").unwrap(), Some(b"src".to_vec()));
    }

    #[test]
    fn empty_value_is_distinct_from_missing() {
        let mut map = copy_map();
        map.set(b"dest", Vec::new()).unwrap();
        map.invalidate_cache();
        assert_eq!(map.get(b"dest").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut map = copy_map();
        map.set(b"a", b"b".to_vec()).unwrap();
        map.delete(b"a").unwrap();
        map.delete(b"a").unwrap();
        assert_eq!(map.get(b"a").unwrap(), None);
        assert_eq!(map.len().unwrap(), 0);
    }

    #[test]
    fn pop_returns_previous_value() {
        let mut map = copy_map();
        map.set(b"a", b"b".to_vec()).unwrap();
        assert_eq!(map.pop(b"a").unwrap(), Some(b"b".to_vec()));
        assert_eq!(map.pop(b"a").unwrap(), None);
    }

    #[test]
    fn update_and_scan_multi_column_values() {
        let db = Rc::new(Database::open_in_memory().unwrap());
        let mut map = SqlMap::<FilesTable>::new(db);
        map.create_schema().unwrap();

        let written = map
            .update(vec![
                (b"a".to_vec(), FileRecord::normal(0o644, 3, 10)),
                (b"b".to_vec(), FileRecord::added()),
            ])
            .unwrap();
        assert_eq!(written, 2);

        let mut entries = map.entries().unwrap();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), FileRecord::normal(0o644, 3, 10)),
                (b"b".to_vec(), FileRecord::added()),
            ]
        );
    }

    #[test]
    fn clear_empties_table_and_cache() {
        let mut map = copy_map();
        map.set(b"a", b"x".to_vec()).unwrap();
        map.set(b"b", b"y".to_vec()).unwrap();
        map.clear().unwrap();
        assert!(map.is_empty().unwrap());
        assert_eq!(map.get(b"a").unwrap(), None);
    }

    #[test]
    fn schema_is_idempotent() {
        let mut map = copy_map();
        map.create_schema().unwrap();
        map.drop_schema().unwrap();
        map.drop_schema().unwrap();
        map.create_schema().unwrap();
        assert_eq!(map.len().unwrap(), 0);
    }

    #[test]
    fn for_each_stops_on_visitor_error() {
        let mut map = copy_map();
        map.update((0..5u8).map(|i| (vec![i], vec![i]))).unwrap();
        let mut seen = 0;
        let result = map.for_each(|_, _| {
            seen += 1;
            Err(crate::StoreError::Closed)
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
