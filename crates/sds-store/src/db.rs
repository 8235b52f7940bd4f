//! The single SQLite connection shared by every dirstate table.

use std::cell::{Cell, Ref, RefCell};
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Params};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Page cache size handed to `PRAGMA cache_size` (negative means KiB, so
/// roughly 100 MB).
pub const SQLITE_CACHE_SIZE: i64 = -100_000;

const IN_MEMORY: &str = ":memory:";

/// Owner of the dirstate database connection.
///
/// A transaction is opened lazily by the first mutating statement and stays
/// open until [`commit`](Self::commit). Closing or reopening the connection
/// discards whatever was not committed.
///
/// Mutating statements and commits are counted so callers can verify that an
/// operation did not touch the database.
pub struct Database {
    path: PathBuf,
    cache_size: i64,
    conn: RefCell<Option<Connection>>,
    writes: Cell<u64>,
    commits: Cell<u64>,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, cache_size: i64) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = connect(&path, cache_size)?;
        debug!(path = %path.display(), "opened dirstate database");
        Ok(Self {
            path,
            cache_size,
            conn: RefCell::new(Some(conn)),
            writes: Cell::new(0),
            commits: Cell::new(0),
        })
    }

    /// Open a private in-memory database. Reopening it yields an empty one.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(IN_MEMORY, SQLITE_CACHE_SIZE)
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the live connection.
    pub fn conn(&self) -> StoreResult<Ref<'_, Connection>> {
        Ref::filter_map(self.conn.borrow(), Option::as_ref).map_err(|_| StoreError::Closed)
    }

    /// Run one mutating statement inside the current transaction, starting
    /// the transaction first if none is open.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> StoreResult<usize> {
        let conn = self.conn()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        let changed = conn.prepare_cached(sql)?.execute(params)?;
        self.writes.set(self.writes.get() + 1);
        Ok(changed)
    }

    /// Run schema statements and commit immediately, together with anything
    /// already pending.
    pub fn execute_schema(&self, sql: &str) -> StoreResult<()> {
        self.conn()?.execute_batch(sql)?;
        self.commit()
    }

    /// Returns `true` while uncommitted changes are pending.
    pub fn in_transaction(&self) -> StoreResult<bool> {
        Ok(!self.conn()?.is_autocommit())
    }

    /// Commit the open transaction, if any.
    pub fn commit(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
            self.commits.set(self.commits.get() + 1);
            debug!(path = %self.path.display(), "committed dirstate transaction");
        }
        Ok(())
    }

    /// Toggle the engine's durability guarantees.
    ///
    /// With durability off, synchronous writes and the rollback journal are
    /// both disabled: an interrupted write leaves the file unusable. Must be
    /// called outside a transaction.
    pub fn set_durable(&self, durable: bool) -> StoreResult<()> {
        let conn = self.conn()?;
        let (synchronous, journal_mode) = if durable {
            ("ON", "DELETE")
        } else {
            ("OFF", "OFF")
        };
        conn.pragma_update(None, "synchronous", synchronous)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| row.get(0))?;
        debug!(durable, journal_mode = %mode, "updated dirstate database durability");
        Ok(())
    }

    /// Close the connection. Uncommitted changes are rolled back by the
    /// engine. Closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        if let Some(conn) = self.conn.borrow_mut().take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            debug!(path = %self.path.display(), "closed dirstate database");
        }
        Ok(())
    }

    /// Close the connection and open a fresh one against the same file.
    pub fn reopen(&self) -> StoreResult<()> {
        self.close()?;
        let conn = connect(&self.path, self.cache_size)?;
        *self.conn.borrow_mut() = Some(conn);
        Ok(())
    }

    /// Number of mutating statements executed since open.
    pub fn write_count(&self) -> u64 {
        self.writes.get()
    }

    /// Number of transactions committed since open.
    pub fn commit_count(&self) -> u64 {
        self.commits.get()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("open", &self.conn.borrow().is_some())
            .field("writes", &self.writes.get())
            .field("commits", &self.commits.get())
            .finish()
    }
}

fn connect(path: &Path, cache_size: i64) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "cache_size", cache_size)?;
    Ok(conn)
}
