// Durable local document store using a JSONL write log + SQLite

use super::jsonl::{self, LockedLog, WriteEntry};
use super::listeners::{ListenerRegistry, deliver_all};
use super::{DocumentStore, Listener, ListenerId, StoreError, generate_key};
use crate::path::StorePath;
use crate::tree;
use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const CURRENT_VERSION: u32 = 1;
const LOG_FILE: &str = "writes.jsonl";
const DB_FILE: &str = "lifetrack.db";

struct Inner {
    db: Connection,
    listeners: ListenerRegistry,
}

/// Document store persisted under `<root>/.lifetrack`
///
/// The write log is the source of truth; SQLite holds the materialized tree as
/// non-overlapping `(path, value)` rows and is rebuilt from the log when the
/// log changes behind its back.
pub struct FileStore {
    base_path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileStore {
    /// Open or create a store at the given path
    ///
    /// The store will be created in a `.lifetrack` subdirectory of the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let base_path = path.as_ref().join(".lifetrack");

        fs::create_dir_all(&base_path).context("Failed to create store directory")?;

        let db_path = base_path.join(DB_FILE);
        let db = Connection::open(&db_path).context("Failed to open SQLite database")?;
        db.busy_timeout(Duration::from_secs(5))?;

        let store = Self {
            base_path,
            inner: Mutex::new(Inner {
                db,
                listeners: ListenerRegistry::new(),
            }),
        };

        store.create_schema()?;
        store.create_gitignore()?;
        store.write_version()?;

        store.catch_up()?;

        info!(path = ?store.base_path, "Opened file store");
        Ok(store)
    }

    /// Get the base path of this store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn log_path(&self) -> PathBuf {
        self.base_path.join(LOG_FILE)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.lock().db.execute_batch(
            r#"
            -- Materialized tree: no row's path is an ancestor of another's
            CREATE TABLE IF NOT EXISTS nodes (
                path TEXT PRIMARY KEY,
                data_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Write log state at last rebuild, for staleness detection
            CREATE TABLE IF NOT EXISTS sync_metadata (
                log_name TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime INTEGER NOT NULL,
                file_len INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn create_gitignore(&self) -> Result<()> {
        let gitignore_path = self.base_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(gitignore_path, "lifetrack.db\nlifetrack.db-shm\nlifetrack.db-wal\n")?;
        }
        Ok(())
    }

    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    /// Check if the database needs rebuilding from the write log
    ///
    /// True when the log was modified (or removed) since the last time this
    /// store or another process sharing the database recorded it.
    pub fn is_stale(&self) -> Result<bool> {
        let stored = stored_stamp(&self.lock().db)?;
        let current = log_stamp(&self.log_path())?;
        Ok(match (stored, current) {
            (None, None) => false,
            (Some(_), None) => true, // log removed
            (None, Some(_)) => true, // never synced
            (Some(stored), Some(current)) => stored != current,
        })
    }

    /// Rebuild the materialized tree by replaying the write log in order
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.lock();
        let mut log = LockedLog::open(&self.log_path())?;
        rebuild(&mut inner.db, &mut log)
    }

    /// Rebuild if the log changed behind our back; true when it did
    fn catch_up(&self) -> Result<bool> {
        let mut inner = self.lock();
        let mut log = LockedLog::open(&self.log_path())?;
        catch_up(&mut inner.db, &mut log)
    }

    fn apply(&self, path: &StorePath, value: Value) -> Result<()> {
        let dispatches = {
            let mut inner = self.lock();
            let Inner { db, listeners } = &mut *inner;

            // The log stays locked until the new stamp is recorded
            let mut log = LockedLog::open(&self.log_path())?;

            // 1. Pick up entries appended from outside before adding ours
            let rebuilt = catch_up(db, &mut log)?;

            // 2. Append to the write log
            let entry = WriteEntry::new(path, tree::normalize(value));
            log.append(&entry)?;

            // 3. Materialize in SQLite
            let tx = db.transaction()?;
            write_node(&tx, path, entry.value, entry.updated_at)?;
            record_log_stamp(&tx, log.stamp()?)?;
            tx.commit()?;
            drop(log);

            // 4. Collect snapshots for affected listeners
            listeners.bump();
            let written = if rebuilt { None } else { Some(path) };
            listeners.changed(written, |p| read_node(db, p))?
        };
        deliver_all(dispatches);
        Ok(())
    }
}

impl DocumentStore for FileStore {
    fn on_snapshot(&self, path: &StorePath, listener: Listener) -> Result<ListenerId, StoreError> {
        let (id, initial) = {
            let mut inner = self.lock();
            let current = read_node(&inner.db, path).map_err(StoreError::storage)?;
            inner.listeners.register(path.clone(), listener, current)
        };
        initial.deliver();
        Ok(id)
    }

    fn off(&self, id: ListenerId) {
        let detached = self.lock().listeners.remove(id);
        if let Some(detached) = detached {
            detached.wait();
        }
    }

    fn get(&self, path: &StorePath) -> Result<Value, StoreError> {
        read_node(&self.lock().db, path).map_err(StoreError::storage)
    }

    fn write_generated(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let key = generate_key();
        let target = path.child(&key)?;
        debug!(path = %target, "write_generated");
        self.apply(&target, value).map_err(StoreError::storage)?;
        Ok(key)
    }

    fn write_exact(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        debug!(path = %path, "write_exact");
        self.apply(path, value).map_err(StoreError::storage)
    }

    fn delete(&self, path: &StorePath) -> Result<(), StoreError> {
        debug!(path = %path, "delete");
        self.apply(path, Value::Null).map_err(StoreError::storage)
    }

    fn refresh(&self) -> Result<(), StoreError> {
        let dispatches = {
            let mut inner = self.lock();
            let Inner { db, listeners } = &mut *inner;
            let mut log = LockedLog::open(&self.log_path()).map_err(StoreError::storage)?;
            catch_up(db, &mut log).map_err(StoreError::storage)?;
            drop(log);

            listeners.bump();
            listeners.changed(None, |p| read_node(db, p)).map_err(StoreError::storage)?
        };
        if !dispatches.is_empty() {
            debug!(count = dispatches.len(), "refresh found external changes");
        }
        deliver_all(dispatches);
        Ok(())
    }
}

// ============================================================================
// Node table helpers
// ============================================================================

/// Row at `path` or at one of its ancestors, nearest first
fn row_at_or_above(db: &Connection, path: &StorePath) -> Result<Option<(StorePath, Value)>> {
    let segments = path.segments();
    for depth in (0..=segments.len()).rev() {
        let candidate = segments[..depth].join("/");
        let data: Option<String> = db
            .query_row("SELECT data_json FROM nodes WHERE path = ?1", [&candidate], |row| row.get(0))
            .optional()?;
        if let Some(json) = data {
            let value = serde_json::from_str(&json).context("Failed to deserialize node")?;
            let row_path = StorePath::parse(&candidate)?;
            return Ok(Some((row_path, value)));
        }
    }
    Ok(None)
}

/// Rows strictly below `path`, ordered by path
fn rows_below(db: &Connection, path: &StorePath) -> Result<Vec<(StorePath, Value)>> {
    let (lower, upper) = descendant_range(path);
    let mut stmt = db.prepare("SELECT path, data_json FROM nodes WHERE path >= ?1 AND path < ?2 AND path <> '' ORDER BY path")?;
    let rows = stmt.query_map([&lower, &upper], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut results = Vec::new();
    for row in rows {
        let (raw_path, json) = row?;
        let value = serde_json::from_str(&json).context("Failed to deserialize node")?;
        results.push((StorePath::parse(&raw_path)?, value));
    }
    Ok(results)
}

/// Half-open key range `[lower, upper)` covering every path below `path`
fn descendant_range(path: &StorePath) -> (String, String) {
    if path.is_root() {
        // Every non-empty path; '\u{10FFFF}' sorts after any segment character
        return (String::new(), "\u{10FFFF}".to_string());
    }
    let base = path.as_string();
    // '0' is the character right after '/'
    (format!("{}/", base), format!("{}0", base))
}

fn read_node(db: &Connection, path: &StorePath) -> Result<Value> {
    if let Some((row_path, value)) = row_at_or_above(db, path)? {
        let rel = row_path.relative(path).unwrap_or_default();
        return Ok(tree::get_at(&value, rel));
    }

    let mut assembled = Value::Null;
    for (row_path, value) in rows_below(db, path)? {
        if let Some(rel) = path.relative(&row_path) {
            tree::set_at(&mut assembled, rel, value);
        }
    }
    Ok(assembled)
}

fn write_node(db: &Connection, path: &StorePath, value: Value, updated_at: i64) -> Result<()> {
    let value = tree::normalize(value);

    if let Some((row_path, mut row_value)) = row_at_or_above(db, path)? {
        let rel = row_path.relative(path).unwrap_or_default();
        tree::set_at(&mut row_value, rel, value);
        let row_key = row_path.as_string();
        if row_value.is_null() {
            db.execute("DELETE FROM nodes WHERE path = ?1", [&row_key])?;
        } else {
            db.execute(
                "UPDATE nodes SET data_json = ?1, updated_at = ?2 WHERE path = ?3",
                rusqlite::params![serde_json::to_string(&row_value)?, updated_at, row_key],
            )?;
        }
        return Ok(());
    }

    let (lower, upper) = descendant_range(path);
    db.execute(
        "DELETE FROM nodes WHERE path >= ?1 AND path < ?2 AND path <> ''",
        [&lower, &upper],
    )?;
    if !value.is_null() {
        db.execute(
            "INSERT OR REPLACE INTO nodes (path, data_json, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![path.as_string(), serde_json::to_string(&value)?, updated_at],
        )?;
    }
    Ok(())
}

/// Modification time (ms) and length of the write log, `None` if absent
fn log_stamp(log_path: &Path) -> Result<Option<(i64, i64)>> {
    if !log_path.exists() {
        return Ok(None);
    }
    let metadata = fs::metadata(log_path)?;
    let mtime = metadata
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    Ok(Some((mtime, metadata.len() as i64)))
}

fn stored_stamp(db: &Connection) -> Result<Option<(i64, i64)>> {
    Ok(db
        .query_row(
            "SELECT file_mtime, file_len FROM sync_metadata WHERE log_name = ?1",
            [LOG_FILE],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

fn record_log_stamp(db: &Connection, (mtime, len): (i64, i64)) -> Result<()> {
    db.execute(
        "INSERT OR REPLACE INTO sync_metadata (log_name, last_sync_time, file_mtime, file_len)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![LOG_FILE, jsonl::now_ms(), mtime, len],
    )?;
    Ok(())
}

/// Replay the locked log into `nodes` and record the stamp it was read at
fn rebuild(db: &mut Connection, log: &mut LockedLog) -> Result<()> {
    info!("Rebuilding database from write log");

    let entries = log.entries()?;
    let tx = db.transaction()?;
    tx.execute("DELETE FROM nodes", [])?;
    for (path, entry) in &entries {
        write_node(&tx, path, entry.value.clone(), entry.updated_at)?;
    }
    record_log_stamp(&tx, log.stamp()?)?;
    tx.commit()?;

    info!(entries = entries.len(), "Sync complete");
    Ok(())
}

/// Rebuild when the log no longer matches the recorded stamp
fn catch_up(db: &mut Connection, log: &mut LockedLog) -> Result<bool> {
    if stored_stamp(db)? == Some(log.stamp()?) {
        return Ok(false);
    }
    info!("Database is stale, rebuilding from write log");
    rebuild(db, log)?;
    Ok(true)
}
