use crate::core::error::{CacheError, Result};
use crate::core::types::{StorageItem, StorageKind};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const MANIFEST_FILE: &str = "manifest.sqlite";

const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS manifest (
    key TEXT,
    filename TEXT,
    size INTEGER,
    inline_data BLOB,
    extended_data BLOB,
    modification_time INTEGER,
    last_access_time INTEGER,
    PRIMARY KEY(key)
);
CREATE INDEX IF NOT EXISTS last_access_time_index ON manifest(last_access_time);
";

const SQL_UPSERT: &str = "INSERT OR REPLACE INTO manifest \
    (key, filename, size, inline_data, extended_data, modification_time, last_access_time) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
const SQL_GET_ITEM: &str = "SELECT key, filename, size, inline_data, extended_data, \
    modification_time, last_access_time FROM manifest WHERE key = ?1";
const SQL_GET_INFO: &str =
    "SELECT key, filename, size, modification_time, last_access_time FROM manifest WHERE key = ?1";
const SQL_GET_FILENAME: &str = "SELECT filename FROM manifest WHERE key = ?1";
const SQL_DELETE: &str = "DELETE FROM manifest WHERE key = ?1";
const SQL_TOUCH: &str = "UPDATE manifest SET last_access_time = ?1 WHERE key = ?2";
const SQL_COUNT: &str = "SELECT COUNT(key) FROM manifest";
const SQL_SIZE: &str = "SELECT IFNULL(SUM(size), 0) FROM manifest";
const SQL_LARGER_THAN: &str = "SELECT key, filename FROM manifest WHERE size > ?1";
const SQL_EARLIER_THAN: &str = "SELECT key, filename FROM manifest WHERE last_access_time < ?1";
const SQL_LRU_SCAN: &str =
    "SELECT key, filename, size FROM manifest ORDER BY last_access_time ASC";

fn unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Default name for a file-backed value: lowercase hex SHA-256 of the key.
pub fn default_filename(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Key-value store backed by a SQLite manifest plus a flat-file blob
/// directory.
///
/// Layout under the root path: `manifest.sqlite`, `data/` for file-backed
/// blobs and `trash/` as the staging area for bulk deletion. The store is not
/// internally synchronized; callers serialize access through one mutex
/// covering the connection and the filesystem (see `DiskCache`).
///
/// Construction failures are fatal; every per-operation failure degrades to
/// `false`/`None` and is logged through `tracing` when `error_logs_enabled`
/// is set.
pub struct KvStorage {
    path: PathBuf,
    db_path: PathBuf,
    data_path: PathBuf,
    trash_path: PathBuf,
    kind: StorageKind,
    error_logs_enabled: bool,
    conn: Connection,
}

impl KvStorage {
    /// Opens (or creates) a store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P, kind: StorageKind) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(CacheError::InvalidPath("empty path".to_string()));
        }
        if path.exists() && !path.is_dir() {
            return Err(CacheError::NotADirectory(path));
        }

        let db_path = path.join(MANIFEST_FILE);
        let data_path = path.join("data");
        let trash_path = path.join("trash");

        fs::create_dir_all(&path)?;
        fs::create_dir_all(&data_path)?;
        fs::create_dir_all(&trash_path)?;

        let conn = Self::open_database(&db_path)?;
        debug!("opened kv storage at {:?} (kind={:?})", path, kind);

        Ok(Self {
            path,
            db_path,
            data_path,
            trash_path,
            kind,
            error_logs_enabled: false,
            conn,
        })
    }

    fn open_database(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.set_prepared_statement_cache_capacity(16);
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn set_error_logs_enabled(&mut self, enabled: bool) {
        self.error_logs_enabled = enabled;
    }

    fn log_failure(&self, op: &str, err: &dyn fmt::Display) {
        if self.error_logs_enabled {
            warn!("kv storage: {op} failed: {err}");
        }
    }

    /// Saves or replaces an item.
    ///
    /// File placement: a `File` store always writes a data file, a `Sqlite`
    /// store always stores inline, and a `Hybrid` store writes a file exactly
    /// when the caller supplied a filename. File writes go through a temp
    /// file renamed into place. A row upsert that fails after a successful
    /// file write is not compensated; the stray file is collected by a later
    /// save or removal under the same name.
    pub fn save(
        &self,
        key: &str,
        value: &[u8],
        filename: Option<&str>,
        extended_data: Option<&[u8]>,
    ) -> bool {
        if key.is_empty() || value.is_empty() {
            return false;
        }

        let to_file = self.kind == StorageKind::File
            || (self.kind == StorageKind::Hybrid && filename.is_some());

        if to_file {
            let name = filename.map_or_else(|| default_filename(key), str::to_string);
            if let Err(err) = self.write_data_file(&name, value) {
                self.log_failure("data file write", &err);
                return false;
            }
            self.upsert_row(key, value.len() as i64, Some(&name), None, extended_data)
        } else {
            self.upsert_row(key, value.len() as i64, None, Some(value), extended_data)
        }
    }

    fn write_data_file(&self, name: &str, value: &[u8]) -> std::io::Result<()> {
        let target = self.data_path.join(name);
        let tmp = self.data_path.join(format!("{name}.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &target)
    }

    fn upsert_row(
        &self,
        key: &str,
        size: i64,
        filename: Option<&str>,
        inline: Option<&[u8]>,
        extended: Option<&[u8]>,
    ) -> bool {
        let now = unix_secs();
        let result = self.conn.prepare_cached(SQL_UPSERT).and_then(|mut stmt| {
            stmt.execute(params![key, filename, size, inline, extended, now, now])
        });
        match result {
            Ok(_) => true,
            Err(err) => {
                self.log_failure("manifest upsert", &err);
                false
            }
        }
    }

    /// Looks up an item with its value and touches its access time.
    ///
    /// An unreadable backing file behaves like a miss.
    pub fn get(&self, key: &str) -> Option<StorageItem> {
        if key.is_empty() {
            return None;
        }
        let mut item = match self.query_item(key) {
            Ok(Some(item)) => item,
            Ok(None) => return None,
            Err(err) => {
                self.log_failure("item lookup", &err);
                return None;
            }
        };

        if let Some(name) = item.filename.as_deref() {
            match fs::read(self.data_path.join(name)) {
                Ok(bytes) => item.value = Some(bytes),
                Err(err) => {
                    self.log_failure("data file read", &err);
                    return None;
                }
            }
        }

        self.touch(key);
        Some(item)
    }

    /// Metadata-only lookup; also touches the access time, like `get`.
    pub fn get_info(&self, key: &str) -> Option<StorageItem> {
        if key.is_empty() {
            return None;
        }
        let result = self.conn.prepare_cached(SQL_GET_INFO).and_then(|mut stmt| {
            stmt.query_row(params![key], |row| {
                Ok(StorageItem {
                    key: row.get(0)?,
                    filename: row.get::<_, Option<String>>(1)?.filter(|f| !f.is_empty()),
                    size: row.get(2)?,
                    mod_time: row.get(3)?,
                    access_time: row.get(4)?,
                    ..Default::default()
                })
            })
            .optional()
        });
        match result {
            Ok(Some(item)) => {
                self.touch(key);
                Some(item)
            }
            Ok(None) => None,
            Err(err) => {
                self.log_failure("item info lookup", &err);
                None
            }
        }
    }

    pub fn get_value(&self, key: &str) -> Option<Vec<u8>> {
        self.get(key).and_then(|item| item.value)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get_info(key).is_some()
    }

    fn query_item(&self, key: &str) -> rusqlite::Result<Option<StorageItem>> {
        let mut stmt = self.conn.prepare_cached(SQL_GET_ITEM)?;
        stmt.query_row(params![key], |row| {
            let filename = row.get::<_, Option<String>>(1)?.filter(|f| !f.is_empty());
            let value = if filename.is_none() {
                row.get::<_, Option<Vec<u8>>>(3)?
            } else {
                None
            };
            Ok(StorageItem {
                key: row.get(0)?,
                filename,
                size: row.get(2)?,
                value,
                extended_data: row.get(4)?,
                mod_time: row.get(5)?,
                access_time: row.get(6)?,
            })
        })
        .optional()
    }

    fn touch(&self, key: &str) {
        let result = self
            .conn
            .prepare_cached(SQL_TOUCH)
            .and_then(|mut stmt| stmt.execute(params![unix_secs(), key]));
        if let Err(err) = result {
            self.log_failure("access time update", &err);
        }
    }

    /// Removes one item: manifest row first, then the backing file.
    ///
    /// Removing an absent key is a successful no-op. A crash between the two
    /// steps leaves an orphan file, never an orphan row.
    pub fn remove(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let filename = match self.query_filename(key) {
            Ok(filename) => filename,
            Err(err) => {
                self.log_failure("filename lookup", &err);
                return false;
            }
        };
        self.delete_row_and_file(key, filename.as_deref())
    }

    fn query_filename(&self, key: &str) -> rusqlite::Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(SQL_GET_FILENAME)?;
        let row = stmt
            .query_row(params![key], |row| row.get::<_, Option<String>>(0))
            .optional()?;
        Ok(row.flatten().filter(|f| !f.is_empty()))
    }

    fn delete_row_and_file(&self, key: &str, filename: Option<&str>) -> bool {
        let result = self
            .conn
            .prepare_cached(SQL_DELETE)
            .and_then(|mut stmt| stmt.execute(params![key]));
        if let Err(err) = result {
            self.log_failure("manifest delete", &err);
            return false;
        }
        if let Some(name) = filename {
            let _ = fs::remove_file(self.data_path.join(name));
        }
        true
    }

    /// Removes every item whose recorded size exceeds `size` bytes.
    pub fn remove_larger_than(&self, size: i64) -> bool {
        self.remove_matching(SQL_LARGER_THAN, size)
    }

    /// Removes every item last accessed before `time` (unix seconds).
    pub fn remove_earlier_than(&self, time: i64) -> bool {
        self.remove_matching(SQL_EARLIER_THAN, time)
    }

    fn remove_matching(&self, sql: &str, bound: i64) -> bool {
        let rows: rusqlite::Result<Vec<(String, Option<String>)>> = (|| {
            let mut stmt = self.conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params![bound], |row| {
                Ok((row.get(0)?, row.get::<_, Option<String>>(1)?))
            })?;
            rows.collect()
        })();
        let rows = match rows {
            Ok(rows) => rows,
            Err(err) => {
                self.log_failure("matching-row scan", &err);
                return false;
            }
        };
        for (key, filename) in rows {
            self.delete_row_and_file(&key, filename.as_deref().filter(|f| !f.is_empty()));
        }
        true
    }

    fn lru_scan(&self) -> rusqlite::Result<Vec<(String, Option<String>, i64)>> {
        let mut stmt = self.conn.prepare_cached(SQL_LRU_SCAN)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get(2)?,
            ))
        })?;
        rows.collect()
    }

    /// Removes least recently used items until the total value size is at
    /// most `max_size` bytes. Full LRU-ordered scan per call; cheap enough
    /// for the periodic batch trims that drive it.
    pub fn remove_to_fit_size(&self, max_size: i64) -> bool {
        let mut current = self.total_size();
        if current < 0 {
            return false;
        }
        if current <= max_size {
            return true;
        }
        let rows = match self.lru_scan() {
            Ok(rows) => rows,
            Err(err) => {
                self.log_failure("lru scan", &err);
                return false;
            }
        };
        for (key, filename, size) in rows {
            if current <= max_size {
                break;
            }
            if !self.delete_row_and_file(&key, filename.as_deref().filter(|f| !f.is_empty())) {
                return false;
            }
            current -= size;
        }
        true
    }

    /// Removes least recently used items until at most `max_count` remain.
    pub fn remove_to_fit_count(&self, max_count: i64) -> bool {
        let mut current = self.count();
        if current < 0 {
            return false;
        }
        if current <= max_count {
            return true;
        }
        let rows = match self.lru_scan() {
            Ok(rows) => rows,
            Err(err) => {
                self.log_failure("lru scan", &err);
                return false;
            }
        };
        for (key, filename, _) in rows {
            if current <= max_count {
                break;
            }
            if !self.delete_row_and_file(&key, filename.as_deref().filter(|f| !f.is_empty())) {
                return false;
            }
            current -= 1;
        }
        true
    }

    /// Empties the store.
    ///
    /// Closes the database, deletes the manifest file, moves the whole data
    /// directory into the trash under a unique name, recreates an empty data
    /// directory and a fresh schema, then sweeps the trash on a background
    /// task. The store is empty and usable as soon as this returns, however
    /// long the sweep takes. A crash between the move and the recreation can
    /// leave the store without a data directory; the next `open` repairs
    /// that.
    pub fn remove_all(&mut self) -> bool {
        debug!("resetting kv storage at {:?}", self.path);

        // Swap in a placeholder so the file-backed connection closes and the
        // manifest can be deleted.
        let placeholder = match Connection::open_in_memory() {
            Ok(conn) => conn,
            Err(err) => {
                self.log_failure("placeholder connection", &err);
                return false;
            }
        };
        drop(std::mem::replace(&mut self.conn, placeholder));
        let _ = fs::remove_file(&self.db_path);

        let staged = self.trash_path.join(format!("data-{}", unix_nanos()));
        if let Err(err) = fs::rename(&self.data_path, &staged) {
            // A missing data directory is not fatal; there is nothing to stage.
            self.log_failure("trash staging", &err);
        }

        if let Err(err) = fs::create_dir_all(&self.data_path) {
            self.log_failure("data directory recreation", &err);
            return false;
        }

        self.sweep_trash();

        match Self::open_database(&self.db_path) {
            Ok(conn) => {
                self.conn = conn;
                true
            }
            Err(err) => {
                self.log_failure("database reopen", &err);
                false
            }
        }
    }

    /// Deletes everything staged in the trash directory, off-thread when a
    /// tokio runtime is available.
    fn sweep_trash(&self) {
        let trash = self.trash_path.clone();
        let sweep = move || {
            let Ok(entries) = fs::read_dir(&trash) else { return };
            for entry in entries.flatten() {
                let path = entry.path();
                let result = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                if let Err(err) = result {
                    debug!("trash sweep: could not remove {:?}: {err}", path);
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(sweep);
            }
            Err(_) => sweep(),
        }
    }

    /// Total item count, or `-1` when the query fails.
    pub fn count(&self) -> i64 {
        let result = self
            .conn
            .prepare_cached(SQL_COUNT)
            .and_then(|mut stmt| stmt.query_row([], |row| row.get(0)));
        match result {
            Ok(count) => count,
            Err(err) => {
                self.log_failure("count query", &err);
                -1
            }
        }
    }

    /// Total recorded value size in bytes, or `-1` when the query fails.
    pub fn total_size(&self) -> i64 {
        let result = self
            .conn
            .prepare_cached(SQL_SIZE)
            .and_then(|mut stmt| stmt.query_row([], |row| row.get(0)));
        match result {
            Ok(size) => size,
            Err(err) => {
                self.log_failure("size query", &err);
                -1
            }
        }
    }
}
