//! Crash-durable key/value store shared by the application and the engine.
//!
//! Two logical collections live in one SQLite table:
//! - `obligations`, keyed by obligation id (application-owned)
//! - `meta`, keyed by composite strings (settings, dedup ledger)
//!
//! Every call is its own transaction. There are no multi-key transactions;
//! [`DurableStore::put_if_absent`] is the single atomic claim primitive the
//! dedup ledger builds on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::data_dir;
use super::migrations::{self, MigrationStatus};
use crate::error::StoreError;

/// Logical collection within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Obligations,
    Meta,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Obligations => "obligations",
            Collection::Meta => "meta",
        }
    }
}

/// Durable key/value contract used by the engine.
pub trait DurableStore: Send + Sync {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<String>, StoreError>;

    fn get_all(&self, collection: Collection) -> Result<Vec<String>, StoreError>;

    fn put(&self, collection: Collection, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;

    /// Insert only if `key` is absent. Returns `true` if this call inserted.
    fn put_if_absent(
        &self,
        collection: Collection,
        key: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    fn entries_with_prefix(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StoreError>;
}

/// Typed JSON helpers over any [`DurableStore`].
pub trait StoreExt: DurableStore {
    fn get_json<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(collection, key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::CorruptRecord {
                    collection: collection.as_str().to_string(),
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let raw = encode(collection, key, value)?;
        self.put(collection, key, &raw)
    }

    fn put_json_if_absent<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let raw = encode(collection, key, value)?;
        self.put_if_absent(collection, key, &raw)
    }

    /// Decode every record in a collection. Records that fail to decode are
    /// logged and skipped so one bad row cannot stall a whole wake.
    fn get_all_json<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for raw in self.get_all(collection)? {
            match serde_json::from_str(&raw) {
                Ok(v) => out.push(v),
                Err(e) => warn!(collection = collection.as_str(), error = %e, "skipping undecodable record"),
            }
        }
        Ok(out)
    }
}

impl<S: DurableStore + ?Sized> StoreExt for S {}

fn encode<T: Serialize>(collection: Collection, key: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::EncodeFailed {
        collection: collection.as_str().to_string(),
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Opens a store for one wake.
///
/// The host may tear the process down between wakes, so the dispatcher asks
/// for a store each time instead of holding one open across wakes.
pub trait OpenStore: Send + Sync {
    fn open_store(&self) -> Result<Arc<dyn DurableStore>, StoreError>;
}

impl<S: DurableStore + 'static> OpenStore for Arc<S> {
    fn open_store(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        Ok(self.clone())
    }
}

/// Opens the SQLite store at a fixed path on every wake.
#[derive(Debug, Clone)]
pub struct SqlitePath(pub PathBuf);

impl OpenStore for SqlitePath {
    fn open_store(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        Ok(Arc::new(SqliteStore::open_at(&self.0)?))
    }
}

/// SQLite-backed [`DurableStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open the store at `<data_dir>/paywatch.db`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened,
    /// fails its integrity check, or carries a newer schema.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(Self::default_path()?)
    }

    /// `<data_dir>/paywatch.db`.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the data directory cannot be
    /// created.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        data_dir()
            .map(|dir| dir.join("paywatch.db"))
            .map_err(|e| StoreError::Unavailable {
                path: PathBuf::from("paywatch.db"),
                reason: e.to_string(),
            })
    }

    /// Open the store at an explicit path.
    ///
    /// # Errors
    /// See [`SqliteStore::open`].
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.clone(),
            reason,
        };

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| unavailable(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| unavailable(e.to_string()))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| unavailable(e.to_string()))?;

        Self::init(conn, path.clone())
    }

    /// Open an in-memory store (for tests and simulations).
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_memory() -> Result<Self, StoreError> {
        let path = PathBuf::from(":memory:");
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Self::init(conn, path)
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.clone(),
            reason,
        };

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| unavailable(e.to_string()))?;
        if check != "ok" {
            return Err(unavailable(format!("integrity check failed: {check}")));
        }

        match migrations::migrate(&conn).map_err(|e| unavailable(e.to_string()))? {
            MigrationStatus::Current => {}
            MigrationStatus::Newer { found } => {
                return Err(unavailable(format!(
                    "schema version {found} is newer than supported version {}",
                    migrations::CURRENT_SCHEMA_VERSION
                )));
            }
        }

        debug!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Locked)
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM records WHERE collection = ?1 AND key = ?2",
                params![collection.as_str(), key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn get_all(&self, collection: Collection) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT value FROM records WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![collection.as_str()], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn put(&self, collection: Collection, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO records (collection, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection.as_str(), key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
        )?;
        Ok(removed > 0)
    }

    fn put_if_absent(
        &self,
        collection: Collection,
        key: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO records (collection, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![collection.as_str(), key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted == 1)
    }

    fn entries_with_prefix(
        &self,
        collection: Collection,
        prefix: &str,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM records
             WHERE collection = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![collection.as_str(), prefix], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn get_put_delete() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.get(Collection::Meta, "k").unwrap().is_none());
        store.put(Collection::Meta, "k", "v1").unwrap();
        store.put(Collection::Meta, "k", "v2").unwrap();
        assert_eq!(store.get(Collection::Meta, "k").unwrap().as_deref(), Some("v2"));
        assert!(store.delete(Collection::Meta, "k").unwrap());
        assert!(!store.delete(Collection::Meta, "k").unwrap());
    }

    #[test]
    fn collections_are_separate() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(Collection::Meta, "A", "meta").unwrap();
        store.put(Collection::Obligations, "A", "ob").unwrap();
        assert_eq!(store.get_all(Collection::Obligations).unwrap(), vec!["ob".to_string()]);
        assert_eq!(store.get(Collection::Meta, "A").unwrap().as_deref(), Some("meta"));
    }

    #[test]
    fn put_if_absent_claims_once() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.put_if_absent(Collection::Meta, "claim", "first").unwrap());
        assert!(!store.put_if_absent(Collection::Meta, "claim", "second").unwrap());
        assert_eq!(store.get(Collection::Meta, "claim").unwrap().as_deref(), Some("first"));
    }

    #[test]
    fn prefix_scan_treats_wildcards_literally() {
        let store = SqliteStore::open_memory().unwrap();
        store.put(Collection::Meta, "fired:a_1", "1").unwrap();
        store.put(Collection::Meta, "fired:ab1", "2").unwrap();
        store.put(Collection::Meta, "settings", "3").unwrap();
        let entries = store.entries_with_prefix(Collection::Meta, "fired:a_").unwrap();
        assert_eq!(entries, vec![("fired:a_1".to_string(), "1".to_string())]);
        assert_eq!(store.entries_with_prefix(Collection::Meta, "fired:").unwrap().len(), 2);
    }

    #[test]
    fn json_helpers_skip_corrupt_rows() {
        let store = SqliteStore::open_memory().unwrap();
        store.put_json(Collection::Obligations, "a", &Sample { n: 1 }).unwrap();
        store.put(Collection::Obligations, "b", "{not json").unwrap();
        let all: Vec<Sample> = store.get_all_json(Collection::Obligations).unwrap();
        assert_eq!(all, vec![Sample { n: 1 }]);
        assert!(store.get_json::<Sample>(Collection::Obligations, "b").is_err());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteStore::open_at(&path).unwrap();
            assert!(store.put_if_absent(Collection::Meta, "fired:x", "1").unwrap());
        }
        let store = SqliteStore::open_at(&path).unwrap();
        assert!(!store.put_if_absent(Collection::Meta, "fired:x", "1").unwrap());
    }

    #[test]
    fn newer_schema_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        drop(SqliteStore::open_at(&path).unwrap());
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE schema_version SET version = 99", []).unwrap();
        }
        let err = SqliteStore::open_at(&path).err().unwrap();
        assert!(err.is_unavailable());
    }

    #[test]
    fn garbage_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        std::fs::write(&path, vec![0xA5u8; 4096]).unwrap();
        let err = SqliteStore::open_at(&path).err().unwrap();
        assert!(err.is_unavailable());
    }
}
