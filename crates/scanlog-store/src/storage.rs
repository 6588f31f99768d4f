use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, Error as SqlError, ErrorCode, OptionalExtension, params};
use scanlog_core::{ScanError, ScanResult};
use scanlog_fs::WorkspacePaths;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable string key-value storage behind the record store.
pub trait Storage: Send + Sync {
    fn read(&self, key: &str) -> ScanResult<Option<String>>;
    fn write(&self, key: &str, value: &str) -> ScanResult<()>;
    fn delete(&self, key: &str) -> ScanResult<()>;
}

impl<T: Storage + ?Sized> Storage for Box<T> {
    fn read(&self, key: &str) -> ScanResult<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> ScanResult<()> {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> ScanResult<()> {
        (**self).delete(key)
    }
}

/// `<profile>/<entry>`, with the profile reduced to a filesystem-safe token.
pub fn storage_key(profile: &str, entry: &str) -> String {
    format!("{}/{entry}", profile_key(profile))
}

/// Key-value table inside `.scanlog/state.db`.
///
/// A connection is opened per operation so the handle stays cheap to clone
/// and can be shared between the record store and token lookups.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    pub fn from_workspace(paths: &WorkspacePaths) -> ScanResult<Self> {
        Self::open(&paths.state_db_path)
    }

    pub fn open(db_path: &Path) -> ScanResult<Self> {
        let storage = Self {
            db_path: db_path.to_path_buf(),
        };

        let conn = storage.connection()?;
        storage.initialize_schema(&conn)?;

        Ok(storage)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> ScanResult<Connection> {
        Connection::open(&self.db_path)
            .map_err(|err| sqlite_error("open state database", &self.db_path, err))
    }

    fn initialize_schema(&self, conn: &Connection) -> ScanResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS kv (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(|err| sqlite_error("initialize schema", &self.db_path, err))?;

        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn read(&self, key: &str) -> ScanResult<Option<String>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|err| sqlite_error(&format!("read '{key}'"), &self.db_path, err))
    }

    fn write(&self, key: &str, value: &str) -> ScanResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|err| sqlite_error(&format!("write '{key}'"), &self.db_path, err))?;

        Ok(())
    }

    fn delete(&self, key: &str) -> ScanResult<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(|err| sqlite_error(&format!("delete '{key}'"), &self.db_path, err))?;
        Ok(())
    }
}

/// Shared in-process storage. Clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryEntries>>,
}

#[derive(Debug, Default)]
struct MemoryEntries {
    values: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes that would push the total stored bytes past `bytes` fail with
    /// `QuotaExceeded`.
    pub fn with_quota(bytes: usize) -> Self {
        let storage = Self::default();
        storage.set_quota(Some(bytes));
        storage
    }

    pub fn set_quota(&self, bytes: Option<usize>) {
        self.inner.lock().quota_bytes = bytes;
    }

    /// Successful writes so far.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().values.keys().cloned().collect()
    }
}

impl MemoryEntries {
    fn used_bytes_without(&self, key: &str) -> usize {
        self.values
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, value)| existing.len() + value.len())
            .sum()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> ScanResult<Option<String>> {
        Ok(self.inner.lock().values.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> ScanResult<()> {
        let mut entries = self.inner.lock();
        if let Some(quota) = entries.quota_bytes {
            let needed = entries.used_bytes_without(key) + key.len() + value.len();
            if needed > quota {
                return Err(ScanError::quota(format!(
                    "failed to write '{key}': storage quota of {quota} bytes exceeded ({needed} bytes needed)"
                )));
            }
        }

        entries.values.insert(key.to_string(), value.to_string());
        entries.writes += 1;
        Ok(())
    }

    fn delete(&self, key: &str) -> ScanResult<()> {
        self.inner.lock().values.remove(key);
        Ok(())
    }
}

fn sqlite_error(action: &str, db_path: &Path, err: SqlError) -> ScanError {
    if let SqlError::SqliteFailure(code, message) = &err {
        if code.code == ErrorCode::DiskFull {
            return ScanError::quota(format!(
                "failed to {action}: state database '{}' is full",
                db_path.display()
            ));
        }

        if code.code == ErrorCode::DatabaseCorrupt || code.code == ErrorCode::NotADatabase {
            let detail = message.as_deref().unwrap_or("sqlite reported corruption");
            return ScanError::io(format!(
                "failed to {action}: state database '{}' is corrupted ({detail}); remove '.scanlog/state.db' and run `scanlog sync full` to rebuild the local cache",
                db_path.display()
            ));
        }
    }

    ScanError::io(format!(
        "failed to {action} using state database '{}': {}",
        db_path.display(),
        err
    ))
}

fn profile_key(profile: &str) -> String {
    let mut output = String::with_capacity(profile.len());
    for ch in profile.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            output.push(ch);
        } else {
            output.push('_');
        }
    }

    if output.is_empty() {
        "default".to_string()
    } else {
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanlog_core::ErrorKind;

    #[test]
    fn storage_keys_sanitize_the_profile() {
        assert_eq!(storage_key("default", "records"), "default/records");
        assert_eq!(storage_key("my shop", "token"), "my_shop/token");
        assert_eq!(storage_key("", "records"), "default/records");
    }

    #[test]
    fn memory_quota_counts_replaced_values_once() {
        let storage = MemoryStorage::with_quota(16);
        storage.write("k", "0123456789").expect("fits");
        storage.write("k", "012345678901234").expect("replacement fits");

        let error = storage.write("other", "x").expect_err("over quota");
        assert_eq!(error.kind, ErrorKind::QuotaExceeded);
        assert_eq!(storage.writes(), 2);
        assert_eq!(
            storage.read("k").expect("read").as_deref(),
            Some("012345678901234")
        );
    }

    #[test]
    fn sqlite_round_trips_and_deletes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let storage = SqliteStorage::open(&temp.path().join("state.db")).expect("open");

        assert_eq!(storage.read("default/token").expect("read"), None);
        storage.write("default/token", "abc").expect("write");
        storage.write("default/token", "def").expect("overwrite");
        assert_eq!(
            storage.read("default/token").expect("read").as_deref(),
            Some("def")
        );

        storage.delete("default/token").expect("delete");
        storage.delete("default/token").expect("delete twice");
        assert_eq!(storage.read("default/token").expect("read"), None);
    }

    #[test]
    fn garbage_database_reports_rebuild_hint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let db_path = temp.path().join("state.db");
        std::fs::write(&db_path, vec![b'x'; 4096]).expect("write");

        let error = SqliteStorage::open(&db_path).expect_err("corrupt");
        assert_eq!(error.kind, ErrorKind::Io);
        assert!(error.message.contains("scanlog sync full"));
    }
}
