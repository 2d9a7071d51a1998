use super::store::{CacheEntry, CacheStore, StoreSummary};
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_created_at ON cache_entries (created_at);
";

/// SQLite-backed [`CacheStore`]. One table, timestamps in epoch
/// milliseconds. Every call runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, R>(&self, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&Connection) -> Result<R, StorageError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(key: &str, millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StorageError::Corrupted(key.to_string()))
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64, i64)> = conn
                .query_row(
                    "SELECT value, created_at, expires_at FROM cache_entries WHERE key = ?1",
                    params![key],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?;
            let Some((value, created_at, expires_at)) = row else {
                return Ok(None);
            };
            Ok(Some(CacheEntry::from_parts(
                key.as_str(),
                value,
                from_millis(&key, created_at)?,
                from_millis(&key, expires_at)?,
            )))
        })
        .await
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries
                 (key, value, created_at, expires_at, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.key(),
                    entry.value(),
                    to_millis(entry.created_at()),
                    to_millis(entry.expires_at()),
                    i64::try_from(entry.size_bytes()).unwrap_or(i64::MAX),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn remove_matching(&self, pattern: &str) -> Result<usize, StorageError> {
        let pattern = pattern.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM cache_entries WHERE instr(key, ?1) > 0",
                params![pattern],
            )?)
        })
        .await
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM cache_entries WHERE expires_at < ?1",
                params![to_millis(now)],
            )?)
        })
        .await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_entries", [])?;
            Ok(())
        })
        .await
    }

    async fn eviction_order(&self) -> Result<Vec<(String, u64)>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT key, size_bytes FROM cache_entries ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            let mut order = Vec::new();
            for row in rows {
                let (key, size) = row?;
                order.push((key, u64::try_from(size).unwrap_or(0)));
            }
            Ok(order)
        })
        .await
    }

    async fn summary(&self) -> Result<StoreSummary, StorageError> {
        self.with_conn(|conn| {
            let (total, count, oldest): (i64, i64, Option<i64>) = conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0), COUNT(*), MIN(created_at) FROM cache_entries",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )?;
            Ok(StoreSummary {
                total_size: u64::try_from(total).unwrap_or(0),
                entry_count: usize::try_from(count).unwrap_or(0),
                oldest_created_at: oldest.and_then(DateTime::from_timestamp_millis),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempdir::TempDir;

    fn entry(key: &str, value: &str, ttl: Duration) -> CacheEntry {
        CacheEntry::new(key, value.to_string(), ttl)
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = TempDir::new("marine-cache").unwrap();
        let path = dir.path().join("cache.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .store(entry("marine:1.0000,2.0000", r#"{"h":1.5}"#, Duration::hours(1)))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let entry = store.load("marine:1.0000,2.0000").await.unwrap().unwrap();
        assert_eq!(entry.value(), r#"{"h":1.5}"#);
        assert_eq!(entry.size_bytes(), 9);
        assert_eq!(entry.expires_at() - entry.created_at(), Duration::hours(1));
    }

    #[tokio::test]
    async fn test_replace_and_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.store(entry("a", "1234", Duration::hours(1))).await.unwrap();
        store.store(entry("b", "12", Duration::hours(1))).await.unwrap();
        store.store(entry("a", "1", Duration::hours(1))).await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.entry_count, 2);
        assert_eq!(summary.total_size, 3);
        assert!(summary.oldest_created_at.is_some());

        // Replacing "a" makes it the newest row.
        let order: Vec<_> = store
            .eviction_order()
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_remove_matching_is_substring_based() {
        let store = SqliteStore::open_in_memory().unwrap();
        for key in ["marine:x", "marine:y", "forecast:z", "geo_100%"] {
            store.store(entry(key, "0", Duration::hours(1))).await.unwrap();
        }
        assert_eq!(store.remove_matching("marine:").await.unwrap(), 2);
        assert_eq!(store.remove_matching("_100%").await.unwrap(), 1);
        assert!(store.load("forecast:z").await.unwrap().is_some());
        assert_eq!(store.summary().await.unwrap().entry_count, 1);
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.store(entry("old", "0", Duration::seconds(-5))).await.unwrap();
        store.store(entry("new", "0", Duration::hours(1))).await.unwrap();
        assert_eq!(store.remove_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.remove("new").await.unwrap());
        assert!(!store.remove("new").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_timestamp_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, created_at, expires_at, size_bytes)
                     VALUES ('bad', '{}', ?1, ?1, 2)",
                    params![i64::MAX],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(store.load("bad").await, Err(StorageError::Corrupted(_))));
    }
}
