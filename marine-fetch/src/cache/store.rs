use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use getset::{CopyGetters, Getters};
use std::sync::atomic::{AtomicU64, Ordering};

/// One persisted cache row. The value is kept in its serialized JSON form,
/// `size_bytes` is the length of that serialization.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct CacheEntry {
    #[get = "pub"]
    key: String,
    #[get = "pub"]
    value: String,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    expires_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    size_bytes: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: String, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::from_parts(key, value, created_at, expires_at)
    }

    pub fn from_parts(
        key: impl Into<String>,
        value: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            size_bytes: value.len() as u64,
            value,
            created_at,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Aggregate view of a store's contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total_size: u64,
    pub entry_count: usize,
    pub oldest_created_at: Option<DateTime<Utc>>,
}

/// Durable backend of [`super::PersistentCache`]. Entries are written or
/// not at all; a reader never sees half a row.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;
    /// Inserts or wholesale replaces the entry under its key.
    async fn store(&self, entry: CacheEntry) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;
    /// Removes every entry whose key contains `pattern`.
    async fn remove_matching(&self, pattern: &str) -> Result<usize, StorageError>;
    /// Removes every entry with `expires_at < now`.
    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
    /// `(key, size_bytes)` of every entry, oldest `created_at` first.
    async fn eviction_order(&self) -> Result<Vec<(String, u64)>, StorageError>;
    async fn summary(&self) -> Result<StoreSummary, StorageError>;
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, (u64, CacheEntry)>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().1.clone()))
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), StorageError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(entry.key().clone(), (sequence, entry));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn remove_matching(&self, pattern: &str) -> Result<usize, StorageError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.contains(pattern));
        Ok(before - self.entries.len())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let before = self.entries.len();
        self.entries.retain(|_, (_, entry)| !entry.is_expired_at(now));
        Ok(before - self.entries.len())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        Ok(())
    }

    async fn eviction_order(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| {
                let (sequence, cached) = entry.value();
                (cached.created_at(), *sequence, entry.key().clone(), cached.size_bytes())
            })
            .collect();
        entries.sort_by_key(|(created_at, sequence, _, _)| (*created_at, *sequence));
        Ok(entries
            .into_iter()
            .map(|(_, _, key, size)| (key, size))
            .collect())
    }

    async fn summary(&self) -> Result<StoreSummary, StorageError> {
        let mut summary = StoreSummary::default();
        for entry in self.entries.iter() {
            let cached = &entry.value().1;
            summary.total_size += cached.size_bytes();
            summary.entry_count += 1;
            summary.oldest_created_at = Some(match summary.oldest_created_at {
                Some(oldest) => oldest.min(cached.created_at()),
                None => cached.created_at(),
            });
        }
        Ok(summary)
    }
}
