use crate::error::StorageError;
use crate::keys::DataKind;
use bytesize::ByteSize;
use chrono::{DateTime, Duration, Utc};
use getset::Getters;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

mod sqlite;
mod store;

pub use sqlite::SqliteStore;
pub use store::{CacheEntry, CacheStore, MemoryStore, StoreSummary};

/// Configuration for the cache system
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Ceiling on the summed size of all serialized values
    pub max_capacity_bytes: u64,
    pub current_ttl_ms: i64,
    pub marine_ttl_ms: i64,
    pub forecast_ttl_ms: i64,
    pub map_features_ttl_ms: i64,
    pub geocode_ttl_ms: i64,
    pub archive_ttl_ms: i64,
    /// SQLite file backing the cache; in-memory when unset
    pub path: Option<PathBuf>,
    /// Whether caching is enabled
    pub enabled: bool,
}

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity_bytes: 50 * 1024 * 1024,
            current_ttl_ms: 15 * MINUTE_MS,
            marine_ttl_ms: HOUR_MS,
            forecast_ttl_ms: HOUR_MS,
            map_features_ttl_ms: 6 * HOUR_MS,
            geocode_ttl_ms: 24 * HOUR_MS,
            archive_ttl_ms: 24 * HOUR_MS,
            path: None,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: DataKind) -> Duration {
        let millis = match kind {
            DataKind::Current => self.current_ttl_ms,
            DataKind::Marine => self.marine_ttl_ms,
            DataKind::Forecast => self.forecast_ttl_ms,
            DataKind::MapFeatures => self.map_features_ttl_ms,
            DataKind::Geocode => self.geocode_ttl_ms,
            DataKind::Archive => self.archive_ttl_ms,
        };
        Duration::milliseconds(millis)
    }

    /// Opens the store this configuration points at.
    pub fn open_store(&self) -> Result<Arc<dyn CacheStore>, StorageError> {
        Ok(match &self.path {
            Some(path) => Arc::new(SqliteStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        })
    }
}

/// A decoded cache hit with its timing metadata
#[derive(Clone, Debug, Getters)]
pub struct CachedValue<T> {
    value: T,
    #[get = "pub"]
    created_at: DateTime<Utc>,
    #[get = "pub"]
    expires_at: DateTime<Utc>,
}

impl<T> CachedValue<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// Check if the cached value is still valid
    pub fn is_valid(&self) -> bool {
        Utc::now() <= self.expires_at
    }

    /// Check if the cached value will expire soon (within 10% of TTL)
    pub fn expires_soon(&self) -> bool {
        let ttl = self.expires_at - self.created_at;
        let expiry_threshold = ttl.num_milliseconds() / 10;
        let time_until_expiry = self.expires_at - Utc::now();
        time_until_expiry.num_milliseconds() < expiry_threshold
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_size_bytes: u64,
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub max_capacity_bytes: u64,
}

/// Size- and time-bounded cache over a durable [`CacheStore`].
///
/// Storage failures never reach the caller: reads degrade to misses and
/// writes to no-ops, with a warning in the log.
pub struct PersistentCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Serializes writers so eviction and the following insert see the same
    /// total size.
    write_lock: Mutex<()>,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        log::info!(
            "Cache initialized (capacity: {}, enabled: {})",
            ByteSize::b(config.max_capacity_bytes),
            config.enabled
        );
        Self {
            store,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    /// Cache backed by a [`MemoryStore`].
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cached value if available and unexpired
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_cached(key).await.map(CachedValue::into_value)
    }

    /// Like [`Self::get`] but keeps the entry's timestamps.
    pub async fn get_cached<T: DeserializeOwned>(&self, key: &str) -> Option<CachedValue<T>> {
        if !self.config.enabled {
            return None;
        }

        match self.try_get(key).await {
            Ok(Some(cached)) => {
                log::debug!("Cache hit for key: {}", key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(cached)
            }
            Ok(None) => {
                log::debug!("Cache miss for key: {}", key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                log::warn!("Cache read failed for key {}: {}", key, err);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn try_get<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<CachedValue<T>>, StorageError> {
        let Some(entry) = self.store.load(key).await? else {
            return Ok(None);
        };

        if entry.is_expired_at(Utc::now()) {
            log::debug!("Cache expired for key: {}", key);
            self.discard_if(key, |current| current.is_expired_at(Utc::now()))
                .await?;
            return Ok(None);
        }

        match serde_json::from_str(entry.value()) {
            Ok(value) => Ok(Some(CachedValue {
                value,
                created_at: entry.created_at(),
                expires_at: entry.expires_at(),
            })),
            Err(err) => {
                // Only rows that are not JSON at all are dropped.
                if serde_json::from_str::<IgnoredAny>(entry.value()).is_err() {
                    let corrupted = entry.value().clone();
                    self.discard_if(key, |current| *current.value() == corrupted)
                        .await?;
                }
                Err(err.into())
            }
        }
    }

    /// Removes `key` only while the stored row still satisfies `stale`.
    async fn discard_if(
        &self,
        key: &str,
        stale: impl Fn(&CacheEntry) -> bool,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        if let Some(current) = self.store.load(key).await? {
            if stale(&current) {
                self.store.remove(key).await?;
            }
        }
        Ok(())
    }

    /// Store value in cache, evicting the oldest entries when it would not
    /// fit otherwise. A negative `ttl` stores an already-expired entry.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        if !self.config.enabled {
            return;
        }

        if let Err(err) = self.try_set(key, value, ttl).await {
            log::warn!("Cache write failed for key {}: {}", key, err);
        }
    }

    async fn try_set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let entry = CacheEntry::new(key, serde_json::to_string(value)?, ttl);
        let _guard = self.write_lock.lock().await;

        let capacity = self.config.max_capacity_bytes;
        if entry.size_bytes() > capacity {
            log::warn!(
                "Not caching {}: {} exceeds capacity {}",
                key,
                ByteSize::b(entry.size_bytes()),
                ByteSize::b(capacity)
            );
            self.store.remove(key).await?;
            return Ok(());
        }

        // The row being replaced does not count towards the new total.
        let replaced = match self.store.load(key).await {
            Ok(previous) => previous.map_or(0, |previous| previous.size_bytes()),
            Err(StorageError::Corrupted(_)) => 0,
            Err(err) => return Err(err),
        };
        let mut total = self
            .store
            .summary()
            .await?
            .total_size
            .saturating_sub(replaced);
        if total + entry.size_bytes() > capacity {
            total = self.evict_oldest(total, entry.size_bytes(), key).await?;
        }

        log::debug!(
            "Stored in cache with key: {} ({}, total {})",
            key,
            ByteSize::b(entry.size_bytes()),
            ByteSize::b(total + entry.size_bytes())
        );
        self.store.store(entry).await
    }

    /// Remove entries other than `keep` oldest-first until `incoming` more
    /// bytes fit. Returns the total size left behind, excluding `keep`.
    async fn evict_oldest(
        &self,
        mut total: u64,
        incoming: u64,
        keep: &str,
    ) -> Result<u64, StorageError> {
        let capacity = self.config.max_capacity_bytes;
        let mut evicted = 0;
        for (key, size) in self.store.eviction_order().await? {
            if total + incoming <= capacity {
                break;
            }
            if key == keep {
                continue;
            }
            if self.store.remove(&key).await? {
                total = total.saturating_sub(size);
                evicted += 1;
            }
        }
        log::debug!("Evicted {} oldest cache entries", evicted);
        Ok(total)
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.store.remove(key).await {
            log::warn!("Cache delete failed for key {}: {}", key, err);
        }
    }

    /// Delete every entry whose key contains `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        match self.store.remove_matching(pattern).await {
            Ok(count) => {
                log::debug!("Invalidated {} cache entries matching {:?}", count, pattern);
                count
            }
            Err(err) => {
                log::warn!("Cache invalidation for {:?} failed: {}", pattern, err);
                0
            }
        }
    }

    /// Remove expired entries from cache
    pub async fn delete_expired(&self) -> usize {
        match self.store.remove_expired(Utc::now()).await {
            Ok(count) => {
                log::debug!("Evicted {} expired cache entries", count);
                count
            }
            Err(err) => {
                log::warn!("Expired entry cleanup failed: {}", err);
                0
            }
        }
    }

    /// Clear all cache entries and reset the hit/miss counters
    pub async fn clear_all(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(err) = self.store.clear().await {
            log::warn!("Cache clear failed: {}", err);
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        log::info!("Cache cleared");
    }

    /// Get cache statistics
    pub async fn get_stats(&self) -> CacheStats {
        let summary = self.store.summary().await.unwrap_or_else(|err| {
            log::warn!("Cache statistics unavailable: {}", err);
            StoreSummary::default()
        });

        CacheStats {
            total_size_bytes: summary.total_size,
            entry_count: summary.entry_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oldest_entry: summary.oldest_created_at,
            max_capacity_bytes: self.config.max_capacity_bytes,
        }
    }
}

/// Thread-safe wrapper for the cache
pub type SharedCache = Arc<PersistentCache>;
