pub mod cache;
mod client;
mod config;
pub mod deduplication;
mod error;
pub mod keys;
mod options;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod mock;

pub use client::MarineClient;
pub use config::{Config, ProviderConfig};
pub use error::{is_retryable_status, ConfigError, FetchError, StorageError};
pub use keys::{current_key, forecast_key, marine_key, DataKind, RequestKey};
pub use options::FetchOptions;
pub use transport::{FetchRequest, Method, RawResponse, SurfTransport, Transport};

// Re-export cache and deduplication types
pub use cache::{CacheConfig, CacheStats, CachedValue, PersistentCache, SharedCache};
pub use deduplication::{DeduplicationConfig, DeduplicationStats, Deduplicator, SharedDeduplicator};
pub use retry::{RetryConfig, RetryEngine, RetryPolicy};
