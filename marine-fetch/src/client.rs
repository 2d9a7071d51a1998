use crate::cache::{CacheStats, CacheStore, PersistentCache, SharedCache};
use crate::config::{Config, ProviderConfig};
use crate::deduplication::{DeduplicationStats, Deduplicator, SharedDeduplicator};
use crate::error::{FetchError, StorageError};
use crate::keys::{self, DataKind};
use crate::options::FetchOptions;
use crate::retry::{RetryEngine, RetryPolicy};
use crate::transport::{FetchRequest, RawResponse, SurfTransport, Transport};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const MARINE_HOURLY: &str = concat!(
    "wave_height,wave_direction,wave_period,",
    "swell_wave_height,swell_wave_direction,swell_wave_period"
);
const FORECAST_HOURLY: &str = concat!(
    "temperature_2m,wind_speed_10m,wind_direction_10m,",
    "wind_gusts_10m,precipitation"
);
const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m,wind_direction_10m,weather_code";

/// Cache-first access to the marine providers.
///
/// Reads go to the persistent cache first. A hit in the last tenth of its
/// lifetime is still served but refreshed in the background. Misses go
/// through the deduplicator and are written back with the TTL of their
/// [`DataKind`].
#[derive(Clone)]
pub struct MarineClient {
    deduplicator: SharedDeduplicator,
    cache: SharedCache,
    providers: ProviderConfig,
}

impl MarineClient {
    /// Create a client talking to the real providers through surf, with the
    /// cache store described by `config.cache`.
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        let store = config.cache.open_store()?;
        Ok(Self::with_parts(Arc::new(SurfTransport::new()), store, config))
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CacheStore>,
        config: &Config,
    ) -> Self {
        let deduplicator = Deduplicator::new(
            RetryEngine::new(transport),
            RetryPolicy::from(&config.retry),
            config.dedup.clone(),
        );
        Self {
            deduplicator: Arc::new(deduplicator),
            cache: Arc::new(PersistentCache::new(store, config.cache.clone())),
            providers: config.providers.clone(),
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn deduplicator(&self) -> &SharedDeduplicator {
        &self.deduplicator
    }

    /// Deduplicated fetch decoded as `T`, bypassing the cache.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
    ) -> Result<T, FetchError> {
        self.deduplicator.fetch_json(request, options).await
    }

    /// Retried but neither deduplicated nor cached; for callers that need
    /// the raw response.
    pub async fn fetch_raw(
        &self,
        request: &FetchRequest,
        options: &FetchOptions,
    ) -> Result<RawResponse, FetchError> {
        let policy = self.deduplicator.policy().with_overrides(options);
        self.deduplicator.engine().fetch_with_retry(request, &policy).await
    }

    /// Serve `cache_key` from the cache or fetch it with `request`.
    pub async fn cached_json<T>(
        &self,
        cache_key: &str,
        kind: DataKind,
        request: FetchRequest,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if let Some(cached) = self.cache.get_cached::<T>(cache_key).await {
            if cached.expires_soon() {
                self.refresh_in_background::<T>(cache_key.to_string(), kind, request);
            }
            log::debug!("Returning cached {} data for key: {}", kind, cache_key);
            return Ok(cached.into_value());
        }

        let value: T = self
            .deduplicator
            .fetch_json(&request, &FetchOptions::default())
            .await?;
        self.cache
            .set(cache_key, &value, self.cache.config().ttl_for(kind))
            .await;
        Ok(value)
    }

    fn refresh_in_background<T>(&self, cache_key: String, kind: DataKind, request: FetchRequest)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            log::debug!("Refreshing {} in the background", cache_key);
            match client
                .deduplicator
                .fetch_json::<T>(&request, &FetchOptions::default())
                .await
            {
                Ok(value) => {
                    let ttl = client.cache.config().ttl_for(kind);
                    client.cache.set(&cache_key, &value, ttl).await;
                }
                Err(err) => log::debug!("Background refresh of {} failed: {}", cache_key, err),
            }
        });
    }

    /// Hourly wave and swell data for a location, optionally for one day.
    pub async fn marine(
        &self,
        lat: f64,
        lon: f64,
        date: Option<NaiveDate>,
    ) -> Result<Value, FetchError> {
        let request = with_date(
            located(FetchRequest::get(&self.providers.marine_url), lat, lon)
                .with_query("hourly", MARINE_HOURLY)
                .with_query("timezone", "auto"),
            date,
        );
        self.cached_json(&keys::marine_key(lat, lon, date), DataKind::Marine, request)
            .await
    }

    /// Hourly atmospheric forecast from one weather model.
    pub async fn forecast(
        &self,
        lat: f64,
        lon: f64,
        model: &str,
        date: Option<NaiveDate>,
    ) -> Result<Value, FetchError> {
        let request = with_date(
            located(FetchRequest::get(&self.providers.forecast_url), lat, lon)
                .with_query("models", model)
                .with_query("hourly", FORECAST_HOURLY)
                .with_query("timezone", "auto"),
            date,
        );
        self.cached_json(
            &keys::forecast_key(lat, lon, model, date),
            DataKind::Forecast,
            request,
        )
        .await
    }

    /// Current conditions at a location.
    pub async fn current(&self, lat: f64, lon: f64) -> Result<Value, FetchError> {
        let request = located(FetchRequest::get(&self.providers.forecast_url), lat, lon)
            .with_query("current", CURRENT_FIELDS)
            .with_query("timezone", "auto");
        self.cached_json(&keys::current_key(lat, lon), DataKind::Current, request)
            .await
    }

    /// Place-name lookup.
    pub async fn geocode(&self, name: &str) -> Result<Value, FetchError> {
        let request = FetchRequest::get(&self.providers.geocoding_url)
            .with_query("name", name)
            .with_query("count", 10);
        let key = format!("{}:{}", DataKind::Geocode, name.trim().to_lowercase());
        self.cached_json(&key, DataKind::Geocode, request).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.get_stats().await
    }

    pub fn dedup_stats(&self) -> DeduplicationStats {
        self.deduplicator.stats()
    }

    pub async fn clear_cache(&self) {
        self.cache.clear_all().await;
    }

    pub async fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern).await
    }

    /// Evict expired cache entries
    pub async fn evict_expired_cache(&self) -> usize {
        self.cache.delete_expired().await
    }

    /// Stops background work owned by the client.
    pub fn shutdown(&self) {
        self.deduplicator.shutdown();
    }
}

fn located(request: FetchRequest, lat: f64, lon: f64) -> FetchRequest {
    request
        .with_query("latitude", keys::format_coordinate(lat))
        .with_query("longitude", keys::format_coordinate(lon))
}

fn with_date(request: FetchRequest, date: Option<NaiveDate>) -> FetchRequest {
    match date {
        Some(date) => request
            .with_query("start_date", date)
            .with_query("end_date", date),
        None => request,
    }
}
