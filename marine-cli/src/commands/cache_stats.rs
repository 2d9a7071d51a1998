use crate::models::context::Context;
use marine_fetch::{CacheStats, DeduplicationStats};
use serde::Serialize;

#[derive(Serialize)]
pub struct CacheStatsResponse {
    pub cache_stats: CacheStats,
    pub dedup_stats: DeduplicationStats,
    pub cache_enabled: bool,
}

/// Get current cache statistics
pub async fn cache_stats(ctx: &Context) -> CacheStatsResponse {
    CacheStatsResponse {
        cache_stats: ctx.marine_client().cache_stats().await,
        dedup_stats: ctx.marine_client().dedup_stats(),
        cache_enabled: ctx.config().cache.enabled,
    }
}

/// Clear the cache, returning how many entries it held
pub async fn clear_cache(ctx: &Context) -> usize {
    let held = ctx.marine_client().cache_stats().await.entry_count;
    ctx.marine_client().clear_cache().await;
    held
}

/// Drop every entry whose key contains `pattern`
pub async fn invalidate(ctx: &Context, pattern: &str) -> usize {
    ctx.marine_client().invalidate(pattern).await
}

/// Drop expired entries
pub async fn purge(ctx: &Context) -> usize {
    ctx.marine_client().evict_expired_cache().await
}
