pub mod cache_stats;
pub mod conditions;
