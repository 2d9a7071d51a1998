use marine_fetch::{Config, MarineClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let config = Config::load(None)?;
    let client = MarineClient::new(&config)?;

    // First request goes to the network and populates the cache
    let start = std::time::Instant::now();
    let marine = client.marine(43.2965, 5.3698, None).await?;
    let duration1 = start.elapsed();
    println!("First request took: {:?}", duration1);
    println!("Top-level fields: {:?}", marine.as_object().map(|o| o.keys().collect::<Vec<_>>()));

    // Second request for the same spot (rounded to 4 decimals) is served from cache
    let start = std::time::Instant::now();
    let _ = client.marine(43.29651, 5.36979, None).await?;
    let duration2 = start.elapsed();
    println!("Cached request took: {:?}", duration2);

    // Concurrent identical requests collapse into one
    let (a, b, c) = tokio::join!(
        client.current(43.2965, 5.3698),
        client.current(43.2965, 5.3698),
        client.current(43.2965, 5.3698),
    );
    println!("Concurrent results equal: {}", a? == b? && c.is_ok());
    println!("Deduplication stats: {:?}", client.dedup_stats());

    println!("Cache stats: {:?}", client.cache_stats().await);
    println!("Expired entries evicted: {}", client.evict_expired_cache().await);

    client.shutdown();
    Ok(())
}
