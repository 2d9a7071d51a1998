use getset::Getters;
use log::info;
use marine_fetch::{Config, MarineClient, StorageError};
use std::sync::Arc;

#[derive(Getters)]
#[get = "pub"]
pub struct Context {
    marine_client: MarineClient,
    config: Config,
}

impl Context {
    pub fn new(config: Config) -> Result<Self, StorageError> {
        let marine_client = MarineClient::new(&config)?;

        info!(
            "Initialized MarineClient (cache: {}, dedup window: {}ms, attempts: {})",
            config
                .cache
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "in-memory".to_string()),
            config.dedup.ttl_ms,
            config.retry.max_attempts,
        );

        Ok(Self {
            marine_client,
            config,
        })
    }

    pub fn shutdown(&self) {
        info!("Shutting down");
        self.marine_client.shutdown();
    }
}

pub type ContextPointer = Arc<Context>;
