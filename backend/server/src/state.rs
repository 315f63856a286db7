use std::sync::Arc;

use tracing::info;

use super::{
    auth::Keys,
    config::{Config, StoreBackend},
    database::{RedisStore, init_redis},
    error::AppResult,
    images::ImageStore,
    store::{MemoryStore, Store},
};

pub struct State {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub images: ImageStore,
    pub keys: Keys,
}

impl State {
    pub async fn new(config: Config) -> AppResult<Arc<Self>> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Redis => {
                info!("Connecting to Redis...");
                Arc::new(RedisStore::new(init_redis(&config.redis_url).await?))
            }
            StoreBackend::Memory => {
                info!("Using in-memory store, data is lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, store).await
    }

    pub async fn with_store(config: Config, store: Arc<dyn Store>) -> AppResult<Arc<Self>> {
        let images = ImageStore::new(
            config.upload_dir.clone(),
            &config.public_url,
            config.max_image_bytes,
        )
        .await?;
        let keys = Keys::new(&config.jwt_secret);

        Ok(Arc::new(Self {
            config,
            store,
            images,
            keys,
        }))
    }
}
