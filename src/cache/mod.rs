// Cache module with fallback when Redis is not available

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() > expires_at)
            .unwrap_or(false)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Connectivity probe used by the health endpoint.
    async fn ping(&self) -> Result<(), CacheError>;
}

// In-memory cache implementation as fallback
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let value = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        // Expired: the read guard is released before removal.
        self.store.remove_if(key, |_, entry| entry.is_expired());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.store
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Redis-backed cache over a multiplexed, auto-reconnecting connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
            None => {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async::<_, ()>(&mut conn)
                    .await?
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::OperationFailed(format!(
                "unexpected PING reply: {}",
                pong
            )))
        }
    }
}

// Cache factory
pub struct CacheFactory;

impl CacheFactory {
    /// Builds the configured backend. A Redis backend that cannot connect
    /// falls back to the in-memory cache.
    pub async fn create_cache(config: &AppConfig) -> Arc<dyn CacheBackend> {
        if config.cache.cache_type.eq_ignore_ascii_case("redis") {
            match RedisCache::connect(&config.redis_url).await {
                Ok(redis_cache) => {
                    tracing::info!("Using Redis cache backend");
                    return Arc::new(redis_cache);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to connect to Redis, falling back to in-memory cache");
                }
            }
        }

        Arc::new(InMemoryCache::new())
    }
}

/// Cache key of a customer's cart line count.
pub fn cart_count_key(customer_id: &uuid::Uuid) -> String {
    format!("cart_count:{}", customer_id)
}

/// Cache key of a product's freight rates to a shipping area.
pub fn product_rates_key(product_id: &uuid::Uuid, area_id: i32) -> String {
    format!("{}_{}", product_id, area_id)
}
