//! # Cache
//!
//! Short lived key/value data: recommendation lists, paged id lists, list responses,
//! one-time codes and revoked refresh tokens.
//!
//! ## Implementation
//!
//! - Redis when `REDIS_URL` is set, otherwise an in-process map with per-entry expiry
//! - Values are JSON strings with a TTL in seconds
//! - A failing backend is logged and read as a miss; requests never fail because of it
//! - Invalidation deletes single keys or whole prefixes
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{
    AsyncCommands, Client, RedisError,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::warn;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RedisError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RedisError>;
    async fn delete(&self, key: &str) -> Result<(), RedisError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), RedisError>;
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;

    client.get_connection_manager_with_config(config).await
}

pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut connection = self.connection.clone();
        connection.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RedisError> {
        let mut connection = self.connection.clone();
        connection.set_ex(key, value, ttl.as_secs().max(1)).await
    }

    async fn delete(&self, key: &str) -> Result<(), RedisError> {
        let mut connection = self.connection.clone();
        connection.del(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), RedisError> {
        let mut connection = self.connection.clone();

        let keys: Vec<String> = connection.keys(format!("{prefix}*")).await?;
        if keys.is_empty() {
            return Ok(());
        }

        connection.del(keys).await
    }
}

/// Expired entries are swept every this many writes.
const SWEEP_EVERY: usize = 64;

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    writes: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => return Ok(Some(value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), RedisError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            entries.retain(|_, (_, expires)| *expires > now);
        }
        entries.insert(key.to_string(), (value, now + ttl));

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RedisError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), RedisError> {
        self.entries.lock().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    let raw = match cache.get(key).await {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(key, "Cache read failed: {e}");
            return None;
        }
    };

    serde_json::from_str(&raw)
        .map_err(|e| {
            warn!(key, "Dropping undecodable cache entry: {e}");
        })
        .ok()
}

pub async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, "Failed to encode cache entry: {e}");
            return;
        }
    };

    if let Err(e) = cache.set(key, raw, ttl).await {
        warn!(key, "Cache write failed: {e}");
    }
}

pub async fn invalidate(cache: &dyn Cache, key: &str) {
    if let Err(e) = cache.delete(key).await {
        warn!(key, "Cache delete failed: {e}");
    }
}

pub async fn invalidate_prefix(cache: &dyn Cache, prefix: &str) {
    if let Err(e) = cache.delete_prefix(prefix).await {
        warn!(prefix, "Cache prefix delete failed: {e}");
    }
}

pub mod keys {
    use std::time::Duration;

    use uuid::Uuid;

    pub const RECS_TTL: Duration = Duration::from_secs(30 * 60);
    pub const OWN_PRODUCTS_TTL: Duration = Duration::from_secs(30 * 60);
    pub const ORDERS_TTL: Duration = Duration::from_secs(30 * 60);
    pub const PRODUCT_LIST_TTL: Duration = Duration::from_secs(2 * 60);
    pub const CHECKOUT_TTL: Duration = Duration::from_secs(60 * 60);
    pub const EMAIL_CODE_TTL: Duration = Duration::from_secs(60);
    pub const EMAIL_CONFIRMED_TTL: Duration = Duration::from_secs(5 * 60);
    pub const PASSWORD_RESET_TTL: Duration = Duration::from_secs(10 * 60);

    pub const PRODUCT_LIST_PREFIX: &str = "product_list:v1:";

    pub fn recs(user: Uuid) -> String {
        format!("recs:v1:user:{user}")
    }

    pub fn own_products(user: Uuid) -> String {
        format!("own_products:v1:user:{user}")
    }

    pub fn orders(user: Uuid) -> String {
        format!("orders:v1:user:{user}")
    }

    /// `query` must already be canonical (sorted pairs).
    pub fn product_list(query: &str) -> String {
        format!("{PRODUCT_LIST_PREFIX}{query}")
    }

    pub fn checkout(user: Uuid, idempotency_key: &str) -> String {
        format!("checkout:{user}:{idempotency_key}")
    }

    pub fn email_code(email: &str) -> String {
        format!("email_confirmation:{email}")
    }

    pub fn email_confirmed(email: &str) -> String {
        format!("email_confirmed:{email}")
    }

    pub fn password_reset(email: &str) -> String {
        format!("password_reset:{email}")
    }

    pub fn revoked_token(jti: &str) -> String {
        format!("revoked_token:{jti}")
    }
}
