// In-process TTL cache used for hot lookups such as shipping fees

use dashmap::DashMap;
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
    #[error("Invalid TTL")]
    InvalidTTL,
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
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    /// Removes every entry whose key starts with `prefix`, returning how many went
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError>;
}

/// Concurrent in-memory cache; expired entries are dropped lazily on read
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.store.iter().filter(|e| !e.value().is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let hit = match self.store.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                counter!("bookstore_cache.miss", 1);
                return Ok(None);
            }
        };

        match hit {
            Some(value) => {
                counter!("bookstore_cache.hit", 1);
                Ok(Some(value))
            }
            None => {
                self.store.remove_if(key, |_, entry| entry.is_expired());
                counter!("bookstore_cache.expired", 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        if matches!(ttl, Some(d) if d.is_zero()) {
            return Err(CacheError::InvalidTTL);
        }
        self.store
            .insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let before = self.store.len();
        self.store.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.store.len()))
    }
}

/// Reads a JSON-encoded value
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheBackend,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Stores a value as JSON
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheBackend,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = InMemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let cache = InMemoryCache::new();
        assert!(matches!(
            cache.set("k", "v", Some(Duration::ZERO)).await,
            Err(CacheError::InvalidTTL)
        ));
    }

    #[tokio::test]
    async fn delete_and_prefix_delete_drop_entries() {
        let cache = InMemoryCache::new();
        cache.set("a", "1", None).await.unwrap();
        cache.set("fee:dhaka", "60", None).await.unwrap();
        cache.set("fee:khulna", "100", None).await.unwrap();
        cache.set("session:7", "x", None).await.unwrap();
        cache.delete("a").await.unwrap();
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.delete_prefix("fee:").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.exists("session:7").await.unwrap());
    }

    #[tokio::test]
    async fn json_helpers_roundtrip_decimals() {
        let cache = InMemoryCache::new();
        set_json(&cache, "fee:dhaka", &dec!(60), None).await.unwrap();
        let fee: Option<Decimal> = get_json(&cache, "fee:dhaka").await.unwrap();
        assert_eq!(fee, Some(dec!(60)));
    }
}
