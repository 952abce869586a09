//! Read-through cache over the broker's key/value store

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use taskrelay_core::config::CacheConfig;
use taskrelay_core::traits::Broker;
use taskrelay_core::RelayResult;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Build a cache key from namespace, operation and serialized arguments
pub fn cache_key<A: Serialize + ?Sized>(
    namespace: &str,
    operation: &str,
    args: &A,
) -> RelayResult<String> {
    let args = serde_json::to_string(args)?;
    Ok(format!("{namespace}:{operation}:{args}"))
}

/// Memoizes async calls in the broker.
///
/// Any broker failure, or an entry that no longer decodes, degrades to
/// calling the wrapped function directly.
pub struct ReadThroughCache {
    broker: Arc<dyn Broker>,
    namespace: String,
    default_ttl: Duration,
    enabled: bool,
    stats: RwLock<CacheStats>,
}

impl ReadThroughCache {
    pub fn new(broker: Arc<dyn Broker>, config: &CacheConfig) -> Self {
        Self {
            broker,
            namespace: config.namespace.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_seconds),
            enabled: config.enabled,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Return the cached result of `operation(args)` or compute and store it.
    ///
    /// Errors from `f` are returned as-is and never cached.
    pub async fn cached_call<T, A, F, Fut, E>(
        &self,
        ttl: Option<Duration>,
        operation: &str,
        args: &A,
        f: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.cached_call_if(ttl, operation, args, f, |_| true).await
    }

    /// Like [`cached_call`](Self::cached_call), but a computed value is only
    /// stored when `cacheable` accepts it.
    ///
    /// Values that may still change must be rejected here: a store that lands
    /// after an invalidation would otherwise pin the stale value for the TTL.
    pub async fn cached_call_if<T, A, F, Fut, E, P>(
        &self,
        ttl: Option<Duration>,
        operation: &str,
        args: &A,
        f: F,
        cacheable: P,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&T) -> bool,
    {
        if !self.enabled {
            return f().await;
        }

        let key = match cache_key(&self.namespace, operation, args) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cache key for {} could not be built: {}", operation, e);
                self.record_error().await;
                return f().await;
            }
        };

        match self.broker.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    debug!("Cache HIT: {}", key);
                    self.stats.write().await.hits += 1;
                    metrics::counter!("taskrelay_cache_hits_total").increment(1);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("Cache entry {} could not be decoded: {}", key, e);
                    self.record_error().await;
                }
            },
            Ok(None) => {
                debug!("Cache MISS: {}", key);
                self.stats.write().await.misses += 1;
                metrics::counter!("taskrelay_cache_misses_total").increment(1);
            }
            Err(e) => {
                warn!("Cache GET failed for {}, calling through: {}", key, e);
                self.record_error().await;
                return f().await;
            }
        }

        let value = f().await?;

        if !cacheable(&value) {
            debug!("Cache SKIP: {}", key);
            return Ok(value);
        }

        match serde_json::to_vec(&value) {
            Ok(bytes) => {
                let ttl = ttl.unwrap_or(self.default_ttl);
                match self.broker.set_with_ttl(&key, &bytes, ttl).await {
                    Ok(()) => {
                        self.stats.write().await.sets += 1;
                    }
                    Err(e) => {
                        warn!("Cache SET failed for {}: {}", key, e);
                        self.record_error().await;
                    }
                }
            }
            Err(e) => {
                warn!("Result for {} could not be serialized: {}", key, e);
                self.record_error().await;
            }
        }

        Ok(value)
    }

    /// Drop the entry for `operation(args)`
    pub async fn invalidate<A: Serialize + ?Sized>(&self, operation: &str, args: &A) {
        if !self.enabled {
            return;
        }
        let key = match cache_key(&self.namespace, operation, args) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cache key for {} could not be built: {}", operation, e);
                return;
            }
        };
        match self.broker.delete(&key).await {
            Ok(_) => {
                self.stats.write().await.deletes += 1;
            }
            Err(e) => {
                warn!("Cache DELETE failed for {}: {}", key, e);
                self.record_error().await;
            }
        }
    }

    async fn record_error(&self) {
        self.stats.write().await.errors += 1;
        metrics::counter!("taskrelay_cache_errors_total").increment(1);
    }
}
