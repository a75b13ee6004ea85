use super::{Call, Declaration, Interceptor, InterceptorResult};
use crate::cache::CacheStore;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Per-method settings of the cache interceptor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSettings {
    /// Key prefix; without one the method is not cached
    pub key: Option<String>,
    /// Entry lifetime; `None` never expires
    pub timeout: Option<Duration>,
}

impl CacheSettings {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            timeout: None,
        }
    }

    pub fn timeout_secs(self, seconds: u64) -> Self {
        self.timeout(Duration::from_secs(seconds))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<CacheSettings> for Declaration {
    fn from(settings: CacheSettings) -> Self {
        Declaration::with::<CacheInterceptor, _>(settings)
    }
}

/// Memoizes return values in a [`CacheStore`].
///
/// The key is the declared prefix followed by a SHA-256 of the serialized
/// non-token arguments. On a hit the cached value becomes the return value and
/// the original method is skipped, while the rest of the chain still runs.
pub struct CacheInterceptor {
    store: Arc<dyn CacheStore>,
    order: i32,
}

impl CacheInterceptor {
    pub const DEFAULT_ORDER: i32 = -10;

    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            order: Self::DEFAULT_ORDER,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

/// Cache key of a call: `{prefix}_{sha256(json(arguments))}`
pub fn cache_key(prefix: &str, call: &Call<'_>) -> serde_json::Result<String> {
    let payload = serde_json::to_string(&call.arguments().payload())?;
    Ok(format!("{}_{:x}", prefix, Sha256::digest(payload.as_bytes())))
}

#[async_trait]
impl Interceptor for CacheInterceptor {
    fn order(&self) -> i32 {
        self.order
    }

    async fn on_invoke(&self, call: &mut Call<'_>) -> InterceptorResult {
        let Some(settings) = call.settings::<CacheSettings>().cloned() else {
            return call.next().await;
        };
        let Some(prefix) = settings.key.as_deref() else {
            return call.next().await;
        };

        let key = cache_key(prefix, call)?;

        match self.store.get(&key).await {
            Ok(Some(cached)) => match call.set_return_json(cached) {
                Ok(()) => {
                    tracing::debug!("Cache hit for {} ({})", call.method(), key);
                    call.mark_from_cache();
                    call.set_proceed_to_original(false);
                    return call.next().await;
                }
                Err(e) => {
                    tracing::debug!("Ignoring undecodable cache entry {}: {}", key, e);
                }
            },
            Ok(None) => tracing::debug!("Cache miss for {} ({})", call.method(), key),
            Err(e) => tracing::warn!("Cache read failed for {}: {}", key, e),
        }

        call.next().await?;

        let Some(encoded) = call.return_json() else {
            return Ok(());
        };
        match encoded {
            Ok(value) => {
                if let Err(e) = self.store.set(&key, value, settings.timeout).await {
                    tracing::warn!("Cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => tracing::warn!("Return value of {} is not cacheable: {}", call.method(), e),
        }
        Ok(())
    }
}
