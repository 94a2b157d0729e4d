use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::cache::CacheBackend;
use crate::errors::ServiceError;

/// Short-lived mutual exclusion keyed by an operation identifier, backed by
/// the shared cache's atomic `set_nx`.
///
/// Acquisition never blocks or queues: callers must treat `false` as
/// "someone else is handling this", not as an error to retry. There is no
/// explicit release; the key expires with its TTL.
#[derive(Clone)]
pub struct DistributedLock {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Try to acquire the lock for `key`. Returns `false` when another holder
    /// owns it. Cache unavailability is propagated: the lock is a correctness
    /// primitive and must not silently fail open.
    pub async fn try_acquire(&self, key: &str) -> Result<bool, ServiceError> {
        let holder = Uuid::new_v4().to_string();
        let acquired = self
            .cache
            .set_nx(key, &holder, self.ttl)
            .await
            .map_err(|e| ServiceError::CacheError(format!("lock acquire failed: {}", e)))?;
        debug!(key, acquired, "distributed lock attempt");
        Ok(acquired)
    }
}
