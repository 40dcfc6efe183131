use super::bounded;
use crate::domain::payment::PaymentId;
use crate::domain::ports::DistributedLockRef;
use crate::error::{PaymentError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tracing::{debug, error, warn};

pub fn payment_lock_key(id: PaymentId) -> String {
    format!("payment-lock:{id}")
}

/// Per-payment mutual exclusion across every service instance.
///
/// At most one processing, refund or cancel attempt holds the lock for a
/// payment at a time. A holder that dies leaves the lock to expire after
/// `ttl`; nothing else ever clears it.
#[derive(Clone)]
pub struct PaymentLock {
    lock: DistributedLockRef,
    ttl: Duration,
    heartbeat: Duration,
    timeout: Duration,
}

impl PaymentLock {
    pub fn new(
        lock: DistributedLockRef,
        ttl: Duration,
        heartbeat: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            lock,
            ttl,
            heartbeat,
            timeout,
        }
    }

    /// Takes the lock for `id`.
    ///
    /// Fails with `AlreadyInProgress` when another attempt holds it and with
    /// an internal error when the cache cannot be reached.
    pub async fn acquire(&self, id: PaymentId) -> Result<HeldLock> {
        let key = payment_lock_key(id);
        let acquired = bounded(self.timeout, self.lock.acquire_lock(&key, self.ttl))
            .await
            .map_err(|e| {
                error!(payment_id = %id, error = %e, "lock acquisition failed, rejecting request");
                PaymentError::internal(e)
            })?;

        if !acquired {
            debug!(payment_id = %id, "lock held elsewhere");
            return Err(PaymentError::AlreadyInProgress(id));
        }

        debug!(payment_id = %id, ttl_ms = self.ttl.as_millis() as u64, "lock acquired");
        Ok(HeldLock {
            owner: self.clone(),
            key,
            released: false,
        })
    }
}

/// A held payment lock.
///
/// Call [`HeldLock::release`] on every exit path. If the guard is dropped
/// without it (for example because the caller's future was cancelled) the
/// release is spawned onto the current runtime.
pub struct HeldLock {
    owner: PaymentLock,
    key: String,
    released: bool,
}

impl HeldLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Drives `call` to completion, extending the lock every heartbeat
    /// period while it runs.
    pub async fn run<F: Future>(&self, call: F) -> F::Output {
        tokio::pin!(call);
        let period = self.owner.heartbeat;
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                output = &mut call => return output,
                _ = ticker.tick() => self.extend().await,
            }
        }
    }

    async fn extend(&self) {
        let owner = &self.owner;
        match bounded(owner.timeout, owner.lock.extend_lock(&self.key, owner.ttl)).await {
            Ok(true) => debug!(key = %self.key, "lock extended"),
            Ok(false) => warn!(key = %self.key, "lock expired before it could be extended"),
            Err(e) => warn!(key = %self.key, error = %e, "failed to extend lock"),
        }
    }

    pub async fn release(mut self) {
        self.released = true;
        let owner = &self.owner;
        if let Err(e) = bounded(owner.timeout, owner.lock.release_lock(&self.key)).await {
            warn!(
                key = %self.key,
                error = %e,
                "failed to release lock, it will expire on its own"
            );
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let lock = self.owner.lock.clone();
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                if let Err(e) = lock.release_lock(&key).await {
                    warn!(%key, error = %e, "failed to release abandoned lock");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::DistributedLock;
    use crate::infrastructure::memory_cache::InMemoryCache;
    use std::sync::Arc;

    fn payment_lock(cache: Arc<InMemoryCache>) -> PaymentLock {
        PaymentLock::new(
            cache,
            Duration::from_secs(3),
            Duration::from_secs(1),
            Duration::from_millis(100),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_is_already_in_progress() {
        let cache = Arc::new(InMemoryCache::new());
        let lock = payment_lock(cache);
        let id = PaymentId::new();

        let held = lock.acquire(id).await.unwrap();
        assert_eq!(held.key(), format!("payment-lock:{id}"));
        assert!(matches!(
            lock.acquire(id).await,
            Err(PaymentError::AlreadyInProgress(got)) if got == id
        ));

        held.release().await;
        lock.acquire(id).await.unwrap().release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_lock_expires_after_ttl() {
        let cache = Arc::new(InMemoryCache::new());
        let lock = payment_lock(cache.clone());
        let id = PaymentId::new();

        // A crashed holder never releases.
        assert!(
            cache
                .acquire_lock(&payment_lock_key(id), Duration::from_secs(3))
                .await
                .unwrap()
        );
        assert!(lock.acquire(id).await.is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        lock.acquire(id).await.unwrap().release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_lock_alive_past_ttl() {
        let cache = Arc::new(InMemoryCache::new());
        let lock = payment_lock(cache.clone());
        let id = PaymentId::new();

        let held = lock.acquire(id).await.unwrap();
        held.run(tokio::time::sleep(Duration::from_secs(10))).await;

        // Still held after well over one TTL.
        assert!(matches!(
            lock.acquire(id).await,
            Err(PaymentError::AlreadyInProgress(_))
        ));
        held.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_releases_in_background() {
        let cache = Arc::new(InMemoryCache::new());
        let lock = payment_lock(cache);
        let id = PaymentId::new();

        drop(lock.acquire(id).await.unwrap());
        tokio::task::yield_now().await;

        lock.acquire(id).await.unwrap().release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_cache_fails_closed() {
        let cache = Arc::new(InMemoryCache::new());
        cache.set_available(false);
        let lock = payment_lock(cache);

        let Err(err) = lock.acquire(PaymentId::new()).await else {
            panic!("acquired a lock without a cache");
        };
        assert!(matches!(err, PaymentError::InternalError(_)));
    }
}
