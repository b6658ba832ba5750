// Distributed Lock - leased mutual exclusion over the shared store
//
// Every read-modify-write of queue state runs inside `with_lock`.
// The lease bounds how long a crashed holder can block the fleet.

use crate::application::worker::constants::{
    DEFAULT_LOCK_ACQUIRE_TIMEOUT, DEFAULT_LOCK_LEASE, DEFAULT_LOCK_RETRY_INTERVAL,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, SharedStateStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lock expires on its own after this long
    pub lease: Duration,
    pub retry_interval: Duration,
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LOCK_LEASE,
            retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
            acquire_timeout: DEFAULT_LOCK_ACQUIRE_TIMEOUT,
        }
    }
}

/// Proof of holding the lock; the token is unique per acquisition
#[derive(Debug)]
pub struct LockGuard {
    token: String,
    acquired_at: Instant,
}

pub struct DistributedLock {
    store: Arc<dyn SharedStateStore>,
    key: String,
    config: LockConfig,
    ids: Arc<dyn IdProvider>,
}

impl DistributedLock {
    /// Lock scoped to `resource` (stored under `{resource}:lock`)
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        resource: &str,
        config: LockConfig,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            store,
            key: format!("{}:lock", resource),
            config,
            ids,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Spin (with `retry_interval` pauses) until acquired or `acquire_timeout` passes
    pub async fn acquire(&self) -> Result<LockGuard> {
        let token = self.ids.generate_id();
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            if self
                .store
                .set_if_absent(&self.key, &token, self.config.lease)
                .await?
            {
                return Ok(LockGuard {
                    token,
                    acquired_at: Instant::now(),
                });
            }

            if Instant::now() >= deadline {
                return Err(AppError::LockTimeout(self.key.clone()));
            }
            sleep(self.config.retry_interval).await;
        }
    }

    /// Compare-and-delete release: never removes a successor's lease
    pub async fn release(&self, guard: LockGuard) -> Result<()> {
        let held = guard.acquired_at.elapsed();
        let released = self.store.delete_if_equals(&self.key, &guard.token).await?;
        if released {
            debug!(key = %self.key, held_ms = held.as_millis() as u64, "Lock released");
        } else {
            warn!(
                key = %self.key,
                held_ms = held.as_millis() as u64,
                lease_ms = self.config.lease.as_millis() as u64,
                "Lock lease expired before release; critical section overran"
            );
        }
        Ok(())
    }

    /// Run `f` while holding the lock
    ///
    /// The lock is released whether or not `f` fails; `f`'s result is returned.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire().await?;
        let result = f().await;
        if let Err(e) = self.release(guard).await {
            warn!(key = %self.key, error = %e, "Failed to release lock");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::state_store::memory::InMemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn lock(store: Arc<dyn SharedStateStore>, config: LockConfig) -> DistributedLock {
        DistributedLock::new(
            store,
            "queue",
            config,
            Arc::new(SequentialIdProvider::new("token")),
        )
    }

    #[tokio::test]
    async fn test_critical_sections_do_not_overlap() {
        let store: Arc<dyn SharedStateStore> = Arc::new(InMemoryStateStore::new());
        let lock = Arc::new(lock(store, LockConfig::default()));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            handles.push(tokio::spawn(async move {
                lock.with_lock(|| async {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_while_held() {
        let store: Arc<dyn SharedStateStore> = Arc::new(InMemoryStateStore::new());
        let lock = lock(store, LockConfig::default());

        let _held = lock.acquire().await.unwrap();
        let err = lock.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::LockTimeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_frees_the_lock() {
        let store: Arc<dyn SharedStateStore> = Arc::new(InMemoryStateStore::new());
        let config = LockConfig {
            lease: Duration::from_millis(100),
            retry_interval: Duration::from_millis(10),
            acquire_timeout: Duration::from_secs(1),
        };
        let lock = lock(Arc::clone(&store), config);

        let stale = lock.acquire().await.unwrap();
        // Holder "crashes"; successor gets in once the lease lapses
        let fresh = lock.acquire().await.unwrap();

        // Stale release must not free the successor's lease
        lock.release(stale).await.unwrap();
        assert!(!store.set_if_absent("queue:lock", "x", Duration::from_secs(1)).await.unwrap());

        lock.release(fresh).await.unwrap();
        assert!(store.set_if_absent("queue:lock", "x", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let store: Arc<dyn SharedStateStore> = Arc::new(InMemoryStateStore::new());
        let lock = lock(store, LockConfig::default());

        let result: Result<()> = lock
            .with_lock(|| async { Err(AppError::Validation("boom".into())) })
            .await;
        assert!(result.is_err());

        // Lock is free again
        let guard = lock.acquire().await.unwrap();
        lock.release(guard).await.unwrap();
    }
}
