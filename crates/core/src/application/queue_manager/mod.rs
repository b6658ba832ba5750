// Queue Manager - fair admission over the shared store
//
// Two lanes (priority, normal) as sorted sets, a processing set bounded by
// capacity, and one metadata hash per request. All mutations run under the
// queue's distributed lock; status reads do not.

pub mod keys;
pub mod validation;

use keys::*;

use crate::application::lock::{DistributedLock, LockConfig};
use crate::domain::{
    JobRequest, OwnerId, Priority, QueueConfig, QueueMetrics, QueueState, QueueStatus,
    StoredMetrics,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, SharedStateStore, TimeProvider};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct QueueManager {
    store: Arc<dyn SharedStateStore>,
    lock: DistributedLock,
    keys: QueueKeys,
    config: QueueConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl QueueManager {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        config: QueueConfig,
        lock_config: LockConfig,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        let lock = DistributedLock::new(Arc::clone(&store), &config.name, lock_config, id_provider);
        Self {
            store,
            lock,
            keys: QueueKeys::new(&config.name),
            config,
            time_provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn keys(&self) -> &QueueKeys {
        &self.keys
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Load (or seed) persisted metrics and clear the processing set
    ///
    /// Jobs found in the processing set belonged to runs of a crashed fleet;
    /// they are dropped, not replayed. Their requests are returned so owners
    /// can be told.
    pub async fn initialize(&self) -> Result<Vec<JobRequest>> {
        let dropped = self.lock.with_lock(|| self.initialize_locked()).await?;
        let metrics = self.load_metrics().await?;
        info!(
            queue = %self.config.name,
            capacity = metrics.capacity,
            average_processing_time = metrics.average_processing_time,
            total_processed = metrics.total_processed,
            dropped = dropped.len(),
            "Queue initialized"
        );
        Ok(dropped)
    }

    async fn initialize_locked(&self) -> Result<Vec<JobRequest>> {
        let meta = self.store.hgetall(&self.keys.meta).await?;
        let mut seed = Vec::new();
        if !meta.contains_key(FIELD_CAPACITY) {
            seed.push((FIELD_CAPACITY, self.config.default_capacity.to_string()));
        }
        if !meta.contains_key(FIELD_AVERAGE) {
            seed.push((
                FIELD_AVERAGE,
                self.config.default_average_processing_secs.to_string(),
            ));
        }
        if !meta.contains_key(FIELD_TOTAL) {
            seed.push((FIELD_TOTAL, "0".to_string()));
        }
        if !seed.is_empty() {
            self.store.hset_multiple(&self.keys.meta, &seed).await?;
        }

        let mut dropped = Vec::new();
        for request_id in self.store.smembers(&self.keys.processing).await? {
            if let Some(job) = self.load_request(&request_id).await? {
                dropped.push(job);
            }
            self.store.del(&self.keys.job(&request_id)).await?;
            warn!(request_id = %request_id, "Dropping job left in processing set");
        }
        self.store.del(&self.keys.processing).await?;
        Ok(dropped)
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admit a request (idempotent on `request_id`)
    pub async fn join(&self, job: JobRequest) -> Result<QueueStatus> {
        validation::validate_request(&job)?;

        let admitted = self.lock.with_lock(|| self.join_locked(&job)).await?;
        if admitted {
            info!(
                request_id = %job.request_id,
                owner_id = %job.owner_id,
                lane = %job.lane(),
                priority = job.priority,
                "Request joined queue"
            );
        } else {
            debug!(request_id = %job.request_id, "Duplicate join, returning current status");
        }

        self.status(&job.request_id).await
    }

    async fn join_locked(&self, job: &JobRequest) -> Result<bool> {
        if self.is_known(&job.request_id).await? {
            self.ensure_owner(&job.request_id, &job.owner_id).await?;
            return Ok(false);
        }
        self.store
            .zadd(self.keys.lane(job.lane()), &job.request_id, job.score())
            .await?;
        self.store
            .zadd(&self.keys.admitted, &job.request_id, job.admitted_secs())
            .await?;
        self.save_request(job).await?;
        Ok(true)
    }

    /// Withdraw a request from wherever it is (idempotent)
    ///
    /// Returns true if anything was removed.
    pub async fn leave(&self, request_id: &str, owner_id: &OwnerId) -> Result<bool> {
        let removed = self
            .lock
            .with_lock(|| self.leave_locked(request_id, owner_id))
            .await?;
        if removed {
            info!(request_id = %request_id, owner_id = %owner_id, "Request left queue");
        }
        Ok(removed)
    }

    async fn leave_locked(&self, request_id: &str, owner_id: &OwnerId) -> Result<bool> {
        self.ensure_owner(request_id, owner_id).await?;

        let in_priority = self.store.zrem(&self.keys.priority, request_id).await?;
        let in_normal = self.store.zrem(&self.keys.normal, request_id).await?;
        let in_processing = self.store.srem(&self.keys.processing, request_id).await?;
        self.store.zrem(&self.keys.admitted, request_id).await?;
        self.store.del(&self.keys.job(request_id)).await?;
        Ok(in_priority || in_normal || in_processing)
    }

    /// Move a waiting request to `priority`, keeping its admission time
    pub async fn set_priority(&self, request_id: &str, priority: Priority) -> Result<QueueStatus> {
        validation::validate_priority(priority)?;
        self.lock
            .with_lock(|| self.set_priority_locked(request_id, priority))
            .await?;
        info!(request_id = %request_id, priority, "Request priority updated");
        self.status(request_id).await
    }

    async fn set_priority_locked(&self, request_id: &str, priority: Priority) -> Result<()> {
        let waiting = self.store.zscore(&self.keys.priority, request_id).await?.is_some()
            || self.store.zscore(&self.keys.normal, request_id).await?.is_some();
        let job = match self.load_request(request_id).await? {
            Some(job) if waiting => job,
            _ => {
                return Err(AppError::NotFound(format!(
                    "Request {} is not waiting in the queue",
                    request_id
                )))
            }
        };

        self.store.zrem(self.keys.lane(job.lane()), request_id).await?;
        let job = job.with_priority(priority);
        self.store
            .zadd(self.keys.lane(job.lane()), request_id, job.score())
            .await?;
        self.save_request(&job).await
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Atomically pop the next admissible request and mark it processing
    ///
    /// Returns None when the fleet is at capacity or nothing is waiting.
    pub async fn next_for_processing(&self) -> Result<Option<JobRequest>> {
        let next = self.lock.with_lock(|| self.next_locked()).await?;
        if let Some(job) = &next {
            info!(
                request_id = %job.request_id,
                lane = %job.lane(),
                "Request dequeued for processing"
            );
        }
        Ok(next)
    }

    async fn next_locked(&self) -> Result<Option<JobRequest>> {
        let capacity = self.load_metrics().await?.capacity as u64;
        if self.store.scard(&self.keys.processing).await? >= capacity {
            return Ok(None);
        }

        loop {
            let popped = match self.store.zpopmin(&self.keys.priority).await? {
                Some(entry) => Some(entry),
                None => self.store.zpopmin(&self.keys.normal).await?,
            };
            let Some((request_id, _)) = popped else {
                return Ok(None);
            };
            self.store.zrem(&self.keys.admitted, &request_id).await?;

            let Some(mut job) = self.load_request(&request_id).await? else {
                // Metadata expired with the session; nothing left to run
                warn!(request_id = %request_id, "Dropping queue entry without metadata");
                continue;
            };

            job.mark_processing(self.time_provider.now_millis())?;
            self.store.sadd(&self.keys.processing, &request_id).await?;
            self.save_request(&job).await?;
            return Ok(Some(job));
        }
    }

    /// Bookkeeping for a successful run
    pub async fn complete(&self, request_id: &str) -> Result<()> {
        let elapsed = self.lock.with_lock(|| self.complete_locked(request_id)).await?;
        match elapsed {
            Some(secs) => info!(request_id = %request_id, elapsed_secs = secs, "Request completed"),
            None => debug!(request_id = %request_id, "Completed request was no longer processing"),
        }
        Ok(())
    }

    async fn complete_locked(&self, request_id: &str) -> Result<Option<f64>> {
        let was_processing = self.store.srem(&self.keys.processing, request_id).await?;
        let job = self.load_request(request_id).await?;
        self.store.del(&self.keys.job(request_id)).await?;

        let elapsed = job.and_then(|job| job.elapsed_secs(self.time_provider.now_millis()));
        match elapsed {
            Some(secs) if was_processing => {
                let mut metrics = self.load_metrics().await?;
                metrics.record_completion(secs);
                self.store
                    .hset_multiple(
                        &self.keys.meta,
                        &[
                            (FIELD_AVERAGE, metrics.average_processing_time.to_string()),
                            (FIELD_TOTAL, metrics.total_processed.to_string()),
                        ],
                    )
                    .await?;
                Ok(Some(secs))
            }
            _ => Ok(None),
        }
    }

    /// Bookkeeping for a failed or cancelled run (metrics untouched)
    pub async fn abandon(&self, request_id: &str) -> Result<bool> {
        let removed = self
            .lock
            .with_lock(|| async move {
                let removed = self.store.srem(&self.keys.processing, request_id).await?;
                self.store.del(&self.keys.job(request_id)).await?;
                Ok(removed)
            })
            .await?;
        if removed {
            info!(request_id = %request_id, "Request abandoned");
        }
        Ok(removed)
    }

    // ========================================================================
    // Queries (unlocked)
    // ========================================================================

    pub async fn status(&self, request_id: &str) -> Result<QueueStatus> {
        let priority_len = self.store.zcard(&self.keys.priority).await?;
        let total = priority_len + self.store.zcard(&self.keys.normal).await?;

        if self.store.sismember(&self.keys.processing, request_id).await? {
            return Ok(QueueStatus::processing(request_id, total));
        }

        let position = match self.store.zrank(&self.keys.priority, request_id).await? {
            Some(rank) => rank + 1,
            None => match self.store.zrank(&self.keys.normal, request_id).await? {
                Some(rank) => priority_len + rank + 1,
                None => return Ok(QueueStatus::not_in_queue(request_id, total)),
            },
        };

        let metrics = self.load_metrics().await?;
        let processing = self.store.scard(&self.keys.processing).await?;
        let free_slots = (metrics.capacity as u64).saturating_sub(processing);
        let (status, estimated_time) = if position <= free_slots {
            (QueueState::Ready, 0)
        } else {
            (QueueState::Waiting, metrics.estimate_wait_secs(position))
        };

        Ok(QueueStatus {
            request_id: request_id.to_string(),
            status,
            position: position as i64,
            total_in_queue: total,
            estimated_time,
        })
    }

    pub async fn metrics(&self) -> Result<QueueMetrics> {
        let stored = self.load_metrics().await?;
        Ok(QueueMetrics {
            priority_waiting: self.store.zcard(&self.keys.priority).await?,
            normal_waiting: self.store.zcard(&self.keys.normal).await?,
            processing: self.store.scard(&self.keys.processing).await?,
            capacity: stored.capacity,
            average_processing_time: stored.average_processing_time,
            total_processed: stored.total_processed,
        })
    }

    /// Request metadata, if the request is still known
    pub async fn request(&self, request_id: &str) -> Result<Option<JobRequest>> {
        self.load_request(request_id).await
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Remove waiting entries admitted more than `max_age_secs` ago
    ///
    /// Processing entries are never touched.
    pub async fn cleanup(&self, max_age_secs: u64) -> Result<u64> {
        let cutoff = self.time_provider.now_millis() as f64 / 1000.0 - max_age_secs as f64;
        let removed = self.lock.with_lock(|| self.cleanup_locked(cutoff)).await?;
        if removed > 0 {
            info!(removed, max_age_secs, "Stale queue entries removed");
        }
        Ok(removed)
    }

    async fn cleanup_locked(&self, cutoff_secs: f64) -> Result<u64> {
        let mut removed = 0;
        for request_id in self.store.zrange_below(&self.keys.admitted, cutoff_secs).await? {
            let in_priority = self.store.zrem(&self.keys.priority, &request_id).await?;
            let in_normal = self.store.zrem(&self.keys.normal, &request_id).await?;
            self.store.zrem(&self.keys.admitted, &request_id).await?;
            if in_priority || in_normal {
                self.store.del(&self.keys.job(&request_id)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn adjust_capacity(&self, capacity: u32) -> Result<()> {
        validation::validate_capacity(capacity)?;
        self.lock
            .with_lock(|| async move {
                self.store
                    .hset_multiple(&self.keys.meta, &[(FIELD_CAPACITY, capacity.to_string())])
                    .await
            })
            .await?;
        info!(capacity, "Queue capacity adjusted");
        Ok(())
    }

    /// Reset the moving average and processed count
    pub async fn reset_metrics(&self) -> Result<()> {
        self.lock
            .with_lock(|| async move {
                self.store
                    .hset_multiple(
                        &self.keys.meta,
                        &[
                            (
                                FIELD_AVERAGE,
                                self.config.default_average_processing_secs.to_string(),
                            ),
                            (FIELD_TOTAL, "0".to_string()),
                        ],
                    )
                    .await
            })
            .await?;
        info!("Queue metrics reset");
        Ok(())
    }

    // ========================================================================
    // Store helpers
    // ========================================================================

    async fn is_known(&self, request_id: &str) -> Result<bool> {
        Ok(self.store.zscore(&self.keys.priority, request_id).await?.is_some()
            || self.store.zscore(&self.keys.normal, request_id).await?.is_some()
            || self.store.sismember(&self.keys.processing, request_id).await?)
    }

    /// PermissionDenied if the stored request belongs to someone else
    async fn ensure_owner(&self, request_id: &str, owner_id: &OwnerId) -> Result<()> {
        match self.load_request(request_id).await? {
            Some(job) if &job.owner_id != owner_id => Err(AppError::PermissionDenied(format!(
                "Request {} belongs to another user",
                request_id
            ))),
            _ => Ok(()),
        }
    }

    async fn save_request(&self, job: &JobRequest) -> Result<()> {
        let key = self.keys.job(&job.request_id);
        self.store
            .hset_multiple(
                &key,
                &[
                    (FIELD_REQUEST, serde_json::to_string(job)?),
                    (FIELD_OWNER, job.owner_id.clone()),
                ],
            )
            .await?;
        self.store.expire(&key, self.config.session_ttl).await?;
        Ok(())
    }

    async fn load_request(&self, request_id: &str) -> Result<Option<JobRequest>> {
        let hash = self.store.hgetall(&self.keys.job(request_id)).await?;
        match hash.get(FIELD_REQUEST) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn load_metrics(&self) -> Result<StoredMetrics> {
        let meta = self.store.hgetall(&self.keys.meta).await?;
        Ok(StoredMetrics {
            capacity: parse_field(&meta, FIELD_CAPACITY).unwrap_or(self.config.default_capacity),
            average_processing_time: parse_field(&meta, FIELD_AVERAGE)
                .unwrap_or(self.config.default_average_processing_secs),
            total_processed: parse_field(&meta, FIELD_TOTAL).unwrap_or(0),
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    meta: &std::collections::HashMap<String, String>,
    field: &str,
) -> Option<T> {
    let raw = meta.get(field)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(field, value = %raw, "Unparseable queue metadata field, using default");
            None
        }
    }
}
