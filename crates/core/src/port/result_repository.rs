// Result Repository Port (Interface)

use crate::domain::{JobResult, OwnerId};
use crate::error::Result;
use async_trait::async_trait;

/// Best-effort persistence of finished job results
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Save a result for its owner
    async fn save(&self, owner_id: &OwnerId, result: &JobResult) -> Result<()>;

    /// Most recent results first
    async fn find_by_owner(&self, owner_id: &OwnerId, limit: u32) -> Result<Vec<JobResult>>;

    /// Delete results completed before `cutoff_millis`, returns count
    async fn prune_before(&self, cutoff_millis: i64) -> Result<u64>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records saved results in memory
    #[derive(Default)]
    pub struct RecordingResultRepository {
        saved: Mutex<Vec<(OwnerId, JobResult)>>,
        fail: AtomicBool,
    }

    impl RecordingResultRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every call fails from now on
        pub fn failing() -> Self {
            let repo = Self::default();
            repo.fail.store(true, Ordering::SeqCst);
            repo
        }

        pub fn saved(&self) -> Vec<(OwnerId, JobResult)> {
            self.saved.lock().unwrap().clone()
        }

        fn check(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Persistence("repository unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ResultRepository for RecordingResultRepository {
        async fn save(&self, owner_id: &OwnerId, result: &JobResult) -> Result<()> {
            self.check()?;
            self.saved
                .lock()
                .unwrap()
                .push((owner_id.clone(), result.clone()));
            Ok(())
        }

        async fn find_by_owner(&self, owner_id: &OwnerId, limit: u32) -> Result<Vec<JobResult>> {
            self.check()?;
            let saved = self.saved.lock().unwrap();
            Ok(saved
                .iter()
                .rev()
                .filter(|(owner, _)| owner == owner_id)
                .take(limit as usize)
                .map(|(_, result)| result.clone())
                .collect())
        }

        async fn prune_before(&self, cutoff_millis: i64) -> Result<u64> {
            self.check()?;
            let mut saved = self.saved.lock().unwrap();
            let before = saved.len();
            saved.retain(|(_, result)| result.completed_at >= cutoff_millis);
            Ok((before - saved.len()) as u64)
        }
    }
}
