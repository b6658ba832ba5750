// Crash recovery: clear the processing set left behind by a dead fleet
use crate::application::gateway::EventRouter;
use crate::application::queue_manager::QueueManager;
use crate::domain::{ErrorCode, OutboundEvent};
use crate::error::Result;
use std::sync::Arc;
use tracing::{info, warn};

/// Startup recovery service
///
/// Jobs found in the processing set at startup are dropped, never replayed.
/// Their owners are told with a `job.error {code: JOB_LOST}` push. The push is
/// best effort: it only reaches clients that are connected (or reconnect
/// under the same socket) on some process of the fleet.
pub struct RecoveryService {
    queue: Arc<QueueManager>,
    router: Arc<EventRouter>,
}

impl RecoveryService {
    pub fn new(queue: Arc<QueueManager>, router: Arc<EventRouter>) -> Self {
        Self { queue, router }
    }

    /// Initialize the queue and notify owners of dropped jobs
    ///
    /// # Returns
    /// Number of jobs dropped
    pub async fn recover(&self) -> Result<usize> {
        let dropped = self.queue.initialize().await?;

        let mut notified = 0;
        for job in &dropped {
            match &job.socket_id {
                Some(socket_id) => {
                    self.router.deliver(
                        socket_id,
                        OutboundEvent::JobError {
                            request_id: job.request_id.clone(),
                            error: "Job was lost during a server restart".to_string(),
                            code: ErrorCode::JobLost,
                        },
                    );
                    notified += 1;
                }
                None => warn!(request_id = %job.request_id, "Lost job has no socket to notify"),
            }
        }

        if !dropped.is_empty() {
            info!(dropped = dropped.len(), notified, "Crash recovery completed");
        }
        Ok(dropped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gateway::{ConnectionRegistry, Principal};
    use crate::application::lock::LockConfig;
    use crate::application::pipeline::CancellationRegistry;
    use crate::domain::{JobRequest, QueueConfig};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::state_store::memory::InMemoryStateStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use crate::port::SharedStateStore;
    use tokio::sync::mpsc;

    fn queue_on(store: &Arc<InMemoryStateStore>) -> Arc<QueueManager> {
        Arc::new(QueueManager::new(
            store.clone(),
            QueueConfig::new("rec", 2),
            LockConfig::default(),
            Arc::new(MockTimeProvider::new(1_000)),
            Arc::new(SequentialIdProvider::new("lock")),
        ))
    }

    #[tokio::test]
    async fn test_recover_drops_processing_and_notifies_owner() {
        let store = Arc::new(InMemoryStateStore::new());

        // First life: r1 is running when the fleet dies, r2 still waits
        let before = queue_on(&store);
        before.initialize().await.unwrap();
        before
            .join(JobRequest::new("r1", "owner", 1_000).with_socket("s1"))
            .await
            .unwrap();
        before.next_for_processing().await.unwrap().unwrap();
        before
            .join(JobRequest::new("r2", "owner", 2_000).with_socket("s1"))
            .await
            .unwrap();

        // Second life
        let queue = queue_on(&store);
        let connections = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        connections.register("s1", Principal::user("owner"), tx);
        let router = Arc::new(EventRouter::new(
            store.clone(),
            "rec:events",
            connections,
            Arc::new(CancellationRegistry::new()),
        ));
        let recovery = RecoveryService::new(queue.clone(), router);

        assert_eq!(recovery.recover().await.unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "job.error");
        assert_eq!(event.request_id(), Some("r1"));
        match event {
            OutboundEvent::JobError { code, .. } => assert_eq!(code, ErrorCode::JobLost),
            other => panic!("unexpected event {other:?}"),
        }

        let metrics = queue.metrics().await.unwrap();
        assert_eq!(metrics.processing, 0);
        assert_eq!(metrics.normal_waiting, 1);
        assert!(queue.request("r1").await.unwrap().is_none());
        assert!(!store.sismember(&queue.keys().processing, "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_recover_on_clean_store_drops_nothing() {
        let store = Arc::new(InMemoryStateStore::new());
        let router = Arc::new(EventRouter::new(
            store.clone(),
            "rec:events",
            Arc::new(ConnectionRegistry::new()),
            Arc::new(CancellationRegistry::new()),
        ));
        let recovery = RecoveryService::new(queue_on(&store), router);

        assert_eq!(recovery.recover().await.unwrap(), 0);
    }
}
