//! Scheduler - drives admission from the queue into the executor
//!
//! One loop per process. Every tick asks the queue for the next admissible
//! job; the run itself is launched in the background so a tick never waits
//! on a pipeline. Several processes may tick against the same queue: the
//! dequeue is locked, so they race safely.

use crate::application::gateway::EventRouter;
use crate::application::queue_manager::QueueManager;
use crate::application::worker::constants::{
    DEFAULT_TICK_INTERVAL, ERROR_RECOVERY_SLEEP_DURATION,
};
use crate::application::worker::{JobExecutor, ShutdownToken};
use crate::domain::{OutboundEvent, RequestId};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

pub struct Scheduler {
    queue: Arc<QueueManager>,
    executor: Arc<JobExecutor>,
    router: Arc<EventRouter>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        queue: Arc<QueueManager>,
        executor: Arc<JobExecutor>,
        router: Arc<EventRouter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            router,
            config,
        }
    }

    /// Tick until shutdown (first tick fires immediately)
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!(
            queue = %self.queue.name(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Scheduler started"
        );
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.wait() => break,
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler tick failed");
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                    _ = shutdown.wait() => {
                        info!("Scheduler interrupted during error recovery");
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Scheduler stopped");
        Ok(())
    }

    /// Admit at most one job; returns its ID if one was launched
    pub async fn tick(&self) -> Result<Option<RequestId>> {
        let Some(job) = self.queue.next_for_processing().await? else {
            debug!("No admissible job");
            return Ok(None);
        };
        let request_id = job.request_id.clone();

        if let Some(socket_id) = &job.socket_id {
            self.router.deliver(
                socket_id,
                OutboundEvent::QueueReady {
                    request_id: request_id.clone(),
                    message: "Your request is now being processed".to_string(),
                },
            );
        }
        self.executor.launch(job);

        info!(request_id = %request_id, "Job admitted for processing");
        Ok(Some(request_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gateway::{ConnectionRegistry, Principal};
    use crate::application::lock::LockConfig;
    use crate::application::pipeline::{CancellationRegistry, JobPipeline, PipelineConfig};
    use crate::application::worker::shutdown_channel;
    use crate::domain::{JobRequest, QueueConfig};
    use crate::port::generator::mocks::{GeneratorBehavior, MockEvaluator, ScriptedGenerator};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::result_repository::mocks::RecordingResultRepository;
    use crate::port::state_store::memory::InMemoryStateStore;
    use crate::port::time_provider::mocks::MockTimeProvider;
    use tokio::sync::mpsc;

    struct Fixture {
        queue: Arc<QueueManager>,
        scheduler: Arc<Scheduler>,
        events: mpsc::UnboundedReceiver<OutboundEvent>,
    }

    async fn fixture(capacity: u32, generator: ScriptedGenerator) -> Fixture {
        let store = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(MockTimeProvider::new(1_000));
        let queue = Arc::new(QueueManager::new(
            store.clone(),
            QueueConfig::new("sched", capacity),
            LockConfig::default(),
            clock.clone(),
            Arc::new(SequentialIdProvider::new("lock")),
        ));
        queue.initialize().await.unwrap();

        let pipeline = Arc::new(JobPipeline::new(
            None,
            Arc::new(generator),
            Arc::new(MockEvaluator::new(0.5)),
            Arc::new(RecordingResultRepository::new()),
            clock,
            PipelineConfig::default(),
        ));
        let connections = Arc::new(ConnectionRegistry::new());
        let (tx, events) = mpsc::unbounded_channel();
        connections.register("s1", Principal::user("owner"), tx);
        let router = Arc::new(EventRouter::new(
            store,
            "sched:events",
            connections,
            Arc::new(CancellationRegistry::new()),
        ));
        let executor = Arc::new(JobExecutor::new(
            queue.clone(),
            pipeline,
            router.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            executor,
            router,
            SchedulerConfig {
                tick_interval: Duration::from_millis(20),
            },
        ));
        Fixture {
            queue,
            scheduler,
            events,
        }
    }

    #[tokio::test]
    async fn test_tick_without_jobs_is_noop() {
        let f = fixture(1, ScriptedGenerator::returning("rules", &["a"])).await;
        assert_eq!(f.scheduler.tick().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_tick_notifies_socket_before_progress() {
        let mut f = fixture(1, ScriptedGenerator::returning("rules", &["a"])).await;
        f.queue
            .join(JobRequest::new("r1", "owner", 1_000).with_socket("s1"))
            .await
            .unwrap();

        assert_eq!(f.scheduler.tick().await.unwrap().as_deref(), Some("r1"));

        let first = f.events.recv().await.unwrap();
        assert_eq!(first.name(), "queue.ready");
        assert_eq!(first.request_id(), Some("r1"));
    }

    #[tokio::test]
    async fn test_tick_respects_capacity() {
        let generator = ScriptedGenerator::new(
            "slow",
            GeneratorBehavior::Delay(Duration::from_secs(5), vec!["a".to_string()]),
        );
        let f = fixture(1, generator).await;
        for id in ["r1", "r2"] {
            f.queue
                .join(JobRequest::new(id, "owner", 1_000))
                .await
                .unwrap();
        }

        assert!(f.scheduler.tick().await.unwrap().is_some());
        // r1 still holds the only slot
        assert_eq!(f.scheduler.tick().await.unwrap(), None);
        assert_eq!(f.queue.metrics().await.unwrap().normal_waiting, 1);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_on_shutdown() {
        let mut f = fixture(2, ScriptedGenerator::returning("rules", &["a"])).await;
        for id in ["r1", "r2", "r3"] {
            f.queue
                .join(JobRequest::new(id, "owner", 1_000).with_socket("s1"))
                .await
                .unwrap();
        }

        let (shutdown_tx, shutdown) = shutdown_channel();
        let scheduler = f.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run(shutdown).await });

        let mut completed = 0;
        while completed < 3 {
            let event = tokio::time::timeout(Duration::from_secs(2), f.events.recv())
                .await
                .unwrap()
                .unwrap();
            if event.name() == "job.complete" {
                completed += 1;
            }
        }

        shutdown_tx.shutdown();
        handle.await.unwrap().unwrap();

        // Completion bookkeeping runs just after the terminal push
        let mut metrics = f.queue.metrics().await.unwrap();
        for _ in 0..100 {
            if metrics.total_processed == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            metrics = f.queue.metrics().await.unwrap();
        }
        assert_eq!(metrics.total_waiting(), 0);
        assert_eq!(metrics.total_processed, 3);
    }
}
