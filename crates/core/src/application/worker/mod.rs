// Worker - runs pipeline jobs with panic isolation

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::gateway::EventRouter;
use crate::application::pipeline::{CancelFlag, CancellationRegistry, JobPipeline};
use crate::application::queue_manager::QueueManager;
use crate::domain::{ErrorCode, JobRequest, OutboundEvent, RunOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

/// Where a run came from decides its bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Dequeued by the scheduler; owns a processing slot
    Queued,
    /// Started directly, bypassing the queue
    Immediate,
}

/// Launches pipeline runs in their own tasks
///
/// A panicking run never takes the process down: the join error is turned
/// into a `job.error` push and the processing slot is released.
pub struct JobExecutor {
    queue: Arc<QueueManager>,
    pipeline: Arc<JobPipeline>,
    router: Arc<EventRouter>,
    cancellations: Arc<CancellationRegistry>,
    in_flight: Arc<AtomicUsize>,
}

impl JobExecutor {
    pub fn new(
        queue: Arc<QueueManager>,
        pipeline: Arc<JobPipeline>,
        router: Arc<EventRouter>,
    ) -> Self {
        let cancellations = Arc::clone(router.cancellations());
        Self {
            queue,
            pipeline,
            router,
            cancellations,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run a job taken from the queue; complete/abandon it afterwards
    pub fn launch(&self, job: JobRequest) -> JoinHandle<()> {
        let flag = self.cancellations.register(&job.request_id);
        self.spawn_run(job, flag, Admission::Queued)
    }

    /// Run a job without queue admission
    ///
    /// `None` if a run with the same request ID is already executing here.
    pub fn launch_detached(&self, job: JobRequest) -> Option<JoinHandle<()>> {
        let flag = self.cancellations.try_register(&job.request_id)?;
        Some(self.spawn_run(job, flag, Admission::Immediate))
    }

    /// Runs currently executing in this process
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait (bounded) for in-flight runs to finish
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() > 0 {
            if Instant::now() >= deadline {
                warn!(in_flight = self.in_flight(), "Shutdown drain timed out");
                return false;
            }
            sleep(Duration::from_millis(50)).await;
        }
        true
    }

    fn spawn_run(&self, job: JobRequest, flag: CancelFlag, admission: Admission) -> JoinHandle<()> {
        let sink = self.router.sink_for(job.socket_id.clone());
        let pipeline = Arc::clone(&self.pipeline);
        let queue = Arc::clone(&self.queue);
        let cancellations = Arc::clone(&self.cancellations);
        let in_flight = Arc::clone(&self.in_flight);

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let request_id = job.request_id.clone();
            info!(request_id = %request_id, admission = ?admission, "Launching run");

            // Inner task: a panic surfaces here as a JoinError
            let run_sink = Arc::clone(&sink);
            let handle =
                tokio::spawn(async move { pipeline.run(&job, &flag, run_sink.as_ref()).await });

            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    if join_err.is_panic() {
                        error!(request_id = %request_id, error = ?join_err, "Run panicked");
                    } else {
                        error!(request_id = %request_id, error = ?join_err, "Run aborted");
                    }
                    sink.emit(OutboundEvent::JobError {
                        request_id: request_id.clone(),
                        error: "Job failed".to_string(),
                        code: ErrorCode::PipelineFailed,
                    });
                    RunOutcome::Failed {
                        code: ErrorCode::PipelineFailed,
                        error: "Job failed".to_string(),
                    }
                }
            };
            cancellations.remove(&request_id);

            if admission == Admission::Queued {
                let bookkeeping = match &outcome {
                    RunOutcome::Completed(_) => queue.complete(&request_id).await,
                    _ => queue.abandon(&request_id).await.map(|_| ()),
                };
                if let Err(e) = bookkeeping {
                    error!(
                        request_id = %request_id,
                        outcome = outcome.label(),
                        error = %e,
                        "Failed to release processing slot"
                    );
                }
            }

            in_flight.fetch_sub(1, Ordering::SeqCst);
            info!(request_id = %request_id, outcome = outcome.label(), "Run finished");
        })
    }
}
