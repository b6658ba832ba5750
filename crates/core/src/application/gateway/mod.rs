// Connection Gateway - per-connection routing of client events
//
// Inbound events become QueueManager / executor calls; every call gets exactly
// one reply event. Pushes (progress, completion, readiness) flow back through
// the EventRouter.

pub mod registry;
pub mod router;

pub use registry::{ConnectionRegistry, Principal};
pub use router::{BusMessage, EventRouter, JobEventSink};

use crate::application::queue_manager::{validation, QueueManager};
use crate::application::worker::JobExecutor;
use crate::domain::{
    InboundEvent, JobMetadata, JobRequest, OutboundEvent, Priority, RequestId, SocketId,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Run `job.start` at once instead of queueing it
    pub immediate_execution: bool,
}

pub struct ConnectionGateway {
    queue: Arc<QueueManager>,
    executor: Arc<JobExecutor>,
    router: Arc<EventRouter>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    config: GatewayConfig,
}

impl ConnectionGateway {
    pub fn new(
        queue: Arc<QueueManager>,
        executor: Arc<JobExecutor>,
        router: Arc<EventRouter>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            router,
            time_provider,
            id_provider,
            config,
        }
    }

    /// Open a connection; the receiver carries every push for it
    ///
    /// The first message on the receiver is `session.opened`.
    pub fn connect(&self, principal: Principal) -> (SocketId, mpsc::UnboundedReceiver<OutboundEvent>) {
        let socket_id = self.id_provider.generate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        info!(socket_id = %socket_id, owner_id = %principal.owner_id, "Connection opened");
        self.router.connections().register(&socket_id, principal, tx);
        self.router.connections().send(
            &socket_id,
            OutboundEvent::SessionOpened {
                socket_id: socket_id.clone(),
            },
        );
        (socket_id, rx)
    }

    pub fn principal(&self, socket_id: &str) -> Option<Principal> {
        self.router.connections().principal(socket_id)
    }

    /// Handle one inbound event, returning the reply
    pub async fn handle(&self, socket_id: &str, event: InboundEvent) -> OutboundEvent {
        let name = event.name();
        let request_id = event.request_id().to_string();
        debug!(socket_id = %socket_id, event = name, request_id = %request_id, "Inbound event");

        match self.dispatch(socket_id, event).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    socket_id = %socket_id,
                    event = name,
                    request_id = %request_id,
                    error = %e,
                    "Inbound event rejected"
                );
                error_reply(name, request_id, &e)
            }
        }
    }

    async fn dispatch(&self, socket_id: &str, event: InboundEvent) -> Result<OutboundEvent> {
        let principal = self
            .router
            .connections()
            .principal(socket_id)
            .ok_or_else(|| AppError::NotFound(format!("Unknown connection {}", socket_id)))?;

        match event {
            InboundEvent::QueueJoin {
                request_id,
                priority,
            } => {
                require_priority_access(&principal, priority)?;
                let job = self
                    .new_request(&principal, socket_id, request_id, JobMetadata::default())
                    .await?
                    .with_priority(priority);
                let status = self.queue.join(job).await?;
                self.router.connections().track(socket_id, &status.request_id);
                Ok(OutboundEvent::QueueJoined { status })
            }
            InboundEvent::QueueLeave { request_id } => {
                self.queue.leave(&request_id, &principal.owner_id).await?;
                self.router.connections().untrack(socket_id, &request_id);
                Ok(OutboundEvent::QueueLeft { request_id })
            }
            InboundEvent::QueueStatus { request_id } => {
                let status = self.queue.status(&request_id).await?;
                Ok(OutboundEvent::QueueStatus { status })
            }
            InboundEvent::QueuePriority {
                request_id,
                priority,
            } => {
                if !principal.elevated {
                    return Err(AppError::PermissionDenied(
                        "Changing priority requires elevated access".to_string(),
                    ));
                }
                self.queue.set_priority(&request_id, priority).await?;
                Ok(OutboundEvent::QueuePriorityUpdated {
                    request_id,
                    priority,
                })
            }
            InboundEvent::JobStart { request_id, inputs } => {
                let job = self
                    .new_request(&principal, socket_id, request_id, JobMetadata::from(inputs))
                    .await?;
                self.start(socket_id, job).await
            }
            InboundEvent::JobCancel { request_id } => {
                self.cancel(socket_id, &principal, &request_id).await?;
                Ok(OutboundEvent::JobCancelled { request_id })
            }
        }
    }

    async fn start(&self, socket_id: &str, job: JobRequest) -> Result<OutboundEvent> {
        let request_id = job.request_id.clone();

        if self.config.immediate_execution {
            validation::validate_request(&job)?;
            let connections = self.router.connections();
            let repeated = connections.is_tracking(socket_id, &request_id);
            connections.track(socket_id, &request_id);
            if self.executor.launch_detached(job).is_some() {
                info!(request_id = %request_id, "Job started without queueing");
            } else if !repeated {
                connections.untrack(socket_id, &request_id);
                return Err(AppError::Validation(format!(
                    "Request {} is already running",
                    request_id
                )));
            }
            // A repeated start on the owning connection is a no-op
            return Ok(OutboundEvent::JobStarted {
                request_id,
                queued: false,
            });
        }

        let status = self.queue.join(job).await?;
        self.router.connections().track(socket_id, &request_id);
        self.router
            .deliver(socket_id, OutboundEvent::QueueStatus { status });
        Ok(OutboundEvent::JobStarted {
            request_id,
            queued: true,
        })
    }

    async fn cancel(&self, socket_id: &str, principal: &Principal, request_id: &str) -> Result<()> {
        if !self.router.connections().is_tracking(socket_id, request_id) {
            return Err(AppError::NotFound(format!(
                "No active job {} on this connection",
                request_id
            )));
        }
        if !self.owns(principal, request_id).await? {
            self.router.connections().untrack(socket_id, request_id);
            return Err(AppError::PermissionDenied(format!(
                "Request {} belongs to another user",
                request_id
            )));
        }

        // Still waiting: withdraw it so it is never dequeued
        if self.queue.status(request_id).await?.is_waiting() {
            self.queue.leave(request_id, &principal.owner_id).await?;
        }
        self.router.request_cancel(request_id);
        self.router.connections().untrack(socket_id, request_id);
        info!(request_id = %request_id, socket_id = %socket_id, "Job cancel requested");
        Ok(())
    }

    /// Connection lost: cancel runs and withdraw every job it tracked
    pub async fn disconnect(&self, socket_id: &str) {
        let Some((principal, jobs)) = self.router.connections().unregister(socket_id) else {
            return;
        };
        for request_id in &jobs {
            match self.owns(&principal, request_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        socket_id = %socket_id,
                        request_id = %request_id,
                        "Tracked job belongs to another user, left running"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Owner lookup failed");
                    continue;
                }
            }
            self.router.request_cancel(request_id);
            if let Err(e) = self.queue.leave(request_id, &principal.owner_id).await {
                warn!(
                    socket_id = %socket_id,
                    request_id = %request_id,
                    error = %e,
                    "Failed to withdraw job of closed connection"
                );
            }
        }
        info!(socket_id = %socket_id, jobs = jobs.len(), "Connection closed");
    }

    /// False only when the queue holds the request under another owner
    ///
    /// Immediate runs and finished jobs have no stored request; tracking by
    /// the connection is the only claim on them.
    async fn owns(&self, principal: &Principal, request_id: &str) -> Result<bool> {
        Ok(match self.queue.request(request_id).await? {
            Some(job) => job.owner_id == principal.owner_id,
            None => true,
        })
    }

    async fn new_request(
        &self,
        principal: &Principal,
        socket_id: &str,
        request_id: RequestId,
        metadata: JobMetadata,
    ) -> Result<JobRequest> {
        let average = self.queue.metrics().await?.average_processing_time;
        Ok(JobRequest::new(
            request_id,
            principal.owner_id.clone(),
            self.time_provider.now_millis(),
        )
        .with_socket(socket_id)
        .with_metadata(metadata)
        .with_estimate(average.round().max(0.0) as u64))
    }
}

fn require_priority_access(principal: &Principal, priority: Priority) -> Result<()> {
    if priority > 0 && !principal.elevated {
        return Err(AppError::PermissionDenied(
            "The priority lane requires elevated access".to_string(),
        ));
    }
    Ok(())
}

/// Map a failure to the reply type of the event family
fn error_reply(event_name: &str, request_id: RequestId, error: &AppError) -> OutboundEvent {
    if event_name.starts_with("job.") {
        OutboundEvent::JobError {
            request_id,
            error: error.public_message(),
            code: error.code(),
        }
    } else {
        OutboundEvent::QueueError {
            request_id: Some(request_id),
            code: error.code(),
            error: error.public_message(),
        }
    }
}
