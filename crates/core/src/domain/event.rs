// Client Wire Events
//
// Inbound and outbound messages are tagged by `type` ("queue.join", "job.progress", ...)

use serde::{Deserialize, Serialize};

use crate::domain::error::ErrorCode;
use crate::domain::job::{Priority, RequestId, SocketId};
use crate::domain::pipeline::ScoredCandidate;
use crate::domain::queue::QueueStatus;

/// Client -> server requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum InboundEvent {
    #[serde(rename = "queue.join")]
    QueueJoin {
        request_id: RequestId,
        #[serde(default)]
        priority: Priority,
    },

    #[serde(rename = "queue.leave")]
    QueueLeave { request_id: RequestId },

    #[serde(rename = "queue.status")]
    QueueStatus { request_id: RequestId },

    #[serde(rename = "queue.priority")]
    QueuePriority {
        request_id: RequestId,
        priority: Priority,
    },

    /// Everything besides `requestId` is opaque domain input
    #[serde(rename = "job.start")]
    JobStart {
        request_id: RequestId,
        #[serde(flatten)]
        inputs: serde_json::Map<String, serde_json::Value>,
    },

    #[serde(rename = "job.cancel")]
    JobCancel { request_id: RequestId },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::QueueJoin { .. } => "queue.join",
            InboundEvent::QueueLeave { .. } => "queue.leave",
            InboundEvent::QueueStatus { .. } => "queue.status",
            InboundEvent::QueuePriority { .. } => "queue.priority",
            InboundEvent::JobStart { .. } => "job.start",
            InboundEvent::JobCancel { .. } => "job.cancel",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            InboundEvent::QueueJoin { request_id, .. }
            | InboundEvent::QueueLeave { request_id }
            | InboundEvent::QueueStatus { request_id }
            | InboundEvent::QueuePriority { request_id, .. }
            | InboundEvent::JobStart { request_id, .. }
            | InboundEvent::JobCancel { request_id } => request_id,
        }
    }
}

/// Server -> client pushes and replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum OutboundEvent {
    #[serde(rename = "session.opened")]
    SessionOpened { socket_id: SocketId },

    #[serde(rename = "queue.joined")]
    QueueJoined {
        #[serde(flatten)]
        status: QueueStatus,
    },

    #[serde(rename = "queue.left")]
    QueueLeft { request_id: RequestId },

    #[serde(rename = "queue.status")]
    QueueStatus {
        #[serde(flatten)]
        status: QueueStatus,
    },

    /// Sent once, when the scheduler picks the job
    #[serde(rename = "queue.ready")]
    QueueReady {
        request_id: RequestId,
        message: String,
    },

    #[serde(rename = "queue.priority-updated")]
    QueuePriorityUpdated {
        request_id: RequestId,
        priority: Priority,
    },

    #[serde(rename = "queue.error")]
    QueueError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
        code: ErrorCode,
        error: String,
    },

    #[serde(rename = "job.started")]
    JobStarted {
        request_id: RequestId,
        /// false when the run was launched immediately, bypassing the queue
        queued: bool,
    },

    #[serde(rename = "job.progress")]
    JobProgress {
        request_id: RequestId,
        step: usize,
        total_steps: usize,
        name: String,
        progress: u8,
        message: String,
        estimated_time_remaining: u64,
    },

    #[serde(rename = "job.complete")]
    JobComplete {
        request_id: RequestId,
        results: Vec<ScoredCandidate>,
        total_generated: usize,
        processing_time_ms: u64,
        used_fallback: bool,
    },

    #[serde(rename = "job.error")]
    JobError {
        request_id: RequestId,
        error: String,
        code: ErrorCode,
    },

    #[serde(rename = "job.cancelled")]
    JobCancelled { request_id: RequestId },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SessionOpened { .. } => "session.opened",
            OutboundEvent::QueueJoined { .. } => "queue.joined",
            OutboundEvent::QueueLeft { .. } => "queue.left",
            OutboundEvent::QueueStatus { .. } => "queue.status",
            OutboundEvent::QueueReady { .. } => "queue.ready",
            OutboundEvent::QueuePriorityUpdated { .. } => "queue.priority-updated",
            OutboundEvent::QueueError { .. } => "queue.error",
            OutboundEvent::JobStarted { .. } => "job.started",
            OutboundEvent::JobProgress { .. } => "job.progress",
            OutboundEvent::JobComplete { .. } => "job.complete",
            OutboundEvent::JobError { .. } => "job.error",
            OutboundEvent::JobCancelled { .. } => "job.cancelled",
        }
    }

    /// Terminal events end a pipeline run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboundEvent::JobComplete { .. }
                | OutboundEvent::JobError { .. }
                | OutboundEvent::JobCancelled { .. }
        )
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundEvent::SessionOpened { .. } => None,
            OutboundEvent::QueueJoined { status } | OutboundEvent::QueueStatus { status } => {
                Some(&status.request_id)
            }
            OutboundEvent::QueueError { request_id, .. } => request_id.as_deref(),
            OutboundEvent::QueueLeft { request_id }
            | OutboundEvent::QueueReady { request_id, .. }
            | OutboundEvent::QueuePriorityUpdated { request_id, .. }
            | OutboundEvent::JobStarted { request_id, .. }
            | OutboundEvent::JobProgress { request_id, .. }
            | OutboundEvent::JobComplete { request_id, .. }
            | OutboundEvent::JobError { request_id, .. }
            | OutboundEvent::JobCancelled { request_id } => Some(request_id),
        }
    }
}
