// Domain Layer - Pure queue and pipeline model

pub mod error;
pub mod event;
pub mod job;
pub mod pipeline;
pub mod queue;

// Re-exports
pub use error::{DomainError, ErrorCode};
pub use event::{InboundEvent, OutboundEvent};
pub use job::{JobMetadata, JobRequest, Lane, OwnerId, Priority, RequestId, SocketId};
pub use pipeline::{
    Candidate, GenerationInput, JobResult, PipelineRun, RunOutcome, RunState, ScoreBreakdown,
    ScoredCandidate,
};
pub use queue::{QueueConfig, QueueId, QueueMetrics, QueueState, QueueStatus, StoredMetrics};
