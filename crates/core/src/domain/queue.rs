// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::job::RequestId;

/// Queue identifier (also the key prefix in the shared store)
pub type QueueId = String;

/// Smoothing factor of the processing-time moving average
pub const PROCESSING_TIME_SMOOTHING: f64 = 0.2;

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: QueueId,
    /// Capacity written on first start when none is persisted yet
    pub default_capacity: u32,
    /// Average processing time assumed before any job completes
    pub default_average_processing_secs: f64,
    /// TTL of per-request metadata (session-scoped)
    pub session_ttl: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, default_capacity: u32) -> Self {
        Self {
            name: name.into(),
            default_capacity,
            ..Self::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        use crate::application::worker::constants::{
            DEFAULT_AVERAGE_PROCESSING_SECS, DEFAULT_CAPACITY, DEFAULT_QUEUE_NAME, SESSION_TTL,
        };
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            default_capacity: DEFAULT_CAPACITY,
            default_average_processing_secs: DEFAULT_AVERAGE_PROCESSING_SECS,
            session_ttl: SESSION_TTL,
        }
    }
}

/// Where a request currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Waiting,
    /// Waiting, but at a position that fits in the free slots
    Ready,
    Processing,
    NotInQueue,
}

/// Status of a single request, as pushed to its client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub request_id: RequestId,
    pub status: QueueState,
    /// 1-based effective position; 0 while processing, -1 when absent
    pub position: i64,
    pub total_in_queue: u64,
    /// Estimated wait in seconds
    pub estimated_time: u64,
}

impl QueueStatus {
    pub fn not_in_queue(request_id: impl Into<String>, total_in_queue: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status: QueueState::NotInQueue,
            position: -1,
            total_in_queue,
            estimated_time: 0,
        }
    }

    pub fn processing(request_id: impl Into<String>, total_in_queue: u64) -> Self {
        Self {
            request_id: request_id.into(),
            status: QueueState::Processing,
            position: 0,
            total_in_queue,
            estimated_time: 0,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self.status, QueueState::Waiting | QueueState::Ready)
    }
}

/// Persisted rolling aggregates (capacity included)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetrics {
    pub capacity: u32,
    pub average_processing_time: f64,
    pub total_processed: u64,
}

impl StoredMetrics {
    /// Fold a completed job's processing time into the moving average
    pub fn record_completion(&mut self, elapsed_secs: f64) {
        self.average_processing_time = if self.total_processed == 0 {
            elapsed_secs
        } else {
            self.average_processing_time * (1.0 - PROCESSING_TIME_SMOOTHING)
                + elapsed_secs * PROCESSING_TIME_SMOOTHING
        };
        self.total_processed += 1;
    }

    /// `ceil(position / capacity) × averageProcessingTime`, in whole seconds
    pub fn estimate_wait_secs(&self, position: u64) -> u64 {
        let capacity = self.capacity.max(1) as f64;
        ((position as f64 / capacity).ceil() * self.average_processing_time).round() as u64
    }
}

/// Fleet-wide queue metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub priority_waiting: u64,
    pub normal_waiting: u64,
    pub processing: u64,
    pub capacity: u32,
    pub average_processing_time: f64,
    pub total_processed: u64,
}

impl QueueMetrics {
    pub fn total_waiting(&self) -> u64 {
        self.priority_waiting + self.normal_waiting
    }
}
