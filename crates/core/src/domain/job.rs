// Job Request Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Caller-supplied request identifier (idempotency key)
pub type RequestId = String;

/// Identity of the submitting user
pub type OwnerId = String;

/// Identifier of a client connection
pub type SocketId = String;

/// Priority (higher number = served earlier, 0 = normal lane)
pub type Priority = i32;

/// Score offset applied per priority point in the priority lane.
///
/// Large enough that any positive priority outranks every normal admission
/// time, and a higher priority outranks a lower one admitted up to ~11 days earlier.
pub const PRIORITY_SCORE_WEIGHT: f64 = 1_000_000.0;

/// Opaque domain inputs carried by a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobMetadata(serde_json::Value);

impl JobMetadata {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Nesting depth of the JSON value (scalars count as 1)
    pub fn depth(&self) -> usize {
        fn depth_of(value: &serde_json::Value) -> usize {
            match value {
                serde_json::Value::Array(items) => {
                    1 + items.iter().map(depth_of).max().unwrap_or(0)
                }
                serde_json::Value::Object(map) => {
                    1 + map.values().map(depth_of).max().unwrap_or(0)
                }
                _ => 1,
            }
        }
        depth_of(&self.0)
    }
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for JobMetadata {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(serde_json::Value::Object(map))
    }
}

/// One of the two ordered sub-queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Priority,
    Normal,
}

impl Lane {
    pub fn for_priority(priority: Priority) -> Self {
        if priority > 0 {
            Lane::Priority
        } else {
            Lane::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Priority => "priority",
            Lane::Normal => "normal",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sorted-set score for an admission (lower dequeues first)
pub fn lane_score(submitted_at_millis: i64, priority: Priority) -> f64 {
    let admitted_secs = submitted_at_millis as f64 / 1000.0;
    match Lane::for_priority(priority) {
        Lane::Priority => admitted_secs - priority as f64 * PRIORITY_SCORE_WEIGHT,
        Lane::Normal => admitted_secs,
    }
}

/// Job Request Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub request_id: RequestId,
    pub owner_id: OwnerId,
    pub socket_id: Option<SocketId>,
    pub priority: Priority,

    pub submitted_at: i64, // epoch ms
    pub estimated_processing_time_secs: u64,
    pub metadata: JobMetadata,

    pub processing_started_at: Option<i64>, // epoch ms, stamped on dequeue
}

impl JobRequest {
    /// Create a new request
    ///
    /// # Arguments
    ///
    /// * `request_id` - Caller-supplied idempotency key
    /// * `owner_id` - Submitting user
    /// * `submitted_at` - Admission timestamp in epoch ms (injected, not system time)
    pub fn new(
        request_id: impl Into<String>,
        owner_id: impl Into<String>,
        submitted_at: i64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            owner_id: owner_id.into(),
            socket_id: None,
            priority: 0,
            submitted_at,
            estimated_processing_time_secs: 0,
            metadata: JobMetadata::default(),
            processing_started_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_estimate(mut self, secs: u64) -> Self {
        self.estimated_processing_time_secs = secs;
        self
    }

    pub fn lane(&self) -> Lane {
        Lane::for_priority(self.priority)
    }

    pub fn score(&self) -> f64 {
        lane_score(self.submitted_at, self.priority)
    }

    /// Admission time in seconds (the age reference for stale cleanup)
    pub fn admitted_secs(&self) -> f64 {
        self.submitted_at as f64 / 1000.0
    }

    /// Stamp the dequeue time (only once)
    pub fn mark_processing(&mut self, now_millis: i64) -> Result<()> {
        if self.processing_started_at.is_some() {
            return Err(DomainError::InvalidStateTransition {
                from: "PROCESSING".to_string(),
                to: "PROCESSING".to_string(),
            });
        }
        self.processing_started_at = Some(now_millis);
        Ok(())
    }

    /// Seconds spent processing so far, if the job was dequeued
    pub fn elapsed_secs(&self, now_millis: i64) -> Option<f64> {
        self.processing_started_at
            .map(|started| (now_millis - started).max(0) as f64 / 1000.0)
    }
}
