// Domain Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid priority: {0}")]
    InvalidPriority(i32),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Stable error code carried by every user-visible failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    PermissionDenied,
    RateLimited,
    StoreUnavailable,
    PipelineFailed,
    JobLost,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::PipelineFailed => "PIPELINE_FAILED",
            ErrorCode::JobLost => "JOB_LOST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// JSON-RPC error code (4000s: caller errors, 5000s: server errors)
    pub fn rpc_code(&self) -> i32 {
        match self {
            ErrorCode::ValidationError => 4000,
            ErrorCode::PermissionDenied => 4003,
            ErrorCode::NotFound => 4004,
            ErrorCode::RateLimited => 4029,
            ErrorCode::InternalError => 5000,
            ErrorCode::PipelineFailed => 5001,
            ErrorCode::JobLost => 5002,
            ErrorCode::StoreUnavailable => 5003,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
