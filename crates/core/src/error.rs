// Central Error Type for the Application

use thiserror::Error;

use crate::domain::ErrorCode;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Lock acquisition timed out: {0}")]
    LockTimeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compute error: {0}")]
    Compute(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable code surfaced to clients
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::ValidationError,
            AppError::Domain(crate::domain::DomainError::ValidationError(_))
            | AppError::Domain(crate::domain::DomainError::InvalidPriority(_)) => {
                ErrorCode::ValidationError
            }
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            AppError::RateLimited(_) => ErrorCode::RateLimited,
            AppError::Store(_) | AppError::LockTimeout(_) => ErrorCode::StoreUnavailable,
            AppError::Compute(_) => ErrorCode::PipelineFailed,
            _ => ErrorCode::InternalError,
        }
    }

    /// Message safe to show a client (internal details stay in the logs)
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::PermissionDenied(msg)
            | AppError::RateLimited(msg) => msg.clone(),
            AppError::Domain(crate::domain::DomainError::ValidationError(msg)) => msg.clone(),
            AppError::Domain(crate::domain::DomainError::InvalidPriority(p)) => {
                format!("Invalid priority: {}", p)
            }
            AppError::Store(_) | AppError::LockTimeout(_) => {
                "Queue temporarily unavailable".to_string()
            }
            AppError::Compute(_) => "Job failed".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_hide_details() {
        let err = AppError::Store("connection refused to 10.0.0.3:6379".into());
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert!(!err.public_message().contains("10.0.0.3"));
    }

    #[test]
    fn test_permission_denied_is_surfaced() {
        let err = AppError::PermissionDenied("Priority changes require elevated access".into());
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert!(err.public_message().contains("elevated"));
    }

    #[test]
    fn test_domain_validation_maps_to_validation_code() {
        let err: AppError = crate::domain::DomainError::InvalidPriority(500).into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }
}
