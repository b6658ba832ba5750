// Admission validation

use crate::application::worker::constants::{
    MAX_CAPACITY, MAX_METADATA_DEPTH, MAX_PRIORITY, MAX_REQUEST_ID_LEN,
};
use crate::domain::{DomainError, JobRequest, Priority};
use crate::error::{AppError, Result};

pub fn validate_request_id(request_id: &str) -> Result<()> {
    if request_id.is_empty() {
        return Err(AppError::Validation("requestId must not be empty".to_string()));
    }
    if request_id.len() > MAX_REQUEST_ID_LEN {
        return Err(AppError::Validation(format!(
            "requestId longer than {} characters",
            MAX_REQUEST_ID_LEN
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':');
    if !request_id.chars().all(allowed) {
        return Err(AppError::Validation(
            "requestId may only contain letters, digits, '_', '-', '.' and ':'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_priority(priority: Priority) -> Result<()> {
    if !(0..=MAX_PRIORITY).contains(&priority) {
        return Err(DomainError::InvalidPriority(priority).into());
    }
    Ok(())
}

pub fn validate_capacity(capacity: u32) -> Result<()> {
    if !(1..=MAX_CAPACITY).contains(&capacity) {
        return Err(AppError::Validation(format!(
            "capacity must be between 1 and {}",
            MAX_CAPACITY
        )));
    }
    Ok(())
}

/// Checks run before a request touches shared state
pub fn validate_request(job: &JobRequest) -> Result<()> {
    validate_request_id(&job.request_id)?;
    if job.owner_id.trim().is_empty() {
        return Err(AppError::Validation("ownerId must not be empty".to_string()));
    }
    validate_priority(job.priority)?;
    if job.metadata.depth() > MAX_METADATA_DEPTH {
        return Err(AppError::Validation(format!(
            "metadata nested deeper than {} levels",
            MAX_METADATA_DEPTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobMetadata;

    #[test]
    fn test_request_id_rules() {
        assert!(validate_request_id("job-1.a:b_c").is_ok());
        assert!(validate_request_id("").is_err());
        assert!(validate_request_id("has space").is_err());
        assert!(validate_request_id("semi;colon").is_err());
        assert!(validate_request_id(&"x".repeat(MAX_REQUEST_ID_LEN)).is_ok());
        assert!(validate_request_id(&"x".repeat(MAX_REQUEST_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_priority_bounds() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(MAX_PRIORITY).is_ok());
        assert!(validate_priority(-1).is_err());
        assert!(validate_priority(MAX_PRIORITY + 1).is_err());
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(validate_capacity(0).is_err());
        assert!(validate_capacity(1).is_ok());
        assert!(validate_capacity(MAX_CAPACITY).is_ok());
        assert!(validate_capacity(MAX_CAPACITY + 1).is_err());
    }

    #[test]
    fn test_request_rejects_blank_owner_and_deep_metadata() {
        let job = JobRequest::new("r1", " ", 0);
        assert!(validate_request(&job).is_err());

        let mut deep = serde_json::json!(1);
        for _ in 0..MAX_METADATA_DEPTH {
            deep = serde_json::json!([deep]);
        }
        let job = JobRequest::new("r1", "u1", 0).with_metadata(JobMetadata::new(deep));
        assert!(validate_request(&job).is_err());
    }
}
