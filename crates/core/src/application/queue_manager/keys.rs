// Store key layout of one queue

use crate::domain::Lane;

/// Keys under the `{name}:` prefix
#[derive(Debug, Clone)]
pub struct QueueKeys {
    name: String,
    pub priority: String,
    pub normal: String,
    /// Admission time (seconds) of every waiting entry, both lanes
    pub admitted: String,
    pub processing: String,
    /// capacity / average_processing_time / total_processed
    pub meta: String,
    /// Pub/sub channel for cross-process event routing
    pub events: String,
}

impl QueueKeys {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            priority: format!("{}:priority", name),
            normal: format!("{}:normal", name),
            admitted: format!("{}:admitted", name),
            processing: format!("{}:processing", name),
            meta: format!("{}:meta", name),
            events: format!("{}:events", name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane(&self, lane: Lane) -> &str {
        match lane {
            Lane::Priority => &self.priority,
            Lane::Normal => &self.normal,
        }
    }

    /// Per-request metadata hash
    pub fn job(&self, request_id: &str) -> String {
        format!("{}:job:{}", self.name, request_id)
    }
}

// Hash fields
pub const FIELD_REQUEST: &str = "request";
pub const FIELD_OWNER: &str = "owner_id";
pub const FIELD_CAPACITY: &str = "capacity";
pub const FIELD_AVERAGE: &str = "average_processing_time";
pub const FIELD_TOTAL: &str = "total_processed";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_share_queue_prefix() {
        let keys = QueueKeys::new("names");
        assert_eq!(keys.lane(Lane::Priority), "names:priority");
        assert_eq!(keys.lane(Lane::Normal), "names:normal");
        assert_eq!(keys.job("r1"), "names:job:r1");
        assert_eq!(keys.events, "names:events");
    }
}
