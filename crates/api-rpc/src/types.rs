//! RPC Request/Response Types
//!
//! Method parameters are named objects in camelCase.

use serde::{Deserialize, Serialize};
use turnstile_core::domain::{InboundEvent, JobResult, SocketId};

/// session.open - Subscribe to the pushes of a new connection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOpenRequest {
    pub owner_id: String,
    /// Matching the server's admin token grants priority-lane access
    #[serde(default)]
    pub admin_token: Option<String>,
}

/// session.send - One inbound client event
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSendRequest {
    pub socket_id: SocketId,
    pub event: InboundEvent,
}

/// session.history - Recent results of the connection's owner
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub socket_id: SocketId,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

fn default_history_limit() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub results: Vec<JobResult>,
}

/// admin.status - Status of one request (read-only)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatusRequest {
    pub request_id: String,
}

/// admin.metrics - No parameters needed
#[derive(Debug, Default, Deserialize)]
pub struct MetricsRequest {}

/// admin.capacity - Change fleet-wide capacity
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRequest {
    pub admin_token: String,
    pub capacity: u32,
}

/// admin.cleanup - Remove stale waiting entries
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    pub admin_token: String,
    /// Defaults to the server's configured maximum age
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed: u64,
    pub max_age_secs: u64,
}

/// admin.reset_metrics - Reset the moving average and completion count
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetMetricsRequest {
    pub admin_token: String,
}

/// Acknowledgement of an admin mutation
#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_carries_tagged_event() {
        let req: SessionSendRequest = serde_json::from_value(serde_json::json!({
            "socketId": "s1",
            "event": {"type": "queue.priority", "requestId": "r1", "priority": 10}
        }))
        .unwrap();

        assert_eq!(req.socket_id, "s1");
        assert_eq!(
            req.event,
            InboundEvent::QueuePriority {
                request_id: "r1".to_string(),
                priority: 10
            }
        );
    }

    #[test]
    fn test_history_limit_defaults() {
        let req: HistoryRequest =
            serde_json::from_value(serde_json::json!({"socketId": "s1"})).unwrap();
        assert_eq!(req.limit, 20);
    }

    #[test]
    fn test_cleanup_age_is_optional() {
        let req: CleanupRequest =
            serde_json::from_value(serde_json::json!({"adminToken": "t"})).unwrap();
        assert_eq!(req.max_age_secs, None);
    }
}
