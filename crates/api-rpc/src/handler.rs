//! RPC Method Handlers
//!
//! Session methods forward to the ConnectionGateway; admin methods go
//! straight to the QueueManager.

use crate::error::{rate_limited, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    AckResponse, AdminStatusRequest, CapacityRequest, CleanupRequest, CleanupResponse,
    HistoryRequest, HistoryResponse, MetricsRequest, ResetMetricsRequest, SessionOpenRequest,
    SessionSendRequest,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use turnstile_core::application::{ConnectionGateway, Principal, QueueManager};
use turnstile_core::domain::{OutboundEvent, QueueMetrics, QueueStatus, SocketId};
use turnstile_core::error::AppError;
use turnstile_core::port::ResultRepository;

/// Limits applied by the handler
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Unset disables every admin mutation
    pub admin_token: Option<String>,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
    /// admin.cleanup default when the caller gives no age
    pub cleanup_max_age_secs: u64,
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    gateway: Arc<ConnectionGateway>,
    queue: Arc<QueueManager>,
    results: Arc<dyn ResultRepository>,
    rate_limiter: RateLimiter,
    admin_token: Option<String>,
    cleanup_max_age_secs: u64,
}

impl RpcHandler {
    pub fn new(
        gateway: Arc<ConnectionGateway>,
        queue: Arc<QueueManager>,
        results: Arc<dyn ResultRepository>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            gateway,
            queue,
            results,
            rate_limiter: RateLimiter::new(config.rate_limit_burst, config.rate_limit_rate),
            admin_token: config.admin_token.filter(|t| !t.is_empty()),
            cleanup_max_age_secs: config.cleanup_max_age_secs,
        }
    }

    /// session.open
    pub fn open_session(
        &self,
        params: SessionOpenRequest,
    ) -> Result<(SocketId, mpsc::UnboundedReceiver<OutboundEvent>), ErrorObjectOwned> {
        let owner_id = params.owner_id.trim();
        if owner_id.is_empty() {
            return Err(to_rpc_error(AppError::Validation(
                "ownerId must not be empty".to_string(),
            )));
        }

        let principal = match params.admin_token {
            None => Principal::user(owner_id),
            Some(token) if self.token_matches(&token) => Principal::elevated(owner_id),
            Some(_) => {
                warn!(owner_id = %owner_id, "Session opened with a wrong admin token");
                return Err(to_rpc_error(AppError::PermissionDenied(
                    "Invalid admin token".to_string(),
                )));
            }
        };
        Ok(self.gateway.connect(principal))
    }

    /// Subscription ended (client closed or went away)
    pub async fn close_session(&self, socket_id: &str) {
        self.gateway.disconnect(socket_id).await;
    }

    /// session.send
    ///
    /// Gateway failures come back as `queue.error` / `job.error` replies, not
    /// as RPC errors; only throttling is an RPC-level error here.
    pub async fn send(&self, params: SessionSendRequest) -> Result<OutboundEvent, ErrorObjectOwned> {
        if !self.rate_limiter.try_acquire() {
            warn!(socket_id = %params.socket_id, event = params.event.name(), "Event throttled");
            return Err(rate_limited());
        }
        Ok(self.gateway.handle(&params.socket_id, params.event).await)
    }

    /// session.history
    pub async fn history(&self, params: HistoryRequest) -> Result<HistoryResponse, ErrorObjectOwned> {
        let principal = self.gateway.principal(&params.socket_id).ok_or_else(|| {
            to_rpc_error(AppError::NotFound(format!(
                "Unknown connection {}",
                params.socket_id
            )))
        })?;
        let results = self
            .results
            .find_by_owner(&principal.owner_id, params.limit)
            .await
            .map_err(to_rpc_error)?;
        Ok(HistoryResponse { results })
    }

    /// admin.metrics
    pub async fn metrics(&self, _params: MetricsRequest) -> Result<QueueMetrics, ErrorObjectOwned> {
        self.queue.metrics().await.map_err(to_rpc_error)
    }

    /// admin.status
    pub async fn status(&self, params: AdminStatusRequest) -> Result<QueueStatus, ErrorObjectOwned> {
        self.queue.status(&params.request_id).await.map_err(to_rpc_error)
    }

    /// admin.capacity
    pub async fn capacity(&self, params: CapacityRequest) -> Result<AckResponse, ErrorObjectOwned> {
        self.authorize(&params.admin_token)?;
        self.queue
            .adjust_capacity(params.capacity)
            .await
            .map_err(to_rpc_error)?;
        info!(capacity = params.capacity, "Capacity changed via admin API");
        Ok(AckResponse { ok: true })
    }

    /// admin.cleanup
    pub async fn cleanup(&self, params: CleanupRequest) -> Result<CleanupResponse, ErrorObjectOwned> {
        self.authorize(&params.admin_token)?;
        let max_age_secs = params.max_age_secs.unwrap_or(self.cleanup_max_age_secs);
        let removed = self.queue.cleanup(max_age_secs).await.map_err(to_rpc_error)?;
        info!(removed, max_age_secs, "Cleanup run via admin API");
        Ok(CleanupResponse {
            removed,
            max_age_secs,
        })
    }

    /// admin.reset_metrics
    pub async fn reset_metrics(
        &self,
        params: ResetMetricsRequest,
    ) -> Result<AckResponse, ErrorObjectOwned> {
        self.authorize(&params.admin_token)?;
        self.queue.reset_metrics().await.map_err(to_rpc_error)?;
        info!("Metrics reset via admin API");
        Ok(AckResponse { ok: true })
    }

    fn authorize(&self, token: &str) -> Result<(), ErrorObjectOwned> {
        if self.admin_token.is_none() {
            return Err(to_rpc_error(AppError::PermissionDenied(
                "Admin API is disabled on this server".to_string(),
            )));
        }
        if !self.token_matches(token) {
            return Err(to_rpc_error(AppError::PermissionDenied(
                "Invalid admin token".to_string(),
            )));
        }
        Ok(())
    }

    fn token_matches(&self, candidate: &str) -> bool {
        match &self.admin_token {
            Some(expected) => constant_time_eq(expected.as_bytes(), candidate.as_bytes()),
            None => false,
        }
    }
}

/// Compare without an early exit on the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
