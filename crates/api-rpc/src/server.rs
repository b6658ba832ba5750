//! JSON-RPC Server
//!
//! One port serves HTTP (admin and one-shot calls) and WebSocket (sessions).

use crate::handler::{HandlerConfig, RpcHandler};
use crate::types::{
    AdminStatusRequest, CapacityRequest, CleanupRequest, HistoryRequest, MetricsRequest,
    ResetMetricsRequest, SessionOpenRequest, SessionSendRequest,
};
use jsonrpsee::core::SubscriptionResult;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::{PendingSubscriptionSink, RpcModule, SubscriptionMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use turnstile_core::application::{ConnectionGateway, QueueManager};
use turnstile_core::error::{AppError, Result};
use turnstile_core::port::ResultRepository;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;
const DEFAULT_RATE_LIMIT_BURST: u32 = 200;
const DEFAULT_RATE_LIMIT_RATE: u32 = 100;
const DEFAULT_CLEANUP_MAX_AGE_SECS: u64 = 30 * 60;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
    pub admin_token: Option<String>,
    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
    pub cleanup_max_age_secs: u64,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            admin_token: None,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            rate_limit_rate: DEFAULT_RATE_LIMIT_RATE,
            cleanup_max_age_secs: DEFAULT_CLEANUP_MAX_AGE_SECS,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    host: String,
    port: u16,
    handler: RpcHandler,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        gateway: Arc<ConnectionGateway>,
        queue: Arc<QueueManager>,
        results: Arc<dyn ResultRepository>,
    ) -> Self {
        let handler = RpcHandler::new(
            gateway,
            queue,
            results,
            HandlerConfig {
                admin_token: config.admin_token,
                rate_limit_burst: config.rate_limit_burst,
                rate_limit_rate: config.rate_limit_rate,
                cleanup_max_age_secs: config.cleanup_max_age_secs,
            },
        );
        Self {
            host: config.host,
            port: config.port,
            handler,
        }
    }

    /// Bind and start serving; returns the handle and the bound address
    pub async fn start(self) -> Result<(ServerHandle, SocketAddr)> {
        let addr = format!("{}:{}", self.host, self.port);
        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| AppError::Config(format!("RPC server has no local address: {}", e)))?;

        let module = self.into_module()?;
        let handle = server.start(module);
        info!(addr = %local_addr, "JSON-RPC server started (HTTP + WebSocket)");
        Ok((handle, local_addr))
    }

    fn into_module(self) -> Result<RpcModule<RpcHandler>> {
        let mut module = RpcModule::new(self.handler);

        module
            .register_subscription(
                "session.open",
                "session.event",
                "session.close",
                |params, pending, handler, _| async move {
                    let request: SessionOpenRequest = match params.parse() {
                        Ok(request) => request,
                        Err(e) => {
                            pending.reject(e).await;
                            return SubscriptionResult::Ok(());
                        }
                    };
                    run_session(handler, request, pending).await;
                    SubscriptionResult::Ok(())
                },
            )
            .map_err(register_error)?;

        module
            .register_async_method("session.send", |params, handler, _| async move {
                let request: SessionSendRequest = params.parse()?;
                handler.send(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("session.history", |params, handler, _| async move {
                let request: HistoryRequest = params.parse()?;
                handler.history(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("admin.metrics", |params, handler, _| async move {
                let request: MetricsRequest = params.parse().unwrap_or_default();
                handler.metrics(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("admin.status", |params, handler, _| async move {
                let request: AdminStatusRequest = params.parse()?;
                handler.status(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("admin.capacity", |params, handler, _| async move {
                let request: CapacityRequest = params.parse()?;
                handler.capacity(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("admin.cleanup", |params, handler, _| async move {
                let request: CleanupRequest = params.parse()?;
                handler.cleanup(request).await
            })
            .map_err(register_error)?;

        module
            .register_async_method("admin.reset_metrics", |params, handler, _| async move {
                let request: ResetMetricsRequest = params.parse()?;
                handler.reset_metrics(request).await
            })
            .map_err(register_error)?;

        Ok(module)
    }
}

/// Pump gateway pushes into the subscription until either side goes away
async fn run_session(
    handler: Arc<RpcHandler>,
    request: SessionOpenRequest,
    pending: PendingSubscriptionSink,
) {
    let (socket_id, mut events) = match handler.open_session(request) {
        Ok(session) => session,
        Err(e) => {
            pending.reject(e).await;
            return;
        }
    };
    let sink = match pending.accept().await {
        Ok(sink) => sink,
        Err(_) => {
            debug!(socket_id = %socket_id, "Client left before the session was accepted");
            handler.close_session(&socket_id).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let message = match SubscriptionMessage::from_json(&event) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(socket_id = %socket_id, event = event.name(), error = %e, "Failed to encode push");
                        continue;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            _ = sink.closed() => break,
        }
    }

    handler.close_session(&socket_id).await;
}

fn register_error(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Failed to register RPC method: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::application::{
        CancellationRegistry, ConnectionRegistry, EventRouter, GatewayConfig, JobExecutor,
        JobPipeline, LockConfig, PipelineConfig,
    };
    use turnstile_core::domain::QueueConfig;
    use turnstile_core::port::generator::mocks::{MockEvaluator, ScriptedGenerator};
    use turnstile_core::port::result_repository::mocks::RecordingResultRepository;
    use turnstile_core::port::state_store::memory::InMemoryStateStore;
    use turnstile_core::port::{SystemTimeProvider, UuidProvider};

    fn server() -> RpcServer {
        let store = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(SystemTimeProvider);
        let queue = Arc::new(QueueManager::new(
            store.clone(),
            QueueConfig::default(),
            LockConfig::default(),
            clock.clone(),
            Arc::new(UuidProvider),
        ));
        let results = Arc::new(RecordingResultRepository::new());
        let pipeline = Arc::new(JobPipeline::new(
            None,
            Arc::new(ScriptedGenerator::returning("rules", &["a"])),
            Arc::new(MockEvaluator::new(0.5)),
            results.clone(),
            clock.clone(),
            PipelineConfig::default(),
        ));
        let router = Arc::new(EventRouter::new(
            store,
            "test:events",
            Arc::new(ConnectionRegistry::new()),
            Arc::new(CancellationRegistry::new()),
        ));
        let executor = Arc::new(JobExecutor::new(queue.clone(), pipeline, router.clone()));
        let gateway = Arc::new(ConnectionGateway::new(
            queue.clone(),
            executor,
            router,
            clock,
            Arc::new(UuidProvider),
            GatewayConfig::default(),
        ));
        RpcServer::new(RpcServerConfig::default(), gateway, queue, results)
    }

    #[test]
    fn test_all_methods_registered() {
        let module = server().into_module().unwrap();
        let names: Vec<&str> = module.method_names().collect();

        for method in [
            "session.open",
            "session.close",
            "session.send",
            "session.history",
            "admin.metrics",
            "admin.status",
            "admin.capacity",
            "admin.cleanup",
            "admin.reset_metrics",
        ] {
            assert!(names.contains(&method), "missing {}", method);
        }
    }

    #[tokio::test]
    async fn test_starts_on_ephemeral_port() {
        let mut srv = server();
        srv.port = 0;
        let (handle, addr) = srv.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        handle.stop().unwrap();
    }
}
