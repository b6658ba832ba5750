//! Turnstile Daemon - Main Entry Point
//!
//! Composition root: wires adapters into the core services, recovers the
//! queue, starts the background loops and serves JSON-RPC until Ctrl+C.

mod config;
mod telemetry;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use config::DaemonConfig;
use turnstile_api_rpc::{RpcServer, RpcServerConfig};
use turnstile_core::application::worker::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use turnstile_core::application::{
    shutdown_channel, CancellationRegistry, ConnectionGateway, ConnectionRegistry, EventRouter,
    GatewayConfig, JobExecutor, JobPipeline, LockConfig, MaintenanceConfig, MaintenanceScheduler,
    PipelineConfig, QueueManager, RecoveryService, Scheduler, SchedulerConfig,
};
use turnstile_core::domain::QueueConfig;
use turnstile_core::port::state_store::memory::InMemoryStateStore;
use turnstile_core::port::{
    CandidateGenerator, IdProvider, ResultRepository, SharedStateStore, SystemTimeProvider,
    TimeProvider, UuidProvider,
};
use turnstile_infra_compute::{HeuristicEvaluator, HttpCandidateGenerator, RuleBasedGenerator};
use turnstile_infra_redis::RedisStateStore;
use turnstile_infra_sqlite::{create_pool, run_migrations, SqliteResultRepository};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let config = DaemonConfig::from_env().context("invalid configuration")?;
    let _log_guard = telemetry::init_logging(config.log_format, config.log_dir.as_deref())?;

    info!(version = VERSION, queue = %config.queue_name, "Turnstile daemon starting");

    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);

    // 2. Shared state store
    let store: Arc<dyn SharedStateStore> = match &config.redis_url {
        Some(url) => {
            let redis = RedisStateStore::connect(url)
                .await
                .context("Redis connection failed")?;
            redis.ping().await.context("Redis ping failed")?;
            Arc::new(redis)
        }
        None => {
            warn!("TURNSTILE_REDIS_URL not set: single-node mode on the in-process store");
            Arc::new(InMemoryStateStore::new())
        }
    };

    // 3. Result database
    ensure_parent_dir(&config.db_path)?;
    info!(db_path = %config.db_path, "Opening result database");
    let pool = create_pool(&config.database_url())
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;
    let results: Arc<dyn ResultRepository> = Arc::new(SqliteResultRepository::new(pool.clone()));

    // 4. Core services (DI wiring)
    let queue = Arc::new(QueueManager::new(
        store.clone(),
        QueueConfig::new(&config.queue_name, config.default_capacity),
        LockConfig::default(),
        time_provider.clone(),
        id_provider.clone(),
    ));

    let primary: Option<Arc<dyn CandidateGenerator>> = match &config.primary_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Primary compute path enabled");
            let generator = HttpCandidateGenerator::new(endpoint.as_str(), config.primary_timeout)
                .context("primary generator setup failed")?;
            Some(Arc::new(generator))
        }
        None => {
            info!("TURNSTILE_PRIMARY_ENDPOINT not set: every job uses the rule-based generator");
            None
        }
    };
    let pipeline = Arc::new(JobPipeline::new(
        primary,
        Arc::new(RuleBasedGenerator::new()),
        Arc::new(HeuristicEvaluator::new()),
        results.clone(),
        time_provider.clone(),
        PipelineConfig {
            primary_timeout: config.primary_timeout,
            candidate_target: config.candidate_target,
            ..PipelineConfig::default()
        },
    ));

    let router = Arc::new(EventRouter::new(
        store.clone(),
        queue.keys().events.clone(),
        Arc::new(ConnectionRegistry::new()),
        Arc::new(CancellationRegistry::new()),
    ));
    let executor = Arc::new(JobExecutor::new(
        queue.clone(),
        pipeline,
        router.clone(),
    ));

    // 5. Crash recovery (before any loop touches the queue)
    let lost = RecoveryService::new(queue.clone(), router.clone())
        .recover()
        .await
        .context("Queue initialization failed")?;
    info!(lost_jobs = lost, "Queue recovered");

    // 6. Background loops
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let relay_handle: JoinHandle<()> = {
        let router = router.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = router.run_relay(shutdown).await {
                error!(error = %e, "Event relay stopped");
            }
        })
    };

    let scheduler = Scheduler::new(
        queue.clone(),
        executor.clone(),
        router.clone(),
        SchedulerConfig {
            tick_interval: config.tick_interval,
        },
    );
    let scheduler_handle: JoinHandle<()> = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run(shutdown).await {
                error!(error = %e, "Scheduler failed");
            }
        })
    };

    let maintenance = MaintenanceScheduler::new(
        queue.clone(),
        results.clone(),
        time_provider.clone(),
        MaintenanceConfig {
            interval: config.cleanup_interval,
            max_queue_age_secs: config.cleanup_max_age_secs,
            result_retention_days: config.result_retention_days,
        },
    );
    let maintenance_handle: JoinHandle<()> = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { maintenance.run(shutdown).await })
    };

    // 7. JSON-RPC server
    let gateway = Arc::new(ConnectionGateway::new(
        queue.clone(),
        executor.clone(),
        router,
        time_provider,
        id_provider,
        GatewayConfig {
            immediate_execution: config.immediate_execution,
        },
    ));
    if config.admin_token.is_none() {
        warn!("TURNSTILE_ADMIN_TOKEN not set: admin mutations and the priority lane are disabled");
    }
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            host: config.rpc_host.clone(),
            port: config.rpc_port,
            admin_token: config.admin_token.clone(),
            rate_limit_burst: config.rate_limit_burst,
            rate_limit_rate: config.rate_limit_rate,
            cleanup_max_age_secs: config.cleanup_max_age_secs,
        },
        gateway,
        queue,
        results,
    );
    let (rpc_handle, rpc_addr) = rpc_server.start().await.context("RPC server start failed")?;

    info!(
        addr = %rpc_addr,
        immediate_execution = config.immediate_execution,
        "System ready. Press Ctrl+C to shut down"
    );

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop intake, stop loops, let runs finish
    if let Err(e) = rpc_handle.stop() {
        warn!(error = %e, "RPC server already stopped");
    }
    shutdown_tx.shutdown();

    for (name, handle) in [
        ("scheduler", scheduler_handle),
        ("maintenance", maintenance_handle),
        ("relay", relay_handle),
    ] {
        if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, handle)
            .await
            .is_err()
        {
            warn!(task = name, "Background loop did not stop in time");
        }
    }

    if !executor.drain(GRACEFUL_SHUTDOWN_TIMEOUT).await {
        warn!(
            in_flight = executor.in_flight(),
            "Shutting down with jobs still running; they will be reported lost on next start"
        );
    }

    pool.close().await;
    info!("Shutdown complete.");
    Ok(())
}

/// SQLite creates the file but not its directory
fn ensure_parent_dir(db_path: &str) -> Result<()> {
    if db_path.starts_with("sqlite:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create database directory {}", parent.display()))?;
        }
    }
    Ok(())
}
