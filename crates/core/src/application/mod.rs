// Application Layer - Use Cases and Business Logic

pub mod gateway;
pub mod lock;
pub mod maintenance;
pub mod pipeline;
pub mod queue_manager;
pub mod recovery;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use gateway::{ConnectionGateway, ConnectionRegistry, EventRouter, GatewayConfig, Principal};
pub use lock::{DistributedLock, LockConfig};
pub use maintenance::{MaintenanceConfig, MaintenanceScheduler, MaintenanceStats};
pub use pipeline::{CancellationRegistry, JobPipeline, PipelineConfig};
pub use queue_manager::QueueManager;
pub use recovery::RecoveryService;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use worker::{shutdown_channel, JobExecutor, ShutdownSender, ShutdownToken};
