// Queue and pipeline constants (No magic values)
use std::time::Duration;

/// Queue name (and store key prefix) when none is configured
pub const DEFAULT_QUEUE_NAME: &str = "turnstile";

/// Concurrent runs allowed fleet-wide before any capacity is persisted
pub const DEFAULT_CAPACITY: u32 = 2;

/// Upper bound accepted by adjust_capacity
pub const MAX_CAPACITY: u32 = 100;

/// Highest priority a caller may request (0 = normal lane)
pub const MAX_PRIORITY: i32 = 100;

/// Average processing time assumed before the first completion (30s)
pub const DEFAULT_AVERAGE_PROCESSING_SECS: f64 = 30.0;

/// TTL of per-request metadata; a request abandoned longer than this is forgotten (1h)
pub const SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Scheduler tick interval (1s)
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep after a failed scheduler tick before the next one is attempted (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Stale-entry cleanup interval (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Waiting entries older than this are removed by cleanup (30 minutes)
pub const DEFAULT_CLEANUP_MAX_AGE_SECS: u64 = 30 * 60;

/// Persisted results older than this are pruned
pub const DEFAULT_RESULT_RETENTION_DAYS: u32 = 30;

/// Lock lease; bounds how long a crashed holder blocks the queue (5s)
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(5);

/// Pause between lock acquisition attempts (25ms)
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Give up acquiring the lock after this long (3s)
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum length of a caller-supplied request ID
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Maximum JSON nesting depth of request metadata
pub const MAX_METADATA_DEPTH: usize = 32;

/// Ranked results kept per job
pub const RESULT_LIMIT: usize = 10;

/// Candidates requested from a generator per job
pub const DEFAULT_CANDIDATE_TARGET: usize = 30;

/// Primary compute call is abandoned (and the fallback used) after this long (60s)
pub const DEFAULT_PRIMARY_TIMEOUT: Duration = Duration::from_secs(60);

/// Bounded wait for in-flight runs during graceful shutdown (5s)
pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a cancel for a run not yet registered is remembered (5s)
pub const PENDING_CANCEL_TTL: Duration = Duration::from_secs(5);
