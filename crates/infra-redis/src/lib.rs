// Turnstile Infrastructure - Redis Adapter
// Implements: SharedStateStore

mod error;
mod state_store;

pub use error::map_redis_error;
pub use state_store::RedisStateStore;

// Note: redis::RedisError conversion is handled by a helper function
// due to Rust's orphan rules (cannot implement From<RedisError> for AppError here)
