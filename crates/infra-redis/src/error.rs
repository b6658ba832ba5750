// redis::RedisError -> AppError

use redis::ErrorKind;
use turnstile_core::error::AppError;

/// Every Redis failure surfaces as a store error; the kind is kept for the logs
pub fn map_redis_error(err: redis::RedisError) -> AppError {
    let detail = match err.kind() {
        ErrorKind::IoError => "connection failed",
        ErrorKind::AuthenticationFailed => "authentication failed",
        ErrorKind::TypeError => "unexpected response type",
        ErrorKind::ResponseError | ErrorKind::ExtensionError => "command rejected",
        ErrorKind::BusyLoadingError | ErrorKind::TryAgain => "server busy",
        _ => "request failed",
    };
    AppError::Store(format!("redis {}: {}", detail, err))
}
