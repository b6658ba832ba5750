// Turnstile Infrastructure - SQLite Adapter
// Implements: ResultRepository

mod connection;
mod error;
mod migration;
mod result_repository;

pub use connection::create_pool;
pub use error::map_sqlx_error;
pub use migration::run_migrations;
pub use result_repository::SqliteResultRepository;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
