// Port Layer - Interfaces for external dependencies

pub mod event_sink;
pub mod generator;
pub mod id_provider; // For deterministic testing
pub mod result_repository;
pub mod state_store;
pub mod time_provider;

// Re-exports
pub use event_sink::EventSink;
pub use generator::{CandidateEvaluator, CandidateGenerator};
pub use id_provider::{IdProvider, UuidProvider};
pub use result_repository::ResultRepository;
pub use state_store::SharedStateStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
