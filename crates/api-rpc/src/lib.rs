//! JSON-RPC API Layer
//!
//! Carries the client event protocol and the admin API over JSON-RPC 2.0.
//! Clients open a `session.open` subscription (WebSocket) to receive pushes
//! and send inbound events with `session.send`.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerConfig};
