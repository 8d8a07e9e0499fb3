//! # herald-server
//!
//! The Herald broadcast server: WebSocket endpoint, HTTP and Redis event
//! ingestion, the HTTP status API and the presence store backends.

pub mod api;
pub mod auth_client;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod subscribers;

pub use config::Config;
pub use server::{run_server, AppState, Herald};
