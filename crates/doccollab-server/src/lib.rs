//! # doccollab-server
//!
//! Axum HTTP + WebSocket server for real-time collaborative document
//! sessions.
//!
//! - HTTP endpoints: health check, Prometheus metrics
//! - WebSocket gateway: one task per connection, in-connection bearer-token
//!   auth, per-document rooms, broadcast relay with persist-then-publish
//! - Graceful shutdown via `tokio::signal` + `CancellationToken`
//!
//! The external collaborators (access oracle, content store) are injected as
//! trait objects; reference implementations live in [`providers`].

#![deny(unsafe_code)]

pub mod config;
pub mod logging;
pub mod metrics;
pub mod providers;
pub mod server;
pub mod shutdown;
pub mod ws;
