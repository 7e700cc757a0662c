//! # relay-server
//!
//! Axum HTTP + `WebSocket` broadcast hub.
//!
//! - `WebSocket` gateway: upgrade, per-connection reader/writer tasks, heartbeat
//! - [`websocket::hub::Hub`]: single actor owning membership and fan-out;
//!   slow receivers are evicted instead of back-pressuring the broadcaster
//! - HTTP endpoints: home page, health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod home;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
