//! WebSocket connection management, fan-out hub, heartbeat and session loops.

pub mod connection;
pub mod heartbeat;
pub mod hub;
pub mod session;
