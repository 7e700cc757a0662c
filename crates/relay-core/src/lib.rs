//! # relay-core
//!
//! Shared vocabulary for the relay workspace:
//!
//! - **IDs**: [`ConnectionId`] newtype identifying one client session
//! - **Errors**: [`RelayError`] taxonomy via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{RelayError, Result};
pub use ids::ConnectionId;
