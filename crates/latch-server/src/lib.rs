//! # latch-server
//!
//! Axum HTTP + WebSocket server for the Latch access-control relay.
//!
//! - [`handlers`]: card and scan endpoints; each successful write publishes a
//!   change event through the [`PublishGateway`]
//! - [`websocket`]: one relay worker per viewer, forwarding every event
//!   published while it is active, plus keep-alive pings
//! - [`server::LatchServer`]: router, listener, and graceful shutdown

#![deny(unsafe_code)]

pub mod gateway;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use gateway::{PublishError, PublishGateway};
pub use server::{AppState, LatchServer, ServerError, ServerHandle};
pub use shutdown::ShutdownCoordinator;
