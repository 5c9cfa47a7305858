//! WebSocket relay: connection state, registry, keep-alive, and the
//! per-connection worker.

pub mod connection;
pub mod keepalive;
pub mod registry;
pub mod relay;

pub use connection::{ClientConnection, ConnectionInfo, ConnectionState};
pub use registry::{ConnectionRegistry, RegistryError};
pub use relay::{RelayContext, RelayOutcome, TeardownReason, run_relay};
