//! # latch-core
//!
//! Foundation types shared by every Latch crate:
//!
//! - **Branded IDs**: [`ids::ConnectionId`] as a newtype for type safety
//! - **Change events**: [`events::ChangeEvent`], [`events::EventKind`] and the
//!   [`events::Topic`] they are published on
//! - **Records**: [`scan::ScanEntry`], the scan-history row carried by
//!   `new-scan` events

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
pub mod scan;

pub use events::{ChangeEvent, EventKind, Topic};
pub use ids::ConnectionId;
pub use scan::ScanEntry;
