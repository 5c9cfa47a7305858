//! # latch-store
//!
//! `SQLite`-backed record store holding the set of valid card identifiers
//! and a bounded, newest-first scan history.

#![deny(unsafe_code)]

pub mod errors;
pub mod store;

pub use errors::{Result, StoreError};
pub use store::AccessStore;
