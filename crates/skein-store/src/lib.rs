//! Backend list-store trait and implementations.
//!
//! This crate defines the [`ListStore`] trait (the list operations a backend
//! key-value engine offers to one session) and the [`Connector`] trait that
//! opens sessions, along with:
//!
//! - [`MemoryListStore`] / [`MemoryBackend`] — an in-memory engine with list
//!   semantics and key expiration, one keyspace per host.
//! - [`FaultyStore`] / [`FaultyConnector`] — wrappers that inject latency and
//!   failures for chaos testing.

mod error;
mod faulty_store;
mod memory_store;
mod traits;

pub use error::StoreError;
pub use faulty_store::{Fault, FaultyConnector, FaultyStore};
pub use memory_store::{MemoryBackend, MemoryListStore, MemorySession};
pub use traits::{ConnectionParams, Connector, ListStore};
