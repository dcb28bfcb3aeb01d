//! Timeline service tying the Skein storage tier together.
//!
//! The [`TimelineService`] resolves keys to replica sets through a
//! [`ShardResolver`], fans writes out as per-shard [`Job`]s on the
//! [`JobScheduler`], and serves reads from the replicas, rebuilding any
//! replica that has fallen behind its peers first.

pub mod error;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod shard;

pub use error::EngineError;
pub use resolver::{ReplicaRing, ShardResolver};
pub use scheduler::{DispatchReport, Job, JobOp, JobScheduler};
pub use service::TimelineService;
pub use shard::{TimelineLen, TimelineShard};

#[cfg(test)]
mod tests;
