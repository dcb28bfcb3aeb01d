//! Anti-entropy replica rebuild for Skein timelines.
//!
//! This crate provides:
//!
//! - [`RebuildPlan`] — full copy, tail copy or nothing, from two list lengths.
//! - [`AntiEntropyRebuilder`] — carries out a plan between two replicas
//!   through the [`OperationExecutor`](skein_pool::OperationExecutor).

pub mod error;
pub mod plan;
pub mod rebuilder;

pub use error::RepairError;
pub use plan::RebuildPlan;
pub use rebuilder::{AntiEntropyRebuilder, RebuildOutcome};
