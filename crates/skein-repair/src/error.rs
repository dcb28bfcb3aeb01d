//! Error types for replica rebuilds.

use skein_types::ShardTarget;

/// Errors that can occur while rebuilding a replica.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// A call against the source or destination failed.
    #[error("pool error: {0}")]
    Pool(#[from] skein_pool::PoolError),

    /// Source and destination name the same replica.
    #[error("cannot rebuild {0} from itself")]
    SameReplica(ShardTarget),
}
