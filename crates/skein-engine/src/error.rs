//! Error types for the engine.

/// Errors that can occur during timeline operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A pooled call against a shard failed.
    #[error("pool error: {0}")]
    Pool(#[from] skein_pool::PoolError),

    /// Replica rebuild failed.
    #[error("repair error: {0}")]
    Repair(#[from] skein_repair::RepairError),

    /// A stored value could not be decoded.
    #[error("corrupt entry: {0}")]
    Entry(#[from] skein_types::EntryError),

    /// No replica of the timeline could be reached.
    #[error("no replica of {key} is reachable")]
    Unavailable {
        /// The timeline key.
        key: String,
    },

    /// The replica ring was built from an unusable layout.
    #[error("invalid replica layout: {0}")]
    InvalidLayout(String),
}
