//! Error types and failure classification for pooled operations.

use std::time::Duration;

use skein_store::StoreError;

/// How a failed backend call is treated by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session is presumed corrupted: record, discard the connection.
    ConnectionFault,
    /// The call was slow: record, keep the connection.
    Timeout,
    /// Anything else: record, keep the connection.
    Unclassified,
}

/// Map a backend error onto the failure policy it triggers.
pub fn classify(error: &StoreError) -> FailureKind {
    match error {
        StoreError::Client { .. }
        | StoreError::Connect { .. }
        | StoreError::Closed(_)
        | StoreError::Io(_) => FailureKind::ConnectionFault,
        StoreError::Timeout(_) => FailureKind::Timeout,
        StoreError::Backend(_) => FailureKind::Unclassified,
    }
}

/// Errors returned by [`ConnectionPool`](crate::ConnectionPool) and
/// [`OperationExecutor`](crate::OperationExecutor).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The host (or its connection) is known-bad; the call was not attempted.
    ///
    /// Treat as an unreachable destination, not a transient error. Not
    /// counted as a new failure.
    #[error("host {host} is disabled")]
    BlackHole {
        /// The disabled host.
        host: String,
    },

    /// No connection could be opened to the host.
    #[error("cannot connect to {host}: {source}")]
    Connect {
        /// Host we tried to reach.
        host: String,
        /// Underlying connector error.
        source: StoreError,
    },

    /// The backend client rejected the call; the connection was discarded.
    #[error("connection fault on {host}: {source}")]
    ConnectionFault {
        /// Host the call ran against.
        host: String,
        /// Underlying backend error.
        source: StoreError,
    },

    /// The call did not finish in time; the connection was kept.
    #[error("call to {host} timed out after {after:?}")]
    Timeout {
        /// Host the call ran against.
        host: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// Any other failure; the connection was kept.
    #[error("call to {host} failed: {source}")]
    Unclassified {
        /// Host the call ran against.
        host: String,
        /// Underlying backend error.
        source: StoreError,
    },
}

impl PoolError {
    /// Host the failed call was aimed at.
    pub fn host(&self) -> &str {
        match self {
            Self::BlackHole { host }
            | Self::Connect { host, .. }
            | Self::ConnectionFault { host, .. }
            | Self::Timeout { host, .. }
            | Self::Unclassified { host, .. } => host,
        }
    }

    /// Whether this is the fail-fast circuit-open signal.
    pub fn is_black_hole(&self) -> bool {
        matches!(self, Self::BlackHole { .. })
    }
}
