//! Error types for backend list-store operations.

use std::time::Duration;

/// Errors returned by a [`ListStore`](crate::ListStore) or
/// [`Connector`](crate::Connector).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend client rejected the call or could not parse the reply.
    ///
    /// The session is in an unknown state afterwards.
    #[error("client error on {host}: {message}")]
    Client {
        /// Host the call was sent to.
        host: String,
        /// What the client reported.
        message: String,
    },

    /// The backend did not answer in time.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// A session to the host could not be established.
    #[error("cannot connect to {host}: {reason}")]
    Connect {
        /// Host we tried to reach.
        host: String,
        /// Why the attempt failed.
        reason: String,
    },

    /// The connection was used after `quit`.
    #[error("connection to {0} is closed")]
    Closed(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}
