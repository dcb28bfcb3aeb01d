//! A pooled session to one backend host.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use skein_store::{ConnectionParams, ListStore, StoreError};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// One long-lived session to a backend host.
///
/// Shared by every caller working against the host. Concurrent calls are
/// bounded by the pipeline depth the connection was created with.
pub struct Connection {
    id: u64,
    host: String,
    params: ConnectionParams,
    client: Arc<dyn ListStore>,
    /// Failures since the last success on this connection.
    errors: AtomicU32,
    pipeline: Semaphore,
}

impl Connection {
    /// Wrap a freshly opened backend session.
    pub fn new(
        id: u64,
        host: impl Into<String>,
        params: ConnectionParams,
        client: Arc<dyn ListStore>,
    ) -> Self {
        Self {
            id,
            host: host.into(),
            params,
            client,
            errors: AtomicU32::new(0),
            pipeline: Semaphore::new(params.pipeline.max(1) as usize),
        }
    }

    /// Pool-unique identifier, distinct for every connection ever opened.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Host this connection talks to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Parameters the connection was opened with.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// The backend session.
    pub fn store(&self) -> &dyn ListStore {
        self.client.as_ref()
    }

    /// Failures recorded since the last success.
    pub fn error_count(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    /// Whether the backend session still considers itself usable.
    pub fn is_alive(&self) -> bool {
        !self.pipeline.is_closed() && self.client.is_alive()
    }

    pub(crate) fn record_error(&self) -> u32 {
        self.errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn reset_errors(&self) {
        self.errors.store(0, Ordering::Release);
    }

    /// Wait for a free pipeline slot.
    pub(crate) async fn pipeline_slot(&self) -> Result<SemaphorePermit<'_>, StoreError> {
        self.pipeline
            .acquire()
            .await
            .map_err(|_| StoreError::Closed(self.host.clone()))
    }

    /// Close the pipeline and quit the backend session.
    ///
    /// Callers waiting for a pipeline slot fail with [`StoreError::Closed`].
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.pipeline.close();
        debug!(host = %self.host, id = self.id, "shutting down connection");
        self.client.quit().await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("errors", &self.error_count())
            .finish_non_exhaustive()
    }
}
