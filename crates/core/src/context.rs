use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// Per-request execution context handed unchanged to every adapter call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Organization / namespace scope of the request.
    pub namespace: String,
    pub request_id: Uuid,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), request_id: Uuid::new_v4(), cancel: CancellationToken::new() }
    }

    /// Bind the request to a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken { &self.cancel }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Returns `Err(Cancelled)` once the request has been cancelled.
    pub fn check(&self) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        Ok(())
    }
}

impl Default for RequestContext {
    fn default() -> Self { Self::new("default") }
}
