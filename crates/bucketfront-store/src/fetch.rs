//! Timed access to an [`ObjectStore`].
//!
//! Every store call made while serving a request goes through
//! [`ObjectFetcher`], which bounds it by the configured timeout. Metadata
//! lookups are folded into a [`CandidateOutcome`] so the caller can tell an
//! absent object (try the next candidate) from a failing store (stop).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::object::{ByteStream, ObjectMetadata, ObjectStore};

/// Result of probing one candidate key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// The object exists.
    Found(ObjectMetadata),
    /// The object does not exist (or the key can never exist).
    Absent,
    /// The store failed; the answer is unknown.
    Failed(StoreError),
}

/// Store access with a per-call timeout.
#[derive(Clone)]
pub struct ObjectFetcher {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl std::fmt::Debug for ObjectFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectFetcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ObjectFetcher {
    /// Wrap `store`, bounding each call by `timeout`.
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Look up a candidate key.
    pub async fn probe(&self, key: &str) -> CandidateOutcome {
        match self.timed("metadata", key, self.store.metadata(key)).await {
            Ok(metadata) => CandidateOutcome::Found(metadata),
            Err(e) if e.is_not_found() => CandidateOutcome::Absent,
            Err(e) => {
                warn!(key, error = %e, "metadata lookup failed");
                CandidateOutcome::Failed(e)
            }
        }
    }

    /// Open an object's body.
    ///
    /// Only opening is bounded by the timeout; the returned stream is not.
    pub async fn open(&self, key: &str) -> StoreResult<ByteStream> {
        self.timed("open", key, self.store.read_stream(key)).await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        key: &str,
        call: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(StoreError::Timeout {
                    operation,
                    key: key.to_owned(),
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            })
    }
}
