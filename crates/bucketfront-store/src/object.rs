//! The object store abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::{StoreError, StoreResult};

/// A stream of object body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = StoreResult<Bytes>> + Send>>;

/// What the store knows about an object without reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Full object key within the bucket.
    pub key: String,
    /// Entity tag, quoted.
    pub etag: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Stored content type.
    pub content_type: String,
    /// Body length in bytes.
    pub size: u64,
}

/// Read-only access to one bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Look up an object's metadata.
    ///
    /// Returns [`StoreError::NotFound`] when the object does not exist.
    async fn metadata(&self, key: &str) -> StoreResult<ObjectMetadata>;

    /// Open the object body as a stream of chunks.
    async fn read_stream(&self, key: &str) -> StoreResult<ByteStream>;
}

/// Reject keys that could never name an object or that escape the bucket.
///
/// ```
/// use bucketfront_store::validate_key;
///
/// assert!(validate_key("tenant/site/index.html").is_ok());
/// assert!(validate_key("tenant/site/../../etc/passwd").is_err());
/// assert!(validate_key("a//b").is_err());
/// ```
pub fn validate_key(key: &str) -> StoreResult<()> {
    let invalid = key.is_empty()
        || key.contains(['\0', '\\'])
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StoreError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}
