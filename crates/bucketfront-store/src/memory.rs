//! In-memory object store.
//!
//! Used by tests and by a dev origin started without a mounted bucket.
//! Entity tags are the quoted hex MD5 of the body, the same form a real
//! bucket reports for objects uploaded in one piece.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use md5::{Digest, Md5};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::object::{ByteStream, ObjectMetadata, ObjectStore, validate_key};

/// Bodies are streamed out in chunks of this size.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

/// Thread-safe map of objects.
///
/// # Examples
///
/// ```
/// use bucketfront_store::{MemoryStore, ObjectStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// let meta = store.put("site/index.html", "<h1>hi</h1>", "text/html");
/// assert_eq!(meta.size, 11);
/// assert!(meta.etag.starts_with('"'));
///
/// let found = store.metadata("site/index.html").await.unwrap();
/// assert_eq!(found.etag, meta.etag);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<String, StoredObject>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, stamping it with the current time.
    pub fn put(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: &str,
    ) -> ObjectMetadata {
        self.put_with_modified(key, data, content_type, Utc::now())
    }

    /// Store an object with an explicit modification time.
    ///
    /// The time is truncated to whole seconds, as HTTP dates are.
    pub fn put_with_modified(
        &self,
        key: impl Into<String>,
        data: impl Into<Bytes>,
        content_type: &str,
        last_modified: DateTime<Utc>,
    ) -> ObjectMetadata {
        let key = key.into();
        let data = data.into();
        let metadata = ObjectMetadata {
            key: key.clone(),
            etag: format!("\"{}\"", hex::encode(Md5::digest(&data))),
            last_modified: last_modified.trunc_subsecs(0),
            content_type: content_type.to_owned(),
            size: data.len() as u64,
        };

        trace!(key, size = metadata.size, "stored object");
        self.objects.insert(
            key,
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        metadata
    }

    /// Remove an object. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.objects.remove(key).is_some()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn get(&self, key: &str) -> StoreResult<StoredObject> {
        validate_key(key)?;
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_owned(),
            })
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn metadata(&self, key: &str) -> StoreResult<ObjectMetadata> {
        self.get(key).map(|object| object.metadata)
    }

    async fn read_stream(&self, key: &str) -> StoreResult<ByteStream> {
        let data = self.get(key)?.data;
        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..data.len().min(start + CHUNK_SIZE))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use futures::TryStreamExt;

    use super::*;

    async fn read_all(store: &MemoryStore, key: &str) -> Vec<u8> {
        let chunks: Vec<Bytes> = store
            .read_stream(key)
            .await
            .unwrap_or_else(|e| panic!("read_stream failed: {e}"))
            .try_collect()
            .await
            .unwrap_or_else(|e| panic!("stream failed: {e}"));
        chunks.concat()
    }

    #[tokio::test]
    async fn test_should_store_and_describe_object() {
        let store = MemoryStore::new();
        let modified = Utc
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        store.put_with_modified("t/s/a.css", "body{}", "text/css", modified);

        let meta = store
            .metadata("t/s/a.css")
            .await
            .unwrap_or_else(|e| panic!("metadata failed: {e}"));
        assert_eq!(meta.key, "t/s/a.css");
        assert_eq!(meta.size, 6);
        assert_eq!(meta.content_type, "text/css");
        assert_eq!(meta.last_modified, modified);
        assert_eq!(meta.etag.len(), 34);
    }

    #[tokio::test]
    async fn test_should_report_missing_and_invalid_keys_as_not_found() {
        let store = MemoryStore::new();
        let missing = store.metadata("t/s/missing.html").await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));

        let invalid = store.metadata("t/s/../x").await;
        assert!(matches!(invalid, Err(StoreError::InvalidKey { .. })));
        assert!(store.read_stream("t/s/missing.html").await.is_err());
    }

    #[tokio::test]
    async fn test_should_stream_large_objects_in_chunks() {
        let store = MemoryStore::new();
        let data = vec![7_u8; CHUNK_SIZE * 2 + 10];
        store.put("t/s/app.wasm", data.clone(), "application/wasm");

        let chunks: Vec<Bytes> = store
            .read_stream("t/s/app.wasm")
            .await
            .unwrap_or_else(|e| panic!("read_stream failed: {e}"))
            .try_collect()
            .await
            .unwrap_or_else(|e| panic!("stream failed: {e}"));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_should_stream_empty_object() {
        let store = MemoryStore::new();
        store.put("t/s/empty.txt", Bytes::new(), "text/plain");
        assert!(read_all(&store, "t/s/empty.txt").await.is_empty());
    }

    #[tokio::test]
    async fn test_should_replace_and_remove_objects() {
        let store = MemoryStore::new();
        let first = store.put("t/s/a.txt", "one", "text/plain");
        let second = store.put("t/s/a.txt", "two", "text/plain");
        assert_ne!(first.etag, second.etag);
        assert_eq!(read_all(&store, "t/s/a.txt").await, b"two");
        assert_eq!(store.len(), 1);

        assert!(store.remove("t/s/a.txt"));
        assert!(!store.remove("t/s/a.txt"));
        assert!(store.is_empty());
    }
}
