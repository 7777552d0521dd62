//! The edge object store.
//!
//! Holds complete `200` responses for large binary requests. Bodies up to the
//! memory threshold are kept as [`Bytes`]; larger ones are written to temp
//! files as they arrive. A file is removed when the last reference to its
//! entry is dropped, so a body being streamed to a client survives its own
//! eviction.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream;
use http::{HeaderMap, Method};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::body::BodyStream;

/// Chunk size used when streaming a spilled body back.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Chunks a writer may queue before it gives up on storing the body.
const WRITER_QUEUE_DEPTH: usize = 64;

/// The store key for a request: method, URL and `Accept-Encoding`.
///
/// ```
/// use bucketfront_http::edge::cache_key;
/// use http::Method;
///
/// assert_eq!(
///     cache_key(&Method::GET, "site.gen.dev/app.wasm", Some("gzip")),
///     "GET site.gen.dev/app.wasm gzip"
/// );
/// ```
#[must_use]
pub fn cache_key(method: &Method, url: &str, accept_encoding: Option<&str>) -> String {
    format!("{method} {url} {}", accept_encoding.unwrap_or_default())
}

/// Body storage: in memory or in a temp file.
enum StoredData {
    InMemory { data: Bytes },
    OnDisk { path: PathBuf, size: u64 },
}

impl fmt::Debug for StoredData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory { data } => f
                .debug_struct("InMemory")
                .field("size", &data.len())
                .finish(),
            Self::OnDisk { path, size } => f
                .debug_struct("OnDisk")
                .field("path", path)
                .field("size", size)
                .finish(),
        }
    }
}

impl Drop for StoredData {
    fn drop(&mut self) {
        if let Self::OnDisk { path, .. } = self {
            if let Err(e) = std::fs::remove_file(path.as_path()) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove temp file");
                }
            } else {
                trace!(path = %path.display(), "removed temp file");
            }
        }
    }
}

impl StoredData {
    fn size(&self) -> u64 {
        match self {
            Self::InMemory { data } => data.len() as u64,
            Self::OnDisk { size, .. } => *size,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    headers: HeaderMap,
    data: StoredData,
    expires_at: Instant,
}

/// A stored response ready to be replayed.
pub struct CachedResponse {
    /// Normalized response headers as they were stored.
    pub headers: HeaderMap,
    /// Body length in bytes.
    pub size: u64,
    /// The body.
    pub body: BodyStream,
}

impl fmt::Debug for CachedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResponse")
            .field("headers", &self.headers)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Thread-safe store of edge responses with spillover to disk.
pub struct EdgeCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    memory_threshold: usize,
    max_object_size: u64,
}

impl fmt::Debug for EdgeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeCache")
            .field("entries", &self.entries.len())
            .field("memory_threshold", &self.memory_threshold)
            .field("max_object_size", &self.max_object_size)
            .finish()
    }
}

impl EdgeCache {
    /// Create a store. Bodies above `memory_threshold` bytes go to disk and
    /// bodies above `max_object_size` are refused.
    #[must_use]
    pub fn new(memory_threshold: usize, max_object_size: u64) -> Self {
        debug!(memory_threshold, max_object_size, "creating edge cache");
        Self {
            entries: DashMap::new(),
            memory_threshold,
            max_object_size,
        }
    }

    /// Largest body the store accepts.
    #[must_use]
    pub fn max_object_size(&self) -> u64 {
        self.max_object_size
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a fresh entry. Expired entries are removed on the way.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;

        if entry.expires_at <= Instant::now() {
            debug!(key, "edge entry expired");
            self.entries
                .remove_if(key, |_, current| Arc::ptr_eq(current, &entry));
            return None;
        }

        let body = match open_body(Arc::clone(&entry)).await {
            Ok(body) => body,
            Err(e) => {
                warn!(key, error = %e, "failed to open stored body, evicting");
                self.entries.remove(key);
                return None;
            }
        };

        Some(CachedResponse {
            headers: entry.headers.clone(),
            size: entry.data.size(),
            body,
        })
    }

    /// Store a complete response body for `max_age`. Returns whether it was
    /// stored.
    pub async fn insert(&self, key: String, headers: HeaderMap, body: Bytes, max_age: Duration) -> bool {
        let size = body.len() as u64;
        if size > self.max_object_size {
            debug!(key, size, "body too large for the edge cache");
            return false;
        }
        let Some(expires_at) = expiry(&key, max_age) else {
            return false;
        };

        let mut pending = PendingBody::default();
        let data = match pending.append(&body, self.memory_threshold).await {
            Ok(()) => pending.finish().await,
            Err(e) => Err(e),
        };
        match data {
            Ok(data) => {
                self.commit(key, headers, data, expires_at);
                true
            }
            Err(e) => {
                warn!(key, error = %e, "failed to spill body to disk");
                false
            }
        }
    }

    /// Start storing a body that is still arriving.
    ///
    /// Chunks fed to the returned [`EdgeWriter`] are written by a background
    /// task: in memory up to the memory threshold, then appended to a temp
    /// file. The entry becomes visible once `expected` bytes (or, without a
    /// known length, the end of the body) have been written. A writer dropped
    /// before that discards everything it wrote.
    ///
    /// Returns `None` when the response cannot be stored at all.
    #[must_use]
    pub fn writer(
        self: &Arc<Self>,
        key: String,
        headers: HeaderMap,
        max_age: Duration,
        expected: Option<u64>,
    ) -> Option<EdgeWriter> {
        if expected.is_some_and(|size| size > self.max_object_size) {
            debug!(key, ?expected, "body too large for the edge cache");
            return None;
        }
        let expires_at = expiry(&key, max_age)?;

        let (tx, rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
        tokio::spawn(run_writer(
            Arc::clone(self),
            key.clone(),
            headers,
            expires_at,
            rx,
        ));

        Some(EdgeWriter {
            key,
            tx,
            written: 0,
            expected,
            limit: self.max_object_size,
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    fn commit(&self, key: String, headers: HeaderMap, data: StoredData, expires_at: Instant) {
        trace!(key, size = data.size(), "stored edge entry");
        self.entries.insert(
            key,
            Arc::new(CacheEntry {
                headers,
                data,
                expires_at,
            }),
        );
    }
}

/// When an entry stored now for `max_age` expires, if it can be stored.
fn expiry(key: &str, max_age: Duration) -> Option<Instant> {
    if max_age.is_zero() {
        debug!(key, "not storing response without a lifetime");
        return None;
    }
    let expires_at = Instant::now().checked_add(max_age);
    if expires_at.is_none() {
        debug!(key, ?max_age, "lifetime out of range, not storing");
    }
    expires_at
}

/// What the writer task is told.
#[derive(Debug)]
enum WriteEvent {
    Chunk(Bytes),
    Finish,
}

/// Where a [`EdgeWriter::write`] call left the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// More bytes are expected.
    Pending,
    /// All expected bytes have been written and the entry is being stored.
    Complete,
    /// The body will not be stored.
    Abandoned,
}

/// Feeds a body to the edge store while it streams to the client.
#[derive(Debug)]
pub struct EdgeWriter {
    key: String,
    tx: mpsc::Sender<WriteEvent>,
    written: u64,
    expected: Option<u64>,
    limit: u64,
}

impl EdgeWriter {
    /// Feed the next chunk.
    ///
    /// The writer never waits: if the background task falls behind, the body
    /// is abandoned rather than slowing the client down.
    pub fn write(&mut self, chunk: &Bytes) -> WriteProgress {
        let written = self.written + chunk.len() as u64;
        if written > self.limit || self.expected.is_some_and(|expected| written > expected) {
            debug!(key = %self.key, written, "body exceeds edge cache limit, not storing");
            return WriteProgress::Abandoned;
        }
        if self.tx.try_send(WriteEvent::Chunk(chunk.clone())).is_err() {
            debug!(key = %self.key, "edge store writer fell behind, not storing");
            return WriteProgress::Abandoned;
        }
        self.written = written;

        if self.expected == Some(written) {
            self.finish_unchecked();
            WriteProgress::Complete
        } else {
            WriteProgress::Pending
        }
    }

    /// The body ended. Stores it unless fewer bytes than expected arrived.
    pub fn finish(self) {
        match self.expected {
            Some(expected) if expected != self.written => {
                debug!(key = %self.key, expected, written = self.written, "body truncated, not storing");
            }
            _ => self.finish_unchecked(),
        }
    }

    fn finish_unchecked(&self) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(WriteEvent::Finish) {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
        }
    }
}

/// Write queued chunks and commit the entry once told the body is complete.
async fn run_writer(
    cache: Arc<EdgeCache>,
    key: String,
    headers: HeaderMap,
    expires_at: Instant,
    mut rx: mpsc::Receiver<WriteEvent>,
) {
    let mut pending = PendingBody::default();
    while let Some(event) = rx.recv().await {
        match event {
            WriteEvent::Chunk(chunk) => {
                if let Err(e) = pending.append(&chunk, cache.memory_threshold).await {
                    warn!(key, error = %e, "failed to spill body to disk");
                    return;
                }
            }
            WriteEvent::Finish => {
                match pending.finish().await {
                    Ok(data) => {
                        cache.commit(key, headers, data, expires_at);
                    }
                    Err(e) => warn!(key, error = %e, "failed to finish spilled body"),
                }
                return;
            }
        }
    }
    debug!(key, "body incomplete, discarding");
}

/// A body being assembled: buffered until it crosses the memory threshold,
/// then appended to a temp file. Dropping it removes the temp file.
enum PendingBody {
    Memory(BytesMut),
    Disk { file: File, data: StoredData },
}

impl Default for PendingBody {
    fn default() -> Self {
        Self::Memory(BytesMut::new())
    }
}

impl PendingBody {
    async fn append(&mut self, chunk: &[u8], memory_threshold: usize) -> io::Result<()> {
        if let Self::Memory(buf) = self {
            if buf.len() + chunk.len() <= memory_threshold {
                buf.extend_from_slice(chunk);
                return Ok(());
            }
            let buffered = std::mem::take(buf);
            let (file, data) = create_spill_file()?;
            *self = Self::Disk {
                file: File::from_std(file),
                data,
            };
            self.write_to_disk(&buffered).await?;
        }
        self.write_to_disk(chunk).await
    }

    async fn write_to_disk(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Self::Disk { file, data } = self {
            file.write_all(bytes).await?;
            if let StoredData::OnDisk { size, .. } = data {
                *size += bytes.len() as u64;
            }
        }
        Ok(())
    }

    async fn finish(self) -> io::Result<StoredData> {
        match self {
            Self::Memory(buf) => Ok(StoredData::InMemory {
                data: buf.freeze(),
            }),
            Self::Disk { mut file, data } => {
                file.flush().await?;
                if let StoredData::OnDisk { path, size } = &data {
                    trace!(path = %path.display(), size, "spilled body to disk");
                }
                Ok(data)
            }
        }
    }
}

/// Create a temp file that outlives its handle. The returned [`StoredData`]
/// owns the path and removes the file when dropped.
fn create_spill_file() -> io::Result<(std::fs::File, StoredData)> {
    let temp = tempfile::NamedTempFile::new()?;
    let (file, path) = temp.keep().map_err(|e| e.error)?;
    Ok((file, StoredData::OnDisk { path, size: 0 }))
}

/// Open the entry's body as a stream. The stream holds the entry, which
/// keeps a spilled file alive until the body has been read.
async fn open_body(entry: Arc<CacheEntry>) -> io::Result<BodyStream> {
    let path = match &entry.data {
        StoredData::InMemory { data } => {
            let data = data.clone();
            return Ok(Box::pin(stream::once(async move { Ok(data) })));
        }
        StoredData::OnDisk { path, .. } => path.clone(),
    };

    let file = tokio::fs::File::open(&path).await?;
    Ok(Box::pin(stream::try_unfold(
        (file, entry),
        |(mut file, entry)| async move {
            let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
            let read = file.read_buf(&mut buf).await?;
            if read == 0 {
                return Ok(None);
            }
            Ok(Some((buf.freeze(), (file, entry))))
        },
    )))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use http::HeaderValue;

    use super::*;

    fn headers() -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("content-type", HeaderValue::from_static("application/wasm"));
        map
    }

    async fn read(response: CachedResponse) -> Bytes {
        let chunks: Vec<Bytes> = response
            .body
            .try_collect()
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        chunks.concat().into()
    }

    #[tokio::test]
    async fn test_should_store_small_bodies_in_memory() {
        let cache = EdgeCache::new(1024, 4096);
        assert!(
            cache
                .insert("k".into(), headers(), Bytes::from("wasm"), Duration::from_secs(60))
                .await
        );

        let hit = cache.get("k").await.unwrap_or_else(|| panic!("expected hit"));
        assert_eq!(hit.size, 4);
        assert_eq!(hit.headers["content-type"], "application/wasm");
        assert_eq!(read(hit).await, Bytes::from("wasm"));
    }

    #[tokio::test]
    async fn test_should_spill_large_bodies_to_disk() {
        let cache = EdgeCache::new(16, 1 << 20);
        let body = Bytes::from(vec![7_u8; 200_000]);
        assert!(
            cache
                .insert("big".into(), headers(), body.clone(), Duration::from_secs(60))
                .await
        );

        let entry = cache
            .entries
            .get("big")
            .map(|e| Arc::clone(e.value()))
            .unwrap_or_else(|| panic!("entry missing"));
        let StoredData::OnDisk { path, .. } = &entry.data else {
            panic!("expected spilled entry");
        };
        let path = path.clone();
        assert!(path.exists());
        drop(entry);

        let hit = cache.get("big").await.unwrap_or_else(|| panic!("expected hit"));
        // Evicting while a reader holds the entry keeps the file until the
        // body is consumed.
        cache.entries.remove("big");
        assert!(path.exists());
        assert_eq!(read(hit).await, body);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_should_refuse_oversized_bodies() {
        let cache = EdgeCache::new(16, 8);
        assert!(
            !cache
                .insert("k".into(), headers(), Bytes::from("too large!"), Duration::from_secs(60))
                .await
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_should_expire_entries() {
        let cache = EdgeCache::new(1024, 4096);
        cache
            .insert("k".into(), headers(), Bytes::from("x"), Duration::from_millis(20))
            .await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_should_purge_expired_entries() {
        let cache = EdgeCache::new(1024, 4096);
        cache
            .insert("old".into(), headers(), Bytes::from("x"), Duration::from_millis(10))
            .await;
        cache
            .insert("new".into(), headers(), Bytes::from("y"), Duration::from_secs(60))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    async fn wait_for_len(cache: &EdgeCache, len: usize) -> bool {
        for _ in 0..100 {
            if cache.len() == len {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cache.len() == len
    }

    #[tokio::test]
    async fn test_should_store_once_expected_length_is_written() {
        let cache = Arc::new(EdgeCache::new(1024, 4096));
        let mut writer = cache
            .writer("k".into(), headers(), Duration::from_secs(60), Some(4))
            .unwrap_or_else(|| panic!("expected writer"));

        assert_eq!(writer.write(&Bytes::from("ab")), WriteProgress::Pending);
        assert_eq!(writer.write(&Bytes::from("cd")), WriteProgress::Complete);
        // The body is complete without the stream ever reporting its end.
        drop(writer);

        assert!(wait_for_len(&cache, 1).await);
        let hit = cache.get("k").await.unwrap_or_else(|| panic!("expected hit"));
        assert_eq!(read(hit).await, Bytes::from("abcd"));
    }

    #[tokio::test]
    async fn test_should_discard_unfinished_bodies() {
        let cache = Arc::new(EdgeCache::new(4, 4096));
        let mut writer = cache
            .writer("k".into(), headers(), Duration::from_secs(60), Some(100))
            .unwrap_or_else(|| panic!("expected writer"));
        assert_eq!(writer.write(&Bytes::from("partial body")), WriteProgress::Pending);
        drop(writer);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.is_empty());

        let mut writer = cache
            .writer("short".into(), headers(), Duration::from_secs(60), Some(10))
            .unwrap_or_else(|| panic!("expected writer"));
        writer.write(&Bytes::from("abc"));
        writer.finish();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_should_spill_to_disk_while_writing() {
        let cache = Arc::new(EdgeCache::new(8, 1 << 20));
        let mut writer = cache
            .writer("big".into(), headers(), Duration::from_secs(60), None)
            .unwrap_or_else(|| panic!("expected writer"));
        for _ in 0..4 {
            assert_eq!(writer.write(&Bytes::from("0123456")), WriteProgress::Pending);
        }
        writer.finish();

        assert!(wait_for_len(&cache, 1).await);
        let entry = cache
            .entries
            .get("big")
            .map(|e| Arc::clone(e.value()))
            .unwrap_or_else(|| panic!("entry missing"));
        assert!(matches!(entry.data, StoredData::OnDisk { size: 28, .. }));
        drop(entry);

        let hit = cache.get("big").await.unwrap_or_else(|| panic!("expected hit"));
        assert_eq!(read(hit).await, Bytes::from("0123456".repeat(4)));
    }

    #[tokio::test]
    async fn test_should_abandon_bodies_over_limit_while_writing() {
        let cache = Arc::new(EdgeCache::new(1024, 4));
        assert!(
            cache
                .writer("k".into(), headers(), Duration::from_secs(60), Some(5))
                .is_none()
        );

        let mut writer = cache
            .writer("k".into(), headers(), Duration::from_secs(60), None)
            .unwrap_or_else(|| panic!("expected writer"));
        assert_eq!(writer.write(&Bytes::from("abc")), WriteProgress::Pending);
        assert_eq!(writer.write(&Bytes::from("def")), WriteProgress::Abandoned);
    }

    #[tokio::test]
    async fn test_should_refuse_lifetimes_out_of_range() {
        let cache = Arc::new(EdgeCache::new(1024, 4096));
        let forever = Duration::from_secs(u64::MAX);
        assert!(
            !cache
                .insert("k".into(), headers(), Bytes::from("x"), forever)
                .await
        );
        assert!(cache.writer("k".into(), headers(), forever, Some(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_should_key_on_encoding() {
        assert_ne!(
            cache_key(&Method::GET, "h/app.wasm", Some("gzip")),
            cache_key(&Method::GET, "h/app.wasm", Some("br"))
        );
        assert_eq!(cache_key(&Method::GET, "h/a", None), "GET h/a ");
    }
}
