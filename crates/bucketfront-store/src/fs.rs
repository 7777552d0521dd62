//! Object store backed by a directory.
//!
//! Serves a bucket that has been mounted or synced to local disk. Object keys
//! map to paths below the root; the entity tag is derived from the file's
//! modification time and size, so it changes whenever the file does.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{ByteStream, ObjectMetadata, ObjectStore, validate_key};

const CHUNK_SIZE: usize = 64 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension to content type table for files without stored metadata.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("html", "text/html; charset=utf-8"),
    ("htm", "text/html; charset=utf-8"),
    ("css", "text/css; charset=utf-8"),
    ("js", "text/javascript; charset=utf-8"),
    ("mjs", "text/javascript; charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("txt", "text/plain; charset=utf-8"),
    ("xml", "application/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("pdf", "application/pdf"),
    ("wasm", "application/wasm"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

/// Guess a content type from a key's extension.
///
/// ```
/// use bucketfront_store::fs::content_type_for;
///
/// assert_eq!(content_type_for("a/app.WASM"), "application/wasm");
/// assert_eq!(content_type_for("a/blob"), "application/octet-stream");
/// ```
#[must_use]
pub fn content_type_for(key: &str) -> &'static str {
    let Some((_, ext)) = key.rsplit('/').next().and_then(|name| name.rsplit_once('.')) else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map_or(DEFAULT_CONTENT_TYPE, |&(_, content_type)| content_type)
}

/// A bucket laid out as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Serve objects from below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "creating FsStore");
        Self { root }
    }

    /// The directory objects are read from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn map_open_error(key: &str, err: &std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            key: key.to_owned(),
        }
    } else {
        StoreError::io(key, err)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn metadata(&self, key: &str) -> StoreResult<ObjectMetadata> {
        let path = self.path_for(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| map_open_error(key, &e))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound {
                key: key.to_owned(),
            });
        }

        let modified = meta.modified().map_err(|e| StoreError::io(key, &e))?;
        let last_modified = DateTime::<Utc>::from(modified).trunc_subsecs(0);
        let size = meta.len();

        Ok(ObjectMetadata {
            key: key.to_owned(),
            etag: format!("\"{:x}-{size:x}\"", last_modified.timestamp()),
            last_modified,
            content_type: content_type_for(key).to_owned(),
            size,
        })
    }

    async fn read_stream(&self, key: &str) -> StoreResult<ByteStream> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_open_error(key, &e))?;

        let stream = futures::stream::try_unfold(
            (file, key.to_owned()),
            |(mut file, key)| async move {
                let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
                let read = file
                    .read_buf(&mut buf)
                    .await
                    .map_err(|e| StoreError::io(&key, &e))?;
                if read == 0 {
                    Ok(None)
                } else {
                    Ok(Some((buf.freeze(), (file, key))))
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::TryStreamExt;

    use super::*;

    fn write(root: &Path, key: &str, data: &[u8]) {
        let path = root.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(path, data).expect("write file");
    }

    #[tokio::test]
    async fn test_should_describe_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "gen.dev/site/index.html", b"<h1>hi</h1>");
        let store = FsStore::new(dir.path());

        let meta = store
            .metadata("gen.dev/site/index.html")
            .await
            .unwrap_or_else(|e| panic!("metadata failed: {e}"));
        assert_eq!(meta.size, 11);
        assert_eq!(meta.content_type, "text/html; charset=utf-8");
        assert!(meta.etag.starts_with('"') && meta.etag.ends_with("-b\""));
        assert_eq!(meta.last_modified.timestamp_subsec_nanos(), 0);
    }

    #[tokio::test]
    async fn test_should_treat_directories_and_missing_files_as_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "t/s/docs/index.html", b"x");
        let store = FsStore::new(dir.path());

        assert!(matches!(
            store.metadata("t/s/docs").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.metadata("t/s/nope.html").await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.read_stream("t/s/nope.html").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_refuse_to_escape_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "secret.txt", b"x");
        let store = FsStore::new(dir.path().join("bucket"));

        let result = store.metadata("t/../../secret.txt").await;
        assert!(matches!(result, Err(StoreError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn test_should_stream_file_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 5).map(|i| (i % 251) as u8).collect();
        write(dir.path(), "t/s/app.wasm", &data);
        let store = FsStore::new(dir.path());

        let chunks: Vec<Bytes> = store
            .read_stream("t/s/app.wasm")
            .await
            .unwrap_or_else(|e| panic!("read_stream failed: {e}"))
            .try_collect()
            .await
            .unwrap_or_else(|e| panic!("stream failed: {e}"));
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_should_infer_content_types() {
        assert_eq!(content_type_for("a/b.css"), "text/css; charset=utf-8");
        assert_eq!(content_type_for("a/b.mjs"), "text/javascript; charset=utf-8");
        assert_eq!(content_type_for("a/b.PNG"), "image/png");
        assert_eq!(content_type_for("a.d/readme"), DEFAULT_CONTENT_TYPE);
    }
}
