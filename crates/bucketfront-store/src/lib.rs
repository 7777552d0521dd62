//! Object storage access for bucketfront.
//!
//! This crate hides the bucket behind the [`ObjectStore`] trait and provides:
//!
//! - [`MemoryStore`] and [`FsStore`] backends
//! - [`SigV4UrlSigner`], which issues time-limited read URLs
//! - [`SignedUrlCache`], a single-flight cache in front of any [`UrlSigner`]
//! - [`ObjectFetcher`], which applies the per-call timeout and turns
//!   metadata lookups into [`CandidateOutcome`]s

pub mod fetch;
pub mod fs;
pub mod memory;
pub mod object;
pub mod signed_cache;
pub mod signer;

mod error;

pub use error::{StoreError, StoreResult};
pub use fetch::{CandidateOutcome, ObjectFetcher};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use object::{ByteStream, ObjectMetadata, ObjectStore, validate_key};
pub use signed_cache::{
    CacheStats, Clock, SignedUrl, SignedUrlCache, SignedUrlCacheConfig, SystemClock,
};
pub use signer::{SigV4UrlSigner, SignRequest, UrlSigner};
