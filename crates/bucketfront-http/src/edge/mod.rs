//! The edge cache in front of the origin.
//!
//! - [`normalizer`]: auth-flow detection and header normalization.
//! - [`store`]: the large-binary object store with spillover to disk.
//! - [`service`]: the proxying hyper service tying both together.

pub mod normalizer;
pub mod service;
pub mod store;

pub use normalizer::{AuthBypass, CACHE_STATUS_HEADER, Normalization, normalize_headers};
pub use service::EdgeService;
pub use store::{CachedResponse, EdgeCache, EdgeWriter, WriteProgress, cache_key};
