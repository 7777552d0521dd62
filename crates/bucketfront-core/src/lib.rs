//! Path resolution, cache policy, and configuration for bucketfront.
//!
//! This crate holds the pure decision engine shared by the origin server and
//! the edge cache. Nothing in here performs I/O:
//!
//! - **Tenants** ([`tenant`]): maps a request host (or dev-mode path prefix) to
//!   the `(parent_domain, sub_domain)` pair that prefixes every bucket key.
//! - **Resolver** ([`resolver`]): turns a relative request path into the
//!   ordered list of objects (and redirects) to try.
//! - **Classifier** ([`classify`]): assigns an asset class and its
//!   [`CachePolicy`] from the path extension and content type.
//! - **Request** ([`request`]): the per-request context and conditional
//!   validator evaluation (`If-None-Match`, `If-Modified-Since`).
//! - **Sidecar** ([`sidecar`]): the `X-File-Info` header contract carried from
//!   the origin to the edge.
//! - **Config** ([`config`]): environment-driven configuration for both
//!   deployables.

pub mod classify;
pub mod config;
mod error;
pub mod request;
pub mod resolver;
pub mod sidecar;
pub mod tenant;

pub use classify::{AssetClass, CachePolicy, Visibility, classify};
pub use config::{DeploymentEnv, EdgeConfig, OriginConfig, StaticDelivery};
pub use error::{CoreError, CoreResult};
pub use request::{ConditionalHeaders, RequestContext};
pub use resolver::{CandidatePath, PageFallback, PathResolver, resolve};
pub use sidecar::FileInfo;
pub use tenant::TenantKey;
