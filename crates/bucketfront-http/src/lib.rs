//! HTTP services for bucketfront.
//!
//! - [`origin`]: the origin service resolving tenant requests against the
//!   bucket ([`OriginService`]).
//! - [`composer`]: candidate walking and response decisions.
//! - [`edge`]: the caching proxy in front of the origin ([`EdgeService`]).
//! - [`serve`]: the accept loop with graceful shutdown shared by both.
//! - [`logging`]: the tracing subscriber both binaries install.

pub mod body;
pub mod composer;
pub mod edge;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod response;
pub mod router;
pub mod serve;

pub use body::FrontBody;
pub use composer::{Composer, ResponseDecision};
pub use edge::EdgeService;
pub use error::{ServiceError, ServiceResult};
pub use logging::init_tracing;
pub use metrics::{Metrics, MetricsSnapshot};
pub use origin::OriginService;
pub use router::{OriginRouter, Route};
pub use serve::serve;
