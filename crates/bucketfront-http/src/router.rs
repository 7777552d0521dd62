//! Request routing for the origin.
//!
//! Maps method, host and path to a [`Route`]:
//!
//! 1. Non-`GET` methods are rejected.
//! 2. `/_bucketfront/health` and `/_bucketfront/metrics` are served locally.
//! 3. `/bucket/:bucket/*path` issues signed redirects, when enabled.
//! 4. In dev mode, `/:parent/:sub/*path` and `/:parent/:sub` address a
//!    tenant directly.
//! 5. Everything else is a path within the tenant named by the `Host`.

use bucketfront_core::TenantKey;
use http::Method;
use percent_encoding::percent_decode_str;

/// Health probe path.
pub const HEALTH_PATH: &str = "/_bucketfront/health";

/// Prometheus scrape path.
pub const METRICS_PATH: &str = "/_bucketfront/metrics";

const BUCKET_ROUTE_PREFIX: &str = "/bucket/";

/// Where a request should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Health probe.
    Health,
    /// Metrics scrape.
    Metrics,
    /// A file within a tenant site.
    Tenant {
        /// The tenant.
        tenant: TenantKey,
        /// Decoded tenant-relative path.
        path: String,
        /// Whether the tenant came from the path (dev mode).
        dev: bool,
    },
    /// A signed redirect to an arbitrary bucket object.
    Bucket {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },
    /// Nothing matches.
    NotFound,
    /// The method is not supported.
    MethodNotAllowed,
}

/// Routing table for the origin.
#[derive(Debug, Clone, Copy, Default)]
pub struct OriginRouter {
    dev: bool,
    bucket_route: bool,
}

impl OriginRouter {
    /// Create a router.
    #[must_use]
    pub fn new(dev: bool, bucket_route: bool) -> Self {
        Self { dev, bucket_route }
    }

    /// Resolve a request. `path` is the raw (still percent-encoded) URI path.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketfront_http::router::{OriginRouter, Route};
    /// use http::Method;
    ///
    /// let router = OriginRouter::new(false, false);
    /// match router.route(&Method::GET, Some("docs.gen.dev"), "/guide/") {
    ///     Route::Tenant { tenant, path, dev } => {
    ///         assert_eq!(tenant.object_key(&path), "gen.dev/docs/guide/");
    ///         assert!(!dev);
    ///     }
    ///     other => panic!("unexpected route {other:?}"),
    /// }
    /// ```
    #[must_use]
    pub fn route(&self, method: &Method, host: Option<&str>, path: &str) -> Route {
        if *method != Method::GET {
            return Route::MethodNotAllowed;
        }

        let Ok(path) = percent_decode_str(path).decode_utf8() else {
            return Route::NotFound;
        };

        match &*path {
            HEALTH_PATH => return Route::Health,
            METRICS_PATH => return Route::Metrics,
            _ => {}
        }

        if self.bucket_route {
            if let Some(rest) = path.strip_prefix(BUCKET_ROUTE_PREFIX) {
                return match rest.split_once('/') {
                    Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Route::Bucket {
                        bucket: bucket.to_owned(),
                        key: key.to_owned(),
                    },
                    _ => Route::NotFound,
                };
            }
        }

        if self.dev {
            if let Some(route) = dev_tenant_route(&path) {
                return route;
            }
        }

        match host.and_then(TenantKey::from_host) {
            Some(tenant) => Route::Tenant {
                tenant,
                path: path.trim_start_matches('/').to_owned(),
                dev: false,
            },
            None => Route::NotFound,
        }
    }
}

/// `/:parent/:sub` or `/:parent/:sub/*path`.
fn dev_tenant_route(path: &str) -> Option<Route> {
    let mut segments = path.trim_start_matches('/').splitn(3, '/');
    let parent = segments.next().filter(|s| !s.is_empty())?;
    let sub = segments.next().filter(|s| !s.is_empty())?;
    let rest = segments.next().unwrap_or_default();

    Some(Route::Tenant {
        tenant: TenantKey::new(parent, sub),
        path: rest.to_owned(),
        dev: true,
    })
}
