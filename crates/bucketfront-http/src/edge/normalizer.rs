//! Response header normalization at the edge.
//!
//! Upstream responses carry headers the edge does not trust (the hosting
//! platform's own `Cache-Control`, validators computed over a redirect rather
//! than the object, trace headers). The normalizer strips them and rebuilds
//! caching headers from the `X-File-Info` sidecar, falling back to the
//! extension classifier when the origin sent no policy.
//!
//! Identity-provider traffic is recognised first and never touched.

use bucketfront_core::sidecar::FILE_INFO_HEADER;
use bucketfront_core::{CachePolicy, EdgeConfig, FileInfo, classify};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{StatusCode, Uri};
use tracing::{debug, warn};

/// Header reporting whether the edge store served the response.
pub const CACHE_STATUS_HEADER: &str = "x-cache-status";

/// Upstream headers removed before the edge sets its own.
pub const STRIPPED_HEADERS: &[&str] = &[
    "pragma",
    "cache-control",
    "expires",
    "etag",
    "last-modified",
    "x-cloud-trace-context",
    "x-appengine-resource-usage",
    "x-powered-by",
    "x-cache-info",
    "x-cache-policy",
    FILE_INFO_HEADER,
];

/// Recognises requests and responses belonging to the auth-proxy flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBypass {
    query_param: String,
    marker_header: String,
    hosts: Vec<String>,
}

impl AuthBypass {
    /// Create a detector.
    #[must_use]
    pub fn new(
        query_param: impl Into<String>,
        marker_header: impl Into<String>,
        hosts: Vec<String>,
    ) -> Self {
        Self {
            query_param: query_param.into(),
            marker_header: marker_header.into().to_ascii_lowercase(),
            hosts,
        }
    }

    /// Build the detector from edge configuration.
    #[must_use]
    pub fn from_config(config: &EdgeConfig) -> Self {
        Self::new(
            config.auth_query_param.clone(),
            config.auth_marker_header.clone(),
            config.auth_hosts.clone(),
        )
    }

    /// Whether the request URL carries the auth query parameter.
    ///
    /// ```
    /// use bucketfront_http::edge::AuthBypass;
    /// use bucketfront_core::EdgeConfig;
    ///
    /// let bypass = AuthBypass::from_config(&EdgeConfig::default());
    /// assert!(bypass.is_auth_request(&"/?gcp-iap-mode=AUTHENTICATING".parse().unwrap()));
    /// assert!(!bypass.is_auth_request(&"/index.html?v=2".parse().unwrap()));
    /// ```
    #[must_use]
    pub fn is_auth_request(&self, uri: &Uri) -> bool {
        uri.query().is_some_and(|query| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some(self.query_param.as_str()))
        })
    }

    /// Whether an upstream response is part of the auth flow: it carries the
    /// marker header, or it redirects to one of the auth hosts.
    #[must_use]
    pub fn is_auth_response(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        let marked = headers
            .get(self.marker_header.as_str())
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if marked {
            return true;
        }

        status.is_redirection()
            && headers
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|location| self.is_auth_location(location))
    }

    /// Whether `location` points at an auth host.
    #[must_use]
    pub fn is_auth_location(&self, location: &str) -> bool {
        let location = location.to_ascii_lowercase();
        self.hosts.iter().any(|host| location.contains(host.as_str()))
    }
}

/// What the normalizer did to a header map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Headers were rebuilt; `policy` is the one now in `Cache-Control`.
    Applied {
        /// The applied policy.
        policy: CachePolicy,
    },
    /// The sidecar was unusable and the headers were left as they came.
    PassThrough,
    /// The upstream failed; headers were stripped and marked `no-store`.
    ServerError,
}

/// Rebuild caching headers for a response to `request_path`.
///
/// A present but malformed sidecar leaves `headers` untouched. Server errors
/// never take the asset class policy.
pub fn normalize_headers(
    headers: &mut HeaderMap,
    status: StatusCode,
    request_path: &str,
) -> Normalization {
    if status.is_server_error() {
        strip(headers);
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        debug!(path = request_path, %status, "marked upstream error no-store");
        return Normalization::ServerError;
    }

    let info = match headers.get(FILE_INFO_HEADER) {
        None => FileInfo::default(),
        Some(raw) => match raw.to_str().map(FileInfo::parse) {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(path = request_path, error = %e, "ignoring malformed file info");
                return Normalization::PassThrough;
            }
            Err(_) => {
                warn!(path = request_path, "ignoring non-ASCII file info");
                return Normalization::PassThrough;
            }
        },
    };

    let policy = info.policy.unwrap_or_else(|| {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        classify(request_path, content_type).policy()
    });

    strip(headers);
    insert(headers, header::CACHE_CONTROL, &policy.cache_control());
    headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    if let Some(etag) = &info.etag {
        insert(headers, header::ETAG, etag);
    }
    if let Some(last_modified) = &info.last_modified {
        insert(headers, header::LAST_MODIFIED, last_modified);
    }

    debug!(path = request_path, cache_control = %policy.cache_control(), "normalized headers");
    Normalization::Applied { policy }
}

fn strip(headers: &mut HeaderMap) {
    for name in STRIPPED_HEADERS {
        headers.remove(*name);
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, value, "dropping unrepresentable header value"),
    }
}
