//! Origin and edge configuration.
//!
//! Provides [`OriginConfig`] and [`EdgeConfig`]. Both have defaults suitable
//! for local development and can be loaded from environment variables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{CoreError, CoreResult};
use crate::resolver::PageFallback;

/// Default bind address for both deployables.
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";

/// Which routing table the origin uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentEnv {
    /// Tenants come from the `Host` header only.
    #[default]
    Prod,
    /// Tenants may also be addressed as `/:parent/:sub/*path`.
    Dev,
}

impl FromStr for DeploymentEnv {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" | "" => Ok(Self::Prod),
            other => Err(CoreError::invalid_config(
                "ENV",
                format!("expected dev or prod, got {other:?}"),
            )),
        }
    }
}

/// How non-HTML assets are delivered by the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaticDelivery {
    /// 302 to a signed object-store URL; the store serves the bytes.
    #[default]
    Redirect,
    /// Stream the bytes through the origin.
    Stream,
}

impl FromStr for StaticDelivery {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redirect" => Ok(Self::Redirect),
            "stream" => Ok(Self::Stream),
            other => Err(CoreError::invalid_config(
                "STATIC_DELIVERY",
                format!("expected redirect or stream, got {other:?}"),
            )),
        }
    }
}

/// Origin server configuration.
///
/// # Examples
///
/// ```
/// use bucketfront_core::OriginConfig;
///
/// let config = OriginConfig::default();
/// assert_eq!(config.listen, "0.0.0.0:8080");
/// assert_eq!(config.signed_url_ttl_secs, 3600);
/// ```
#[derive(Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct OriginConfig {
    /// Bind address.
    #[builder(default = String::from(DEFAULT_LISTEN))]
    pub listen: String,

    /// Object-store bucket holding every tenant.
    #[builder(default = String::from("static-sites"))]
    pub bucket_name: String,

    /// Routing mode.
    #[builder(default)]
    pub env: DeploymentEnv,

    /// Log level filter string.
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Directory holding a mounted copy of the bucket. `None` uses an empty
    /// in-memory store.
    #[builder(default)]
    pub bucket_root: Option<String>,

    /// Public endpoint signed URLs point at.
    #[builder(default = String::from("https://storage.googleapis.com"))]
    pub storage_endpoint: String,

    /// Region used in the signing scope.
    #[builder(default = String::from("auto"))]
    pub storage_region: String,

    /// Sign `bucket.host/key` URLs instead of `host/bucket/key`.
    #[builder(default = false)]
    pub storage_virtual_hosted: bool,

    /// HMAC access key id used to sign URLs.
    #[builder(default)]
    pub storage_access_key: String,

    /// HMAC secret used to sign URLs.
    #[serde(skip_serializing, default)]
    #[builder(default)]
    pub storage_secret_key: String,

    /// Lifetime of issued signed URLs.
    #[builder(default = 3_600)]
    pub signed_url_ttl_secs: u64,

    /// Minimum lifetime a cached signed URL must still have when handed out.
    #[builder(default = 600)]
    pub signed_url_refresh_skew_secs: u64,

    /// Upper bound on each metadata, open or signing call.
    #[builder(default = 10_000)]
    pub store_timeout_ms: u64,

    /// Delivery mode for non-HTML assets.
    #[builder(default)]
    pub static_delivery: StaticDelivery,

    /// Extensions always streamed inline (lower case, no dot).
    #[builder(default = default_inline_extensions())]
    pub inline_extensions: Vec<String>,

    /// Fallback applied to missing extensionless pages.
    #[builder(default)]
    pub page_fallback: PageFallback,

    /// Whether `GET /bucket/:bucket/*path` signed redirects are served.
    #[builder(default = false)]
    pub enable_bucket_route: bool,
}

fn default_inline_extensions() -> Vec<String> {
    vec!["css".to_owned(), "js".to_owned(), "mjs".to_owned()]
}

impl fmt::Debug for OriginConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginConfig")
            .field("listen", &self.listen)
            .field("bucket_name", &self.bucket_name)
            .field("env", &self.env)
            .field("bucket_root", &self.bucket_root)
            .field("storage_endpoint", &self.storage_endpoint)
            .field("storage_region", &self.storage_region)
            .field("storage_virtual_hosted", &self.storage_virtual_hosted)
            .field("storage_access_key", &self.storage_access_key)
            .field("storage_secret_key", &"...")
            .field("signed_url_ttl_secs", &self.signed_url_ttl_secs)
            .field(
                "signed_url_refresh_skew_secs",
                &self.signed_url_refresh_skew_secs,
            )
            .field("store_timeout_ms", &self.store_timeout_ms)
            .field("static_delivery", &self.static_delivery)
            .field("inline_extensions", &self.inline_extensions)
            .field("page_fallback", &self.page_fallback)
            .field("enable_bucket_route", &self.enable_bucket_route)
            .finish_non_exhaustive()
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl OriginConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LISTEN` / `PORT` | `0.0.0.0:8080` |
    /// | `BUCKET_NAME` | `static-sites` |
    /// | `ENV` | `prod` |
    /// | `LOG_LEVEL` | `info` |
    /// | `BUCKET_ROOT` | *(unset)* |
    /// | `STORAGE_ENDPOINT` | `https://storage.googleapis.com` |
    /// | `STORAGE_REGION` | `auto` |
    /// | `STORAGE_VIRTUAL_HOSTED` | `false` |
    /// | `STORAGE_ACCESS_KEY` / `STORAGE_SECRET_KEY` | *(empty)* |
    /// | `SIGNED_URL_TTL_SECS` | `3600` |
    /// | `SIGNED_URL_REFRESH_SKEW_SECS` | `600` |
    /// | `STORE_TIMEOUT_MS` | `10000` |
    /// | `STATIC_DELIVERY` | `redirect` |
    /// | `INLINE_EXTENSIONS` | `css,js,mjs` |
    /// | `PAGE_FALLBACK` | `directory` |
    /// | `ENABLE_BUCKET_ROUTE` | `false` |
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(listen) = listen_from(&lookup)? {
            config.listen = listen;
        }
        if let Some(v) = lookup("BUCKET_NAME") {
            config.bucket_name = v;
        }
        if let Some(v) = lookup("ENV") {
            config.env = v.parse()?;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("BUCKET_ROOT").filter(|v| !v.is_empty()) {
            config.bucket_root = Some(v);
        }
        if let Some(v) = lookup("STORAGE_ENDPOINT") {
            config.storage_endpoint = v.trim_end_matches('/').to_owned();
        }
        if let Some(v) = lookup("STORAGE_REGION") {
            config.storage_region = v;
        }
        if let Some(v) = lookup("STORAGE_VIRTUAL_HOSTED") {
            config.storage_virtual_hosted = parse_bool(&v);
        }
        if let Some(v) = lookup("STORAGE_ACCESS_KEY") {
            config.storage_access_key = v;
        }
        if let Some(v) = lookup("STORAGE_SECRET_KEY") {
            config.storage_secret_key = v;
        }
        if let Some(v) = lookup("SIGNED_URL_TTL_SECS") {
            config.signed_url_ttl_secs = parse_number("SIGNED_URL_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("SIGNED_URL_REFRESH_SKEW_SECS") {
            config.signed_url_refresh_skew_secs =
                parse_number("SIGNED_URL_REFRESH_SKEW_SECS", &v)?;
        }
        if let Some(v) = lookup("STORE_TIMEOUT_MS") {
            config.store_timeout_ms = parse_number("STORE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("STATIC_DELIVERY") {
            config.static_delivery = v.parse()?;
        }
        if let Some(v) = lookup("INLINE_EXTENSIONS") {
            config.inline_extensions = v
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect();
        }
        if let Some(v) = lookup("PAGE_FALLBACK") {
            config.page_fallback = v.parse()?;
        }
        if let Some(v) = lookup("ENABLE_BUCKET_ROUTE") {
            config.enable_bucket_route = parse_bool(&v);
        }

        if config.signed_url_refresh_skew_secs >= config.signed_url_ttl_secs {
            return Err(CoreError::invalid_config(
                "SIGNED_URL_REFRESH_SKEW_SECS",
                "refresh skew must be shorter than the signed URL lifetime",
            ));
        }

        Ok(config)
    }

    /// Whether dev-mode path tenants are enabled.
    #[must_use]
    pub fn is_dev(&self) -> bool {
        self.env == DeploymentEnv::Dev
    }
}

/// Edge cache configuration.
///
/// # Examples
///
/// ```
/// use bucketfront_core::EdgeConfig;
///
/// let config = EdgeConfig::default();
/// assert_eq!(config.upstream_url, "http://127.0.0.1:8080");
/// assert!(config.auth_hosts.iter().any(|h| h == "iap.googleapis.com"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct EdgeConfig {
    /// Bind address.
    #[builder(default = String::from(DEFAULT_LISTEN))]
    pub listen: String,

    /// Base URL of the origin this edge fronts.
    #[builder(default = String::from("http://127.0.0.1:8080"))]
    pub upstream_url: String,

    /// Log level filter string.
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Bodies up to this size stay in memory; larger ones spill to disk.
    #[builder(default = 524_288)]
    pub memory_threshold: usize,

    /// Bodies above this size are never stored.
    #[builder(default = 268_435_456)]
    pub max_object_size: u64,

    /// Query parameter that marks an auth handshake request.
    #[builder(default = String::from("gcp-iap-mode"))]
    pub auth_query_param: String,

    /// Response header (lower case) set to `true` on auth-proxy responses.
    #[builder(default = String::from("x-goog-iap-generated-response"))]
    pub auth_marker_header: String,

    /// Identity-provider hosts; redirects to them bypass the cache.
    #[builder(default = vec![String::from("iap.googleapis.com")])]
    pub auth_hosts: Vec<String>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl EdgeConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `LISTEN` / `PORT` | `0.0.0.0:8080` |
    /// | `UPSTREAM_URL` | `http://127.0.0.1:8080` |
    /// | `LOG_LEVEL` | `info` |
    /// | `EDGE_MEMORY_THRESHOLD` | `524288` |
    /// | `EDGE_MAX_OBJECT_SIZE` | `268435456` |
    /// | `AUTH_HOSTS` | `iap.googleapis.com` |
    pub fn from_env() -> CoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(listen) = listen_from(&lookup)? {
            config.listen = listen;
        }
        if let Some(v) = lookup("UPSTREAM_URL") {
            config.upstream_url = v.trim_end_matches('/').to_owned();
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            config.log_level = v;
        }
        if let Some(v) = lookup("EDGE_MEMORY_THRESHOLD") {
            config.memory_threshold = parse_number("EDGE_MEMORY_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("EDGE_MAX_OBJECT_SIZE") {
            config.max_object_size = parse_number("EDGE_MAX_OBJECT_SIZE", &v)?;
        }
        if let Some(v) = lookup("AUTH_HOSTS") {
            config.auth_hosts = v
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }

        Ok(config)
    }
}

/// `LISTEN` wins; otherwise `PORT` binds on all interfaces.
fn listen_from(lookup: &impl Fn(&str) -> Option<String>) -> CoreResult<Option<String>> {
    if let Some(listen) = lookup("LISTEN") {
        return Ok(Some(listen));
    }
    match lookup("PORT") {
        Some(port) => {
            let port: u16 = parse_number("PORT", &port)?;
            Ok(Some(format!("0.0.0.0:{port}")))
        }
        None => Ok(None),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> CoreResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid_config(key, format!("not a number: {value:?}")))
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
