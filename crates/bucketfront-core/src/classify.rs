//! Asset classification and cache policies.
//!
//! Every response is assigned one of three [`AssetClass`]es. The class is
//! decided by extension first and content type second, so a `.wasm` payload
//! served as `text/html` is still a [`AssetClass::LargeBinary`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Extensions of runtime payloads that are cached as immutable for a year.
const LARGE_BINARY_EXTENSIONS: &[&str] = &["wasm", "data"];

/// Whether shared caches may store a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Cacheable by browsers and shared caches.
    Public,
    /// Cacheable by the requesting browser only.
    Private,
}

impl Visibility {
    /// The Cache-Control token for this visibility.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache directives attached to an asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// Public or private caching.
    pub visibility: Visibility,
    /// `max-age` in seconds.
    pub max_age: u64,
    /// `stale-while-revalidate` in seconds, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_while_revalidate: Option<u64>,
    /// Whether the response never changes for its URL.
    #[serde(default)]
    pub immutable: bool,
}

impl CachePolicy {
    /// HTML documents: private, one minute, revalidate in the background.
    pub const HTML: Self = Self {
        visibility: Visibility::Private,
        max_age: 60,
        stale_while_revalidate: Some(30),
        immutable: false,
    };

    /// Ordinary static assets: public, one day.
    pub const STATIC: Self = Self {
        visibility: Visibility::Public,
        max_age: 86_400,
        stale_while_revalidate: Some(3_600),
        immutable: false,
    };

    /// Large runtime payloads: public, one year, immutable.
    pub const LARGE_BINARY: Self = Self {
        visibility: Visibility::Public,
        max_age: 31_536_000,
        stale_while_revalidate: None,
        immutable: true,
    };

    /// Render the `Cache-Control` header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketfront_core::CachePolicy;
    ///
    /// assert_eq!(
    ///     CachePolicy::HTML.cache_control(),
    ///     "private, max-age=60, stale-while-revalidate=30"
    /// );
    /// assert_eq!(
    ///     CachePolicy::LARGE_BINARY.cache_control(),
    ///     "public, max-age=31536000, immutable"
    /// );
    /// ```
    #[must_use]
    pub fn cache_control(&self) -> String {
        let mut value = format!("{}, max-age={}", self.visibility, self.max_age);
        if self.immutable {
            value.push_str(", immutable");
        } else if let Some(swr) = self.stale_while_revalidate {
            value.push_str(&format!(", stale-while-revalidate={swr}"));
        }
        value
    }
}

/// The class of an asset, which fixes its cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetClass {
    /// HTML pages and directory-style paths.
    Html,
    /// CSS, JS, images and other ordinary assets.
    Static,
    /// Large runtime payloads (`.wasm`, `.data`).
    LargeBinary,
}

impl AssetClass {
    /// The cache policy bound to this class.
    #[must_use]
    pub fn policy(self) -> CachePolicy {
        match self {
            Self::Html => CachePolicy::HTML,
            Self::Static => CachePolicy::STATIC,
            Self::LargeBinary => CachePolicy::LARGE_BINARY,
        }
    }

    /// Short lower-case name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Static => "static",
            Self::LargeBinary => "large_binary",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The lower-cased extension of the final path segment, if it has one.
///
/// ```
/// use bucketfront_core::classify::extension;
///
/// assert_eq!(extension("a/b/App.WASM").as_deref(), Some("wasm"));
/// assert_eq!(extension("v1.2/readme"), None);
/// assert_eq!(extension("docs/"), None);
/// ```
#[must_use]
pub fn extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether `ext` (already lower-cased) names a large binary payload.
#[must_use]
pub fn is_large_binary_extension(ext: &str) -> bool {
    LARGE_BINARY_EXTENSIONS.contains(&ext)
}

/// Classify a request path, optionally using the response content type.
///
/// ```
/// use bucketfront_core::{AssetClass, classify};
///
/// assert_eq!(classify("x.wasm", Some("text/html")), AssetClass::LargeBinary);
/// assert_eq!(classify("", Some("text/html")), AssetClass::Html);
/// assert_eq!(classify("x.css", Some("text/css")), AssetClass::Static);
/// ```
#[must_use]
pub fn classify(path: &str, content_type: Option<&str>) -> AssetClass {
    let ext = extension(path);

    if ext.as_deref().is_some_and(is_large_binary_extension) {
        return AssetClass::LargeBinary;
    }

    let is_html_type = content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
    if ext.is_none() || path.ends_with('/') || is_html_type {
        return AssetClass::Html;
    }

    AssetClass::Static
}
