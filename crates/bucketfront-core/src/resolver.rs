//! Request path to candidate object resolution.
//!
//! [`PathResolver::resolve`] is a pure function: the same path always yields
//! the same ordered candidate list. The origin tries each candidate in turn;
//! the first object that exists wins and a [`CandidatePath::Redirect`] ends
//! the search immediately.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classify::extension;
use crate::error::CoreError;

/// The document served for directory-style paths.
pub const INDEX_DOCUMENT: &str = "index.html";

/// One entry in the ordered list of things to try for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CandidatePath {
    /// A tenant-relative object key to look up in the bucket.
    Object(String),
    /// A tenant-relative URL path the client should be redirected to.
    Redirect(String),
}

impl CandidatePath {
    fn object(path: impl Into<String>) -> Self {
        Self::Object(path.into())
    }
}

impl fmt::Display for CandidatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(path) => f.write_str(path),
            Self::Redirect(path) => write!(f, "redirect:{path}"),
        }
    }
}

/// What to try after `path.html` when an extensionless page is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageFallback {
    /// Redirect to `path/` so the directory index is tried on the next
    /// request, then the tenant root index.
    #[default]
    Directory,
    /// Serve the tenant root `index.html` (single-page apps).
    Spa,
    /// No fallback; a missing page is a 404.
    None,
}

impl FromStr for PageFallback {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" => Ok(Self::Directory),
            "spa" => Ok(Self::Spa),
            "none" => Ok(Self::None),
            other => Err(CoreError::invalid_config(
                "PAGE_FALLBACK",
                format!("expected directory, spa or none, got {other:?}"),
            )),
        }
    }
}

/// Resolves relative request paths into ordered candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver {
    fallback: PageFallback,
}

impl PathResolver {
    /// Create a resolver with the given missing-page policy.
    #[must_use]
    pub fn new(fallback: PageFallback) -> Self {
        Self { fallback }
    }

    /// The configured missing-page policy.
    #[must_use]
    pub fn fallback(&self) -> PageFallback {
        self.fallback
    }

    /// Produce the ordered candidates for a tenant-relative path.
    ///
    /// Leading slashes are ignored, so `"/foo"` and `"foo"` are equivalent.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Vec<CandidatePath> {
        let path = path.trim_start_matches('/');

        if path.is_empty() {
            return vec![CandidatePath::object(INDEX_DOCUMENT)];
        }

        if path.ends_with('/') {
            return vec![
                CandidatePath::object(format!("{path}{INDEX_DOCUMENT}")),
                CandidatePath::object(INDEX_DOCUMENT),
            ];
        }

        if extension(path).is_some() {
            return vec![CandidatePath::object(path)];
        }

        let page = CandidatePath::object(format!("{path}.html"));
        match self.fallback {
            PageFallback::Directory => vec![
                page,
                CandidatePath::Redirect(format!("/{path}/")),
                CandidatePath::object(INDEX_DOCUMENT),
            ],
            PageFallback::Spa => vec![page, CandidatePath::object(INDEX_DOCUMENT)],
            PageFallback::None => vec![page],
        }
    }
}

/// Resolve with the default ([`PageFallback::Directory`]) policy.
///
/// # Examples
///
/// ```
/// use bucketfront_core::{CandidatePath, resolve};
///
/// assert_eq!(
///     resolve("foo"),
///     vec![
///         CandidatePath::Object("foo.html".into()),
///         CandidatePath::Redirect("/foo/".into()),
///         CandidatePath::Object("index.html".into()),
///     ]
/// );
/// ```
#[must_use]
pub fn resolve(path: &str) -> Vec<CandidatePath> {
    PathResolver::default().resolve(path)
}
