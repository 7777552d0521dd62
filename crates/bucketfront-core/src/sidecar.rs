//! The `X-File-Info` sidecar header.
//!
//! The origin attaches the object's real validators (and optionally the cache
//! policy it applied) as a small JSON document. The edge strips the upstream
//! `ETag`/`Last-Modified` headers as untrustworthy and restores them from this
//! sidecar instead.
//!
//! ```text
//! X-File-Info: {"v":1,"etag":"\"abc\"","lastModified":"Fri, 01 Mar 2024 12:00:00 GMT",
//!               "policy":{"visibility":"private","maxAge":60,"staleWhileRevalidate":30}}
//! ```
//!
//! Parsing is all-or-nothing: a document that fails to parse is rejected as a
//! whole and the caller decides how to degrade.

use serde::{Deserialize, Serialize};

use crate::classify::CachePolicy;
use crate::error::{CoreError, CoreResult};

/// Header name carrying the sidecar.
pub const FILE_INFO_HEADER: &str = "x-file-info";

/// The schema version this build writes and understands.
pub const SIDECAR_VERSION: u32 = 1;

fn default_version() -> u32 {
    SIDECAR_VERSION
}

/// Validators and policy forwarded from the origin to the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Schema version. Documents without one are treated as version 1.
    #[serde(default = "default_version")]
    pub v: u32,
    /// The object's entity tag, quoted as it appears in `ETag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// The object's modification time as an HTTP date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// The cache policy the origin applied, if it wants the edge to keep it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<CachePolicy>,
}

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            v: SIDECAR_VERSION,
            etag: None,
            last_modified: None,
            policy: None,
        }
    }
}

impl FileInfo {
    /// Parse a sidecar header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketfront_core::FileInfo;
    ///
    /// let info = FileInfo::parse(r#"{"etag":"\"abc\""}"#).unwrap();
    /// assert_eq!(info.v, 1);
    /// assert_eq!(info.etag.as_deref(), Some("\"abc\""));
    /// assert!(FileInfo::parse("{not json").is_err());
    /// ```
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let info: Self = serde_json::from_str(raw)?;
        if info.v > SIDECAR_VERSION {
            return Err(CoreError::UnsupportedSidecarVersion(info.v));
        }
        Ok(info)
    }

    /// Serialize to a header value.
    pub fn encode(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
