//! Time-limited read URLs.
//!
//! [`SigV4UrlSigner`] produces AWS Signature Version 4 presigned `GET` URLs,
//! which S3 and the interoperable XML APIs of other object stores accept.
//! The signature covers only the `host` header and the payload is
//! `UNSIGNED-PAYLOAD`, so the URL can be handed straight to a browser.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

const SERVICE: &str = "s3";

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest validity a presigned URL may carry (seven days).
const MAX_EXPIRES_SECS: i64 = 604_800;

/// Everything except RFC 3986 unreserved characters is encoded.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A request for a read URL.
#[derive(Debug, Clone, Copy)]
pub struct SignRequest<'a> {
    /// Bucket holding the object.
    pub bucket: &'a str,
    /// Full object key.
    pub key: &'a str,
    /// When the signature is made.
    pub issued_at: DateTime<Utc>,
    /// When the URL stops working.
    pub expires_at: DateTime<Utc>,
}

/// Produces URLs that grant temporary read access to one object.
#[async_trait]
pub trait UrlSigner: Send + Sync + 'static {
    /// Sign a read URL valid until `request.expires_at`.
    async fn sign_read_url(&self, request: &SignRequest<'_>) -> StoreResult<String>;
}

/// SigV4 query-string signer.
#[derive(Clone)]
pub struct SigV4UrlSigner {
    scheme: String,
    authority: String,
    region: String,
    access_key: String,
    secret_key: String,
    virtual_hosted: bool,
}

impl std::fmt::Debug for SigV4UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigV4UrlSigner")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("virtual_hosted", &self.virtual_hosted)
            .finish_non_exhaustive()
    }
}

impl SigV4UrlSigner {
    /// Create a signer for URLs under `endpoint` (for example
    /// `https://storage.googleapis.com`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEndpoint`] if the endpoint lacks a scheme
    /// or host.
    pub fn new(
        endpoint: &str,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> StoreResult<Self> {
        let invalid = |message: &str| StoreError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
            message: message.to_owned(),
        };
        let uri: http::Uri = endpoint.parse().map_err(|_| invalid("not a valid URI"))?;
        let scheme = uri.scheme_str().ok_or_else(|| invalid("missing scheme"))?;
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;

        Ok(Self {
            scheme: scheme.to_owned(),
            authority: authority.as_str().to_owned(),
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            virtual_hosted: false,
        })
    }

    /// Address objects as `bucket.host/key` instead of `host/bucket/key`.
    #[must_use]
    pub fn with_virtual_hosted(mut self, virtual_hosted: bool) -> Self {
        self.virtual_hosted = virtual_hosted;
        self
    }

    /// Whether an access key and secret are configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.access_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Build the presigned URL.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Signing`] when no credentials are configured.
    pub fn presign(&self, request: &SignRequest<'_>) -> StoreResult<String> {
        let signing_error = |message: &str| StoreError::Signing {
            key: request.key.to_owned(),
            message: message.to_owned(),
        };
        if !self.has_credentials() {
            return Err(signing_error("no signing credentials configured"));
        }

        let expires = (request.expires_at - request.issued_at)
            .num_seconds()
            .clamp(1, MAX_EXPIRES_SECS);
        let timestamp = request.issued_at.format("%Y%m%dT%H%M%SZ").to_string();
        let date = request.issued_at.format("%Y%m%d").to_string();

        let (host, path) = if self.virtual_hosted {
            (
                format!("{}.{}", request.bucket, self.authority),
                format!("/{}", request.key),
            )
        } else {
            (
                self.authority.clone(),
                format!("/{}/{}", request.bucket, request.key),
            )
        };
        let canonical_uri = encode_path(&path);

        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);
        let credential = format!("{}/{scope}", self.access_key);
        let expires = expires.to_string();
        let query = build_canonical_query(&[
            ("X-Amz-Algorithm", ALGORITHM),
            ("X-Amz-Credential", &credential),
            ("X-Amz-Date", &timestamp),
            ("X-Amz-Expires", &expires),
            ("X-Amz-SignedHeaders", "host"),
        ]);

        let canonical_request =
            format!("GET\n{canonical_uri}\n{query}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}");
        let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = build_string_to_sign(&timestamp, &scope, &canonical_hash);

        let signing_key = derive_signing_key(&self.secret_key, &date, &self.region, SERVICE)
            .ok_or_else(|| signing_error("invalid signing key"))?;
        let signature = compute_signature(&signing_key, &string_to_sign)
            .ok_or_else(|| signing_error("invalid signing key"))?;

        debug!(key = request.key, expires, "signed read URL");
        Ok(format!(
            "{}://{host}{canonical_uri}?{query}&X-Amz-Signature={signature}",
            self.scheme
        ))
    }
}

#[async_trait]
impl UrlSigner for SigV4UrlSigner {
    async fn sign_read_url(&self, request: &SignRequest<'_>) -> StoreResult<String> {
        self.presign(request)
    }
}

/// Percent-encode each path segment, keeping the slashes.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Encode and sort query parameters.
fn build_canonical_query(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, URI_ENCODE_SET).to_string(),
                utf8_percent_encode(v, URI_ENCODE_SET).to_string(),
            )
        })
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn build_string_to_sign(timestamp: &str, scope: &str, canonical_hash: &str) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{scope}\n{canonical_hash}")
}

/// Derive the SigV4 signing key.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Option<Vec<u8>> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes())?;
    let date_region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes())?;
    hmac_sha256(&date_region_service_key, b"aws4_request")
}

fn compute_signature(signing_key: &[u8], data: &str) -> Option<String> {
    hmac_sha256(signing_key, data.as_bytes()).map(hex::encode)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(data);
    Some(mac.finalize().into_bytes().to_vec())
}
