//! Response composition.
//!
//! The composer walks the resolver's candidates for a request, probes each
//! one and turns the first hit into a [`ResponseDecision`]:
//!
//! ```text
//! START -> RESOLVE -> (TRY -> FOUND | ABSENT -> next)*
//!       -> STREAM | REDIRECT | MOVED | NOT_MODIFIED | NOT_FOUND | ERROR
//! ```
//!
//! A directory redirect candidate ends the walk immediately; a store failure
//! ends it with an internal error. Absent objects are the only outcome that
//! advances to the next candidate.

use std::fmt;
use std::io;
use std::sync::Arc;

use bucketfront_core::classify::extension;
use bucketfront_core::request::format_http_date;
use bucketfront_core::sidecar::FILE_INFO_HEADER;
use bucketfront_core::{
    AssetClass, CachePolicy, CandidatePath, FileInfo, OriginConfig, PathResolver, RequestContext,
    StaticDelivery, TenantKey, Visibility, classify,
};
use bucketfront_store::{
    ByteStream, CandidateOutcome, ObjectFetcher, ObjectMetadata, SignedUrl, SignedUrlCache,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use http::header::{self, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tracing::{debug, error, warn};

use crate::body::FrontBody;
use crate::metrics::Metrics;
use crate::response::{self, VARY_ACCEPT_ENCODING, set_header};

/// Content type sent with `.html` objects regardless of stored metadata.
const HTML_CONTENT_TYPE: &str = "text/html";

/// Bytes escaped inside one path segment of a `Location`.
const PATH_SEGMENT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// What the origin will send for one request.
pub enum ResponseDecision {
    /// Stream the object body inline.
    Stream {
        /// The object being served.
        object: ObjectMetadata,
        /// Cache policy of its class.
        policy: CachePolicy,
        /// `Content-Type` to send.
        content_type: String,
        /// The body.
        body: ByteStream,
    },
    /// 301 to a directory-style URL.
    Moved {
        /// The `Location` to send.
        location: String,
    },
    /// 302 to a signed object URL.
    Redirect {
        /// The object behind the URL, if it was looked up.
        object: Option<ObjectMetadata>,
        /// Visibility used for the redirect's own caching.
        visibility: Visibility,
        /// The signed URL.
        signed: SignedUrl,
    },
    /// 304: the client's copy is current.
    NotModified {
        /// The object the validators describe.
        object: ObjectMetadata,
        /// Cache policy of its class.
        policy: CachePolicy,
    },
    /// No candidate exists.
    NotFound,
    /// The store or signer failed.
    InternalError,
}

impl fmt::Debug for ResponseDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream {
                object,
                policy,
                content_type,
                ..
            } => f
                .debug_struct("Stream")
                .field("object", object)
                .field("policy", policy)
                .field("content_type", content_type)
                .finish_non_exhaustive(),
            Self::Moved { location } => f.debug_struct("Moved").field("location", location).finish(),
            Self::Redirect {
                object,
                visibility,
                signed,
            } => f
                .debug_struct("Redirect")
                .field("object", object)
                .field("visibility", visibility)
                .field("signed", signed)
                .finish(),
            Self::NotModified { object, policy } => f
                .debug_struct("NotModified")
                .field("object", object)
                .field("policy", policy)
                .finish(),
            Self::NotFound => f.write_str("NotFound"),
            Self::InternalError => f.write_str("InternalError"),
        }
    }
}

impl ResponseDecision {
    /// Render the decision. `now` is used to compute the remaining lifetime
    /// of signed URLs.
    #[must_use]
    pub fn into_response(self, now: DateTime<Utc>, metrics: &Arc<Metrics>) -> Response<FrontBody> {
        match self {
            Self::Stream {
                object,
                policy,
                content_type,
                body,
            } => {
                let stream = Box::pin(body.map_err(io::Error::other));
                let mut response = response::with_status(
                    StatusCode::OK,
                    FrontBody::streaming(stream, object.key.clone(), Some(object.size), Some(Arc::clone(metrics))),
                );
                set_header(&mut response, header::CONTENT_TYPE, &content_type);
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(object.size));
                set_header(&mut response, header::CACHE_CONTROL, &policy.cache_control());
                set_validators(&mut response, &object);
                set_sidecar(&mut response, Some(&object), Some(policy));
                response
            }
            Self::NotModified { object, policy } => {
                let mut response = response::with_status(StatusCode::NOT_MODIFIED, FrontBody::empty());
                set_header(&mut response, header::CACHE_CONTROL, &policy.cache_control());
                set_validators(&mut response, &object);
                set_sidecar(&mut response, Some(&object), Some(policy));
                response
            }
            Self::Redirect {
                object,
                visibility,
                signed,
            } => {
                metrics.record_signed_redirect();
                let policy = CachePolicy {
                    visibility,
                    max_age: signed.remaining_secs(now),
                    stale_while_revalidate: None,
                    immutable: false,
                };
                let mut response = response::with_status(StatusCode::FOUND, FrontBody::empty());
                set_header(&mut response, header::LOCATION, &signed.url);
                set_header(&mut response, header::CACHE_CONTROL, &policy.cache_control());
                set_header(&mut response, header::EXPIRES, &format_http_date(signed.expires_at));
                set_sidecar(&mut response, object.as_ref(), Some(policy));
                response
            }
            Self::Moved { location } => {
                let mut response =
                    response::with_status(StatusCode::MOVED_PERMANENTLY, FrontBody::empty());
                set_header(&mut response, header::LOCATION, &location);
                set_sidecar(&mut response, None, None);
                response
            }
            Self::NotFound => response::not_found(),
            Self::InternalError => response::internal_error(),
        }
    }
}

/// Re-encode a decoded path for use as a `Location`, one segment at a time.
fn encode_location(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn set_validators(response: &mut Response<FrontBody>, object: &ObjectMetadata) {
    set_header(response, header::ETAG, &object.etag);
    set_header(response, header::LAST_MODIFIED, &format_http_date(object.last_modified));
}

/// Attach `Vary` and the `X-File-Info` sidecar.
fn set_sidecar(
    response: &mut Response<FrontBody>,
    object: Option<&ObjectMetadata>,
    policy: Option<CachePolicy>,
) {
    response.headers_mut().insert(
        header::VARY,
        HeaderValue::from_static(VARY_ACCEPT_ENCODING),
    );

    let info = FileInfo {
        etag: object.map(|o| o.etag.clone()),
        last_modified: object.map(|o| format_http_date(o.last_modified)),
        policy,
        ..FileInfo::default()
    };
    match info.encode() {
        Ok(encoded) => set_header(response, HeaderName::from_static(FILE_INFO_HEADER), &encoded),
        Err(e) => warn!(error = %e, "failed to encode file info"),
    }
}

/// Turns requests into [`ResponseDecision`]s.
#[derive(Debug, Clone)]
pub struct Composer {
    fetcher: ObjectFetcher,
    signed_urls: SignedUrlCache,
    resolver: PathResolver,
    bucket: String,
    delivery: StaticDelivery,
    inline_extensions: Vec<String>,
    metrics: Arc<Metrics>,
}

impl Composer {
    /// Create a composer for the bucket and policies in `config`.
    #[must_use]
    pub fn new(
        config: &OriginConfig,
        fetcher: ObjectFetcher,
        signed_urls: SignedUrlCache,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            signed_urls,
            resolver: PathResolver::new(config.page_fallback),
            bucket: config.bucket_name.clone(),
            delivery: config.static_delivery,
            inline_extensions: config.inline_extensions.clone(),
            metrics,
        }
    }

    /// Decide the response for a tenant request.
    pub async fn compose(&self, tenant: &TenantKey, ctx: &RequestContext) -> ResponseDecision {
        for candidate in self.resolver.resolve(&ctx.raw_path) {
            match candidate {
                CandidatePath::Redirect(target) => {
                    let location = if ctx.is_dev {
                        encode_location(&format!("{}{target}", tenant.dev_prefix()))
                    } else {
                        encode_location(&target)
                    };
                    debug!(%tenant, location, "redirecting to directory");
                    return ResponseDecision::Moved { location };
                }
                CandidatePath::Object(relative) => {
                    let key = tenant.object_key(&relative);
                    match self.fetcher.probe(&key).await {
                        CandidateOutcome::Found(object) => {
                            return self.decide(&relative, object, ctx).await;
                        }
                        CandidateOutcome::Absent => {
                            self.metrics.record_resolution_miss();
                            debug!(key, "candidate absent");
                        }
                        CandidateOutcome::Failed(e) => {
                            error!(key, error = %e, "object lookup failed");
                            return ResponseDecision::InternalError;
                        }
                    }
                }
            }
        }

        warn!(%tenant, path = %ctx.raw_path, "no candidate found");
        ResponseDecision::NotFound
    }

    /// Decide the response for a `/bucket/:bucket/*key` redirect.
    pub async fn bucket_redirect(&self, bucket: &str, key: &str) -> ResponseDecision {
        match self.signed_urls.get(bucket, key).await {
            Ok(signed) => ResponseDecision::Redirect {
                object: None,
                visibility: Visibility::Private,
                signed,
            },
            Err(e) => {
                error!(bucket, key, error = %e, "failed to sign bucket URL");
                ResponseDecision::InternalError
            }
        }
    }

    async fn decide(
        &self,
        relative: &str,
        object: ObjectMetadata,
        ctx: &RequestContext,
    ) -> ResponseDecision {
        let ext = extension(relative);
        let content_type = if matches!(ext.as_deref(), Some("html" | "htm")) {
            HTML_CONTENT_TYPE.to_owned()
        } else {
            object.content_type.clone()
        };
        let class = classify(relative, Some(&content_type));
        let policy = class.policy();

        if ctx.conditional.is_not_modified(&object.etag, object.last_modified) {
            debug!(key = %object.key, "client copy is current");
            return ResponseDecision::NotModified { object, policy };
        }

        let inline = class == AssetClass::Html
            || self.delivery == StaticDelivery::Stream
            || ext.is_some_and(|ext| self.inline_extensions.contains(&ext));

        if inline {
            return match self.fetcher.open(&object.key).await {
                Ok(body) => {
                    debug!(key = %object.key, %class, size = object.size, "streaming object");
                    ResponseDecision::Stream {
                        object,
                        policy,
                        content_type,
                        body,
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!(key = %object.key, "object vanished before it could be opened");
                    ResponseDecision::NotFound
                }
                Err(e) => {
                    error!(key = %object.key, error = %e, "failed to open object");
                    ResponseDecision::InternalError
                }
            };
        }

        match self.signed_urls.get(&self.bucket, &object.key).await {
            Ok(signed) => {
                debug!(key = %object.key, %class, "redirecting to signed URL");
                ResponseDecision::Redirect {
                    object: Some(object),
                    visibility: policy.visibility,
                    signed,
                }
            }
            Err(e) => {
                error!(key = %object.key, error = %e, "failed to sign object URL");
                ResponseDecision::InternalError
            }
        }
    }
}
