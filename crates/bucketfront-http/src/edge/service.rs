//! The edge HTTP service.
//!
//! [`EdgeService`] proxies client requests to the origin and post-processes
//! the answers:
//!
//! 1. Auth-flow requests and responses pass through untouched.
//! 2. Large binary requests are answered from the [`EdgeCache`] when
//!    possible (`X-Cache-Status: HIT`).
//! 3. Everything else is fetched upstream and normalized. Large binary
//!    `200`s are teed into the cache while they stream to the client
//!    (`X-Cache-Status: MISS`).

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bucketfront_core::sidecar::FILE_INFO_HEADER;
use bucketfront_core::{AssetClass, EdgeConfig, FileInfo, classify};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::Service;
use pin_project_lite::pin_project;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::normalizer::{AuthBypass, CACHE_STATUS_HEADER, Normalization, normalize_headers};
use super::store::{EdgeCache, EdgeWriter, WriteProgress, cache_key};
use crate::body::{BodyStream, FrontBody};
use crate::error::ServiceResult;
use crate::metrics::{Metrics, metrics_response};
use crate::response;
use crate::router::{HEALTH_PATH, METRICS_PATH};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The edge service.
#[derive(Debug, Clone)]
pub struct EdgeService {
    inner: Arc<EdgeInner>,
}

#[derive(Debug)]
struct EdgeInner {
    client: reqwest::Client,
    upstream: String,
    bypass: AuthBypass,
    cache: Arc<EdgeCache>,
    metrics: Arc<Metrics>,
}

/// An upstream answer reduced to what the edge needs.
struct Upstream {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
}

impl Upstream {
    fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = Box::pin(response.bytes_stream().map_err(io::Error::other));
        Self {
            status,
            headers,
            body,
        }
    }
}

impl EdgeService {
    /// Create an edge in front of `config.upstream_url`.
    pub fn new(config: &EdgeConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            inner: Arc::new(EdgeInner {
                client,
                upstream: config.upstream_url.trim_end_matches('/').to_owned(),
                bypass: AuthBypass::from_config(config),
                cache: Arc::new(EdgeCache::new(config.memory_threshold, config.max_object_size)),
                metrics: Arc::new(Metrics::new()?),
            }),
        })
    }

    /// Request and cache counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// The edge object store.
    #[must_use]
    pub fn cache(&self) -> &Arc<EdgeCache> {
        &self.inner.cache
    }

    /// Process one request. The request body is ignored.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<FrontBody> {
        let inner = &self.inner;
        let request_id = Uuid::new_v4().to_string();
        inner.metrics.record_request();

        let (parts, _) = req.into_parts();
        debug!(method = %parts.method, uri = %parts.uri, request_id, "processing edge request");

        let response = match (parts.method == Method::GET, parts.uri.path()) {
            (true, HEALTH_PATH) => health_check_response(),
            (true, METRICS_PATH) => metrics_response(&inner.metrics, None),
            (false, _) => response::method_not_allowed(),
            (true, _) => inner.proxy(&parts, &request_id).await,
        };

        inner.metrics.record_status(response.status());
        response
    }
}

impl EdgeInner {
    async fn proxy(&self, parts: &http::request::Parts, request_id: &str) -> Response<FrontBody> {
        let path = parts.uri.path();
        let path_and_query = parts.uri.path_and_query().map_or(path, |pq| pq.as_str());
        let url = format!("{}{path_and_query}", self.upstream);

        if self.bypass.is_auth_request(&parts.uri) {
            self.metrics.record_auth_bypass();
            info!(path, request_id, "auth request, passing through");
            return match self.fetch(&url, &parts.headers).await {
                Ok(upstream) => relay(upstream),
                Err(response) => response,
            };
        }

        let large = classify(path, None) == AssetClass::LargeBinary;
        let key = cache_key(
            &parts.method,
            &format!("{}{path_and_query}", request_host(parts)),
            parts
                .headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
        );

        if large {
            if let Some(hit) = self.cache.get(&key).await {
                self.metrics.record_edge_hit();
                debug!(key, request_id, "edge cache hit");
                let mut response = response::with_status(
                    StatusCode::OK,
                    FrontBody::streaming(hit.body, key, Some(hit.size), Some(Arc::clone(&self.metrics))),
                );
                *response.headers_mut() = hit.headers;
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(hit.size));
                set_cache_status(&mut response, "HIT");
                return response;
            }
            self.metrics.record_edge_miss();
        }

        let upstream = match self.fetch(&url, &parts.headers).await {
            Ok(upstream) => upstream,
            Err(response) => return response,
        };

        if self.bypass.is_auth_response(upstream.status, &upstream.headers) {
            self.metrics.record_auth_bypass();
            info!(path, status = %upstream.status, request_id, "auth response, passing through");
            return relay(upstream);
        }

        let mut upstream = if large {
            match self.follow_store_redirect(upstream, &parts.headers, request_id).await {
                Ok(upstream) => upstream,
                Err(response) => return response,
            }
        } else {
            upstream
        };

        let status = upstream.status;
        let normalization = normalize_headers(&mut upstream.headers, status, path);
        let size = content_length(&upstream.headers);

        if !large {
            return relay(upstream);
        }

        let writer = match normalization {
            Normalization::Applied { policy } if status == StatusCode::OK => self.cache.writer(
                key.clone(),
                upstream.headers.clone(),
                Duration::from_secs(policy.max_age),
                size,
            ),
            _ => None,
        };
        let body = match writer {
            Some(writer) => Box::pin(TeeStream::new(upstream.body, writer)) as BodyStream,
            None => upstream.body,
        };

        let mut response = response::with_status(
            status,
            FrontBody::streaming(body, key, size, Some(Arc::clone(&self.metrics))),
        );
        *response.headers_mut() = upstream.headers;
        set_cache_status(&mut response, "MISS");
        response
    }

    /// Fetch `url` from the origin with the client's headers.
    async fn fetch(&self, url: &str, client_headers: &HeaderMap) -> Result<Upstream, Response<FrontBody>> {
        let mut headers = client_headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        match self.client.get(url).headers(headers).send().await {
            Ok(response) => Ok(Upstream::from_reqwest(response)),
            Err(e) => {
                error!(url, error = %e, "upstream request failed");
                Err(response::text(StatusCode::BAD_GATEWAY, "Bad Gateway"))
            }
        }
    }

    /// When the origin answers a large binary request with a redirect to the
    /// object store, fetch the object directly so it can be cached here.
    ///
    /// The origin's validators travel on with the object; its redirect
    /// policy does not, because the bytes outlive the signed URL.
    async fn follow_store_redirect(
        &self,
        upstream: Upstream,
        client_headers: &HeaderMap,
        request_id: &str,
    ) -> Result<Upstream, Response<FrontBody>> {
        if !upstream.status.is_redirection() {
            return Ok(upstream);
        }
        let Some(location) = upstream
            .headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|l| l.starts_with("http://") || l.starts_with("https://"))
            .filter(|l| !self.bypass.is_auth_location(l))
        else {
            return Ok(upstream);
        };

        debug!(location, request_id, "fetching redirected object");
        let mut request = self.client.get(location);
        if let Some(encoding) = client_headers.get(header::ACCEPT_ENCODING) {
            request = request.header(header::ACCEPT_ENCODING, encoding.clone());
        }
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(location, error = %e, "redirected object fetch failed");
                return Err(response::text(StatusCode::BAD_GATEWAY, "Bad Gateway"));
            }
        };

        let mut object = Upstream::from_reqwest(response);
        let validators = upstream
            .headers
            .get(FILE_INFO_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| FileInfo::parse(raw).ok())
            .map(|info| FileInfo {
                policy: None,
                ..info
            });
        object.headers.remove(FILE_INFO_HEADER);
        if let Some(encoded) = validators.and_then(|info| info.encode().ok()) {
            if let Ok(value) = HeaderValue::from_str(&encoded) {
                object
                    .headers
                    .insert(HeaderName::from_static(FILE_INFO_HEADER), value);
            }
        }
        Ok(object)
    }
}

impl Service<Request<Incoming>> for EdgeService {
    type Response = Response<FrontBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

/// Send an upstream answer on as it came.
fn relay(upstream: Upstream) -> Response<FrontBody> {
    let size = content_length(&upstream.headers);
    let mut response = response::with_status(
        upstream.status,
        FrontBody::streaming(upstream.body, "upstream", size, None),
    );
    *response.headers_mut() = upstream.headers;
    response
}

fn request_host(parts: &http::request::Parts) -> &str {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn set_cache_status(response: &mut Response<FrontBody>, status: &'static str) {
    response.headers_mut().insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(status),
    );
}

fn health_check_response() -> Response<FrontBody> {
    let mut response = response::with_status(
        StatusCode::OK,
        FrontBody::from_string(r#"{"status":"running","service":"edge"}"#),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}


pin_project! {
    /// Relays a body stream and feeds it to the edge store. The body is
    /// stored once it has been read in full without error.
    struct TeeStream<S> {
        #[pin]
        inner: S,
        writer: Option<EdgeWriter>,
    }
}

impl<S> TeeStream<S> {
    fn new(inner: S, writer: EdgeWriter) -> Self {
        Self {
            inner,
            writer: Some(writer),
        }
    }
}

impl<S> Stream for TeeStream<S>
where
    S: Stream<Item = Result<Bytes, io::Error>>,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let item = ready!(this.inner.poll_next(cx));

        match &item {
            Some(Ok(chunk)) => {
                let progress = this
                    .writer
                    .as_mut()
                    .map_or(WriteProgress::Abandoned, |writer| writer.write(chunk));
                if progress != WriteProgress::Pending {
                    this.writer.take();
                }
            }
            Some(Err(e)) => {
                if this.writer.take().is_some() {
                    warn!(error = %e, "upstream body failed, not storing");
                }
            }
            None => {
                if let Some(writer) = this.writer.take() {
                    writer.finish();
                }
            }
        }

        Poll::Ready(item)
    }
}
