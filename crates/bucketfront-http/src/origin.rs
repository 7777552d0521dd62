//! The origin HTTP service implementing hyper's `Service` trait.
//!
//! [`OriginService`] ties routing, composition and response rendering into a
//! single hyper-compatible service. It handles:
//!
//! 1. Health check and metrics interception
//! 2. Method filtering (only `GET` is served)
//! 3. Tenant routing via [`OriginRouter`]
//! 4. Candidate resolution and response composition via [`Composer`]
//! 5. Optional signed redirects for `/bucket/:bucket/*key`
//! 6. Common response headers (`X-Request-Id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bucketfront_core::{ConditionalHeaders, OriginConfig, RequestContext};
use bucketfront_store::{
    Clock, ObjectFetcher, ObjectStore, SignedUrlCache, SignedUrlCacheConfig, SystemClock,
    UrlSigner,
};
use http::header::{self, HeaderValue};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::{debug, info};
use uuid::Uuid;

use crate::body::FrontBody;
use crate::composer::Composer;
use crate::error::ServiceResult;
use crate::metrics::{Metrics, metrics_response};
use crate::response;
use crate::router::{OriginRouter, Route};

/// Value of the `Server` header on every response.
const SERVER_NAME: &str = "bucketfront";

/// The origin service.
///
/// Cloning is cheap; clones share the composer, the signed URL cache and the
/// metrics.
#[derive(Debug, Clone)]
pub struct OriginService {
    inner: Arc<OriginInner>,
}

#[derive(Debug)]
struct OriginInner {
    router: OriginRouter,
    composer: Composer,
    signed_urls: SignedUrlCache,
    metrics: Arc<Metrics>,
}

impl OriginService {
    /// Create a service serving `store` and signing with `signer`.
    pub fn new(
        config: &OriginConfig,
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn UrlSigner>,
    ) -> ServiceResult<Self> {
        Self::with_clock(config, store, signer, Arc::new(SystemClock))
    }

    /// Like [`OriginService::new`] with an explicit clock for the signed URL
    /// cache.
    pub fn with_clock(
        config: &OriginConfig,
        store: Arc<dyn ObjectStore>,
        signer: Arc<dyn UrlSigner>,
        clock: Arc<dyn Clock>,
    ) -> ServiceResult<Self> {
        let timeout = Duration::from_millis(config.store_timeout_ms);
        let metrics = Arc::new(Metrics::new()?);
        let signed_urls = SignedUrlCache::with_clock(
            signer,
            clock,
            SignedUrlCacheConfig {
                ttl: Duration::from_secs(config.signed_url_ttl_secs),
                refresh_skew: Duration::from_secs(config.signed_url_refresh_skew_secs),
                timeout,
            },
        );
        let composer = Composer::new(
            config,
            ObjectFetcher::new(store, timeout),
            signed_urls.clone(),
            Arc::clone(&metrics),
        );

        Ok(Self {
            inner: Arc::new(OriginInner {
                router: OriginRouter::new(config.is_dev(), config.enable_bucket_route),
                composer,
                signed_urls,
                metrics,
            }),
        })
    }

    /// Request and outcome counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// The signed URL cache, for periodic purging.
    #[must_use]
    pub fn signed_urls(&self) -> &SignedUrlCache {
        &self.inner.signed_urls
    }

    /// Process one request. The request body is ignored.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<FrontBody> {
        let inner = &self.inner;
        let request_id = Uuid::new_v4().to_string();
        inner.metrics.record_request();

        let (parts, _) = req.into_parts();
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())
            .unwrap_or_default();
        debug!(method = %parts.method, uri = %parts.uri, host, request_id, "processing request");

        let response = match inner.router.route(&parts.method, Some(host), parts.uri.path()) {
            Route::Health => health_check_response(),
            Route::Metrics => metrics_response(&inner.metrics, Some(inner.signed_urls.stats())),
            Route::MethodNotAllowed => response::method_not_allowed(),
            Route::NotFound => {
                debug!(host, path = parts.uri.path(), request_id, "no tenant for request");
                response::not_found()
            }
            Route::Bucket { bucket, key } => {
                info!(bucket, key, request_id, "routed bucket request");
                inner
                    .composer
                    .bucket_redirect(&bucket, &key)
                    .await
                    .into_response(inner.signed_urls.now(), &inner.metrics)
            }
            Route::Tenant { tenant, path, dev } => {
                let ctx = RequestContext {
                    host: host.to_owned(),
                    raw_path: path,
                    conditional: ConditionalHeaders::from_header_pairs(
                        parts
                            .headers
                            .iter()
                            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
                    ),
                    is_dev: dev,
                };
                info!(%tenant, path = %ctx.raw_path, request_id, "routed request");
                inner
                    .composer
                    .compose(&tenant, &ctx)
                    .await
                    .into_response(inner.signed_urls.now(), &inner.metrics)
            }
        };

        let response = add_common_headers(response, &request_id);
        inner.metrics.record_status(response.status());
        response
    }
}

impl Service<Request<Incoming>> for OriginService {
    type Response = Response<FrontBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

fn health_check_response() -> Response<FrontBody> {
    let mut response = response::with_status(
        StatusCode::OK,
        FrontBody::from_string(r#"{"status":"running","service":"origin"}"#),
    );
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}


/// Add the headers every origin response carries.
fn add_common_headers(mut response: Response<FrontBody>, request_id: &str) -> Response<FrontBody> {
    let headers = response.headers_mut();
    if let Ok(hv) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", hv);
    }
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}
