//! Per-service counters exposed in Prometheus text format.
//!
//! Every [`Metrics`] owns its own [`Registry`], so an origin and an edge in
//! one process (as in the integration tests) never share counters.

use std::fmt;

use bucketfront_store::CacheStats;
use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::error;

use crate::body::FrontBody;
use crate::response;

/// `Content-Type` of the text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Status classes counted by `bucketfront_responses_total`.
const STATUS_CLASSES: [&str; 4] = ["2xx", "3xx", "4xx", "5xx"];

/// Counters shared by every request a service handles.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounter,
    responses: IntCounterVec,
    resolution_misses: IntCounter,
    not_modified: IntCounter,
    signed_redirects: IntCounter,
    stream_errors: IntCounter,
    auth_bypasses: IntCounter,
    edge_hits: IntCounter,
    edge_misses: IntCounter,
    signing: SigningMetrics,
}

/// Mirrors of the signed URL cache's own counters, refreshed on render.
#[derive(Clone)]
struct SigningMetrics {
    registry: Registry,
    hits: IntCounter,
    misses: IntCounter,
    failures: IntCounter,
    entries: IntGauge,
}

/// A point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests received.
    pub requests: u64,
    /// Responses by status class, `[2xx, 3xx, 4xx, 5xx]`.
    pub by_status: [u64; 4],
    /// Candidates that turned out to be absent.
    pub resolution_misses: u64,
    /// 304 responses.
    pub not_modified: u64,
    /// 302 responses to signed URLs.
    pub signed_redirects: u64,
    /// Bodies aborted by a read error after headers were sent.
    pub stream_errors: u64,
    /// Edge responses passed through for the auth flow.
    pub auth_bypasses: u64,
    /// Edge store hits.
    pub edge_hits: u64,
    /// Edge store misses.
    pub edge_misses: u64,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl SigningMetrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let entries = IntGauge::new(
            "bucketfront_signed_url_cache_entries",
            "Signed URLs currently cached.",
        )?;
        registry.register(Box::new(entries.clone()))?;

        Ok(Self {
            hits: counter(
                &registry,
                "bucketfront_signed_url_cache_hits_total",
                "Signed URL lookups served from cache.",
            )?,
            misses: counter(
                &registry,
                "bucketfront_signed_url_cache_misses_total",
                "Signed URL lookups that signed a new URL.",
            )?,
            failures: counter(
                &registry,
                "bucketfront_signing_failures_total",
                "Signing calls that failed.",
            )?,
            entries,
            registry,
        })
    }

    /// Bring the mirrors up to the cache's current values.
    fn update(&self, stats: CacheStats) {
        catch_up(&self.hits, stats.hits + stats.joined);
        catch_up(&self.misses, stats.misses);
        catch_up(&self.failures, stats.failures);
        self.entries
            .set(i64::try_from(stats.entries).unwrap_or(i64::MAX));
    }
}

/// Advance a mirrored counter to `value`. Counters never go backwards.
fn catch_up(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

impl Metrics {
    /// Create zeroed counters in a fresh registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let responses = IntCounterVec::new(
            Opts::new("bucketfront_responses_total", "Responses by status class."),
            &["class"],
        )?;
        registry.register(Box::new(responses.clone()))?;
        for class in STATUS_CLASSES {
            responses.with_label_values(&[class]);
        }

        Ok(Self {
            requests: counter(&registry, "bucketfront_requests_total", "Requests received.")?,
            responses,
            resolution_misses: counter(
                &registry,
                "bucketfront_resolution_misses_total",
                "Candidate objects that did not exist.",
            )?,
            not_modified: counter(&registry, "bucketfront_not_modified_total", "304 responses.")?,
            signed_redirects: counter(
                &registry,
                "bucketfront_signed_redirects_total",
                "Redirects to signed URLs.",
            )?,
            stream_errors: counter(
                &registry,
                "bucketfront_stream_errors_total",
                "Bodies aborted mid-transfer.",
            )?,
            auth_bypasses: counter(
                &registry,
                "bucketfront_auth_bypasses_total",
                "Auth-flow responses passed through untouched.",
            )?,
            edge_hits: counter(&registry, "bucketfront_edge_hits_total", "Edge store hits.")?,
            edge_misses: counter(&registry, "bucketfront_edge_misses_total", "Edge store misses.")?,
            signing: SigningMetrics::new()?,
            registry,
        })
    }

    /// Count an incoming request.
    pub fn record_request(&self) {
        self.requests.inc();
    }

    /// Count a response by its status class.
    pub fn record_status(&self, status: StatusCode) {
        let class = match status.as_u16() {
            200..=299 => STATUS_CLASSES[0],
            300..=399 => STATUS_CLASSES[1],
            400..=499 => STATUS_CLASSES[2],
            500..=599 => STATUS_CLASSES[3],
            _ => return,
        };
        self.responses.with_label_values(&[class]).inc();
        if status == StatusCode::NOT_MODIFIED {
            self.not_modified.inc();
        }
    }

    /// Count a candidate that did not exist.
    pub fn record_resolution_miss(&self) {
        self.resolution_misses.inc();
    }

    /// Count a redirect to a signed URL.
    pub fn record_signed_redirect(&self) {
        self.signed_redirects.inc();
    }

    /// Count a body that failed mid-transfer.
    pub fn record_stream_error(&self) {
        self.stream_errors.inc();
    }

    /// Count an auth-flow pass-through at the edge.
    pub fn record_auth_bypass(&self) {
        self.auth_bypasses.inc();
    }

    /// Count an edge store hit.
    pub fn record_edge_hit(&self) {
        self.edge_hits.inc();
    }

    /// Count an edge store miss.
    pub fn record_edge_miss(&self) {
        self.edge_misses.inc();
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.get(),
            by_status: STATUS_CLASSES.map(|class| self.responses.with_label_values(&[class]).get()),
            resolution_misses: self.resolution_misses.get(),
            not_modified: self.not_modified.get(),
            signed_redirects: self.signed_redirects.get(),
            stream_errors: self.stream_errors.get(),
            auth_bypasses: self.auth_bypasses.get(),
            edge_hits: self.edge_hits.get(),
            edge_misses: self.edge_misses.get(),
        }
    }

    /// Render the counters (and the signing cache's, if given) in the
    /// Prometheus text exposition format.
    pub fn render(&self, signing: Option<CacheStats>) -> prometheus::Result<String> {
        let mut families = self.registry.gather();
        if let Some(stats) = signing {
            self.signing.update(stats);
            families.extend(self.signing.registry.gather());
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Answer a scrape of the metrics endpoint.
pub(crate) fn metrics_response(metrics: &Metrics, signing: Option<CacheStats>) -> Response<FrontBody> {
    match metrics.render(signing) {
        Ok(text) => {
            let mut response = response::with_status(StatusCode::OK, FrontBody::from_string(text));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(TEXT_FORMAT),
            );
            response
        }
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            response::internal_error()
        }
    }
}
