//! Integration tests for the bucketfront origin and edge.
//!
//! Every test starts its own servers in-process on ephemeral ports and talks
//! to them over real HTTP, so no external setup is needed:
//!
//! ```text
//! cargo test -p bucketfront-integration
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use bucketfront_core::{DeploymentEnv, EdgeConfig, OriginConfig};
use bucketfront_http::{EdgeService, FrontBody, OriginService};
use bucketfront_store::{MemoryStore, SigV4UrlSigner};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

static INIT: Once = Once::new();

/// Tenant used by every fixture.
pub const TENANT_PREFIX: &str = "/gen.dev/local-test";

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A server running in the background until dropped.
pub struct TestServer {
    /// Bound address.
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    /// Absolute URL for `path` on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn spawn<S>(service: S) -> TestServer
where
    S: hyper::service::Service<
            Request<hyper::body::Incoming>,
            Response = Response<FrontBody>,
            Error = Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(bucketfront_http::serve(listener, service, async move {
        let _ = rx.await;
    }));
    TestServer {
        addr,
        _shutdown: tx,
    }
}

/// The bucket used by the end-to-end scenarios.
#[must_use]
pub fn seed_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.put(
        "gen.dev/local-test/index.html",
        "<h1>local test</h1>",
        "text/html",
    );
    store.put(
        "gen.dev/local-test/a-directory/index.html",
        "<h1>a directory</h1>",
        "text/html",
    );
    store.put(
        "gen.dev/local-test/a-directory/page.html",
        "<h1>a page</h1>",
        "text/html",
    );
    store.put(
        "gen.dev/local-test/a-directory/page/index.html",
        "<h1>a page directory</h1>",
        "text/html",
    );
    store.put(
        "gen.dev/local-test/some-image.png",
        vec![0x89_u8, b'P', b'N', b'G'],
        "image/png",
    );
    store.put(
        "gen.dev/local-test/app.wasm",
        vec![0_u8, b'a', b's', b'm', 1, 0, 0, 0],
        "application/wasm",
    );
    store.put(
        "gen.dev/local-test/big.data",
        vec![42_u8; 4096],
        "application/octet-stream",
    );
    store
}

/// A dev-mode origin config signing URLs for `storage_endpoint`.
#[must_use]
pub fn dev_config(storage_endpoint: &str) -> OriginConfig {
    OriginConfig::builder()
        .env(DeploymentEnv::Dev)
        .storage_endpoint(storage_endpoint.to_owned())
        .storage_region("us-east-1".to_owned())
        .storage_access_key("GOOG1TESTKEY".to_owned())
        .storage_secret_key("test-secret".to_owned())
        .enable_bucket_route(true)
        .build()
}

/// Start an origin over `store`.
pub async fn spawn_origin(config: &OriginConfig, store: Arc<MemoryStore>) -> (TestServer, OriginService) {
    let signer = SigV4UrlSigner::new(
        &config.storage_endpoint,
        config.storage_region.clone(),
        config.storage_access_key.clone(),
        config.storage_secret_key.clone(),
    )
    .expect("signer");
    let service = OriginService::new(config, store, Arc::new(signer)).expect("origin service");
    (spawn(service.clone()).await, service)
}

/// Start an edge in front of `upstream`.
pub async fn spawn_edge(upstream: &TestServer) -> (TestServer, EdgeService) {
    let config = EdgeConfig::builder()
        .upstream_url(format!("http://{}", upstream.addr))
        .build();
    let service = EdgeService::new(&config).expect("edge client");
    (spawn(service.clone()).await, service)
}

/// A fake upstream answering every request with `respond`, counting hits.
pub async fn spawn_fake<F>(respond: F) -> (TestServer, Arc<AtomicUsize>)
where
    F: Fn(&Request<hyper::body::Incoming>) -> Response<FrontBody> + Clone + Send + Sync + 'static,
{
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let service = hyper::service::service_fn(move |req| {
        counter.fetch_add(1, Ordering::SeqCst);
        let response = respond(&req);
        async move { Ok::<_, Infallible>(response) }
    });
    (spawn(service).await, hits)
}

/// A fake object store returning `body` for every request.
pub async fn spawn_fake_store(body: &'static [u8]) -> (TestServer, Arc<AtomicUsize>) {
    spawn_fake(move |_| {
        let mut response = Response::new(FrontBody::from_bytes(Bytes::from_static(body)));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/octet-stream"),
        );
        response.headers_mut().insert(
            http::header::ETAG,
            http::HeaderValue::from_static("\"store-etag\""),
        );
        response
    })
    .await
}

/// A client that never follows redirects.
#[must_use]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client")
}

/// A client that follows redirects.
#[must_use]
pub fn following_client() -> reqwest::Client {
    reqwest::Client::builder().build().expect("client")
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

mod test_conditional;
mod test_dev_routing;
mod test_edge;
mod test_signed_urls;
