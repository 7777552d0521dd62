//! bucketfront origin server.
//!
//! Serves every tenant site out of one bucket. The tenant is taken from the
//! `Host` header (`sub.parent.tld` -> `parent.tld/sub/`) or, in dev mode, from
//! the first two path segments.
//!
//! # Usage
//!
//! ```text
//! ENV=dev BUCKET_ROOT=./bucket PORT=8080 bucketfront-origin
//! ```
//!
//! # Environment Variables
//!
//! See [`OriginConfig::from_env`] for the full list. The most common:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LISTEN` / `PORT` | `0.0.0.0:8080` | Bind address |
//! | `ENV` | `prod` | `dev` enables `/:parent/:sub/*path` routing |
//! | `BUCKET_NAME` | `static-sites` | Bucket holding every tenant |
//! | `BUCKET_ROOT` | *(unset)* | Directory holding a copy of the bucket |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bucketfront_core::OriginConfig;
use bucketfront_http::{OriginService, init_tracing};
use bucketfront_store::{FsStore, MemoryStore, ObjectStore, SigV4UrlSigner, UrlSigner};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often expired signed URLs are dropped from the cache.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Pick the object store backend.
fn build_store(config: &OriginConfig) -> Arc<dyn ObjectStore> {
    match &config.bucket_root {
        Some(root) => {
            info!(root, "serving bucket from directory");
            Arc::new(FsStore::new(root))
        }
        None => {
            warn!("BUCKET_ROOT is not set, serving an empty in-memory bucket");
            Arc::new(MemoryStore::new())
        }
    }
}

/// Build the signer for object URLs.
fn build_signer(config: &OriginConfig) -> Result<Arc<dyn UrlSigner>> {
    let signer = SigV4UrlSigner::new(
        &config.storage_endpoint,
        config.storage_region.clone(),
        config.storage_access_key.clone(),
        config.storage_secret_key.clone(),
    )
    .context("invalid STORAGE_ENDPOINT")?
    .with_virtual_hosted(config.storage_virtual_hosted);

    if !signer.has_credentials() {
        warn!("STORAGE_ACCESS_KEY / STORAGE_SECRET_KEY not set, signed redirects will fail");
    }

    Ok(Arc::new(signer))
}

/// Periodically drop expired signed URLs.
fn spawn_purge_task(service: &OriginService) {
    let signed_urls = service.signed_urls().clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = signed_urls.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired signed URLs");
            }
        }
    });
}

/// Perform a health check by connecting to the server and requesting the
/// health endpoint.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;

    let (mut reader, mut writer) = stream.into_split();

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n",
        bucketfront_http::router::HEALTH_PATH
    );
    writer.write_all(request.as_bytes()).await?;
    writer.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;

    if response.contains("200 OK") && response.contains("\"status\":\"running\"") {
        Ok(())
    } else {
        anyhow::bail!("unhealthy response from {addr}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = OriginConfig::from_env().context("invalid configuration")?;

    // Handle --health-check flag for Docker HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let addr = config.listen.replace("0.0.0.0", "127.0.0.1");
        let healthy = run_health_check(&addr).await.is_ok();
        std::process::exit(i32::from(!healthy));
    }

    init_tracing(&config.log_level)
        .with_context(|| format!("invalid log level filter: {}", config.log_level))?;

    info!(
        listen = %config.listen,
        env = ?config.env,
        bucket = %config.bucket_name,
        static_delivery = ?config.static_delivery,
        page_fallback = ?config.page_fallback,
        version = VERSION,
        "starting bucketfront origin",
    );

    let store = build_store(&config);
    let signer = build_signer(&config)?;
    let service =
        OriginService::new(&config, store, signer).context("failed to build origin service")?;
    spawn_purge_task(&service);

    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    bucketfront_http::serve(listener, service, async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    })
    .await;

    Ok(())
}
