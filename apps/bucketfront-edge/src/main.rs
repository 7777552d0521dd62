//! bucketfront edge cache.
//!
//! A caching proxy in front of the origin. It normalizes cache headers,
//! keeps large binaries in a local store and lets identity-proxy traffic
//! through untouched.
//!
//! # Usage
//!
//! ```text
//! UPSTREAM_URL=http://origin:8080 PORT=8081 bucketfront-edge
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `LISTEN` / `PORT` | `0.0.0.0:8080` | Bind address |
//! | `UPSTREAM_URL` | `http://127.0.0.1:8080` | Origin base URL |
//! | `EDGE_MEMORY_THRESHOLD` | `524288` | Larger bodies spill to disk |
//! | `EDGE_MAX_OBJECT_SIZE` | `268435456` | Larger bodies are not stored |
//! | `AUTH_HOSTS` | `iap.googleapis.com` | Identity-provider hosts |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bucketfront_core::EdgeConfig;
use bucketfront_http::{EdgeService, init_tracing};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Server version reported at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often expired entries are dropped from the edge store.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn spawn_purge_task(service: &EdgeService) {
    let cache = std::sync::Arc::clone(service.cache());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = cache.purge_expired();
            if purged > 0 {
                debug!(purged, "purged expired edge entries");
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = EdgeConfig::from_env().context("invalid configuration")?;

    init_tracing(&config.log_level)
        .with_context(|| format!("invalid log level filter: {}", config.log_level))?;

    info!(
        listen = %config.listen,
        upstream = %config.upstream_url,
        memory_threshold = config.memory_threshold,
        max_object_size = config.max_object_size,
        version = VERSION,
        "starting bucketfront edge",
    );

    let service = EdgeService::new(&config).context("failed to build edge service")?;
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
