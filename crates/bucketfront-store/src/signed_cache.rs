//! Single-flight cache of signed read URLs.
//!
//! Signing is comparatively expensive and, against a real object store,
//! may involve a network round trip. The cache keeps one signed URL per
//! `(bucket, key)` and hands it out for as long as it still has at least
//! `refresh_skew` of life left. A client that receives a cached URL is
//! therefore guaranteed that much time to follow it.
//!
//! Concurrent misses for the same key share one signing call. A failed
//! signing call is reported to every waiter and nothing is cached, so the
//! next request tries again.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::signer::{SignRequest, UrlSigner};

/// Longest lifetime a signed URL may be given.
const MAX_TTL: StdDuration = StdDuration::from_secs(604_800);

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A signed URL and the instant it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    /// The URL to redirect to.
    pub url: String,
    /// Expiry of the signature.
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    /// Whole seconds of validity left at `now`, zero once expired.
    #[must_use]
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry.
    pub hits: u64,
    /// Lookups that started a signing call.
    pub misses: u64,
    /// Lookups that waited on another caller's signing call.
    pub joined: u64,
    /// Signing calls that failed.
    pub failures: u64,
    /// Entries currently held.
    pub entries: usize,
}

/// Timing parameters for [`SignedUrlCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedUrlCacheConfig {
    /// Lifetime given to newly signed URLs.
    pub ttl: StdDuration,
    /// Entries with less than this much life left are re-signed.
    pub refresh_skew: StdDuration,
    /// Upper bound on one signing call.
    pub timeout: StdDuration,
}

impl Default for SignedUrlCacheConfig {
    fn default() -> Self {
        Self {
            ttl: StdDuration::from_secs(3_600),
            refresh_skew: StdDuration::from_secs(600),
            timeout: StdDuration::from_secs(10),
        }
    }
}

type CacheKey = (String, String);

type PendingSign = Shared<BoxFuture<'static, StoreResult<SignedUrl>>>;

/// Memoizes signed URLs per `(bucket, key)`.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct SignedUrlCache {
    inner: Arc<Inner>,
}

struct Inner {
    signer: Arc<dyn UrlSigner>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    refresh_skew: TimeDelta,
    timeout: StdDuration,
    entries: DashMap<CacheKey, SignedUrl>,
    in_flight: Mutex<HashMap<CacheKey, PendingSign>>,
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    failures: AtomicU64,
}

impl std::fmt::Debug for SignedUrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlCache")
            .field("ttl", &self.inner.ttl)
            .field("refresh_skew", &self.inner.refresh_skew)
            .field("entries", &self.inner.entries.len())
            .finish_non_exhaustive()
    }
}

impl SignedUrlCache {
    /// Create a cache in front of `signer` using the wall clock.
    pub fn new(signer: Arc<dyn UrlSigner>, config: SignedUrlCacheConfig) -> Self {
        Self::with_clock(signer, Arc::new(SystemClock), config)
    }

    /// Create a cache with an explicit clock.
    pub fn with_clock(
        signer: Arc<dyn UrlSigner>,
        clock: Arc<dyn Clock>,
        config: SignedUrlCacheConfig,
    ) -> Self {
        let ttl = TimeDelta::from_std(config.ttl.min(MAX_TTL)).unwrap_or_default();
        let refresh_skew = TimeDelta::from_std(config.refresh_skew.min(MAX_TTL)).unwrap_or_default();
        Self {
            inner: Arc::new(Inner {
                signer,
                clock,
                ttl,
                refresh_skew,
                timeout: config.timeout,
                entries: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                joined: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// The clock this cache reads.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Return a signed URL for `key` with at least `refresh_skew` of life
    /// left, signing a new one if needed.
    ///
    /// # Errors
    ///
    /// Returns the signer's error, or [`StoreError::Timeout`] if signing did
    /// not finish in time.
    pub async fn get(&self, bucket: &str, key: &str) -> StoreResult<SignedUrl> {
        let cache_key = (bucket.to_owned(), key.to_owned());
        let now = self.inner.clock.now();

        if let Some(hit) = self.inner.fresh(&cache_key, now) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            // A signing call may have completed while we waited for the lock.
            if let Some(hit) = self.inner.fresh(&cache_key, now) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            if let Some(pending) = in_flight.get(&cache_key) {
                self.inner.joined.fetch_add(1, Ordering::Relaxed);
                pending.clone()
            } else {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(bucket, key, "signing read URL");
                let pending = Inner::sign(Arc::clone(&self.inner), cache_key.clone())
                    .boxed()
                    .shared();
                in_flight.insert(cache_key, pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Drop entries that would no longer be handed out. Returns how many
    /// were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|_, entry| self.inner.is_fresh(entry, now));
        before.saturating_sub(self.inner.entries.len())
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            joined: self.inner.joined.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }
}

impl Inner {
    fn is_fresh(&self, entry: &SignedUrl, now: DateTime<Utc>) -> bool {
        now <= entry.expires_at - self.refresh_skew
    }

    fn fresh(&self, cache_key: &CacheKey, now: DateTime<Utc>) -> Option<SignedUrl> {
        self.entries
            .get(cache_key)
            .filter(|entry| self.is_fresh(entry.value(), now))
            .map(|entry| entry.value().clone())
    }

    async fn sign(inner: Arc<Self>, cache_key: CacheKey) -> StoreResult<SignedUrl> {
        let issued_at = inner.clock.now();
        let expires_at = issued_at + inner.ttl;
        let request = SignRequest {
            bucket: &cache_key.0,
            key: &cache_key.1,
            issued_at,
            expires_at,
        };

        let result =
            match tokio::time::timeout(inner.timeout, inner.signer.sign_read_url(&request)).await {
                Ok(signed) => signed.map(|url| SignedUrl { url, expires_at }),
                Err(_) => Err(StoreError::Timeout {
                    operation: "sign",
                    key: cache_key.1.clone(),
                    timeout_ms: u64::try_from(inner.timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };

        let mut in_flight = inner.in_flight.lock();
        match &result {
            Ok(signed) => {
                inner.entries.insert(cache_key.clone(), signed.clone());
            }
            Err(e) => {
                inner.failures.fetch_add(1, Ordering::Relaxed);
                warn!(bucket = %cache_key.0, key = %cache_key.1, error = %e, "signing failed");
            }
        }
        in_flight.remove(&cache_key);
        drop(in_flight);

        result
    }
}
