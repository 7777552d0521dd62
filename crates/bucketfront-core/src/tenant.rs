//! Tenant identification.
//!
//! A tenant is a logical site addressed as `sub.parent.tld`. Every object that
//! belongs to it lives under the bucket prefix `parent.tld/sub/`.

use std::fmt;

/// Minimum number of host labels required in production (`sub.parent.tld`).
const MIN_HOST_LABELS: usize = 3;

/// The `(parent_domain, sub_domain)` pair identifying a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantKey {
    /// Everything after the first host label, e.g. `gen.dev`.
    pub parent_domain: String,
    /// The first host label, e.g. `local-test`.
    pub sub_domain: String,
}

impl TenantKey {
    /// Create a tenant key from explicit parts (used by dev-mode routing).
    #[must_use]
    pub fn new(parent_domain: impl Into<String>, sub_domain: impl Into<String>) -> Self {
        Self {
            parent_domain: parent_domain.into(),
            sub_domain: sub_domain.into(),
        }
    }

    /// Derive the tenant from a `Host` header value.
    ///
    /// The port and any trailing dot are ignored and the host is lower-cased.
    /// Returns `None` when the host has fewer than three labels or contains an
    /// empty label.
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketfront_core::TenantKey;
    ///
    /// let tenant = TenantKey::from_host("docs.gen.dev:8080").unwrap();
    /// assert_eq!(tenant.sub_domain, "docs");
    /// assert_eq!(tenant.parent_domain, "gen.dev");
    /// assert!(TenantKey::from_host("gen.dev").is_none());
    /// ```
    #[must_use]
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.split(':').next().unwrap_or(host);
        let host = host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase();

        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() < MIN_HOST_LABELS || labels.iter().any(|l| l.is_empty()) {
            return None;
        }

        Some(Self {
            sub_domain: labels[0].to_owned(),
            parent_domain: labels[1..].join("."),
        })
    }

    /// The bucket key for `relative` inside this tenant's prefix.
    ///
    /// ```
    /// use bucketfront_core::TenantKey;
    ///
    /// let tenant = TenantKey::new("gen.dev", "local-test");
    /// assert_eq!(
    ///     tenant.object_key("a-directory/index.html"),
    ///     "gen.dev/local-test/a-directory/index.html"
    /// );
    /// ```
    #[must_use]
    pub fn object_key(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        format!("{}/{}/{relative}", self.parent_domain, self.sub_domain)
    }

    /// The dev-mode URL prefix (`/parent/sub`) for this tenant.
    #[must_use]
    pub fn dev_prefix(&self) -> String {
        format!("/{}/{}", self.parent_domain, self.sub_domain)
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sub_domain, self.parent_domain)
    }
}
