//! Per-request context and conditional request evaluation.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Format used for `Last-Modified`, `Expires` and `If-Modified-Since`.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Conditional request headers sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    /// Raw `If-None-Match` value.
    pub if_none_match: Option<String>,
    /// Raw `If-Modified-Since` value.
    pub if_modified_since: Option<String>,
}

impl ConditionalHeaders {
    /// Read the validators from a header map.
    #[must_use]
    pub fn from_header_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            if name.eq_ignore_ascii_case("if-none-match") {
                headers.if_none_match = Some(value.to_owned());
            } else if name.eq_ignore_ascii_case("if-modified-since") {
                headers.if_modified_since = Some(value.to_owned());
            }
        }
        headers
    }

    /// Whether the client's cached copy is still current.
    ///
    /// Either validator matching is enough: the entity tag matches
    /// `If-None-Match`, or `If-Modified-Since` is at or after
    /// `last_modified` (compared at one-second precision).
    ///
    /// # Examples
    ///
    /// ```
    /// use bucketfront_core::ConditionalHeaders;
    /// use chrono::Utc;
    ///
    /// let headers = ConditionalHeaders {
    ///     if_none_match: Some("\"abc\"".into()),
    ///     if_modified_since: None,
    /// };
    /// assert!(headers.is_not_modified("\"abc\"", Utc::now()));
    /// assert!(!headers.is_not_modified("\"xyz\"", Utc::now()));
    /// ```
    #[must_use]
    pub fn is_not_modified(&self, etag: &str, last_modified: DateTime<Utc>) -> bool {
        let etag_matches = self
            .if_none_match
            .as_deref()
            .is_some_and(|inm| etag_list_matches(inm, etag));

        let not_modified_since = self
            .if_modified_since
            .as_deref()
            .and_then(parse_http_date)
            .is_some_and(|since| since >= last_modified.trunc_subsecs(0));

        etag_matches || not_modified_since
    }
}

/// Everything the origin needs to know about a request, derived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// The `Host` header (or URI authority).
    pub host: String,
    /// The percent-decoded request path.
    pub raw_path: String,
    /// Client validators.
    pub conditional: ConditionalHeaders,
    /// Whether dev-mode path tenants are enabled.
    pub is_dev: bool,
}

/// Whether any entity tag in an `If-None-Match` list matches `etag`.
///
/// Quotes and the weak `W/` prefix are ignored; `*` matches anything.
fn etag_list_matches(if_none_match: &str, etag: &str) -> bool {
    let target = normalize_etag(etag);
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || normalize_etag(candidate) == target)
}

/// Strip the weak prefix and surrounding double quotes from an entity tag.
fn normalize_etag(etag: &str) -> &str {
    let etag = etag.strip_prefix("W/").unwrap_or(etag);
    etag.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(etag)
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
///
/// ```
/// use bucketfront_core::request::format_http_date;
/// use chrono::{TimeZone, Utc};
///
/// let ts = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
/// assert_eq!(format_http_date(ts), "Sun, 06 Nov 1994 08:49:37 GMT");
/// ```
#[must_use]
pub fn format_http_date(ts: DateTime<Utc>) -> String {
    ts.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date, accepting the IMF-fixdate and RFC 2822 forms.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc2822(value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}
