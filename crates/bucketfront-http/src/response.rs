//! Response construction helpers.
//!
//! Responses are assembled with [`http::Response::new`] and header inserts,
//! so building one never fails. Header values that cannot be represented are
//! skipped with a warning.

use http::header::{self, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use tracing::warn;

use crate::body::FrontBody;

/// Body of every 404.
pub const NOT_FOUND_BODY: &str = "File not found";

/// Body of every 500.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// `Vary` value attached to composed responses.
pub const VARY_ACCEPT_ENCODING: &str = "Accept-Encoding";

/// A response with the given status and body.
#[must_use]
pub fn with_status(status: StatusCode, body: FrontBody) -> Response<FrontBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

/// A `text/plain` response.
#[must_use]
pub fn text(status: StatusCode, body: &'static str) -> Response<FrontBody> {
    let mut response = with_status(status, FrontBody::from_string(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// `404 File not found`.
#[must_use]
pub fn not_found() -> Response<FrontBody> {
    text(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

/// `500 Internal Server Error`.
#[must_use]
pub fn internal_error() -> Response<FrontBody> {
    text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY)
}

/// `405` with `Allow: GET`.
#[must_use]
pub fn method_not_allowed() -> Response<FrontBody> {
    let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("GET"));
    response
}

/// Insert a header from a dynamic string.
pub fn set_header(response: &mut Response<FrontBody>, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            response.headers_mut().insert(name, value);
        }
        Err(_) => warn!(header = %name, value, "dropping unrepresentable header value"),
    }
}
