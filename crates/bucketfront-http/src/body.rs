//! Response body type shared by the origin and edge services.
//!
//! [`FrontBody`] supports three modes:
//!
//! - **Buffered**: short fixed bodies (`File not found`, metrics, cached edge
//!   objects).
//! - **Empty**: redirects, 304s.
//! - **Streaming**: object bodies relayed chunk by chunk. A read error after
//!   the headers have gone out is logged, counted and surfaced to hyper as an
//!   error, which aborts the connection rather than sending a truncated body
//!   that looks complete.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::Stream;
use http_body_util::Full;
use tracing::error;

use crate::metrics::Metrics;

/// A stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Response body supporting buffered, empty and streaming modes.
#[derive(Default)]
pub enum FrontBody {
    /// A complete body held in memory.
    Buffered(Full<Bytes>),
    /// No body.
    #[default]
    Empty,
    /// A body relayed from a stream.
    Streaming(StreamingBody),
}

/// The streaming variant's state.
pub struct StreamingBody {
    stream: BodyStream,
    label: String,
    metrics: Option<Arc<Metrics>>,
    size: Option<u64>,
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody")
            .field("label", &self.label)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for FrontBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(full) => f.debug_tuple("Buffered").field(full).finish(),
            Self::Empty => f.write_str("Empty"),
            Self::Streaming(body) => f.debug_tuple("Streaming").field(body).finish(),
        }
    }
}

impl FrontBody {
    /// Create a buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Create a buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Relay `stream`. `label` names the source in error logs; `size`, when
    /// known, is reported as the exact size hint.
    #[must_use]
    pub fn streaming(
        stream: BodyStream,
        label: impl Into<String>,
        size: Option<u64>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self::Streaming(StreamingBody {
            stream,
            label: label.into(),
            metrics,
            size,
        })
    }
}

impl http_body::Body for FrontBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Empty => Poll::Ready(None),
            Self::Streaming(body) => match ready!(body.stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => Poll::Ready(Some(Ok(http_body::Frame::data(chunk)))),
                Some(Err(e)) => {
                    error!(source = %body.label, error = %e, "body stream failed mid-transfer");
                    if let Some(metrics) = &body.metrics {
                        metrics.record_stream_error();
                    }
                    Poll::Ready(Some(Err(e)))
                }
                None => Poll::Ready(None),
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Empty => true,
            Self::Streaming(body) => body.size == Some(0),
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Empty => http_body::SizeHint::with_exact(0),
            Self::Streaming(body) => body
                .size
                .map_or_else(http_body::SizeHint::default, http_body::SizeHint::with_exact),
        }
    }
}
